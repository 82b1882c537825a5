use core::fmt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Upper bound of every actuator axis (fully open / maximum speed).
pub const ANGLE_MAX: u16 = 1000;

/// Number of actuated joints on the hand.
pub const JOINT_COUNT: usize = 6;

/// Mid-range value used for axes that are not derived from pose input.
pub const NEUTRAL_ANGLE: Angle = Angle(500);

/// Integer actuator command in `[0, 1000]`.
///
/// Every constructor clamps, so a value of this type is always in range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Angle(u16);

impl Angle {
    pub const MIN: Angle = Angle(0);
    pub const MAX: Angle = Angle(ANGLE_MAX);

    pub fn new(value: i64) -> Self {
        Self(value.clamp(0, ANGLE_MAX as i64) as u16)
    }

    /// Round to the nearest integer, then clamp. NaN maps to 0.
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() {
            return Self::MIN;
        }
        Self(value.round().clamp(0.0, ANGLE_MAX as f64) as u16)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for Angle {
    fn from(value: u16) -> Self {
        Self::new(value as i64)
    }
}

impl Serialize for Angle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.0)
    }
}

// Peers may send floats or out-of-range integers; both are clamped, not rejected.
impl<'de> Deserialize<'de> for Angle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Ok(Self::from_f64(raw))
    }
}

/// Actuator joints in wire order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    Pinky,
    Ring,
    Middle,
    Index,
    ThumbBend,
    ThumbRotation,
}

impl Joint {
    pub const ALL: [Joint; JOINT_COUNT] = [
        Joint::Pinky,
        Joint::Ring,
        Joint::Middle,
        Joint::Index,
        Joint::ThumbBend,
        Joint::ThumbRotation,
    ];

    pub fn index(self) -> usize {
        match self {
            Joint::Pinky => 0,
            Joint::Ring => 1,
            Joint::Middle => 2,
            Joint::Index => 3,
            Joint::ThumbBend => 4,
            Joint::ThumbRotation => 5,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Joint::Pinky => "pinky",
            Joint::Ring => "ring",
            Joint::Middle => "middle",
            Joint::Index => "index",
            Joint::ThumbBend => "thumb_bend",
            Joint::ThumbRotation => "thumb_rotation",
        }
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl core::str::FromStr for Joint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if let Ok(index) = lower.parse::<usize>() {
            return Joint::from_index(index).ok_or_else(|| format!("joint index out of range: {s}"));
        }
        Joint::ALL
            .iter()
            .copied()
            .find(|j| j.name() == lower || j.name().replace('_', "-") == lower)
            .ok_or_else(|| format!("unknown joint: {s}"))
    }
}

/// Six-joint command vector, serialized as a plain JSON array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointAngles([Angle; JOINT_COUNT]);

impl JointAngles {
    pub fn new(angles: [Angle; JOINT_COUNT]) -> Self {
        Self(angles)
    }

    pub fn from_raw(values: [i64; JOINT_COUNT]) -> Self {
        Self(values.map(Angle::new))
    }

    /// Fingers extended, thumb rotation centred.
    pub fn open() -> Self {
        Self([
            Angle::MAX,
            Angle::MAX,
            Angle::MAX,
            Angle::MAX,
            Angle::MAX,
            NEUTRAL_ANGLE,
        ])
    }

    pub fn get(&self, joint: Joint) -> Angle {
        self.0[joint.index()]
    }

    pub fn set(&mut self, joint: Joint, angle: Angle) {
        self.0[joint.index()] = angle;
    }

    pub fn with(mut self, joint: Joint, angle: Angle) -> Self {
        self.set(joint, angle);
        self
    }

    pub fn as_array(&self) -> &[Angle; JOINT_COUNT] {
        &self.0
    }

    pub fn values(&self) -> [u16; JOINT_COUNT] {
        self.0.map(Angle::get)
    }

    /// Build from an arbitrary slice; anything but exactly six entries is rejected.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        if values.len() != JOINT_COUNT {
            return None;
        }
        let mut out = [Angle::MIN; JOINT_COUNT];
        for (slot, v) in out.iter_mut().zip(values) {
            *slot = Angle::from_f64(*v);
        }
        Some(Self(out))
    }
}

impl Default for JointAngles {
    fn default() -> Self {
        Self::open()
    }
}

impl fmt::Display for JointAngles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.values();
        write!(
            f,
            "[{}, {}, {}, {}, {}, {}]",
            v[0], v[1], v[2], v[3], v[4], v[5]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_clamps_and_rounds() {
        assert_eq!(Angle::new(-5).get(), 0);
        assert_eq!(Angle::new(1500).get(), 1000);
        assert_eq!(Angle::from_f64(142.857).get(), 143);
        assert_eq!(Angle::from_f64(f64::NAN).get(), 0);
        assert_eq!(Angle::from_f64(1e9).get(), 1000);
    }

    #[test]
    fn test_angle_deserialize_lenient() {
        let a: Angle = serde_json::from_str("1234").unwrap();
        assert_eq!(a.get(), 1000);
        let b: Angle = serde_json::from_str("12.6").unwrap();
        assert_eq!(b.get(), 13);
        let c: Angle = serde_json::from_str("-3").unwrap();
        assert_eq!(c.get(), 0);
    }

    #[test]
    fn test_joint_angles_wire_shape() {
        let angles = JointAngles::from_raw([0, 100, 200, 300, 400, 500]);
        let json = serde_json::to_string(&angles).unwrap();
        assert_eq!(json, "[0,100,200,300,400,500]");
    }

    #[test]
    fn test_joint_angles_rejects_wrong_length() {
        assert!(serde_json::from_str::<JointAngles>("[1,2,3]").is_err());
        assert!(JointAngles::from_slice(&[1.0; 5]).is_none());
        assert!(JointAngles::from_slice(&[1.0; 6]).is_some());
    }

    #[test]
    fn test_joint_lookup() {
        assert_eq!("index".parse::<Joint>().unwrap(), Joint::Index);
        assert_eq!("thumb-rotation".parse::<Joint>().unwrap(), Joint::ThumbRotation);
        assert_eq!("4".parse::<Joint>().unwrap(), Joint::ThumbBend);
        assert!("elbow".parse::<Joint>().is_err());

        let mut angles = JointAngles::open();
        angles.set(Joint::Middle, Angle::new(250));
        assert_eq!(angles.values(), [1000, 1000, 250, 1000, 1000, 500]);
    }
}
