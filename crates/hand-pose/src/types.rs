use core::fmt;
use hand_link::Joint;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Landmarks per detected hand.
pub const LANDMARK_COUNT: usize = 21;

/// Landmark topology: wrist first, then four points per digit from base to tip.
pub mod landmarks {
    pub const WRIST: usize = 0;
    pub const THUMB_CMC: usize = 1;
    pub const THUMB_MCP: usize = 2;
    pub const THUMB_IP: usize = 3;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_MCP: usize = 5;
    pub const INDEX_PIP: usize = 6;
    pub const INDEX_DIP: usize = 7;
    pub const INDEX_TIP: usize = 8;
    pub const MIDDLE_MCP: usize = 9;
    pub const MIDDLE_PIP: usize = 10;
    pub const MIDDLE_DIP: usize = 11;
    pub const MIDDLE_TIP: usize = 12;
    pub const RING_MCP: usize = 13;
    pub const RING_PIP: usize = 14;
    pub const RING_DIP: usize = 15;
    pub const RING_TIP: usize = 16;
    pub const PINKY_MCP: usize = 17;
    pub const PINKY_PIP: usize = 18;
    pub const PINKY_DIP: usize = 19;
    pub const PINKY_TIP: usize = 20;
}

/// Normalized image-space point. `z` is optional on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn distance(&self, other: &Landmark) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Handedness label reported by the pose engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandSide {
    #[serde(alias = "Left")]
    Left,
    #[serde(alias = "Right")]
    Right,
}

impl fmt::Display for HandSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandSide::Left => f.write_str("left"),
            HandSide::Right => f.write_str("right"),
        }
    }
}

impl core::str::FromStr for HandSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(HandSide::Left),
            "right" | "r" => Ok(HandSide::Right),
            other => Err(format!("unknown hand side: {other}")),
        }
    }
}

/// One detected hand. Deserialization rejects anything but 21 landmarks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hand {
    pub side: HandSide,
    pub landmarks: [Landmark; LANDMARK_COUNT],
}

impl Hand {
    pub fn landmark(&self, index: usize) -> Landmark {
        self.landmarks[index % LANDMARK_COUNT]
    }
}

/// All hands found in one inference cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default)]
    pub hands: Vec<Hand>,
    #[serde(skip)]
    pub ts: Option<OffsetDateTime>,
}

impl Observation {
    pub fn new(hands: Vec<Hand>) -> Self {
        Self {
            hands,
            ts: Some(OffsetDateTime::now_utc()),
        }
    }
}

/// Digits whose curl is measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    pub fn tip(self) -> usize {
        match self {
            Finger::Thumb => landmarks::THUMB_TIP,
            Finger::Index => landmarks::INDEX_TIP,
            Finger::Middle => landmarks::MIDDLE_TIP,
            Finger::Ring => landmarks::RING_TIP,
            Finger::Pinky => landmarks::PINKY_TIP,
        }
    }

    /// Knuckle the curl ratio is measured from.
    pub fn base(self) -> usize {
        match self {
            Finger::Thumb => landmarks::THUMB_MCP,
            Finger::Index => landmarks::INDEX_MCP,
            Finger::Middle => landmarks::MIDDLE_MCP,
            Finger::Ring => landmarks::RING_MCP,
            Finger::Pinky => landmarks::PINKY_MCP,
        }
    }

    /// Actuator joint driven by this digit.
    pub fn joint(self) -> Joint {
        match self {
            Finger::Thumb => Joint::ThumbBend,
            Finger::Index => Joint::Index,
            Finger::Middle => Joint::Middle,
            Finger::Ring => Joint::Ring,
            Finger::Pinky => Joint::Pinky,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hand_requires_21_landmarks() {
        let point = r#"{"x":0.1,"y":0.2}"#;
        let short = format!(
            r#"{{"side":"Right","landmarks":[{}]}}"#,
            vec![point; 20].join(",")
        );
        assert!(serde_json::from_str::<Hand>(&short).is_err());

        let full = format!(
            r#"{{"side":"Right","landmarks":[{}]}}"#,
            vec![point; 21].join(",")
        );
        let hand: Hand = serde_json::from_str(&full).unwrap();
        assert_eq!(hand.side, HandSide::Right);
        assert_eq!(hand.landmarks[3].z, 0.0);
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!("Left".parse::<HandSide>().unwrap(), HandSide::Left);
        assert_eq!("r".parse::<HandSide>().unwrap(), HandSide::Right);
        assert!("both".parse::<HandSide>().is_err());
    }

    #[test]
    fn test_finger_joint_mapping() {
        assert_eq!(Finger::Pinky.joint().index(), 0);
        assert_eq!(Finger::Thumb.joint().index(), 4);
        assert_eq!(Finger::Index.base(), landmarks::INDEX_MCP);
    }
}
