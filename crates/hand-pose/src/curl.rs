//! Finger curl from landmark geometry.
//!
//! For each digit the tip-to-knuckle distance is divided by the
//! knuckle-to-wrist distance. That ratio is roughly independent of how far the
//! hand is from the camera, and it shrinks as the finger folds. The ratio is
//! mapped linearly onto `[0, 1]` between two thresholds and inverted into an
//! actuator angle (`1000` open, `0` closed).

use crate::landmarks::WRIST;
use crate::{Finger, Hand, HandSide, Observation, PoseError, Result};
use hand_link::{Angle, Joint, JointAngles, ANGLE_MAX, NEUTRAL_ANGLE};

/// Added to the knuckle-to-wrist distance so a collapsed hand never divides by zero.
pub const CURL_EPSILON: f64 = 1e-6;

/// Ratio band mapped onto curl `1.0 ..= 0.0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurlThresholds {
    /// Ratio at or below which the finger counts as fully bent.
    pub low: f64,
    /// Ratio at or above which the finger counts as straight.
    pub high: f64,
}

impl Default for CurlThresholds {
    fn default() -> Self {
        Self {
            low: 0.15,
            high: 0.5,
        }
    }
}

impl CurlThresholds {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        if !(low.is_finite() && high.is_finite()) || high <= low {
            return Err(PoseError::InvalidParameter(format!(
                "curl thresholds must satisfy low < high (got {low}, {high})"
            )));
        }
        Ok(Self { low, high })
    }
}

/// First hand carrying the requested side label. Hands of the other side are never used.
pub fn select_hand(observation: &Observation, side: HandSide) -> Option<&Hand> {
    observation.hands.iter().find(|h| h.side == side)
}

#[derive(Clone, Debug, Default)]
pub struct CurlEstimator {
    thresholds: CurlThresholds,
}

impl CurlEstimator {
    pub fn new(thresholds: CurlThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> CurlThresholds {
        self.thresholds
    }

    /// Curl of one digit in `[0, 1]`; `0` is straight.
    pub fn finger_curl(&self, hand: &Hand, finger: Finger) -> f64 {
        let wrist = hand.landmark(WRIST);
        let base = hand.landmark(finger.base());
        let tip = hand.landmark(finger.tip());
        let ratio = tip.distance(&base) / (base.distance(&wrist) + CURL_EPSILON);
        self.curl_from_ratio(ratio)
    }

    pub fn curl_from_ratio(&self, ratio: f64) -> f64 {
        let CurlThresholds { low, high } = self.thresholds;
        let curl = 1.0 - (ratio - low) / (high - low);
        if curl.is_nan() {
            return 0.0;
        }
        curl.clamp(0.0, 1.0)
    }

    /// Curls for every digit, in `Finger::ALL` order.
    pub fn curls(&self, hand: &Hand) -> [f64; 5] {
        Finger::ALL.map(|f| self.finger_curl(hand, f))
    }

    /// Six-joint target for `hand`. Thumb rotation is not observable from
    /// curl and stays at the neutral position.
    pub fn estimate(&self, hand: &Hand) -> JointAngles {
        let mut angles = JointAngles::open();
        for finger in Finger::ALL {
            angles.set(finger.joint(), curl_to_angle(self.finger_curl(hand, finger)));
        }
        angles.set(Joint::ThumbRotation, NEUTRAL_ANGLE);
        angles
    }

    /// Select the configured hand and estimate it, or `None` when it is absent.
    pub fn estimate_observation(
        &self,
        observation: &Observation,
        side: HandSide,
    ) -> Option<JointAngles> {
        select_hand(observation, side).map(|hand| self.estimate(hand))
    }
}

pub fn curl_to_angle(curl: f64) -> Angle {
    Angle::from_f64((1.0 - curl) * ANGLE_MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{INDEX_MCP, INDEX_TIP};
    use crate::{Landmark, LANDMARK_COUNT};

    fn hand_with_index(side: HandSide, tip_to_base: f64) -> Hand {
        let mut landmarks = [Landmark::new(0.5, 0.5); LANDMARK_COUNT];
        landmarks[WRIST] = Landmark::new(0.5, 0.5);
        landmarks[INDEX_MCP] = Landmark::new(0.5, 0.4);
        landmarks[INDEX_TIP] = Landmark::new(0.5, 0.4 - tip_to_base);
        Hand { side, landmarks }
    }

    #[test]
    fn test_index_scenario() {
        let est = CurlEstimator::default();
        let hand = hand_with_index(HandSide::Right, 0.02);
        let curl = est.finger_curl(&hand, Finger::Index);
        assert!((curl - 0.857).abs() < 1e-3);
        assert_eq!(est.estimate(&hand).get(Joint::Index).get(), 143);
    }

    #[test]
    fn test_curl_monotonic_in_tip_distance() {
        let est = CurlEstimator::default();
        let mut last = u16::MIN;
        for step in 0..60 {
            let hand = hand_with_index(HandSide::Right, step as f64 * 0.002);
            let angle = est.estimate(&hand).get(Joint::Index).get();
            // Straighter finger never yields a more closed command.
            assert!(angle >= last, "angle dropped at step {step}");
            last = angle;
        }
        assert_eq!(last, 1000);
    }

    #[test]
    fn test_degenerate_geometry_is_bounded() {
        let est = CurlEstimator::default();
        let collapsed = Hand {
            side: HandSide::Left,
            landmarks: [Landmark::new(0.3, 0.3); LANDMARK_COUNT],
        };
        let angles = est.estimate(&collapsed);
        for a in angles.values() {
            assert!(a <= 1000);
        }
        // Zero tip distance over zero base distance reads as fully bent.
        assert_eq!(angles.get(Joint::Pinky).get(), 0);
        assert_eq!(angles.get(Joint::ThumbRotation), NEUTRAL_ANGLE);
    }

    #[test]
    fn test_strict_side_selection() {
        let est = CurlEstimator::default();
        let obs = Observation::new(vec![hand_with_index(HandSide::Left, 0.2)]);
        assert!(est.estimate_observation(&obs, HandSide::Right).is_none());
        assert!(est.estimate_observation(&obs, HandSide::Left).is_some());

        let both = Observation::new(vec![
            hand_with_index(HandSide::Left, 0.0),
            hand_with_index(HandSide::Right, 0.2),
            hand_with_index(HandSide::Right, 0.0),
        ]);
        let picked = select_hand(&both, HandSide::Right).unwrap();
        assert_eq!(picked.landmarks[INDEX_TIP], Landmark::new(0.5, 0.2));
    }

    #[test]
    fn test_threshold_validation() {
        assert!(CurlThresholds::new(0.5, 0.15).is_err());
        assert!(CurlThresholds::new(0.1, f64::NAN).is_err());
        assert!(CurlThresholds::new(0.1, 0.6).is_ok());
    }
}
