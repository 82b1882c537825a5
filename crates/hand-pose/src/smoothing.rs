//! Exponential moving average over the six-joint target.

use crate::{PoseError, Result};
use hand_link::{Angle, JointAngles, JOINT_COUNT};

/// The running state stays in floating point; only the returned target is
/// rounded, so small steps keep accumulating toward the target.
#[derive(Clone, Debug)]
pub struct EmaSmoother {
    alpha: f64,
    prev: Option<[f64; JOINT_COUNT]>,
}

impl EmaSmoother {
    /// `alpha` must lie in `(0, 1]`; `1.0` disables smoothing.
    pub fn new(alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(PoseError::InvalidParameter(format!(
                "smoothing alpha must be in (0, 1], got {alpha}"
            )));
        }
        Ok(Self { alpha, prev: None })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn previous(&self) -> Option<JointAngles> {
        self.prev.map(round_angles)
    }

    /// Blend `target` into the running state. With no history the target
    /// passes through unchanged.
    pub fn apply(&mut self, target: JointAngles) -> JointAngles {
        let target = (*target.as_array()).map(Angle::as_f64);
        let state = match self.prev {
            None => target,
            Some(mut prev) => {
                for (p, t) in prev.iter_mut().zip(target) {
                    *p += self.alpha * (t - *p);
                }
                prev
            }
        };
        self.prev = Some(state);
        round_angles(state)
    }

    /// Forget history; the next target passes through.
    pub fn reset(&mut self) {
        self.prev = None;
    }
}

fn round_angles(values: [f64; JOINT_COUNT]) -> JointAngles {
    JointAngles::new(values.map(Angle::from_f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_start_passes_through() {
        let mut s = EmaSmoother::new(0.2).unwrap();
        let target = JointAngles::from_raw([10, 20, 30, 40, 50, 60]);
        assert_eq!(s.apply(target), target);
    }

    #[test]
    fn test_alpha_one_is_identity() {
        let mut s = EmaSmoother::new(1.0).unwrap();
        s.apply(JointAngles::from_raw([0; 6]));
        let target = JointAngles::from_raw([1000, 900, 800, 700, 600, 500]);
        assert_eq!(s.apply(target), target);
    }

    #[test]
    fn test_blend_and_round() {
        let mut s = EmaSmoother::new(0.5).unwrap();
        s.apply(JointAngles::from_raw([0; 6]));
        let out = s.apply(JointAngles::from_raw([1000, 1000, 1000, 1000, 1000, 3]));
        assert_eq!(out.values(), [500, 500, 500, 500, 500, 2]);
        // Internal state is 1.5 then 2.25 on the last joint; only the output is rounded.
        let out = s.apply(JointAngles::from_raw([1000, 1000, 1000, 1000, 1000, 3]));
        assert_eq!(out.values(), [750, 750, 750, 750, 750, 2]);
    }

    #[test]
    fn test_small_alpha_converges_to_target() {
        let mut s = EmaSmoother::new(0.1).unwrap();
        s.apply(JointAngles::from_raw([0; 6]));
        let target = JointAngles::from_raw([1000; 6]);
        let mut out = JointAngles::from_raw([0; 6]);
        for _ in 0..500 {
            out = s.apply(target);
        }
        assert_eq!(out, target);

        let mut s = EmaSmoother::new(0.1).unwrap();
        s.apply(JointAngles::from_raw([0; 6]));
        // 0.1 * 3 would round to zero on every frame if the state were rounded.
        let near = JointAngles::from_raw([3; 6]);
        for _ in 0..100 {
            out = s.apply(near);
        }
        assert_eq!(out, near);
    }

    #[test]
    fn test_reset_returns_to_cold_start() {
        let mut s = EmaSmoother::new(0.1).unwrap();
        s.apply(JointAngles::from_raw([0; 6]));
        s.reset();
        let target = JointAngles::open();
        assert_eq!(s.apply(target), target);
    }

    #[test]
    fn test_alpha_validation() {
        assert!(EmaSmoother::new(0.0).is_err());
        assert!(EmaSmoother::new(1.5).is_err());
        assert!(EmaSmoother::new(f64::NAN).is_err());
    }
}
