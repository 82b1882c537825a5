//! Pose sources that need no camera or inference engine.

use crate::curl::CurlThresholds;
use crate::landmarks::{THUMB_CMC, WRIST};
use crate::{Finger, Hand, HandSide, Landmark, Observation, PoseSource, Result, LANDMARK_COUNT};
use rand::Rng;
use std::collections::VecDeque;

const PALM_LENGTH: f64 = 0.25;

/// Build a hand whose digits have the given curls (in `Finger::ALL` order)
/// under the default thresholds.
pub fn synthetic_hand(side: HandSide, curls: [f64; 5]) -> Hand {
    let thresholds = CurlThresholds::default();
    let wrist = Landmark::new(0.5, 0.9);
    let mut landmarks = [wrist; LANDMARK_COUNT];

    for (i, finger) in Finger::ALL.iter().enumerate() {
        // Fan the digits out between -60 and +60 degrees from vertical.
        let theta = (-60.0 + 30.0 * i as f64).to_radians();
        let (dx, dy) = (theta.sin(), -theta.cos());
        let curl = curls[i].clamp(0.0, 1.0);
        let ratio = thresholds.high - curl * (thresholds.high - thresholds.low);

        let base = Landmark::new(wrist.x + dx * PALM_LENGTH, wrist.y + dy * PALM_LENGTH);
        let reach = ratio * PALM_LENGTH;
        let tip_index = finger.tip();
        let base_index = finger.base();
        landmarks[base_index] = base;
        // Joints between knuckle and tip sit evenly along the digit.
        let segments = (tip_index - base_index) as f64;
        for (k, idx) in (base_index + 1..=tip_index).enumerate() {
            let t = (k + 1) as f64 / segments;
            landmarks[idx] = Landmark::new(base.x + dx * reach * t, base.y + dy * reach * t);
        }
    }
    let thumb_base = landmarks[Finger::Thumb.base()];
    landmarks[THUMB_CMC] = Landmark::new(
        (landmarks[WRIST].x + thumb_base.x) / 2.0,
        (landmarks[WRIST].y + thumb_base.y) / 2.0,
    );

    Hand { side, landmarks }
}

/// Replays a fixed list of inference results, then reports nothing.
#[derive(Default)]
pub struct ScriptedPoseSource {
    script: VecDeque<Option<Observation>>,
    polls: u64,
}

impl ScriptedPoseSource {
    pub fn new(script: impl IntoIterator<Item = Option<Observation>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            polls: 0,
        }
    }

    pub fn push(&mut self, observation: Option<Observation>) {
        self.script.push_back(observation);
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl PoseSource for ScriptedPoseSource {
    fn next_observation(&mut self) -> Result<Option<Observation>> {
        self.polls += 1;
        Ok(self.script.pop_front().flatten())
    }
}

/// Slowly opening and closing hand with detector-like jitter.
pub struct MockPoseSource {
    side: HandSide,
    frame: u64,
    period_frames: u64,
    jitter: f64,
}

impl MockPoseSource {
    pub fn new(side: HandSide) -> Self {
        Self {
            side,
            frame: 0,
            period_frames: 90,
            jitter: 0.03,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }
}

impl PoseSource for MockPoseSource {
    fn next_observation(&mut self) -> Result<Option<Observation>> {
        self.frame += 1;
        // Every so often the detector loses the hand.
        if self.frame % 45 == 0 {
            tracing::trace!(frame = self.frame, "simulated detector dropout");
            return Ok(None);
        }
        let phase = (self.frame % self.period_frames) as f64 / self.period_frames as f64;
        let base_curl = 0.5 - 0.5 * (phase * std::f64::consts::TAU).cos();
        let mut rng = rand::thread_rng();
        let mut curls = [0.0; 5];
        for (i, c) in curls.iter_mut().enumerate() {
            let lag = i as f64 * 0.05;
            let noise = if self.jitter > 0.0 {
                rng.gen_range(-self.jitter..self.jitter)
            } else {
                0.0
            };
            *c = (base_curl - lag + noise).clamp(0.0, 1.0);
        }
        Ok(Some(Observation::new(vec![synthetic_hand(self.side, curls)])))
    }
}
