//! Simulated hand for tests and dry runs.

use crate::{ActuatorReading, BridgeError, HandActuator, Result};
use hand_link::{Angle, JointAngles, JOINT_COUNT};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct State {
    connected: bool,
    angles: JointAngles,
    speed: Option<Angle>,
    force: Option<Angle>,
    writes: Vec<JointAngles>,
    fail_writes: bool,
    open_calls: u32,
    close_calls: u32,
    reads: u64,
}

/// In-process hand. Joints jump straight to their target; grip force grows
/// as fingers close.
pub struct MockHand {
    state: Arc<Mutex<State>>,
}

/// Test-side view of a [`MockHand`].
#[derive(Clone)]
pub struct MockHandProbe {
    state: Arc<Mutex<State>>,
}

impl MockHand {
    pub fn new() -> (MockHand, MockHandProbe) {
        let state = Arc::new(Mutex::new(State::default()));
        (
            MockHand {
                state: state.clone(),
            },
            MockHandProbe { state },
        )
    }
}

impl HandActuator for MockHand {
    fn open(&mut self) -> Result<()> {
        let mut s = self.state.lock();
        s.connected = true;
        s.open_calls += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn write_angles(&mut self, angles: &JointAngles) -> Result<()> {
        let mut s = self.state.lock();
        if s.fail_writes {
            return Err(BridgeError::Actuator("simulated bus timeout".to_string()));
        }
        s.angles = *angles;
        s.writes.push(*angles);
        Ok(())
    }

    fn set_speed(&mut self, speed: Angle) -> Result<()> {
        self.state.lock().speed = Some(speed);
        Ok(())
    }

    fn set_force(&mut self, force: Angle) -> Result<()> {
        self.state.lock().force = Some(force);
        Ok(())
    }

    fn open_all(&mut self) -> Result<()> {
        self.state.lock().angles = JointAngles::from_raw([1000; JOINT_COUNT]);
        Ok(())
    }

    fn close_all(&mut self) -> Result<()> {
        self.state.lock().angles = JointAngles::from_raw([0; JOINT_COUNT]);
        Ok(())
    }

    fn read_telemetry(&mut self) -> Result<ActuatorReading> {
        let mut s = self.state.lock();
        s.reads += 1;
        let angles = s.angles;
        let forces = angles
            .values()
            .iter()
            .map(|v| (1000 - *v) as f64 * 0.5)
            .collect();
        Ok(ActuatorReading {
            forces,
            temps: vec![31.5; JOINT_COUNT],
            status: vec![0; JOINT_COUNT],
            angles,
        })
    }

    fn close(&mut self) {
        let mut s = self.state.lock();
        s.connected = false;
        s.close_calls += 1;
    }
}

impl MockHandProbe {
    pub fn writes(&self) -> Vec<JointAngles> {
        self.state.lock().writes.clone()
    }

    pub fn angles(&self) -> JointAngles {
        self.state.lock().angles
    }

    pub fn speed(&self) -> Option<Angle> {
        self.state.lock().speed
    }

    pub fn force(&self) -> Option<Angle> {
        self.state.lock().force
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn open_calls(&self) -> u32 {
        self.state.lock().open_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.state.lock().close_calls
    }

    pub fn reads(&self) -> u64 {
        self.state.lock().reads
    }

    /// Simulate the device dropping off the bus.
    pub fn disconnect(&self) {
        self.state.lock().connected = false;
    }
}
