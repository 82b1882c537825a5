use crate::{BridgeError, Result};
use hand_link::{Angle, JointAngles};
use parking_lot::Mutex;
use std::sync::Arc;

/// One telemetry read from the actuator.
#[derive(Clone, Debug, PartialEq)]
pub struct ActuatorReading {
    pub forces: Vec<f64>,
    pub temps: Vec<f64>,
    pub status: Vec<i64>,
    pub angles: JointAngles,
}

/// A minimal blocking hand interface. Calls may block on a serial bus, so
/// async code reaches it through `spawn_blocking`.
pub trait HandActuator: Send {
    /// Connect to the device.
    fn open(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Write all six joint targets in one batched transfer.
    fn write_angles(&mut self, angles: &JointAngles) -> Result<()>;

    fn set_speed(&mut self, speed: Angle) -> Result<()>;

    fn set_force(&mut self, force: Angle) -> Result<()>;

    fn open_all(&mut self) -> Result<()>;

    fn close_all(&mut self) -> Result<()>;

    fn read_telemetry(&mut self) -> Result<ActuatorReading>;

    fn close(&mut self);
}

pub type SharedActuator = Arc<Mutex<Box<dyn HandActuator>>>;

pub fn shared(actuator: Box<dyn HandActuator>) -> SharedActuator {
    Arc::new(Mutex::new(actuator))
}

/// Run one blocking actuator call off the async runtime.
pub(crate) async fn with_actuator<T, F>(actuator: &SharedActuator, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut dyn HandActuator) -> Result<T> + Send + 'static,
{
    let actuator = actuator.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = actuator.lock();
        if !guard.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        f(&mut **guard)
    })
    .await?
}
