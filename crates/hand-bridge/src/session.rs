//! Per-connection record handling.
//!
//! Records are the same JSON objects the control loop writes. Angle targets
//! are posted to the mailbox and never acknowledged on success; every other
//! record gets exactly one ack line back.

use crate::actuator::{shared, with_actuator, SharedActuator};
use crate::telemetry::clamp_telemetry_hz;
use crate::{HandActuator, LatestOnly};
use hand_link::{Ack, Angle, JointAngles, JOINT_COUNT};
use parking_lot::Mutex;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_SPEED: f64 = 600.0;

/// State shared by sessions and the background loops.
pub struct BridgeState {
    pub(crate) actuator: SharedActuator,
    mailbox: Arc<LatestOnly<JointAngles>>,
    speed: Mutex<Angle>,
    telemetry_hz: Mutex<f64>,
    telemetry: broadcast::Sender<String>,
}

impl BridgeState {
    pub fn new(
        actuator: SharedActuator,
        mailbox: Arc<LatestOnly<JointAngles>>,
        speed: Angle,
        telemetry_hz: f64,
        telemetry_buffer: usize,
    ) -> Self {
        let (telemetry, _) = broadcast::channel(telemetry_buffer.max(1));
        Self {
            actuator,
            mailbox,
            speed: Mutex::new(speed),
            telemetry_hz: Mutex::new(clamp_telemetry_hz(telemetry_hz)),
            telemetry,
        }
    }

    pub fn for_actuator(
        actuator: Box<dyn HandActuator>,
        speed: Angle,
        telemetry_hz: f64,
        telemetry_buffer: usize,
    ) -> Self {
        Self::new(
            shared(actuator),
            Arc::new(LatestOnly::new()),
            speed,
            telemetry_hz,
            telemetry_buffer,
        )
    }

    pub fn actuator(&self) -> SharedActuator {
        self.actuator.clone()
    }

    pub fn mailbox(&self) -> Arc<LatestOnly<JointAngles>> {
        self.mailbox.clone()
    }

    pub fn speed(&self) -> Angle {
        *self.speed.lock()
    }

    pub fn telemetry_hz(&self) -> f64 {
        *self.telemetry_hz.lock()
    }

    /// Store a clamped push rate and return it.
    pub fn set_telemetry_hz(&self, hz: f64) -> f64 {
        let hz = clamp_telemetry_hz(hz);
        *self.telemetry_hz.lock() = hz;
        hz
    }

    pub fn telemetry_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.telemetry_hz())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.telemetry.subscribe()
    }

    pub fn subscribers(&self) -> usize {
        self.telemetry.receiver_count()
    }

    /// Returns how many sessions the record was queued for.
    pub fn broadcast(&self, text: String) -> usize {
        self.telemetry.send(text).unwrap_or(0)
    }

    /// A busy actuator (mid-write) counts as connected.
    pub fn actuator_connected(&self) -> bool {
        self.actuator
            .try_lock()
            .map(|hand| hand.is_connected())
            .unwrap_or(true)
    }
}

fn number_or(value: Option<&Value>, missing: f64, invalid: f64) -> f64 {
    match value {
        None => missing,
        Some(v) => v.as_f64().unwrap_or(invalid),
    }
}

/// Handle one inbound record and produce the reply, if any.
pub async fn handle_record(state: &BridgeState, text: &str) -> Option<Ack> {
    let record: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!("invalid record: {e}");
            return Some(Ack::error("invalid json"));
        }
    };

    if let Some(angles) = record.get("angles") {
        let values: Option<Vec<f64>> = angles
            .as_array()
            .map(|items| items.iter().map(|v| v.as_f64().unwrap_or(0.0)).collect());
        return match values.as_deref().and_then(JointAngles::from_slice) {
            Some(target) => {
                state.mailbox.put(target);
                None
            }
            None => Some(Ack::error(format!("need {JOINT_COUNT} angles"))),
        };
    }

    let ack = match record.get("cmd").and_then(Value::as_str) {
        Some("set_speed") => {
            let speed = Angle::from_f64(number_or(record.get("value"), DEFAULT_SPEED, 0.0));
            *state.speed.lock() = speed;
            match with_actuator(&state.actuator, move |hand| hand.set_speed(speed)).await {
                Ok(()) => Ack {
                    speed: Some(speed),
                    ..Ack::ok()
                },
                Err(e) => Ack::error(e.to_string()),
            }
        }
        Some("set_telemetry_rate_hz") => {
            let hz = state.set_telemetry_hz(number_or(record.get("value"), 5.0, 5.0));
            Ack {
                telemetry_hz: Some(hz),
                ..Ack::ok()
            }
        }
        Some("estop") => {
            let stop = Angle::new(0);
            match with_actuator(&state.actuator, move |hand| hand.set_speed(stop)).await {
                Ok(()) => {
                    *state.speed.lock() = stop;
                    warn!("emergency stop");
                    Ack {
                        estop: Some(true),
                        ..Ack::ok()
                    }
                }
                Err(e) => Ack::error(e.to_string()),
            }
        }
        Some("open") => ack_for(with_actuator(&state.actuator, |hand| hand.open_all()).await),
        Some("close") => ack_for(with_actuator(&state.actuator, |hand| hand.close_all()).await),
        Some(_) => Ack::error("unknown message"),
        None if record.get("hello").is_some() => Ack::ok(),
        None => Ack::error("unknown message"),
    };
    Some(ack)
}

fn ack_for(result: crate::Result<()>) -> Ack {
    match result {
        Ok(()) => Ack::ok(),
        Err(e) => Ack::error(e.to_string()),
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await
}

/// Serve one operator connection until it closes or falls behind on telemetry.
pub(crate) async fn run_session(state: Arc<BridgeState>, stream: TcpStream, peer: SocketAddr) {
    let id = Uuid::new_v4();
    info!("session {id} opened from {peer}");
    let mut telemetry = state.subscribe();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let Some(ack) = handle_record(&state, &line).await else {
                        continue;
                    };
                    let text = match serde_json::to_string(&ack) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("session {id}: failed to encode ack: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = write_line(&mut writer, &text).await {
                        debug!("session {id}: write failed: {e}");
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("session {id}: read failed: {e}");
                    break;
                }
            },
            record = telemetry.recv() => match record {
                Ok(text) => {
                    if let Err(e) = write_line(&mut writer, &text).await {
                        debug!("session {id}: write failed: {e}");
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("session {id}: too slow, missed {missed} telemetry records; dropping");
                    break;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    info!("session {id} closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockHand, MockHandProbe};

    fn state() -> (BridgeState, MockHandProbe) {
        let (mut hand, probe) = MockHand::new();
        hand.open().unwrap();
        let state = BridgeState::for_actuator(Box::new(hand), Angle::new(600), 5.0, 4);
        (state, probe)
    }

    #[tokio::test]
    async fn test_angles_are_posted_without_ack() {
        let (state, _probe) = state();
        let ack = handle_record(&state, r#"{"angles":[0,100,200,300,1400,-5]}"#).await;
        assert!(ack.is_none());
        assert_eq!(
            state.mailbox.take(),
            Some(JointAngles::from_raw([0, 100, 200, 300, 1000, 0]))
        );

        let ack = handle_record(&state, r#"{"angles":[1,2,3]}"#).await.unwrap();
        assert_eq!(ack, Ack::error("need 6 angles"));
        let ack = handle_record(&state, r#"{"angles":"open"}"#).await.unwrap();
        assert!(!ack.ok);
        assert!(state.mailbox.take().is_none());
    }

    #[tokio::test]
    async fn test_speed_commands() {
        let (state, probe) = state();
        let ack = handle_record(&state, r#"{"cmd":"set_speed","value":1500}"#).await.unwrap();
        assert_eq!(ack.speed, Some(Angle::new(1000)));
        assert_eq!(probe.speed(), Some(Angle::new(1000)));

        let ack = handle_record(&state, r#"{"cmd":"set_speed"}"#).await.unwrap();
        assert_eq!(ack.speed, Some(Angle::new(600)));

        let ack = handle_record(&state, r#"{"cmd":"estop"}"#).await.unwrap();
        assert!(ack.ok);
        assert_eq!(ack.estop, Some(true));
        assert_eq!(probe.speed(), Some(Angle::new(0)));
        assert_eq!(state.speed(), Angle::new(0));
    }

    #[tokio::test]
    async fn test_telemetry_rate_is_clamped() {
        let (state, _probe) = state();
        let ack = handle_record(&state, r#"{"cmd":"set_telemetry_rate_hz","value":200}"#)
            .await
            .unwrap();
        assert_eq!(ack.telemetry_hz, Some(50.0));
        assert_eq!(state.telemetry_period(), Duration::from_millis(20));

        let ack = handle_record(&state, r#"{"cmd":"set_telemetry_rate_hz","value":"fast"}"#)
            .await
            .unwrap();
        assert_eq!(ack.telemetry_hz, Some(5.0));
    }

    #[tokio::test]
    async fn test_open_close_hello_and_unknown() {
        let (state, probe) = state();
        assert_eq!(handle_record(&state, r#"{"cmd":"close"}"#).await, Some(Ack::ok()));
        assert_eq!(probe.angles(), JointAngles::from_raw([0; 6]));
        assert_eq!(handle_record(&state, r#"{"cmd":"open"}"#).await, Some(Ack::ok()));
        assert_eq!(handle_record(&state, r#"{"hello":true}"#).await, Some(Ack::ok()));
        assert_eq!(
            handle_record(&state, r#"{"cmd":"dance"}"#).await,
            Some(Ack::error("unknown message"))
        );
        assert_eq!(
            handle_record(&state, r#"{"foo":1}"#).await,
            Some(Ack::error("unknown message"))
        );
        assert_eq!(
            handle_record(&state, "{not json").await,
            Some(Ack::error("invalid json"))
        );
    }

    #[tokio::test]
    async fn test_offline_actuator_reports_error() {
        let (state, probe) = state();
        probe.disconnect();
        let ack = handle_record(&state, r#"{"cmd":"open"}"#).await.unwrap();
        assert_eq!(ack, Ack::error("actuator not connected"));
    }
}
