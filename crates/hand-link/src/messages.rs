use crate::{Angle, JointAngles, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

fn default_speed() -> Angle {
    Angle::new(600)
}

fn default_telemetry_hz() -> f64 {
    5.0
}

/// Decode one optional field on its own; a malformed value reads as absent
/// instead of failing the whole record.
fn lenient<'de, D, T>(deserializer: D) -> core::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Some(value) = Option::<serde_json::Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            tracing::debug!("ignoring malformed telemetry field: {e}");
            Ok(None)
        }
    }
}

/// Records written by the operator side of the link.
///
/// Field presence is meaningful: each shape maps to exactly one JSON object layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    /// `{"hello": true}`
    Hello { hello: bool },
    /// `{"angles": [6 ints]}`
    Angles { angles: JointAngles },
    /// `{"cmd": "...", ...}`
    Command(Command),
}

impl Outbound {
    pub fn hello() -> Self {
        Outbound::Hello { hello: true }
    }

    pub fn angles(angles: JointAngles) -> Self {
        Outbound::Angles { angles }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Command> for Outbound {
    fn from(cmd: Command) -> Self {
        Outbound::Command(cmd)
    }
}

/// Control commands. `open`, `close` and `estop` bypass rate limiting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    SetSpeed {
        #[serde(default = "default_speed")]
        value: Angle,
    },
    SetTelemetryRateHz {
        #[serde(default = "default_telemetry_hz")]
        value: f64,
    },
    Open,
    Close,
    Estop,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetSpeed { .. } => "set_speed",
            Command::SetTelemetryRateHz { .. } => "set_telemetry_rate_hz",
            Command::Open => "open",
            Command::Close => "close",
            Command::Estop => "estop",
        }
    }
}

/// Records read by the operator side of the link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Telemetry { telemetry: TelemetryPayload },
    Ack(Ack),
}

/// Telemetry body. Every field is optional; absent or malformed fields mean "unchanged".
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    /// Server wall clock in seconds since the epoch.
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub t: Option<f64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub forces: Option<Vec<f64>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub temps: Option<Vec<f64>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<i64>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub angles: Option<JointAngles>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub speed: Option<Angle>,
}

/// Acknowledgement returned by the bridge for control records.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<Angle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_hz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estop: Option<bool>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Parse one inbound record. Malformed payloads are logged and discarded.
pub fn decode_inbound(text: &str) -> Option<Inbound> {
    match serde_json::from_str::<Inbound>(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::debug!("discarding malformed inbound payload: {e}");
            None
        }
    }
}
