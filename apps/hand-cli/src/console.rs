//! Line-oriented operator commands typed on stdin.

use hand_link::{Angle, Joint, JointAngles, JOINT_COUNT};
use teleop_control::{ControlEvent, DirectCommand, Mode};

#[derive(Debug)]
pub enum ConsoleCommand {
    Event(ControlEvent),
    Status,
    Metrics,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  mode teleop|manual        switch input mode
  set <joint> <0..1000>     edit one joint (manual mode)
  angles <6 values>         replace the whole target (manual mode)
  speed <0..1000>           finger speed
  rate <hz>                 angle command rate
  keepalive <hz>            manual keepalive rate
  telemetry <hz>            telemetry push rate requested from the bridge
  open | close | estop      direct commands
  status | metrics | help | quit";

fn parse_value(token: Option<&str>, what: &str) -> Result<f64, String> {
    let token = token.ok_or_else(|| format!("missing {what}"))?;
    token
        .parse::<f64>()
        .map_err(|_| format!("invalid {what}: {token}"))
}

/// Parse one console line. Empty lines parse to `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let event = match head.to_ascii_lowercase().as_str() {
        "mode" => {
            let mode: Mode = words.next().ok_or("missing mode")?.parse()?;
            ControlEvent::SetMode(mode)
        }
        "set" => {
            let joint: Joint = words.next().ok_or("missing joint")?.parse()?;
            let value = parse_value(words.next(), "angle")?;
            ControlEvent::SetJoint {
                joint,
                angle: Angle::from_f64(value),
            }
        }
        "angles" => {
            let values = words
                .map(|w| w.parse::<f64>().map_err(|_| format!("invalid angle: {w}")))
                .collect::<Result<Vec<_>, _>>()?;
            let angles = JointAngles::from_slice(&values)
                .ok_or_else(|| format!("need {JOINT_COUNT} angles, got {}", values.len()))?;
            ControlEvent::SetAngles(angles)
        }
        "speed" => ControlEvent::SetSpeed(Angle::from_f64(parse_value(words.next(), "speed")?)),
        "rate" => ControlEvent::SetSendRate(parse_value(words.next(), "rate")?),
        "keepalive" => ControlEvent::SetKeepaliveRate(parse_value(words.next(), "rate")?),
        "telemetry" => ControlEvent::SetTelemetryRate(parse_value(words.next(), "rate")?),
        "open" | "close" | "estop" | "stop" => ControlEvent::Direct(head.parse::<DirectCommand>()?),
        "status" => return Ok(Some(ConsoleCommand::Status)),
        "metrics" => return Ok(Some(ConsoleCommand::Metrics)),
        "help" | "?" => return Ok(Some(ConsoleCommand::Help)),
        "quit" | "exit" | "q" => return Ok(Some(ConsoleCommand::Quit)),
        other => return Err(format!("unknown command: {other} (try help)")),
    };
    Ok(Some(ConsoleCommand::Event(event)))
}
