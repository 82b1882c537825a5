use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use hand_bridge::{load_bridge_config, BridgeConfig, HandBridge, MockHand};
use hand_link::{DuplexChannel, MockChannel, TcpChannel};
use hand_pose::{observation_from_json, CurlEstimator, CurlThresholds, HandSide, MockPoseSource};
use teleop_control::{
    load_config_file, ControlHandle, ControlLoop, ControlSnapshot, MetricsHub, Mode, TeleopConfig,
};

mod console;
use console::{parse_line, ConsoleCommand, HELP};

#[derive(Parser, Debug)]
#[command(
    name = "hand",
    version,
    about = "Dexterous hand teleoperation",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator control loop with a console on stdin
    Teleop {
        /// YAML config file; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Bridge address (host:port); without it an in-process mock link is used
        #[arg(long)]
        connect: Option<String>,
        /// Which hand drives the actuator
        #[arg(long)]
        side: Option<HandSide>,
        /// Start in this mode
        #[arg(long)]
        mode: Option<Mode>,
        /// Angle command rate in Hz
        #[arg(long)]
        send_hz: Option<f64>,
        /// Feed the loop from a synthetic opening/closing hand
        #[arg(long, action = ArgAction::SetTrue)]
        mock_pose: bool,
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Serve a simulated hand over TCP
    Bridge {
        /// YAML config file; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Listen address
        #[arg(long)]
        listen: Option<String>,
        /// Driver tick in milliseconds
        #[arg(long)]
        period_ms: Option<u64>,
    },
    /// Print the joint targets estimated from a landmark JSON file
    Estimate {
        /// Observation JSON: {"hands":[{"side":"right","landmarks":[{x,y,z}, ...21]}]}
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "right")]
        side: HandSide,
        #[arg(long, default_value_t = 0.15)]
        curl_low: f64,
        #[arg(long, default_value_t = 0.5)]
        curl_high: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Teleop {
            config,
            connect,
            side,
            mode,
            send_hz,
            mock_pose,
            duration_secs,
        } => {
            let mut cfg = match config {
                Some(path) => load_config_file(path)?,
                None => TeleopConfig::default(),
            };
            if let Some(side) = side {
                cfg.target_side = side;
            }
            if let Some(mode) = mode {
                cfg.initial_mode = mode;
            }
            if let Some(hz) = send_hz {
                cfg.send_hz = hz;
            }
            cfg.validate()?;
            run_teleop(cfg, connect, mock_pose, duration_secs.map(Duration::from_secs)).await
        }
        Commands::Bridge {
            config,
            listen,
            period_ms,
        } => {
            let mut cfg = match config {
                Some(path) => load_bridge_config(path)?,
                None => BridgeConfig::default(),
            };
            if let Some(listen) = listen {
                cfg.listen = listen;
            }
            if let Some(ms) = period_ms {
                cfg.driver_period_ms = ms;
            }
            run_bridge(cfg).await
        }
        Commands::Estimate {
            input,
            side,
            curl_low,
            curl_high,
        } => estimate(&input, side, curl_low, curl_high),
    }
}

async fn run_teleop(
    config: TeleopConfig,
    connect: Option<String>,
    mock_pose: bool,
    duration: Option<Duration>,
) -> Result<()> {
    let metrics = MetricsHub::new()?;
    let mut mock_remote = None;
    let channel: Box<dyn DuplexChannel> = match connect {
        Some(addr) => {
            info!("connecting to bridge at {addr}");
            Box::new(TcpChannel::new(addr))
        }
        None => {
            info!("no bridge address given; using an in-process mock link");
            let (chan, remote) = MockChannel::pair();
            mock_remote = Some(remote);
            Box::new(chan)
        }
    };

    let (control, handle) = ControlLoop::new(&config, channel, metrics.clone())?;
    let control = if mock_pose {
        control.with_pose_source(Box::new(MockPoseSource::new(config.target_side)))
    } else {
        control
    };
    let task = tokio::spawn(control.run());

    println!("{HELP}");
    let console = tokio::spawn(run_console(
        handle.clone(),
        metrics.clone(),
        spawn_stdin_reader(),
    ));
    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = deadline => info!("duration elapsed"),
        Ok(true) = console => info!("operator quit"),
    }
    // The loop may already be gone if the console asked it to quit.
    let _ = handle.shutdown();
    let report = task.await.context("control loop task")??;

    println!(
        "sent {} targets ({} coalesced, {} dropped), {} telemetry records, {} mode switches",
        report.stats.sent,
        report.stats.coalesced,
        report.stats.dropped,
        report.telemetry_received,
        report.mode_switches
    );
    println!("final target: {}", report.final_angles);
    if let Some(remote) = mock_remote {
        println!("mock link recorded {} records", remote.sent().len());
    }
    print!("{}", metrics.encode_text());
    Ok(())
}

/// Read stdin on a plain thread. A blocked read on tokio's blocking pool would
/// hold up runtime shutdown until the operator pressed Enter.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("console-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("stdin read failed: {e}");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!("console disabled, failed to start stdin reader: {e}");
    }
    rx
}

/// Returns `true` when the operator asked to quit, `false` when stdin closed.
async fn run_console(
    handle: ControlHandle,
    metrics: MetricsHub,
    mut lines: mpsc::UnboundedReceiver<String>,
) -> bool {
    while let Some(line) = lines.recv().await {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match command {
            ConsoleCommand::Event(event) => {
                if handle.send(event).is_err() {
                    return true;
                }
            }
            ConsoleCommand::Status => print_status(&handle.snapshot()),
            ConsoleCommand::Metrics => print!("{}", metrics.encode_text()),
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => return true,
        }
    }
    false
}

fn print_status(snap: &ControlSnapshot) {
    println!(
        "mode={} connected={} angles={} speed={} pending={}",
        snap.mode, snap.connected, snap.angles, snap.speed, snap.pending
    );
    println!(
        "telemetry {:.1} Hz forces={:?} temps={:?} status={:?}",
        snap.telemetry_rate_hz, snap.telemetry.forces, snap.telemetry.temps, snap.telemetry.status
    );
    if let Some(status) = &snap.last_status {
        println!("last status: {status}");
    }
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    let (hand, _probe) = MockHand::new();
    let bridge = HandBridge::start(&config, Box::new(hand))
        .await
        .context("starting bridge")?;
    info!("simulated hand ready on {}", bridge.local_addr()?);
    bridge
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {e}");
            }
        })
        .await?;
    Ok(())
}

fn estimate(input: &Path, side: HandSide, low: f64, high: f64) -> Result<()> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let observation = observation_from_json(&text)?;
    let estimator = CurlEstimator::new(CurlThresholds::new(low, high)?);
    match estimator.estimate_observation(&observation, side) {
        Some(angles) => println!("{}", serde_json::to_string(&angles)?),
        None => println!("no {side} hand in {}", input.display()),
    }
    Ok(())
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_drains_line_channel() {
        let (channel, _remote) = MockChannel::pair();
        let metrics = MetricsHub::new().unwrap();
        let (control, handle) =
            ControlLoop::new(&TeleopConfig::default(), Box::new(channel), metrics.clone())
                .unwrap();
        let task = tokio::spawn(control.run());

        // Input closing ends the console without quitting.
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("mode manual".to_string()).unwrap();
        tx.send("bogus".to_string()).unwrap();
        drop(tx);
        assert!(!run_console(handle.clone(), metrics.clone(), rx).await);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send("quit".to_string()).unwrap();
        assert!(run_console(handle.clone(), metrics, rx).await);

        handle.shutdown().unwrap();
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.final_mode, Mode::Manual);
    }
}
