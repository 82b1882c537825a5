use crate::actuator::{shared, SharedActuator};
use crate::session::run_session;
use crate::{BridgeConfig, BridgeState, Driver, HandActuator, LatestOnly, Result, TelemetryPusher};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

/// A running bridge: actuator, driver and telemetry loops, and a TCP listener.
pub struct HandBridge {
    state: Arc<BridgeState>,
    listener: TcpListener,
    loops: Vec<JoinHandle<()>>,
}

impl HandBridge {
    /// Connect the actuator, apply the startup speed and force, start the
    /// background loops and bind the listener.
    pub async fn start(config: &BridgeConfig, actuator: Box<dyn HandActuator>) -> Result<Self> {
        config.validate()?;
        let actuator = shared(actuator);
        let (speed, force) = (config.initial_speed, config.initial_force);
        let startup = actuator.clone();
        tokio::task::spawn_blocking(move || {
            let mut hand = startup.lock();
            hand.open()?;
            hand.set_speed(speed)?;
            hand.set_force(force)
        })
        .await??;
        info!("hand connected (speed {speed}, force {force})");

        let listener = match TcpListener::bind(&config.listen).await {
            Ok(listener) => listener,
            Err(e) => {
                close_actuator(&actuator).await;
                return Err(e.into());
            }
        };

        let mailbox = Arc::new(LatestOnly::new());
        let state = Arc::new(BridgeState::new(
            actuator.clone(),
            mailbox.clone(),
            speed,
            config.telemetry_hz,
            config.telemetry_buffer,
        ));
        let driver = Driver::new(actuator, mailbox, config.driver_period());
        let loops = vec![
            tokio::spawn(driver.run()),
            tokio::spawn(TelemetryPusher::new(state.clone()).run()),
        ];

        Ok(Self {
            state,
            listener,
            loops,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<BridgeState> {
        self.state.clone()
    }

    /// Accept sessions until `shutdown` resolves, then stop everything.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let HandBridge {
            state,
            listener,
            loops,
        } = self;
        info!("bridge listening on {}", listener.local_addr()?);
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!("set_nodelay failed for {peer}: {e}");
                        }
                        sessions.spawn(run_session(state.clone(), stream, peer));
                    }
                    Err(e) => warn!("accept failed: {e}"),
                },
                Some(_) = sessions.join_next() => {}
            }
        }

        sessions.shutdown().await;
        for task in &loops {
            task.abort();
        }
        for task in loops {
            let _ = task.await;
        }
        close_actuator(&state.actuator()).await;
        info!("hand disconnected");
        Ok(())
    }
}

async fn close_actuator(actuator: &SharedActuator) {
    let actuator = actuator.clone();
    let closed = tokio::task::spawn_blocking(move || {
        let mut hand = actuator.lock();
        if hand.is_connected() {
            hand.close();
        }
    })
    .await;
    if let Err(e) = closed {
        warn!("failed to close actuator: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockHand;
    use hand_link::{decode_inbound, Ack, Angle, Inbound, JointAngles};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    fn local_config() -> BridgeConfig {
        BridgeConfig {
            listen: "127.0.0.1:0".to_string(),
            driver_period_ms: 20,
            telemetry_hz: 50.0,
            ..Default::default()
        }
    }

    async fn next_record(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Inbound {
        loop {
            let line = tokio::time::timeout(Duration::from_secs(3), lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Some(record) = decode_inbound(&line) {
                return record;
            }
        }
    }

    async fn next_ack(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Ack {
        loop {
            if let Inbound::Ack(ack) = next_record(lines).await {
                return ack;
            }
        }
    }

    #[tokio::test]
    async fn test_bridge_end_to_end() {
        let (hand, probe) = MockHand::new();
        let bridge = HandBridge::start(&local_config(), Box::new(hand)).await.unwrap();
        assert_eq!(probe.open_calls(), 1);
        assert_eq!(probe.speed(), Some(Angle::new(600)));
        assert_eq!(probe.force(), Some(Angle::new(500)));

        let addr = bridge.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(bridge.run_until(async {
            let _ = stop_rx.await;
        }));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"{\"hello\":true}\n").await.unwrap();
        assert_eq!(next_ack(&mut lines).await, Ack::ok());

        writer
            .write_all(b"{\"cmd\":\"set_speed\",\"value\":750}\n")
            .await
            .unwrap();
        assert_eq!(next_ack(&mut lines).await.speed, Some(Angle::new(750)));

        let target = JointAngles::from_raw([0, 100, 200, 300, 400, 500]);
        writer
            .write_all(b"{\"angles\":[0,100,200,300,400,500]}\n")
            .await
            .unwrap();
        // The driver writes within a tick and telemetry reports it back.
        loop {
            if let Inbound::Telemetry { telemetry } = next_record(&mut lines).await {
                if telemetry.angles == Some(target) {
                    assert_eq!(telemetry.speed, Some(Angle::new(750)));
                    break;
                }
            }
        }
        assert_eq!(probe.writes().first(), Some(&target));

        writer.write_all(b"{\"cmd\":\"wave\"}\n").await.unwrap();
        assert_eq!(next_ack(&mut lines).await, Ack::error("unknown message"));

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(probe.close_calls(), 1);
        assert!(!probe.is_connected());
    }

    #[tokio::test]
    async fn test_bind_failure_closes_actuator() {
        let (hand, probe) = MockHand::new();
        let config = BridgeConfig {
            listen: "not-an-address".to_string(),
            ..local_config()
        };
        assert!(HandBridge::start(&config, Box::new(hand)).await.is_err());
        assert_eq!(probe.close_calls(), 1);
    }
}
