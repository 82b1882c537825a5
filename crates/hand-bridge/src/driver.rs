//! The only task that writes joint targets to the actuator.
//!
//! Each tick waits up to one period for a fresh target. Without one, the last
//! written target is re-sent so the hand keeps holding position. One batched
//! write per tick at most.

use crate::actuator::{with_actuator, SharedActuator};
use crate::LatestOnly;
use hand_link::JointAngles;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

pub struct Driver {
    actuator: SharedActuator,
    mailbox: Arc<LatestOnly<JointAngles>>,
    period: Duration,
    last_sent: Option<JointAngles>,
    writes: u64,
}

impl Driver {
    pub fn new(
        actuator: SharedActuator,
        mailbox: Arc<LatestOnly<JointAngles>>,
        period: Duration,
    ) -> Self {
        Self {
            actuator,
            mailbox,
            period,
            last_sent: None,
            writes: 0,
        }
    }

    pub fn last_sent(&self) -> Option<JointAngles> {
        self.last_sent
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Run one tick. Returns the target written, if any.
    pub async fn tick(&mut self) -> Option<JointAngles> {
        let latest = self.mailbox.get(self.period).await;
        let target = latest.or(self.last_sent)?;
        match with_actuator(&self.actuator, move |hand| hand.write_angles(&target)).await {
            Ok(()) => {
                self.last_sent = Some(target);
                self.writes += 1;
                debug!("driver wrote {target}");
                Some(target)
            }
            Err(e) => {
                warn!("driver write failed: {e}");
                None
            }
        }
    }

    /// Tick forever at the configured cadence. Stopped by aborting the task.
    pub async fn run(mut self) {
        loop {
            let started = Instant::now();
            self.tick().await;
            time::sleep_until(started + self.period).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shared, HandActuator, MockHand};

    fn driver() -> (Driver, Arc<LatestOnly<JointAngles>>, crate::MockHandProbe) {
        let (mut hand, probe) = MockHand::new();
        hand.open().unwrap();
        let mailbox = Arc::new(LatestOnly::new());
        let driver = Driver::new(
            shared(Box::new(hand)),
            mailbox.clone(),
            Duration::from_millis(100),
        );
        (driver, mailbox, probe)
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_driver_writes_nothing() {
        let (mut driver, _mailbox, probe) = driver();
        assert_eq!(driver.tick().await, None);
        assert!(probe.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_newest() {
        let (mut driver, mailbox, probe) = driver();
        let a = JointAngles::from_raw([100; 6]);
        let b = JointAngles::from_raw([900; 6]);
        mailbox.put(a);
        mailbox.put(b);
        assert_eq!(driver.tick().await, Some(b));
        assert_eq!(probe.writes(), vec![b]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_holds_last_target() {
        let (mut driver, mailbox, probe) = driver();
        let target = JointAngles::from_raw([0, 200, 400, 600, 800, 500]);
        mailbox.put(target);
        driver.tick().await;

        let start = Instant::now();
        assert_eq!(driver.tick().await, Some(target));
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert_eq!(probe.writes(), vec![target, target]);
        assert_eq!(driver.writes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_keeps_previous_target() {
        let (mut driver, mailbox, probe) = driver();
        let first = JointAngles::from_raw([300; 6]);
        let second = JointAngles::from_raw([700; 6]);
        mailbox.put(first);
        driver.tick().await;

        probe.set_fail_writes(true);
        mailbox.put(second);
        assert_eq!(driver.tick().await, None);
        assert_eq!(driver.last_sent(), Some(first));

        probe.set_fail_writes(false);
        assert_eq!(driver.tick().await, Some(first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_hand_is_not_written() {
        let (mut driver, mailbox, probe) = driver();
        probe.disconnect();
        mailbox.put(JointAngles::open());
        assert_eq!(driver.tick().await, None);
        assert!(probe.writes().is_empty());
    }
}
