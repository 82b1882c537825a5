//! Coalescing, rate-limited angle dispatcher.
//!
//! Producers hand in intents as fast as they like. The dispatcher keeps only
//! the newest one and writes it as soon as the minimum gap since the previous
//! send allows. Between sends at most one deferred wake-up is armed; once no
//! intent is pending the dispatcher goes quiet.
//!
//! The dispatcher holds no timer of its own. It exposes the armed deadline and
//! a `TimerToken`; the owning loop sleeps until the deadline and calls
//! [`Dispatcher::fire`] with the token. A token from a cancelled or replaced
//! arming is ignored.

use crate::metrics::DispatchCounters;
use crate::rate::min_gap_for_hz;
use hand_link::{DuplexChannel, JointAngles, Outbound};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Identifies one arming of the deferred wake-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerToken(u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub submitted: u64,
    pub sent: u64,
    pub coalesced: u64,
    pub dropped: u64,
}

/// What a submit or fire did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The pending intent went out on the wire.
    Sent,
    /// The pending intent was discarded because the link is not open.
    Dropped,
    /// A wake-up is armed for the given instant.
    Deferred(Instant),
    /// Nothing pending, nothing armed.
    Idle,
}

pub struct Dispatcher {
    pending: Option<JointAngles>,
    last_sent: Option<JointAngles>,
    last_sent_at: Option<Instant>,
    min_gap: Duration,
    timer: Option<(TimerToken, Instant)>,
    generation: u64,
    stats: DispatchStats,
    counters: Option<DispatchCounters>,
}

impl Dispatcher {
    pub fn new(rate_hz: f64) -> Self {
        Self {
            pending: None,
            last_sent: None,
            last_sent_at: None,
            min_gap: min_gap_for_hz(rate_hz),
            timer: None,
            generation: 0,
            stats: DispatchStats::default(),
            counters: None,
        }
    }

    pub fn with_counters(mut self, counters: DispatchCounters) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn min_gap(&self) -> Duration {
        self.min_gap
    }

    /// Change the target rate. An armed wake-up moves to the new slot.
    pub fn set_rate_hz(&mut self, hz: f64) {
        self.min_gap = min_gap_for_hz(hz);
        if self.timer.is_some() {
            if let Some(slot) = self.next_slot() {
                self.arm(slot);
            }
        }
    }

    pub fn pending(&self) -> Option<JointAngles> {
        self.pending
    }

    pub fn last_sent(&self) -> Option<JointAngles> {
        self.last_sent
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    pub fn deadline(&self) -> Option<(TimerToken, Instant)> {
        self.timer
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Record a new intent, replacing any unsent one, and send it if the gap allows.
    pub fn submit(
        &mut self,
        intent: JointAngles,
        now: Instant,
        channel: &mut dyn DuplexChannel,
    ) -> StepOutcome {
        self.stats.submitted += 1;
        if self.pending.replace(intent).is_some() {
            self.stats.coalesced += 1;
            if let Some(c) = &self.counters {
                c.intents_coalesced.inc();
            }
        }
        match self.timer {
            Some((_, at)) => StepOutcome::Deferred(at),
            None => self.step(now, channel),
        }
    }

    /// Deferred wake-up. Stale tokens are ignored.
    pub fn fire(
        &mut self,
        token: TimerToken,
        now: Instant,
        channel: &mut dyn DuplexChannel,
    ) -> StepOutcome {
        match self.timer {
            Some((armed, _)) if armed == token => {
                self.timer = None;
                self.step(now, channel)
            }
            _ => {
                debug!("ignoring stale dispatcher wake-up");
                StepOutcome::Idle
            }
        }
    }

    /// Disarm and forget anything unsent.
    pub fn cancel(&mut self) {
        self.timer = None;
        self.generation += 1;
        self.pending = None;
    }

    fn next_slot(&self) -> Option<Instant> {
        self.last_sent_at.map(|at| at + self.min_gap)
    }

    fn gap_elapsed(&self, now: Instant) -> bool {
        match self.last_sent_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.min_gap,
        }
    }

    fn arm(&mut self, at: Instant) -> StepOutcome {
        self.generation += 1;
        self.timer = Some((TimerToken(self.generation), at));
        StepOutcome::Deferred(at)
    }

    fn step(&mut self, now: Instant, channel: &mut dyn DuplexChannel) -> StepOutcome {
        let Some(intent) = self.pending else {
            self.timer = None;
            return StepOutcome::Idle;
        };
        if !self.gap_elapsed(now) {
            return match self.next_slot() {
                Some(slot) => self.arm(slot),
                None => StepOutcome::Idle,
            };
        }

        self.pending = None;
        let outcome = if !channel.is_open() {
            StepOutcome::Dropped
        } else {
            match channel.send(&Outbound::angles(intent)) {
                Ok(()) => StepOutcome::Sent,
                Err(e) => {
                    debug!("angle send failed: {e}");
                    StepOutcome::Dropped
                }
            }
        };

        match outcome {
            StepOutcome::Sent => {
                self.last_sent_at = Some(now);
                self.last_sent = Some(intent);
                self.stats.sent += 1;
                if let Some(c) = &self.counters {
                    c.commands_sent.inc();
                }
            }
            _ => {
                self.stats.dropped += 1;
                if let Some(c) = &self.counters {
                    c.sends_dropped.inc();
                }
            }
        }

        if self.pending.is_some() {
            if let Some(slot) = self.next_slot() {
                return self.arm(slot);
            }
        }
        self.timer = None;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hand_link::{MockChannel, MockRemote};
    use tokio::sync::mpsc;

    fn open_channel() -> (MockChannel, MockRemote, mpsc::UnboundedReceiver<hand_link::LinkEvent>) {
        let (mut chan, remote) = MockChannel::pair();
        let (tx, rx) = mpsc::unbounded_channel();
        chan.open(tx).unwrap();
        (chan, remote, rx)
    }

    fn intent(v: i64) -> JointAngles {
        JointAngles::from_raw([v; 6])
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Drive the dispatcher through a schedule of (time ms, intent) pairs with a
    /// simulated clock, firing wake-ups exactly on time. Returns send times and values.
    fn simulate(
        d: &mut Dispatcher,
        chan: &mut MockChannel,
        schedule: &[(u64, JointAngles)],
        until_ms: u64,
    ) -> Vec<(u64, JointAngles)> {
        let t0 = Instant::now();
        let mut sends = Vec::new();
        let mut next = 0;
        for now_ms in 0..=until_ms {
            let now = t0 + ms(now_ms);
            if let Some((token, at)) = d.deadline() {
                if at <= now {
                    if d.fire(token, now, chan) == StepOutcome::Sent {
                        sends.push((now_ms, d.last_sent().unwrap()));
                    }
                }
            }
            while next < schedule.len() && schedule[next].0 == now_ms {
                if d.submit(schedule[next].1, now, chan) == StepOutcome::Sent {
                    sends.push((now_ms, schedule[next].1));
                }
                next += 1;
            }
        }
        sends
    }

    #[test]
    fn test_first_intent_goes_out_immediately() {
        let (mut chan, remote, _rx) = open_channel();
        let mut d = Dispatcher::new(10.0);
        let now = Instant::now();
        assert_eq!(d.submit(intent(1), now, &mut chan), StepOutcome::Sent);
        assert!(!d.is_armed());
        assert_eq!(remote.sent_angles().len(), 1);
    }

    #[test]
    fn test_burst_scenario() {
        let (mut chan, remote, _rx) = open_channel();
        let mut d = Dispatcher::new(20.0);
        assert_eq!(d.min_gap(), ms(50));

        let schedule = [(0, intent(0)), (10, intent(10)), (10, intent(11)), (95, intent(95))];
        let sends = simulate(&mut d, &mut chan, &schedule, 300);

        // Inside the 95 ms window: floor(95/50) + 1 sends at most.
        let in_window: Vec<_> = sends.iter().filter(|(t, _)| *t <= 95).collect();
        assert_eq!(in_window.len(), 2);
        assert_eq!(sends[0], (0, intent(0)));
        assert_eq!(sends[1], (50, intent(11)));
        // The newest intent lands on the next free slot.
        assert_eq!(sends.last(), Some(&(100, intent(95))));
        assert_eq!(sends.len(), 3);
        assert_eq!(d.stats().coalesced, 1);
        assert_eq!(remote.sent_angles().len(), 3);
        assert!(!d.is_armed());
    }

    #[test]
    fn test_coalescing_bound_and_freshness() {
        let (mut chan, _remote, _rx) = open_channel();
        let mut d = Dispatcher::new(10.0);
        // An intent every 3 ms for one second.
        let schedule: Vec<_> = (0..=333).map(|i| (i * 3, intent(i as i64))).collect();
        let window = 999;
        let sends = simulate(&mut d, &mut chan, &schedule, 2000);

        let gap = d.min_gap().as_millis() as u64;
        let in_window = sends.iter().filter(|(t, _)| *t <= window).count() as u64;
        assert!(in_window <= window / gap + 1);
        for pair in sends.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= gap);
        }
        // Last thing on the wire is the last thing submitted.
        assert_eq!(sends.last().map(|s| s.1), Some(intent(333)));
    }

    #[test]
    fn test_idle_convergence() {
        let (mut chan, _remote, _rx) = open_channel();
        let mut d = Dispatcher::new(10.0);
        let t0 = Instant::now();
        d.submit(intent(1), t0, &mut chan);
        let StepOutcome::Deferred(at) = d.submit(intent(2), t0 + ms(10), &mut chan) else {
            unreachable!("second intent inside the gap must defer");
        };
        let (token, _) = d.deadline().unwrap();
        assert_eq!(d.fire(token, at, &mut chan), StepOutcome::Sent);
        assert!(d.deadline().is_none());
        assert!(d.pending().is_none());
        // A replayed token does nothing.
        assert_eq!(d.fire(token, at + ms(200), &mut chan), StepOutcome::Idle);
    }

    #[test]
    fn test_closed_channel_drops_and_disarms() {
        let (mut chan, remote) = MockChannel::pair_manual();
        let (tx, _rx) = mpsc::unbounded_channel();
        chan.open(tx).unwrap();
        let mut d = Dispatcher::new(10.0);
        let t0 = Instant::now();
        assert_eq!(d.submit(intent(1), t0, &mut chan), StepOutcome::Dropped);
        assert!(!d.is_armed());
        assert_eq!(d.stats().dropped, 1);

        remote.accept();
        // Nothing was sent, so the gap does not apply and the newest value goes out.
        assert_eq!(d.submit(intent(2), t0 + ms(1), &mut chan), StepOutcome::Sent);
        assert_eq!(remote.sent_angles()[0].1, intent(2));
    }

    #[test]
    fn test_cancel_invalidates_token() {
        let (mut chan, remote, _rx) = open_channel();
        let mut d = Dispatcher::new(10.0);
        let t0 = Instant::now();
        d.submit(intent(1), t0, &mut chan);
        d.submit(intent(2), t0 + ms(5), &mut chan);
        let (token, at) = d.deadline().unwrap();
        d.cancel();
        assert_eq!(d.fire(token, at, &mut chan), StepOutcome::Idle);
        assert_eq!(remote.sent_angles().len(), 1);
    }

    #[test]
    fn test_rate_change_moves_deadline() {
        let (mut chan, _remote, _rx) = open_channel();
        let mut d = Dispatcher::new(10.0);
        let t0 = Instant::now();
        d.submit(intent(1), t0, &mut chan);
        d.submit(intent(2), t0 + ms(5), &mut chan);
        let (old_token, old_at) = d.deadline().unwrap();
        assert_eq!(old_at, t0 + ms(100));
        d.set_rate_hz(50.0);
        let (_, new_at) = d.deadline().unwrap();
        assert_eq!(new_at, t0 + ms(20));
        assert_eq!(d.fire(old_token, new_at, &mut chan), StepOutcome::Idle);
    }
}
