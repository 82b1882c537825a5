//! Operator-side control loop.
//!
//! One task owns the channel, the dispatcher and the mode machine. Every
//! input (pose frames, operator edits, link events, timer wake-ups) is
//! serialized through a single `tokio::select!`, so no state is shared and no
//! lock is held. Callers talk to the loop through a cloneable [`ControlHandle`]
//! and observe it through a `watch` snapshot.

use crate::dispatcher::{DispatchStats, Dispatcher, StepOutcome, TimerToken};
use crate::metrics::MetricsHub;
use crate::mode::{Mode, ModeMachine, Producer, Transition};
use crate::status::StatusTrail;
use crate::telemetry::{TelemetryMonitor, TelemetrySample, RATE_SAMPLE_PERIOD};
use crate::{ControlError, Result, TeleopConfig};
use hand_link::{
    Ack, Angle, Command, DuplexChannel, Inbound, Joint, JointAngles, LinkEvent, Outbound,
};
use hand_pose::{CurlEstimator, EmaSmoother, HandSide, Observation, PoseSource};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Commands that skip the rate limiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectCommand {
    Open,
    Close,
    Estop,
}

impl DirectCommand {
    pub fn command(self) -> Command {
        match self {
            DirectCommand::Open => Command::Open,
            DirectCommand::Close => Command::Close,
            DirectCommand::Estop => Command::Estop,
        }
    }
}

impl core::str::FromStr for DirectCommand {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(DirectCommand::Open),
            "close" => Ok(DirectCommand::Close),
            "estop" | "stop" => Ok(DirectCommand::Estop),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

#[derive(Debug)]
pub enum ControlEvent {
    /// An externally produced pose frame.
    Observation(Observation),
    SetMode(Mode),
    SetJoint { joint: Joint, angle: Angle },
    SetAngles(JointAngles),
    SetSpeed(Angle),
    SetTelemetryRate(f64),
    Direct(DirectCommand),
    SetSendRate(f64),
    SetKeepaliveRate(f64),
    Shutdown,
}

/// Point-in-time view published after every loop iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlSnapshot {
    pub mode: Mode,
    pub angles: JointAngles,
    pub speed: Angle,
    pub connected: bool,
    pub telemetry: TelemetrySample,
    pub telemetry_rate_hz: f64,
    pub last_status: Option<String>,
    pub pending: bool,
    pub stats: DispatchStats,
}

/// Final accounting returned when the loop stops.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlReport {
    pub stats: DispatchStats,
    pub telemetry_received: u64,
    pub mode_switches: u64,
    pub final_mode: Mode,
    pub final_angles: JointAngles,
}

/// All mutable control state. Methods take the current instant and the
/// channel explicitly so the logic can be driven without a runtime.
pub struct ControlContext {
    modes: ModeMachine,
    angles: JointAngles,
    speed: Angle,
    telemetry_rate_request: f64,
    dispatcher: Dispatcher,
    smoother: EmaSmoother,
    estimator: CurlEstimator,
    target_side: HandSide,
    telemetry: TelemetryMonitor,
    status: StatusTrail,
    connected: bool,
    metrics: MetricsHub,
}

impl ControlContext {
    pub fn new(config: &TeleopConfig, metrics: MetricsHub, now: Instant) -> Result<Self> {
        config.validate()?;
        let smoother = EmaSmoother::new(config.smoothing_alpha)?;
        let estimator = CurlEstimator::new(config.curl_thresholds()?);
        let dispatcher = Dispatcher::new(config.send_hz).with_counters(metrics.dispatch.clone());
        metrics.set_mode(config.initial_mode);

        Ok(Self {
            modes: ModeMachine::new(config.initial_mode, config.keepalive_hz, now),
            angles: JointAngles::open(),
            speed: config.speed,
            telemetry_rate_request: config.telemetry_rate_hz,
            dispatcher,
            smoother,
            estimator,
            target_side: config.target_side,
            telemetry: TelemetryMonitor::new(),
            status: StatusTrail::new(config.status_trail_len),
            connected: false,
            metrics,
        })
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn modes(&self) -> &ModeMachine {
        &self.modes
    }

    pub fn angles(&self) -> JointAngles {
        self.angles
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn telemetry(&self) -> &TelemetryMonitor {
        &self.telemetry
    }

    pub fn status(&self) -> &StatusTrail {
        &self.status
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Apply one operator event. `Shutdown` is the loop's business and is ignored here.
    pub fn apply(&mut self, event: ControlEvent, now: Instant, channel: &mut dyn DuplexChannel) {
        match event {
            ControlEvent::Observation(obs) => {
                self.handle_observation(&obs, now, channel);
            }
            ControlEvent::SetMode(mode) => {
                self.switch_mode(mode, now);
            }
            ControlEvent::SetJoint { joint, angle } => {
                self.set_joint(joint, angle, now, channel);
            }
            ControlEvent::SetAngles(angles) => {
                self.set_angles(angles, now, channel);
            }
            ControlEvent::SetSpeed(speed) => {
                self.set_speed(speed, channel);
            }
            ControlEvent::SetTelemetryRate(hz) => {
                self.set_telemetry_rate(hz, channel);
            }
            ControlEvent::Direct(cmd) => {
                self.direct(cmd, channel);
            }
            ControlEvent::SetSendRate(hz) => {
                self.dispatcher.set_rate_hz(hz);
                debug!("send gap now {:?}", self.dispatcher.min_gap());
            }
            ControlEvent::SetKeepaliveRate(hz) => {
                self.modes.set_keepalive_rate_hz(hz, now);
            }
            ControlEvent::Shutdown => {}
        }
    }

    /// Pose producer. Ignored unless teleoperating; frames without the
    /// configured hand leave the target unchanged.
    pub fn handle_observation(
        &mut self,
        observation: &Observation,
        now: Instant,
        channel: &mut dyn DuplexChannel,
    ) -> Option<StepOutcome> {
        if !self.modes.admits(Producer::Pose) {
            debug!("pose frame ignored in {} mode", self.modes.mode());
            return None;
        }
        let raw = self
            .estimator
            .estimate_observation(observation, self.target_side)?;
        let target = self.smoother.apply(raw);
        self.angles = target;
        Some(self.dispatcher.submit(target, now, channel))
    }

    /// Manual producer: edit one joint of the current target.
    pub fn set_joint(
        &mut self,
        joint: Joint,
        angle: Angle,
        now: Instant,
        channel: &mut dyn DuplexChannel,
    ) -> Option<StepOutcome> {
        let mut angles = self.angles;
        angles.set(joint, angle);
        self.set_angles(angles, now, channel)
    }

    pub fn set_angles(
        &mut self,
        angles: JointAngles,
        now: Instant,
        channel: &mut dyn DuplexChannel,
    ) -> Option<StepOutcome> {
        if !self.modes.admits(Producer::Manual) {
            debug!("manual edit ignored in {} mode", self.modes.mode());
            self.status.push("manual edit ignored while in teleop mode");
            return None;
        }
        self.angles = angles;
        Some(self.dispatcher.submit(angles, now, channel))
    }

    /// Store the speed and forward it if connected. Returns whether it was sent.
    pub fn set_speed(&mut self, speed: Angle, channel: &mut dyn DuplexChannel) -> bool {
        self.speed = speed;
        self.send_command(Command::SetSpeed { value: speed }, channel)
    }

    pub fn set_telemetry_rate(&mut self, hz: f64, channel: &mut dyn DuplexChannel) -> bool {
        self.telemetry_rate_request = hz;
        self.send_command(Command::SetTelemetryRateHz { value: hz }, channel)
    }

    /// Open, close and estop go straight to the wire. Estop also discards any
    /// unsent angle target.
    pub fn direct(&mut self, cmd: DirectCommand, channel: &mut dyn DuplexChannel) -> bool {
        if cmd == DirectCommand::Estop {
            self.dispatcher.cancel();
        }
        self.send_command(cmd.command(), channel)
    }

    fn send_command(&mut self, cmd: Command, channel: &mut dyn DuplexChannel) -> bool {
        let name = cmd.name();
        if !channel.is_open() {
            self.status.push(format!("not connected, {name} dropped"));
            return false;
        }
        match channel.send(&Outbound::from(cmd)) {
            Ok(()) => true,
            Err(e) => {
                warn!("{name} send failed: {e}");
                self.status.push(format!("{name} failed: {e}"));
                false
            }
        }
    }

    /// Switch producers. Whatever the old producer left pending is discarded.
    pub fn switch_mode(&mut self, to: Mode, now: Instant) -> Option<Transition> {
        let transition = self.modes.switch(to, now)?;
        self.dispatcher.cancel();
        if to == Mode::Teleop {
            self.smoother.reset();
        }
        self.metrics.set_mode(to);
        info!("mode {} -> {}", transition.from, transition.to);
        self.status.push(format!("mode: {to}"));
        Some(transition)
    }

    /// Re-submit the current target if the manual keepalive is due.
    pub fn keepalive(&mut self, now: Instant, channel: &mut dyn DuplexChannel) -> Option<StepOutcome> {
        if !self.modes.keepalive_due(now) {
            return None;
        }
        Some(self.dispatcher.submit(self.angles, now, channel))
    }

    pub fn fire_dispatcher(
        &mut self,
        token: TimerToken,
        now: Instant,
        channel: &mut dyn DuplexChannel,
    ) -> StepOutcome {
        self.dispatcher.fire(token, now, channel)
    }

    pub fn handle_link_event(
        &mut self,
        event: LinkEvent,
        now: Instant,
        channel: &mut dyn DuplexChannel,
    ) {
        match event {
            LinkEvent::Opened => {
                self.connected = true;
                info!("link open");
                self.status.push("connected");
                self.handshake(channel);
            }
            LinkEvent::Closed => {
                if self.connected {
                    info!("link closed");
                }
                self.connected = false;
                self.status.push("disconnected");
            }
            LinkEvent::Error(reason) => {
                warn!("link error: {reason}");
                self.status.push(format!("error: {reason}"));
            }
            LinkEvent::Message(Inbound::Telemetry { telemetry }) => {
                self.telemetry.record(&telemetry, now);
                self.metrics.telemetry_received.inc();
            }
            LinkEvent::Message(Inbound::Ack(ack)) => {
                if ack.ok {
                    debug!("ack: {ack:?}");
                    self.status.push(describe_ack(&ack));
                } else {
                    let reason = ack.error.unwrap_or_else(|| "unspecified".to_string());
                    warn!("bridge rejected a record: {reason}");
                    self.status.push(format!("bridge error: {reason}"));
                }
            }
        }
    }

    fn handshake(&mut self, channel: &mut dyn DuplexChannel) {
        if let Err(e) = channel.send(&Outbound::hello()) {
            warn!("hello failed: {e}");
            return;
        }
        let speed = self.speed;
        let hz = self.telemetry_rate_request;
        self.send_command(Command::SetSpeed { value: speed }, channel);
        self.send_command(Command::SetTelemetryRateHz { value: hz }, channel);
    }

    pub fn sample_telemetry_rate(&mut self, now: Instant) -> f64 {
        let hz = self.telemetry.sample_rate(now);
        self.metrics.telemetry_rate_hz.set(hz);
        hz
    }

    /// Stop timers and drop anything unsent.
    pub fn halt(&mut self) {
        self.dispatcher.cancel();
        self.modes.stop();
        self.connected = false;
        self.status.push("stopped");
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot {
            mode: self.modes.mode(),
            angles: self.angles,
            speed: self.speed,
            connected: self.connected,
            telemetry: self.telemetry.sample().clone(),
            telemetry_rate_hz: self.telemetry.rate_hz(),
            last_status: self.status.last().map(|e| e.message.clone()),
            pending: self.dispatcher.pending().is_some(),
            stats: self.dispatcher.stats(),
        }
    }

    pub fn report(&self) -> ControlReport {
        ControlReport {
            stats: self.dispatcher.stats(),
            telemetry_received: self.telemetry.received(),
            mode_switches: self.modes.switches(),
            final_mode: self.modes.mode(),
            final_angles: self.angles,
        }
    }
}

/// Cloneable front end for a running [`ControlLoop`].
#[derive(Clone)]
pub struct ControlHandle {
    events: mpsc::UnboundedSender<ControlEvent>,
    snapshots: watch::Receiver<ControlSnapshot>,
}

impl ControlHandle {
    pub fn send(&self, event: ControlEvent) -> Result<()> {
        self.events.send(event).map_err(|_| ControlError::Stopped)
    }

    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        self.send(ControlEvent::SetMode(mode))
    }

    pub fn set_joint(&self, joint: Joint, angle: Angle) -> Result<()> {
        self.send(ControlEvent::SetJoint { joint, angle })
    }

    pub fn set_angles(&self, angles: JointAngles) -> Result<()> {
        self.send(ControlEvent::SetAngles(angles))
    }

    pub fn set_speed(&self, speed: Angle) -> Result<()> {
        self.send(ControlEvent::SetSpeed(speed))
    }

    pub fn direct(&self, cmd: DirectCommand) -> Result<()> {
        self.send(ControlEvent::Direct(cmd))
    }

    pub fn submit_observation(&self, observation: Observation) -> Result<()> {
        self.send(ControlEvent::Observation(observation))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(ControlEvent::Shutdown)
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControlSnapshot> {
        self.snapshots.clone()
    }
}

pub struct ControlLoop {
    ctx: ControlContext,
    channel: Box<dyn DuplexChannel>,
    pose: Option<Box<dyn PoseSource>>,
    frame_period: Duration,
    events: mpsc::UnboundedReceiver<ControlEvent>,
    snapshots: watch::Sender<ControlSnapshot>,
}

impl ControlLoop {
    pub fn new(
        config: &TeleopConfig,
        channel: Box<dyn DuplexChannel>,
        metrics: MetricsHub,
    ) -> Result<(Self, ControlHandle)> {
        let ctx = ControlContext::new(config, metrics, Instant::now())?;
        let (events_tx, events) = mpsc::unbounded_channel();
        let (snapshots, snapshot_rx) = watch::channel(ctx.snapshot());
        let frame_period = config.frame_period();

        let control = Self {
            ctx,
            channel,
            pose: None,
            frame_period,
            events,
            snapshots,
        };
        let handle = ControlHandle {
            events: events_tx,
            snapshots: snapshot_rx,
        };
        Ok((control, handle))
    }

    /// Poll `source` once per camera frame while teleoperating.
    pub fn with_pose_source(mut self, source: Box<dyn PoseSource>) -> Self {
        self.pose = Some(source);
        self
    }

    pub fn context(&self) -> &ControlContext {
        &self.ctx
    }

    /// Run until `Shutdown` arrives or every handle is dropped.
    pub async fn run(self) -> Result<ControlReport> {
        let ControlLoop {
            mut ctx,
            mut channel,
            mut pose,
            frame_period,
            mut events,
            snapshots,
        } = self;

        let (link_tx, mut link_rx) = mpsc::unbounded_channel();
        if let Err(e) = channel.open(link_tx) {
            warn!("failed to open link: {e}");
            ctx.status.push(format!("connect failed: {e}"));
        }

        let mut frames = time::interval(frame_period);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sampler = time::interval_at(Instant::now() + RATE_SAMPLE_PERIOD, RATE_SAMPLE_PERIOD);
        sampler.set_missed_tick_behavior(MissedTickBehavior::Delay);
        snapshots.send_replace(ctx.snapshot());

        loop {
            let dispatch_deadline = ctx.dispatcher.deadline();
            let keepalive_deadline = ctx.modes.keepalive_deadline();
            let has_pose = pose.is_some();

            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(ControlEvent::Shutdown) | None => break,
                    Some(event) => ctx.apply(event, Instant::now(), channel.as_mut()),
                },
                Some(event) = link_rx.recv() => {
                    ctx.handle_link_event(event, Instant::now(), channel.as_mut());
                }
                _ = sleep_until_opt(dispatch_deadline.map(|(_, at)| at)) => {
                    if let Some((token, _)) = dispatch_deadline {
                        ctx.fire_dispatcher(token, Instant::now(), channel.as_mut());
                    }
                }
                _ = sleep_until_opt(keepalive_deadline) => {
                    ctx.keepalive(Instant::now(), channel.as_mut());
                }
                _ = frames.tick(), if has_pose => {
                    if ctx.modes.pose_inference_enabled() {
                        if let Some(source) = pose.as_mut() {
                            match source.next_observation() {
                                Ok(Some(obs)) => {
                                    ctx.handle_observation(&obs, Instant::now(), channel.as_mut());
                                }
                                Ok(None) => {}
                                Err(e) => warn!("pose inference failed, skipping frame: {e}"),
                            }
                        }
                    }
                }
                _ = sampler.tick() => {
                    let hz = ctx.sample_telemetry_rate(Instant::now());
                    debug!("telemetry rate {hz:.1} Hz");
                }
            }

            snapshots.send_replace(ctx.snapshot());
        }

        ctx.halt();
        channel.close();
        snapshots.send_replace(ctx.snapshot());
        info!("control loop stopped");
        Ok(ctx.report())
    }
}

fn describe_ack(ack: &Ack) -> String {
    let mut text = String::from("ack ok");
    if let Some(speed) = ack.speed {
        text.push_str(&format!(", speed {speed}"));
    }
    if let Some(hz) = ack.telemetry_hz {
        text.push_str(&format!(", telemetry {hz} Hz"));
    }
    if ack.estop == Some(true) {
        text.push_str(", estop");
    }
    text
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
