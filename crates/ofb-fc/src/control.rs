use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ofb_nav::trajectory::FigureEight;
use ofb_proto::setpoint::Setpoint;
use tokio::time::{error::Elapsed, Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::handshake::{HandshakeCommand, HandshakeSupervisor};
use crate::state::TelemetryMirror;
use crate::ControlConfig;

/// Where setpoints and handshake commands go.
#[allow(async_fn_in_trait)]
pub trait ControlPlane {
    fn publish_setpoint(&self, sp: &Setpoint) -> Result<()>;

    /// Returns whether the autopilot accepted the mode change.
    async fn request_mode(&self, mode: &str) -> Result<bool>;

    /// Returns whether the autopilot accepted the arm/disarm request.
    async fn request_arming(&self, arm: bool) -> Result<bool>;
}

pub trait Clock {
    fn now(&self) -> Instant;
}

/// Runtime clock; follows tokio's paused time in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub setpoints: u64,
    pub mode_requests: u64,
    pub arm_requests: u64,
    pub wraps: u64,
}

pub struct ControlLoop<P, C = TokioClock> {
    plane: P,
    mirror: TelemetryMirror,
    trajectory: FigureEight,
    supervisor: HandshakeSupervisor,
    cfg: ControlConfig,
    clock: C,
    summary: RunSummary,
}

impl<P: ControlPlane> ControlLoop<P> {
    pub fn new(plane: P, mirror: TelemetryMirror, trajectory: FigureEight, cfg: ControlConfig) -> Self {
        Self::with_clock(plane, mirror, trajectory, cfg, TokioClock)
    }
}

impl<P: ControlPlane, C: Clock> ControlLoop<P, C> {
    pub fn with_clock(plane: P, mirror: TelemetryMirror, trajectory: FigureEight, cfg: ControlConfig, clock: C) -> Self {
        let supervisor = HandshakeSupervisor::from_config(&cfg);
        Self { plane, mirror, trajectory, supervisor, cfg, clock, summary: RunSummary::default() }
    }

    /// Drives the vehicle until `shutdown` resolves.
    ///
    /// Waits for the autopilot connection, streams the warmup hold setpoints, then
    /// ticks handshake + trajectory + publish at the configured rate. A setpoint
    /// that cannot be published ends the run with an error.
    pub async fn run<F>(mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!("control: waiting for FC connection");
        let status = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("control: shutdown before FC connected");
                return Ok(self.finish());
            }
            st = self.mirror.wait_connected() => st?,
        };
        info!("control: FC connected (mode={:?}, armed={})", status.mode, status.armed);

        let mut ticker = tokio::time::interval(self.cfg.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let hold = self.trajectory.hold_setpoint();
        info!(
            "control: streaming {} hold setpoints at ({:.2}, {:.2}, {:.2}) before handshake",
            self.cfg.warmup_setpoints, hold.position.x, hold.position.y, hold.position.z
        );
        for _ in 0..self.cfg.warmup_setpoints {
            tokio::select! {
                biased;
                _ = &mut shutdown => return Ok(self.finish()),
                _ = ticker.tick() => {}
            }
            self.publish(&hold)?;
        }

        info!(
            "control: warmup done, handshake towards mode={} armed={}",
            self.supervisor.desired_mode(), self.supervisor.desired_armed()
        );
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            self.tick(&mut ticker).await?;
        }
        Ok(self.finish())
    }

    async fn tick(&mut self, ticker: &mut Interval) -> Result<()> {
        self.summary.ticks += 1;

        let status = self.mirror.current();
        if let Some(cmd) = self.supervisor.poll(&status, self.clock.now()) {
            self.execute(cmd, ticker).await?;
        }
        publish_next(&self.plane, &mut self.trajectory, &mut self.summary)
    }

    /// Sends one handshake command. Ticks that come due while the autopilot has
    /// not answered still publish the trajectory, so the stream never drops below
    /// the tick rate. Those ticks skip the handshake; the retry window outlasts
    /// the command timeout anyway.
    async fn execute(&mut self, cmd: HandshakeCommand, ticker: &mut Interval) -> Result<()> {
        let timeout = self.cfg.command_timeout();
        let retry = self.cfg.retry_interval();
        let Self { plane, trajectory, summary, .. } = self;

        let (what, success) = match &cmd {
            HandshakeCommand::SetMode(mode) => {
                summary.mode_requests += 1;
                (format!("mode {}", mode), format!("{} enabled", mode))
            }
            HandshakeCommand::Arm(true) => {
                summary.arm_requests += 1;
                ("arm".to_string(), "vehicle armed".to_string())
            }
            HandshakeCommand::Arm(false) => {
                summary.arm_requests += 1;
                ("disarm".to_string(), "vehicle disarmed".to_string())
            }
        };
        info!("handshake: requesting {}", what);

        let plane_ref: &P = plane;
        let call = async move {
            match &cmd {
                HandshakeCommand::SetMode(mode) => plane_ref.request_mode(mode).await,
                HandshakeCommand::Arm(arm) => plane_ref.request_arming(*arm).await,
            }
        };
        let pending = tokio::time::timeout(timeout, call);
        tokio::pin!(pending);

        let outcome = loop {
            tokio::select! {
                biased;
                res = &mut pending => break res,
                _ = ticker.tick() => {
                    summary.ticks += 1;
                    publish_next(plane_ref, trajectory, summary)?;
                }
            }
        };
        report(&what, &success, outcome, timeout, retry);
        Ok(())
    }

    fn publish(&mut self, sp: &Setpoint) -> Result<()> {
        publish(&self.plane, sp, &mut self.summary)
    }

    fn finish(mut self) -> RunSummary {
        self.summary.wraps = self.trajectory.wraps();
        info!(
            "control: stopped after {} ticks ({} setpoints, {} mode requests, {} arm requests, {} pattern wraps)",
            self.summary.ticks, self.summary.setpoints, self.summary.mode_requests,
            self.summary.arm_requests, self.summary.wraps
        );
        self.summary
    }
}

fn publish<P: ControlPlane>(plane: &P, sp: &Setpoint, summary: &mut RunSummary) -> Result<()> {
    plane.publish_setpoint(sp).context("publish setpoint")?;
    summary.setpoints += 1;
    Ok(())
}

fn publish_next<P: ControlPlane>(plane: &P, trajectory: &mut FigureEight, summary: &mut RunSummary) -> Result<()> {
    trajectory.advance();
    publish(plane, &trajectory.evaluate(), summary)
}

// Outcomes only feed the log; the next retry window decides what happens next.
fn report(what: &str, success: &str, outcome: Result<Result<bool>, Elapsed>, timeout: Duration, retry: Duration) {
    match outcome {
        Ok(Ok(true)) => info!("handshake: {}", success),
        Ok(Ok(false)) => warn!("handshake: {} rejected, retry in {:?}", what, retry),
        Ok(Err(e)) => warn!("handshake: {} failed: {:#}", what, e),
        Err(_) => warn!("handshake: {} unanswered after {:?}", what, timeout),
    }
}
