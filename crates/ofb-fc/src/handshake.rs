use std::time::{Duration, Instant};

use ofb_proto::status::VehicleStatus;
use tracing::info;

use crate::safety::RetryGate;
use crate::ControlConfig;

/// A request the supervisor wants sent to the autopilot this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeCommand {
    SetMode(String),
    Arm(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    NotOffboard,
    AwaitingArm,
    Operational,
}

impl HandshakePhase {
    pub fn of(status: &VehicleStatus, desired_mode: &str, desired_armed: bool) -> Self {
        if status.mode != desired_mode {
            HandshakePhase::NotOffboard
        } else if status.armed != desired_armed {
            HandshakePhase::AwaitingArm
        } else {
            HandshakePhase::Operational
        }
    }
}

/// Level-triggered mode/arm handshake.
///
/// Every poll compares the mirrored status with the desired one and asks for at
/// most one command. Mode comes before arming. Both share one retry window, which
/// restarts whenever a command is handed out, whatever its outcome turns out to be.
#[derive(Debug)]
pub struct HandshakeSupervisor {
    desired_mode: String,
    desired_armed: bool,
    gate: RetryGate,
    phase: Option<HandshakePhase>,
}

impl HandshakeSupervisor {
    pub fn new(desired_mode: impl Into<String>, desired_armed: bool, retry_interval: Duration) -> Self {
        Self {
            desired_mode: desired_mode.into(),
            desired_armed,
            gate: RetryGate::new(retry_interval),
            phase: None,
        }
    }

    pub fn from_config(cfg: &ControlConfig) -> Self {
        Self::new(cfg.desired_mode.clone(), cfg.desired_armed, cfg.retry_interval())
    }

    pub fn desired_mode(&self) -> &str { &self.desired_mode }
    pub fn desired_armed(&self) -> bool { self.desired_armed }
    pub fn phase(&self) -> Option<HandshakePhase> { self.phase }
    pub fn last_command_time(&self) -> Option<Instant> { self.gate.last() }

    pub fn poll(&mut self, status: &VehicleStatus, now: Instant) -> Option<HandshakeCommand> {
        self.observe(status);

        if !self.gate.ready(now) {
            return None;
        }
        let cmd = if status.mode != self.desired_mode {
            HandshakeCommand::SetMode(self.desired_mode.clone())
        } else if status.armed != self.desired_armed {
            HandshakeCommand::Arm(self.desired_armed)
        } else {
            return None;
        };
        self.gate.mark(now);
        Some(cmd)
    }

    fn observe(&mut self, status: &VehicleStatus) {
        let phase = HandshakePhase::of(status, &self.desired_mode, self.desired_armed);
        if self.phase == Some(phase) {
            return;
        }
        match phase {
            HandshakePhase::NotOffboard => info!("handshake: waiting for {} (autopilot reports {:?})", self.desired_mode, status.mode),
            HandshakePhase::AwaitingArm => info!("handshake: {} active, waiting for armed={}", self.desired_mode, self.desired_armed),
            HandshakePhase::Operational => info!("handshake: operational, following figure-eight"),
        }
        self.phase = Some(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETRY: Duration = Duration::from_secs(5);
    const TICK: Duration = Duration::from_millis(167);

    fn sup() -> HandshakeSupervisor {
        HandshakeSupervisor::new("OFFBOARD", true, RETRY)
    }

    #[test]
    fn mode_change_first_and_then_every_retry_interval() {
        let mut s = sup();
        let manual = VehicleStatus::new(true, false, "MANUAL");
        let t0 = Instant::now();

        assert_eq!(s.poll(&manual, t0), Some(HandshakeCommand::SetMode("OFFBOARD".into())));
        let mut t = t0;
        while t + TICK < t0 + RETRY {
            t += TICK;
            assert_eq!(s.poll(&manual, t), None);
        }
        assert_eq!(s.poll(&manual, t0 + RETRY), Some(HandshakeCommand::SetMode("OFFBOARD".into())));
        assert_eq!(s.last_command_time(), Some(t0 + RETRY));
    }

    #[test]
    fn arms_once_mode_matches() {
        let mut s = sup();
        let offboard = VehicleStatus::new(true, false, "OFFBOARD");
        let t0 = Instant::now();
        assert_eq!(s.poll(&offboard, t0), Some(HandshakeCommand::Arm(true)));
        for i in 1..30 {
            assert_eq!(s.poll(&offboard, t0 + TICK * i), None);
        }
        assert_eq!(s.poll(&offboard, t0 + RETRY), Some(HandshakeCommand::Arm(true)));
    }

    #[test]
    fn arm_waits_for_the_window_opened_by_the_mode_change() {
        let mut s = sup();
        let t0 = Instant::now();
        assert!(matches!(s.poll(&VehicleStatus::new(true, false, "MANUAL"), t0), Some(HandshakeCommand::SetMode(_))));

        // Mode switch confirmed on the next update; arming still has to wait.
        let offboard = VehicleStatus::new(true, false, "OFFBOARD");
        assert_eq!(s.poll(&offboard, t0 + TICK), None);
        assert_eq!(s.poll(&offboard, t0 + Duration::from_millis(4_900)), None);
        assert_eq!(s.poll(&offboard, t0 + RETRY), Some(HandshakeCommand::Arm(true)));
    }

    #[test]
    fn mode_has_priority_over_arming() {
        let mut s = sup();
        let manual_disarmed = VehicleStatus::new(true, false, "MANUAL");
        let t0 = Instant::now();
        for i in 0..5u32 {
            let cmd = s.poll(&manual_disarmed, t0 + RETRY * i);
            assert_eq!(cmd, Some(HandshakeCommand::SetMode("OFFBOARD".into())));
        }
    }

    #[test]
    fn quiet_when_operational() {
        let mut s = sup();
        let ok = VehicleStatus::new(true, true, "OFFBOARD");
        let t0 = Instant::now();
        for i in 0..100 {
            assert_eq!(s.poll(&ok, t0 + TICK * i), None);
        }
        assert_eq!(s.phase(), Some(HandshakePhase::Operational));
        assert_eq!(s.last_command_time(), None);
    }

    #[test]
    fn never_more_than_one_command_per_window() {
        let mut s = sup();
        let t0 = Instant::now();
        let statuses = [
            VehicleStatus::new(true, false, "MANUAL"),
            VehicleStatus::new(true, false, "OFFBOARD"),
            VehicleStatus::new(true, true, "MANUAL"),
            VehicleStatus::new(true, false, "AUTO.LOITER"),
        ];
        let mut issued = Vec::new();
        for i in 0..600u32 {
            let now = t0 + TICK * i;
            if s.poll(&statuses[(i as usize / 7) % statuses.len()], now).is_some() {
                issued.push(now);
            }
        }
        assert!(issued.len() > 1);
        for w in issued.windows(2) {
            assert!(w[1] - w[0] >= RETRY);
        }
    }

    #[test]
    fn disarm_request_when_desired() {
        let mut s = HandshakeSupervisor::new("AUTO.LOITER", false, RETRY);
        let t0 = Instant::now();
        assert_eq!(s.poll(&VehicleStatus::new(true, true, "AUTO.LOITER"), t0), Some(HandshakeCommand::Arm(false)));
    }

    #[test]
    fn phase_tracks_status() {
        assert_eq!(HandshakePhase::of(&VehicleStatus::new(true, true, "POSCTL"), "OFFBOARD", true), HandshakePhase::NotOffboard);
        assert_eq!(HandshakePhase::of(&VehicleStatus::new(true, false, "OFFBOARD"), "OFFBOARD", true), HandshakePhase::AwaitingArm);
        assert_eq!(HandshakePhase::of(&VehicleStatus::new(true, true, "OFFBOARD"), "OFFBOARD", true), HandshakePhase::Operational);
    }
}
