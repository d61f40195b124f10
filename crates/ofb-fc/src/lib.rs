pub mod autodetect;
pub mod control;
pub mod doctor;
pub mod handshake;
pub mod mav;
pub mod px4_mode;
pub mod safety;
pub mod state;

use std::time::Duration;

use serde::Deserialize;

/// The autopilot drops out of offboard when setpoints arrive slower than this.
pub const MIN_SETPOINT_RATE_HZ: f64 = 2.0;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("unknown PX4 flight mode {0:?}")]
    UnknownMode(String),
    #[error("mavlink reader stopped")]
    ReaderStopped,
    #[error("no MAVLink heartbeat on any candidate port")]
    NoHeartbeat,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// MAVLink connection string, e.g. "udpin:0.0.0.0:14540" (PX4 SITL offboard port)
    /// or "serial:/dev/ttyACM0:57600". Ignored when autodetect=true.
    pub url: Option<String>,

    /// If true, probe candidate serial ports/bauds and use the first that yields a HEARTBEAT.
    pub autodetect: bool,
    pub candidate_devs: Option<Vec<String>>,
    pub candidate_bauds: Option<Vec<u32>>,

    /// Heartbeat wait per probe attempt
    pub heartbeat_timeout_ms: Option<u64>,

    /// MAVLink ids we use (companion side)
    pub sys_id: u8,
    pub comp_id: u8,

    /// target system/component (autopilot side)
    pub target_sys: u8,
    pub target_comp: u8,

    /// Companion heartbeat rate. Default 1 Hz.
    pub send_heartbeat_hz: Option<f32>,

    /// Autopilot counts as disconnected after this long without a heartbeat.
    pub connection_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: Some("udpin:0.0.0.0:14540".into()),
            autodetect: false,
            candidate_devs: None,
            candidate_bauds: None,
            heartbeat_timeout_ms: None,
            sys_id: 1,
            comp_id: 191,
            target_sys: 1,
            target_comp: 1,
            send_heartbeat_hz: None,
            connection_timeout_ms: 10_000,
        }
    }
}

impl LinkConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Setpoint publish rate. Must stay above MIN_SETPOINT_RATE_HZ.
    pub rate_hz: f64,
    /// Hold setpoints streamed before the first mode/arm request.
    pub warmup_setpoints: u32,
    /// Minimum spacing between handshake commands.
    pub retry_interval_ms: u64,
    /// Upper bound on a single mode/arm round trip.
    pub command_timeout_ms: u64,
    pub desired_mode: String,
    pub desired_armed: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            rate_hz: 6.0,
            warmup_setpoints: 100,
            retry_interval_ms: 5_000,
            command_timeout_ms: 1_500,
            desired_mode: "OFFBOARD".into(),
            desired_armed: true,
        }
    }
}

impl ControlConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}
