use anyhow::Result;

use crate::{mav::serial_target, px4_mode, ControlConfig, LinkConfig, MIN_SETPOINT_RATE_HZ};

pub fn check_control(c: &ControlConfig) -> Result<()> {
    anyhow::ensure!(
        c.rate_hz > MIN_SETPOINT_RATE_HZ,
        "control.rate_hz must exceed {} Hz or the autopilot leaves offboard", MIN_SETPOINT_RATE_HZ
    );
    anyhow::ensure!(c.rate_hz <= 50.0, "control.rate_hz above 50 Hz floods the link");
    anyhow::ensure!(c.warmup_setpoints > 0, "control.warmup_setpoints must be > 0 (PX4 rejects offboard without a setpoint stream)");
    anyhow::ensure!(c.retry_interval_ms >= 500, "control.retry_interval_ms too small");
    anyhow::ensure!(c.command_timeout_ms > 0, "control.command_timeout_ms must be > 0");
    anyhow::ensure!(
        c.command_timeout() < c.retry_interval(),
        "control.command_timeout_ms should be shorter than retry_interval_ms"
    );
    anyhow::ensure!(px4_mode::is_known(&c.desired_mode), "control.desired_mode {:?} is not a PX4 mode", c.desired_mode);
    Ok(())
}

pub fn check_link(l: &LinkConfig) -> Result<()> {
    if !l.autodetect {
        let url = l.url.as_deref().unwrap_or_default();
        anyhow::ensure!(!url.is_empty(), "link.url missing");
        if url.starts_with("serial:") {
            anyhow::ensure!(serial_target(url).is_some(), "link.url serial form is serial:<dev>:<baud>");
        }
    }
    anyhow::ensure!(l.sys_id > 0, "link.sys_id must be > 0");
    anyhow::ensure!(l.connection_timeout_ms >= 1_000, "link.connection_timeout_ms too small");
    if let Some(hz) = l.send_heartbeat_hz {
        anyhow::ensure!(hz > 0.0, "link.send_heartbeat_hz must be > 0");
    }
    Ok(())
}
