use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mavlink::common::{MavAutopilot, MavMessage};
use tracing::{info, warn};

use crate::{LinkConfig, LinkError};

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
}

impl AutodetectResult {
    pub fn url(&self) -> Option<String> {
        self.chosen.as_ref().map(|(dev, baud)| format!("serial:{}:{}", dev, baud))
    }
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/serial0".into(),
        "/dev/ttyAMA0".into(),
        "/dev/ttyTHS1".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![57600, 115200, 921600]
}

pub fn autodetect_link(
    candidate_devs: Vec<String>,
    candidate_bauds: Vec<u32>,
    heartbeat_timeout: Duration,
) -> Result<AutodetectResult> {
    let mut probes = Vec::new();

    for dev in candidate_devs {
        for &baud in &candidate_bauds {
            let start = Instant::now();
            let (hb_seen, note) = match probe(&dev, baud, heartbeat_timeout) {
                Ok(true) => (true, "heartbeat".to_string()),
                Ok(false) => (false, "no heartbeat".to_string()),
                Err(e) => {
                    warn!("fc autodetect probe failed dev={} baud={} err={:#}", dev, baud, e);
                    (false, format!("open/connect failed: {:#}", e))
                }
            };
            probes.push(ProbeResult {
                dev: dev.clone(),
                baud,
                hb_seen,
                elapsed_ms: start.elapsed().as_millis() as u64,
                note,
            });
            if hb_seen {
                info!("fc autodetect: OK {} @ {}", dev, baud);
                return Ok(AutodetectResult { chosen: Some((dev, baud)), probes });
            }
        }
    }

    Ok(AutodetectResult { chosen: None, probes })
}

// recv has no deadline, so the wait happens on a side thread. A silent port
// leaves that thread parked until the process exits.
fn probe(dev: &str, baud: u32, heartbeat_timeout: Duration) -> Result<bool> {
    let url = format!("serial:{}:{}", dev, baud);
    let conn = mavlink::connect::<MavMessage>(&url).with_context(|| format!("mavlink connect {}", url))?;
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        while let Ok((_hdr, msg)) = conn.recv() {
            if let MavMessage::HEARTBEAT(hb) = msg {
                if hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID {
                    let _ = tx.send(());
                    return;
                }
            }
        }
    });
    Ok(rx.recv_timeout(heartbeat_timeout).is_ok())
}

/// Connection string for the configured link, probing serial ports when asked to.
pub fn resolve_url(cfg: &LinkConfig) -> Result<String> {
    if cfg.autodetect {
        let res = run_autodetect(cfg)?;
        res.url().ok_or_else(|| LinkError::NoHeartbeat.into())
    } else {
        cfg.url.clone().context("link.url missing (autodetect=false)")
    }
}

pub fn run_autodetect(cfg: &LinkConfig) -> Result<AutodetectResult> {
    let devs = cfg.candidate_devs.clone().unwrap_or_else(default_candidate_devs);
    let bauds = cfg.candidate_bauds.clone().unwrap_or_else(default_candidate_bauds);
    let timeout = Duration::from_millis(cfg.heartbeat_timeout_ms.unwrap_or(1500));
    autodetect_link(devs, bauds, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chosen_port_becomes_serial_url() {
        let res = AutodetectResult { chosen: Some(("/dev/ttyACM0".into(), 57600)), probes: Vec::new() };
        assert_eq!(res.url().as_deref(), Some("serial:/dev/ttyACM0:57600"));
    }

    #[test]
    fn fixed_url_is_used_without_probing() {
        let cfg = LinkConfig { url: Some("udpin:0.0.0.0:14540".into()), ..LinkConfig::default() };
        assert_eq!(resolve_url(&cfg).unwrap(), "udpin:0.0.0.0:14540");
    }

    #[test]
    fn missing_url_is_an_error() {
        let cfg = LinkConfig { url: None, ..LinkConfig::default() };
        assert!(resolve_url(&cfg).is_err());
    }

    #[test]
    fn no_candidates_means_nothing_chosen() {
        let res = autodetect_link(Vec::new(), default_candidate_bauds(), Duration::from_millis(10)).unwrap();
        assert!(res.chosen.is_none() && res.probes.is_empty());
    }
}
