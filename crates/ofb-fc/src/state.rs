use std::sync::Arc;

use anyhow::{Context, Result};
use ofb_proto::status::VehicleStatus;
use tokio::sync::watch;

/// Latest autopilot status, shared between the telemetry reader and the control loop.
///
/// Writers replace the whole snapshot; readers always see one complete update.
/// Clones are handles onto the same cache.
#[derive(Debug, Clone)]
pub struct TelemetryMirror {
    tx: Arc<watch::Sender<VehicleStatus>>,
}

impl Default for TelemetryMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryMirror {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(VehicleStatus::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn update(&self, status: VehicleStatus) {
        self.tx.send_replace(status);
    }

    pub fn current(&self) -> VehicleStatus {
        self.tx.borrow().clone()
    }

    /// Clears the connected flag. Returns true if it was set.
    pub fn mark_disconnected(&self) -> bool {
        self.tx.send_if_modified(|s| std::mem::replace(&mut s.connected, false))
    }

    /// Resolves with the first status that reports a connection (immediately if already connected).
    pub async fn wait_connected(&self) -> Result<VehicleStatus> {
        let mut rx = self.tx.subscribe();
        let status = rx.wait_for(|s| s.connected).await.context("telemetry feed closed")?;
        Ok(status.clone())
    }
}
