use serde::{Deserialize, Serialize};

/// Snapshot of the autopilot state as last reported by the flight controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleStatus {
    pub connected: bool,
    pub armed: bool,
    /// Flight mode name, e.g. "MANUAL", "OFFBOARD", "AUTO.LOITER".
    pub mode: String,
}

impl VehicleStatus {
    pub fn new(connected: bool, armed: bool, mode: impl Into<String>) -> Self {
        Self { connected, armed, mode: mode.into() }
    }
}
