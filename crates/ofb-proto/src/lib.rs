pub mod setpoint;
pub mod status;
