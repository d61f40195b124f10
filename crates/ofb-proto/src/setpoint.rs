use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Target pose for one control tick, local ENU frame (x east, y north, z up).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Setpoint {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl Setpoint {
    /// Level attitude with the given heading.
    pub fn with_yaw(position: Vector3<f64>, yaw: f64) -> Self {
        Self {
            position,
            orientation: UnitQuaternion::from_euler_angles(0.0, 0.0, yaw),
        }
    }

    pub fn hold(position: Vector3<f64>) -> Self {
        Self { position, orientation: UnitQuaternion::identity() }
    }

    pub fn yaw(&self) -> f64 {
        self.orientation.euler_angles().2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaw_survives_quaternion_conversion() {
        let sp = Setpoint::with_yaw(Vector3::new(1.0, 2.0, 3.0), 1.2);
        assert!((sp.yaw() - 1.2).abs() < 1e-12);
        let (roll, pitch, _) = sp.orientation.euler_angles();
        assert!(roll.abs() < 1e-12 && pitch.abs() < 1e-12);
    }

    #[test]
    fn hold_is_level_and_facing_east() {
        let sp = Setpoint::hold(Vector3::new(10.0, 16.0, 5.0));
        assert_eq!(sp.orientation, UnitQuaternion::identity());
        assert_eq!(sp.yaw(), 0.0);
    }
}
