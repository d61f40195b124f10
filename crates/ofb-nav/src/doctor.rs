use anyhow::Result;
use crate::trajectory::TrajectoryCfg;

pub fn check_trajectory(t: &TrajectoryCfg) -> Result<()> {
    anyhow::ensure!(t.radius_m > 0.0, "trajectory.radius_m must be > 0");
    anyhow::ensure!(
        t.lobe_offset().is_some(),
        "trajectory lobes do not touch: centers {} and {} are more than 2 * radius_m apart",
        t.left_center_x, t.right_center_x
    );
    anyhow::ensure!(t.altitude_m > 0.0, "trajectory.altitude_m must be above ground");
    anyhow::ensure!(t.phase_step_rad > 0.0 && t.phase_step_rad < std::f64::consts::PI, "trajectory.phase_step_rad should be in (0, pi)");
    if let Some([x, y, z]) = t.hold {
        anyhow::ensure!(x.is_finite() && y.is_finite() && z.is_finite(), "trajectory.hold has non-finite coordinates");
        anyhow::ensure!(z > 0.0, "trajectory.hold altitude must be above ground");
    }
    Ok(())
}
