use std::f64::consts::{PI, TAU};

use anyhow::Result;
use nalgebra::Vector3;
use ofb_proto::setpoint::Setpoint;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Figure-eight geometry. Defaults fly two 4 m circles around (6,16) and (14,16) at 5 m.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryCfg {
    pub radius_m: f64,
    pub left_center_x: f64,
    pub right_center_x: f64,
    pub center_y: f64,
    pub altitude_m: f64,
    /// Phase increment per control tick [rad]
    pub phase_step_rad: f64,
    /// Warmup hold position [x, y, z]; defaults to the figure-eight crossing point.
    pub hold: Option<[f64; 3]>,
}

impl Default for TrajectoryCfg {
    fn default() -> Self {
        Self {
            radius_m: 4.0,
            left_center_x: 6.0,
            right_center_x: 14.0,
            center_y: 16.0,
            altitude_m: 5.0,
            phase_step_rad: 0.1225,
            hold: None,
        }
    }
}

impl TrajectoryCfg {
    /// Angle added to the phase so both lobes start on their common point.
    /// None when the circles neither touch nor overlap.
    pub fn lobe_offset(&self) -> Option<f64> {
        if !(self.radius_m > 0.0) {
            return None;
        }
        let ratio = (self.right_center_x - self.left_center_x) / (2.0 * self.radius_m);
        if ratio.abs() > 1.0 {
            return None;
        }
        Some(ratio.asin())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternSegment {
    /// Left lobe, flown with increasing angle.
    A,
    /// Right lobe, mirrored.
    B,
}

impl PatternSegment {
    pub fn flipped(self) -> Self {
        match self {
            PatternSegment::A => PatternSegment::B,
            PatternSegment::B => PatternSegment::A,
        }
    }
}

impl std::fmt::Display for PatternSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternSegment::A => f.write_str("A"),
            PatternSegment::B => f.write_str("B"),
        }
    }
}

pub struct FigureEight {
    cfg: TrajectoryCfg,
    lobe_offset: f64,
    phase: f64,
    segment: PatternSegment,
    wraps: u64,
}

impl FigureEight {
    pub fn new(cfg: TrajectoryCfg) -> Result<Self> {
        anyhow::ensure!(cfg.phase_step_rad > 0.0 && cfg.phase_step_rad < PI, "trajectory.phase_step_rad must be in (0, pi)");
        let lobe_offset = cfg.lobe_offset().ok_or_else(|| anyhow::anyhow!(
            "trajectory lobes must touch: |right_center_x - left_center_x| = {} exceeds 2 * radius_m = {}",
            (cfg.right_center_x - cfg.left_center_x).abs(),
            2.0 * cfg.radius_m,
        ))?;
        Ok(Self { cfg, lobe_offset, phase: 0.0, segment: PatternSegment::A, wraps: 0 })
    }

    pub fn phase(&self) -> f64 { self.phase }
    pub fn segment(&self) -> PatternSegment { self.segment }
    pub fn wraps(&self) -> u64 { self.wraps }

    pub fn advance(&mut self) {
        self.phase += self.cfg.phase_step_rad;
        if self.phase >= TAU {
            self.phase = 0.0;
            self.segment = self.segment.flipped();
            self.wraps += 1;
            debug!("trajectory: wrap #{} -> segment {}", self.wraps, self.segment);
        }
    }

    /// Setpoint for the current phase. Heading tracks the phase on both lobes.
    pub fn evaluate(&self) -> Setpoint {
        Setpoint::with_yaw(self.position_at(self.segment, self.phase), self.phase)
    }

    pub fn position_at(&self, segment: PatternSegment, phase: f64) -> Vector3<f64> {
        let c = &self.cfg;
        let a = phase + self.lobe_offset;
        let (cx, a) = match segment {
            PatternSegment::A => (c.left_center_x, a),
            PatternSegment::B => (c.right_center_x, -a),
        };
        Vector3::new(cx + c.radius_m * a.sin(), c.center_y + c.radius_m * a.cos(), c.altitude_m)
    }

    /// Point where the lobes meet; every segment starts and ends here.
    pub fn start_point(&self) -> Vector3<f64> {
        self.position_at(PatternSegment::A, 0.0)
    }

    pub fn hold_setpoint(&self) -> Setpoint {
        let p = match self.cfg.hold {
            Some([x, y, z]) => Vector3::new(x, y, z),
            None => self.start_point(),
        };
        Setpoint::hold(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vector3<f64>, b: Vector3<f64>) -> bool {
        (a - b).norm() < 1e-9
    }

    #[test]
    fn default_lobes_meet_at_tangent_point() {
        let gen = FigureEight::new(TrajectoryCfg::default()).unwrap();
        assert!(close(gen.start_point(), Vector3::new(10.0, 16.0, 5.0)));
        assert!(close(gen.hold_setpoint().position, Vector3::new(10.0, 16.0, 5.0)));
    }

    #[test]
    fn positions_are_continuous_across_segment_switch() {
        let gen = FigureEight::new(TrajectoryCfg::default()).unwrap();
        let end = TAU - 1e-12;
        // A ends where B starts, and B ends where A starts.
        assert!(close(gen.position_at(PatternSegment::A, end), gen.position_at(PatternSegment::B, 0.0)));
        assert!(close(gen.position_at(PatternSegment::B, end), gen.position_at(PatternSegment::A, 0.0)));
    }

    #[test]
    fn continuity_holds_for_overlapping_lobes() {
        let cfg = TrajectoryCfg { left_center_x: 7.0, right_center_x: 13.0, ..TrajectoryCfg::default() };
        let gen = FigureEight::new(cfg).unwrap();
        let end = TAU - 1e-12;
        assert!(close(gen.position_at(PatternSegment::A, end), gen.position_at(PatternSegment::B, 0.0)));
        assert!(close(gen.position_at(PatternSegment::B, end), gen.position_at(PatternSegment::A, 0.0)));
    }

    #[test]
    fn coincident_centers_reduce_to_plain_circle() {
        let cfg = TrajectoryCfg { left_center_x: 6.0, right_center_x: 6.0, ..TrajectoryCfg::default() };
        let gen = FigureEight::new(cfg).unwrap();
        for i in 0..20 {
            let phase = i as f64 * 0.3;
            let expected = Vector3::new(6.0 + 4.0 * phase.sin(), 16.0 + 4.0 * phase.cos(), 5.0);
            assert!(close(gen.position_at(PatternSegment::A, phase), expected));
            let mirrored = Vector3::new(6.0 + 4.0 * (-phase).sin(), 16.0 + 4.0 * (-phase).cos(), 5.0);
            assert!(close(gen.position_at(PatternSegment::B, phase), mirrored));
        }
    }

    #[test]
    fn stepping_over_the_wrap_never_jumps_more_than_a_regular_step() {
        let mut gen = FigureEight::new(TrajectoryCfg::default()).unwrap();
        let chord = 4.0 * 0.1225 + 1e-9;
        let mut prev = gen.evaluate().position;
        for _ in 0..500 {
            gen.advance();
            let cur = gen.evaluate().position;
            assert!((cur - prev).norm() <= chord, "jump {} at phase {}", (cur - prev).norm(), gen.phase());
            prev = cur;
        }
        assert!(gen.wraps() > 0);
    }

    #[test]
    fn yaw_equals_phase_on_both_segments() {
        let mut gen = FigureEight::new(TrajectoryCfg::default()).unwrap();
        let mut seen_b = false;
        for _ in 0..200 {
            gen.advance();
            let sp = gen.evaluate();
            seen_b |= gen.segment() == PatternSegment::B;
            let heading = if gen.phase() > PI { gen.phase() - TAU } else { gen.phase() };
            assert!((sp.yaw() - heading).abs() < 1e-9, "yaw {} at phase {}", sp.yaw(), gen.phase());
        }
        assert!(seen_b);
    }

    #[test]
    fn phase_step_limited_to_half_a_turn() {
        for step in [0.0, -0.1, PI, 4.0, TAU] {
            let cfg = TrajectoryCfg { phase_step_rad: step, ..TrajectoryCfg::default() };
            assert!(FigureEight::new(cfg.clone()).is_err(), "step {} accepted", step);
            assert!(crate::doctor::check_trajectory(&cfg).is_err());
        }
        let cfg = TrajectoryCfg { phase_step_rad: 3.0, ..TrajectoryCfg::default() };
        assert!(FigureEight::new(cfg.clone()).is_ok());
        assert!(crate::doctor::check_trajectory(&cfg).is_ok());
    }

    #[test]
    fn segment_parity_follows_wrap_count() {
        let mut gen = FigureEight::new(TrajectoryCfg::default()).unwrap();
        assert_eq!(gen.segment(), PatternSegment::A);
        let mut last_wraps = 0;
        for _ in 0..1000 {
            let before = gen.segment();
            gen.advance();
            if gen.wraps() != last_wraps {
                assert_eq!(gen.wraps(), last_wraps + 1);
                assert_eq!(gen.phase(), 0.0);
                assert_eq!(gen.segment(), before.flipped());
                last_wraps = gen.wraps();
            } else {
                assert_eq!(gen.segment(), before);
            }
            let expected = if gen.wraps() % 2 == 0 { PatternSegment::A } else { PatternSegment::B };
            assert_eq!(gen.segment(), expected);
            assert!(gen.phase() >= 0.0 && gen.phase() < TAU);
        }
    }

    #[test]
    fn one_cycle_is_fifty_two_ticks_at_default_step() {
        let mut gen = FigureEight::new(TrajectoryCfg::default()).unwrap();
        for _ in 0..51 {
            gen.advance();
        }
        assert_eq!(gen.wraps(), 0);
        gen.advance();
        assert_eq!(gen.wraps(), 1);
        assert_eq!(gen.segment(), PatternSegment::B);
    }

    #[test]
    fn altitude_is_constant() {
        let mut gen = FigureEight::new(TrajectoryCfg::default()).unwrap();
        for _ in 0..120 {
            gen.advance();
            assert_eq!(gen.evaluate().position.z, 5.0);
        }
    }

    #[test]
    fn rejects_lobes_that_do_not_touch() {
        let cfg = TrajectoryCfg { right_center_x: 20.0, ..TrajectoryCfg::default() };
        assert!(FigureEight::new(cfg).is_err());
        let cfg = TrajectoryCfg { radius_m: 0.0, ..TrajectoryCfg::default() };
        assert!(FigureEight::new(cfg).is_err());
    }

    #[test]
    fn explicit_hold_overrides_start_point() {
        let cfg = TrajectoryCfg { hold: Some([6.0, 16.0, 5.0]), ..TrajectoryCfg::default() };
        let gen = FigureEight::new(cfg).unwrap();
        assert!(close(gen.hold_setpoint().position, Vector3::new(6.0, 16.0, 5.0)));
    }
}
