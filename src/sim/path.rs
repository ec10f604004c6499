//! Arc-length parametrized ball path
//!
//! Authoring gives a handful of control points; the chain needs positions at
//! arbitrary distances along the curve. At build time the Catmull-Rom spline
//! through the control points is resampled into points spaced `step` apart,
//! so a lookup is a division plus one lerp.
//!
//! Control points can be flagged as masked (the curve runs under level
//! terrain). The curve from a masked control point to the next one is
//! hidden, and contiguous hidden stretches become one `[from, to)` range.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::PathError;

/// Fewest control points a spline can be built from
pub const MIN_CONTROL_POINTS: usize = 4;

/// Refinement passes per sample before accepting the estimate
const MAX_REFINE_ITERATIONS: u32 = 16;

/// Accepted relative error between a sample gap and the requested step
const STEP_TOLERANCE: f32 = 0.01;

/// One authoring vertex
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub pos: Vec2,
    /// Curve from this vertex to the next one is hidden
    #[serde(default)]
    pub masked: bool,
}

impl ControlPoint {
    pub fn new(pos: Vec2) -> Self {
        Self { pos, masked: false }
    }

    pub fn masked(pos: Vec2) -> Self {
        Self { pos, masked: true }
    }
}

/// A hidden stretch of the path, in arc length
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskRange {
    pub from: f32,
    pub to: f32,
}

impl MaskRange {
    #[inline]
    pub fn contains(&self, s: f32) -> bool {
        s >= self.from && s < self.to
    }
}

/// Immutable sampled curve
#[derive(Debug, Clone)]
pub struct Path {
    step: f32,
    points: Vec<Vec2>,
    /// `dirs[i]` is the unit vector from `points[i]` to `points[i + 1]`
    dirs: Vec<Vec2>,
    /// Sorted, non-overlapping
    masks: Vec<MaskRange>,
}

impl Path {
    /// Sample the spline through `control` every `step` pixels of arc length
    pub fn build(control: &[ControlPoint], step: f32) -> Result<Self, PathError> {
        if control.len() < MIN_CONTROL_POINTS {
            return Err(PathError::TooFewControlPoints { got: control.len() });
        }
        if !step.is_finite() || step <= 0.0 {
            return Err(PathError::InvalidStep(step));
        }

        let u_max = (control.len() - 1) as f32;
        let mut points = vec![control[0].pos];
        let mut masks = Vec::new();
        let mut mask_start = control[0].masked.then_some(0.0);

        let mut u = 0.0_f32;
        // Initial parameter guess: one step over the length of the first chord
        let first_chord = control[0].pos.distance(control[1].pos).max(step);
        let mut du = step / first_chord;

        loop {
            let last = points[points.len() - 1];
            let remaining = u_max - u;
            if remaining <= 0.0 {
                break;
            }
            du = du.min(remaining);

            let mut converged = false;
            let mut reached_end = false;
            for _ in 0..MAX_REFINE_ITERATIONS {
                let dist = spline_point(control, u + du).distance(last);
                if du >= remaining && dist < step * (1.0 - STEP_TOLERANCE) {
                    reached_end = true;
                    break;
                }
                if dist <= f32::EPSILON {
                    du = (du * 2.0).min(remaining);
                    continue;
                }
                if ((dist - step) / step).abs() < STEP_TOLERANCE {
                    converged = true;
                    break;
                }
                du = (du * step / dist).min(remaining);
            }

            if reached_end {
                // Close on the authored endpoint unless that leaves a sliver
                // shorter than half a step
                let end = control[control.len() - 1].pos;
                if end.distance(last) >= step * 0.5 {
                    points.push(end);
                }
                break;
            }
            if !converged {
                log::warn!(
                    "Path sampling did not converge at u={:.3} (step {}), accepting estimate",
                    u + du,
                    step
                );
            }

            u += du;
            points.push(spline_point(control, u));

            let s = (points.len() - 1) as f32 * step;
            let segment_masked = control[(u.floor() as usize).min(control.len() - 1)].masked;
            match (mask_start, segment_masked) {
                (None, true) => mask_start = Some(s),
                (Some(from), false) => {
                    masks.push(MaskRange { from, to: s });
                    mask_start = None;
                }
                _ => {}
            }
        }

        let length = (points.len() - 1) as f32 * step;
        if let Some(from) = mask_start {
            masks.push(MaskRange { from, to: length });
        }
        masks.retain(|m| m.to > m.from);

        let dirs = points
            .windows(2)
            .map(|w| (w[1] - w[0]).normalize_or(Vec2::X))
            .collect::<Vec<_>>();

        log::debug!(
            "Built path: {} samples, length {:.1}, {} masked ranges",
            points.len(),
            length,
            masks.len()
        );

        Ok(Self {
            step,
            points,
            dirs: if dirs.is_empty() { vec![Vec2::X] } else { dirs },
            masks,
        })
    }

    /// Total arc length covered by the samples
    #[inline]
    pub fn length(&self) -> f32 {
        self.step * (self.points.len() - 1) as f32
    }

    #[inline]
    pub fn step(&self) -> f32 {
        self.step
    }

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    pub fn masks(&self) -> &[MaskRange] {
        &self.masks
    }

    /// Position at arc length `s`
    ///
    /// Negative `s` extrapolates backward along the first direction so balls
    /// can queue up before the path start. Past the end the last sample is
    /// returned.
    pub fn location(&self, s: f32) -> Vec2 {
        if s < 0.0 {
            return self.points[0] + self.dirs[0] * s;
        }
        let t = s / self.step;
        let idx = t.floor() as usize;
        if idx + 1 >= self.points.len() {
            return self.points[self.points.len() - 1];
        }
        self.points[idx].lerp(self.points[idx + 1], t - idx as f32)
    }

    /// Direction of the sampled segment containing `s`
    pub fn direction(&self, s: f32) -> Vec2 {
        let idx = if s <= 0.0 {
            0
        } else {
            ((s / self.step) as usize).min(self.dirs.len() - 1)
        };
        self.dirs[idx]
    }

    /// Is arc length `s` inside a masked range
    pub fn have_mask(&self, s: f32) -> bool {
        let idx = self.masks.partition_point(|m| m.from <= s);
        idx > 0 && self.masks[idx - 1].contains(s)
    }
}

/// Evaluate the Catmull-Rom spline through `control` at global parameter `u`
///
/// Segment `i` spans `u` in `[i, i + 1]`; end tangents reuse the end points
/// so the curve starts and finishes exactly on the authored vertices.
fn spline_point(control: &[ControlPoint], u: f32) -> Vec2 {
    let last = control.len() - 1;
    let seg = (u.floor() as usize).min(last - 1);
    let t = (u - seg as f32).clamp(0.0, 1.0);

    let p0 = control[seg.saturating_sub(1)].pos;
    let p1 = control[seg].pos;
    let p2 = control[seg + 1].pos;
    let p3 = control[(seg + 2).min(last)].pos;

    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (p2 - p0) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (3.0 * p1 - p0 - 3.0 * p2 + p3) * t3)
}
