//! Zuma core - ball chain simulation for path-based marble shooters
//!
//! Core modules:
//! - `sim`: Deterministic simulation (paths, balls, chains, levels)
//! - `tuning`: Data-driven game balance
//! - `error`: Error types for path building and tuning loads

pub mod error;
pub mod sim;
pub mod tuning;

pub use error::{PathError, TuningError};
pub use tuning::{ChainTuning, Tuning};

use glam::Vec2;

/// Game configuration constants
pub mod consts {
    /// Fixed simulation timestep
    pub const SIM_DT: f32 = 1.0 / 60.0;

    /// Ball defaults
    pub const BALL_RADIUS: f32 = 16.0;
    /// Center distance of two linked balls
    pub const CON_DIST: f32 = 2.0 * BALL_RADIUS;

    /// Shortest same-color run that is destroyed
    pub const MIN_COMBO: usize = 3;
    /// Size of the ball palette
    pub const NUM_COLORS: usize = 6;

    /// Arc length between path samples
    pub const PATH_STEP: f32 = 2.0;
}

/// Intersect the ray `origin + t * dir` with a circle
///
/// `dir` must be normalized. Returns both hit distances (`t0 <= t1`), which
/// may be negative when the circle lies behind or around the origin.
#[inline]
pub fn ray_circle_intersect(
    origin: Vec2,
    dir: Vec2,
    center: Vec2,
    radius: f32,
) -> Option<(f32, f32)> {
    let offset = center - origin;
    let b = offset.dot(dir);
    let c = offset.length_squared() - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let root = disc.sqrt();
    Some((b - root, b + root))
}
