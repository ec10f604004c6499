//! Deterministic simulation module
//!
//! All gameplay logic lives here. This module must be pure and deterministic:
//! - Caller-supplied timestep only
//! - Seeded RNG only
//! - Stable iteration order (path order within a chain)
//! - No rendering or platform dependencies

pub mod ball;
pub mod chain;
pub mod event;
pub mod level;
pub mod path;

pub use ball::{Ball, BallColor, BallFlags, BallId, ConnectionState, InsertAnchor, ToolProp};
pub use chain::{BallChain, ComboRun, InsertSide, UpdateFlags};
pub use event::{ChainEvent, ComboInfo, LevelEvent};
pub use level::{AimHit, Level, LevelStatus, Shot};
pub use path::{ControlPoint, MaskRange, Path};
