//! Events produced by the simulation
//!
//! Collaborators (renderer, audio, score display) react to these after a
//! tick; they never reach back into chain state while it is updating.

use glam::Vec2;

use super::ball::{BallColor, BallId, ToolProp};

/// A destroyed same-color run
#[derive(Debug, Clone, PartialEq)]
pub struct ComboInfo {
    pub color: BallColor,
    /// Balls in the run
    pub ball_count: usize,
    /// Tools carried by balls of the run
    pub tools: Vec<ToolProp>,
    /// Screen position of the ball that completed the run
    pub pos: Vec2,
}

/// Something that happened to a chain during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    /// A ball linked up with the ball before it
    BallConnected { id: BallId },
    /// A run reached the minimum combo length and was destroyed
    Combo(ComboInfo),
    /// A ball was removed by a combo or a bomb
    BallDestroyed {
        id: BallId,
        color: BallColor,
        tool: ToolProp,
        pos: Vec2,
        path_pos: f32,
        bombed: bool,
    },
    /// An inserted ball finished sliding into place
    InsertFinished { id: BallId },
    /// The last ball was destroyed; carries its path position
    ChainEmpty { path_pos: f32 },
    /// The leading ball ran past the end of the path
    BallEscaped { id: BallId, path_pos: f32 },
}

/// Level-wide events
#[derive(Debug, Clone, PartialEq)]
pub enum LevelEvent {
    /// Event of chain `chain`
    Chain { chain: usize, event: ChainEvent },
    /// Points for a combo; `sequence` counts combos in quick succession
    ScoreAdded { points: u64, sequence: u32 },
    /// A shot joined a chain
    ShotInserted { chain: usize, id: BallId },
    /// A shot left the playfield without hitting anything
    ShotMissed,
    /// A tool was attached to a ball
    ToolAssigned { chain: usize, id: BallId, tool: ToolProp },
    /// Every chain is empty
    Cleared,
    /// A ball reached the end of its path
    Failed,
}
