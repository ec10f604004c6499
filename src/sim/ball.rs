//! Chain ball entity and its connection state machine
//!
//! A ball's primary coordinate is its arc length along the path. Screen
//! position and direction are derived from it every time it moves.
//!
//! Connection state describes the link to the *previous* ball (lower path
//! position):
//! - `Normal`: rigidly attached, sits exactly `con_dist` ahead of it
//! - `Disconnected`: moves on its own until the gap closes
//! - `Inserting`: sliding into place after being shot into the chain

use bitflags::bitflags;
use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::path::Path;
use crate::consts::NUM_COLORS;
use crate::tuning::ChainTuning;

/// Ball palette
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BallColor {
    Red,
    Green,
    Blue,
    Yellow,
    Purple,
    White,
}

impl BallColor {
    pub const ALL: [BallColor; NUM_COLORS] = [
        BallColor::Red,
        BallColor::Green,
        BallColor::Blue,
        BallColor::Yellow,
        BallColor::Purple,
        BallColor::White,
    ];

    /// Color for a palette index (wraps)
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % NUM_COLORS]
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Bit for color sets
    #[inline]
    pub fn bit(self) -> u32 {
        1 << self.index()
    }
}

/// Special effect carried by a ball, triggered when it is destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum ToolProp {
    #[default]
    Normal,
    Bomb,
    Backwards,
    Slow,
    Accuracy,
}

impl ToolProp {
    /// Every tool that can be handed out
    pub const SPECIAL: [ToolProp; 4] = [
        ToolProp::Bomb,
        ToolProp::Backwards,
        ToolProp::Slow,
        ToolProp::Accuracy,
    ];
}

bitflags! {
    /// Per-ball status bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BallFlags: u8 {
        /// Leading edge lies in a masked range
        const MASK_FRONT = 0x01;
        /// Trailing edge lies in a masked range
        const MASK_BACK = 0x02;
        /// Queued for removal at the end of the tick
        const DESTROYED = 0x04;
        /// Inserted after its target rather than before it
        const INSERT_NEXT = 0x08;
        /// Removed by a bomb rather than a combo
        const BOMBED = 0x10;
        /// Already reported past the path end
        const ESCAPED = 0x20;
    }
}

/// Stable handle of a ball within its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BallId(pub u32);

/// Which neighbor an inserting ball measures its destination from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAnchor {
    /// `con_dist` ahead of the previous ball
    AfterPrev,
    /// `con_dist` behind the next ball (never behind the previous one)
    BeforeNext,
}

/// Connection to the previous ball
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionState {
    Normal,
    /// `grace` counts down the creep period after a split
    Disconnected { grace: f32 },
    /// `remaining` counts down the slide; `offset` is the start position
    /// relative to the destination, `from` the screen point the slide began at
    Inserting {
        remaining: f32,
        offset: f32,
        from: Vec2,
        anchor: InsertAnchor,
    },
}

impl ConnectionState {
    #[inline]
    pub fn is_normal(&self) -> bool {
        matches!(self, ConnectionState::Normal)
    }

    #[inline]
    pub fn is_inserting(&self) -> bool {
        matches!(self, ConnectionState::Inserting { .. })
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected { .. })
    }
}

/// What a neighbor looks like at the moment a ball updates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub path_pos: f32,
    pub color: BallColor,
    /// Still sliding in; its position is not final
    pub inserting: bool,
}

impl Neighbor {
    pub fn of(ball: &Ball) -> Self {
        Self {
            path_pos: ball.path_pos,
            color: ball.color,
            inserting: ball.state.is_inserting(),
        }
    }
}

/// Inputs for one state machine step
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub path: &'a Path,
    pub tuning: &'a ChainTuning,
    pub prev: Option<Neighbor>,
    pub next: Option<Neighbor>,
    pub dt: f32,
}

/// Transitions that happened during a step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Became `Normal` this step
    pub connected: bool,
    /// Insertion slide ended this step
    pub insert_finished: bool,
}

/// A ball in a chain
#[derive(Debug, Clone)]
pub struct Ball {
    pub id: BallId,
    pub color: BallColor,
    pub tool: ToolProp,
    /// Arc length along the path; negative before the start
    pub path_pos: f32,
    /// Screen position
    pub pos: Vec2,
    /// Unit direction of travel
    pub dir: Vec2,
    pub state: ConnectionState,
    pub flags: BallFlags,
}

impl Ball {
    pub fn new(id: BallId, color: BallColor) -> Self {
        Self {
            id,
            color,
            tool: ToolProp::Normal,
            path_pos: 0.0,
            pos: Vec2::ZERO,
            dir: Vec2::X,
            state: ConnectionState::Disconnected { grace: 0.0 },
            flags: BallFlags::empty(),
        }
    }

    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.flags.contains(BallFlags::DESTROYED)
    }

    /// Partly or fully hidden by a masked range
    #[inline]
    pub fn is_masked(&self) -> bool {
        self.flags.intersects(BallFlags::MASK_FRONT | BallFlags::MASK_BACK)
    }

    /// Place the ball without deriving a direction from the jump
    pub fn set_path_pos(&mut self, s: f32, path: &Path, radius: f32) {
        self.pos = path.location(s);
        self.dir = tangent(path, s);
        self.path_pos = s;
        self.refresh_mask(path, radius);
    }

    /// Move to arc length `s`, updating screen position, direction and masks
    pub fn update_path_pos(&mut self, s: f32, path: &Path, radius: f32) {
        let new_pos = path.location(s);
        let delta = new_pos - self.pos;
        self.dir = if s > self.path_pos && delta.length_squared() > 1e-6 {
            delta.normalize()
        } else {
            tangent(path, s)
        };
        self.pos = new_pos;
        self.path_pos = s;
        self.refresh_mask(path, radius);
    }

    fn refresh_mask(&mut self, path: &Path, radius: f32) {
        self.flags.set(BallFlags::MASK_FRONT, path.have_mask(self.path_pos + radius));
        self.flags.set(BallFlags::MASK_BACK, path.have_mask(self.path_pos - radius));
    }

    /// Cut the link to the previous ball and start the grace period
    ///
    /// Only a `Normal` ball is affected.
    pub fn disconnect(&mut self, grace: f32) {
        if self.state.is_normal() {
            self.state = ConnectionState::Disconnected { grace };
        }
    }

    /// Start the insertion slide from `from` (screen) toward the destination
    pub fn insert(&mut self, anchor: InsertAnchor, from: Vec2, offset: f32, duration: f32) {
        self.state = ConnectionState::Inserting {
            remaining: duration,
            offset,
            from,
            anchor,
        };
    }

    /// Advance the state machine by one tick
    ///
    /// The chain moves the pushing ball itself; everything else comes here.
    pub fn update(&mut self, ctx: &StepContext<'_>) -> StepOutcome {
        let mut outcome = StepOutcome::default();
        let radius = ctx.tuning.ball_radius;

        match self.state {
            ConnectionState::Normal => match ctx.prev {
                Some(prev) => {
                    self.update_path_pos(prev.path_pos + ctx.tuning.con_dist(), ctx.path, radius);
                }
                None => self.state = ConnectionState::Disconnected { grace: 0.0 },
            },
            ConnectionState::Inserting {
                remaining,
                offset,
                from,
                anchor,
            } => {
                let remaining = remaining - ctx.dt;
                let dest = insert_destination(anchor, ctx).unwrap_or(self.path_pos - offset);

                if remaining <= 0.0 {
                    self.update_path_pos(between_neighbors(dest, ctx), ctx.path, radius);
                    self.state = ConnectionState::Disconnected { grace: 0.0 };
                    outcome.insert_finished = true;
                    outcome.connected = self.update_disconnected(ctx);
                } else {
                    let f = 1.0 - remaining / ctx.tuning.insert_duration;
                    let s = between_neighbors(dest + offset * (1.0 - f), ctx);
                    self.update_path_pos(s, ctx.path, radius);
                    self.pos = from.lerp(ctx.path.location(dest), f);
                    self.state = ConnectionState::Inserting {
                        remaining,
                        offset,
                        from,
                        anchor,
                    };
                }
            }
            ConnectionState::Disconnected { .. } => {
                outcome.connected = self.update_disconnected(ctx);
            }
        }

        outcome
    }

    /// Free movement; returns true when the ball connects
    fn update_disconnected(&mut self, ctx: &StepContext<'_>) -> bool {
        let ConnectionState::Disconnected { grace } = self.state else {
            return false;
        };
        let Some(prev) = ctx.prev else {
            return false;
        };

        let tuning = ctx.tuning;
        let con_dist = tuning.con_dist();
        let radius = tuning.ball_radius;
        let gap = self.path_pos - prev.path_pos;
        // Never link to or chase a predecessor that is still sliding in
        let same_color = prev.color == self.color && !prev.inserting;
        let merge_step = tuning.speed_merge_move * ctx.dt;

        // Connect now if the gap is closed, or would be closed by the next
        // merge step anyway
        if !prev.inserting && (gap <= con_dist || (same_color && gap - merge_step <= con_dist)) {
            self.update_path_pos(prev.path_pos + con_dist, ctx.path, radius);
            self.state = ConnectionState::Normal;
            return true;
        }

        if grace > 0.0 {
            let fraction = if tuning.disconnect_grace > 0.0 {
                (grace / tuning.disconnect_grace).min(1.0)
            } else {
                0.0
            };
            let creep = 0.5 * tuning.forward_speed * fraction * ctx.dt;
            self.update_path_pos(self.path_pos + creep, ctx.path, radius);
            self.state = ConnectionState::Disconnected {
                grace: (grace - ctx.dt).max(0.0),
            };
        } else if same_color {
            // Pulled back toward the matching color
            self.update_path_pos(self.path_pos - merge_step, ctx.path, radius);
        }
        false
    }
}

/// Where an inserting ball ends up given its neighbors right now
fn insert_destination(anchor: InsertAnchor, ctx: &StepContext<'_>) -> Option<f32> {
    let con_dist = ctx.tuning.con_dist();
    let after_prev = ctx.prev.map(|p| p.path_pos + con_dist);
    let before_next = ctx.next.map(|n| {
        let s = n.path_pos - con_dist;
        match ctx.prev {
            Some(p) => s.max(p.path_pos),
            None => s,
        }
    });
    match anchor {
        InsertAnchor::AfterPrev => after_prev.or(before_next),
        InsertAnchor::BeforeNext => before_next.or(after_prev),
    }
}

/// Keep a sliding ball from passing either neighbor
fn between_neighbors(s: f32, ctx: &StepContext<'_>) -> f32 {
    let s = ctx.next.map_or(s, |n| s.min(n.path_pos));
    ctx.prev.map_or(s, |p| s.max(p.path_pos))
}

/// Path tangent just behind `s`, stable for negligible motion
fn tangent(path: &Path, s: f32) -> Vec2 {
    let back = path.location(s - 1.0);
    (path.location(s) - back).normalize_or(path.direction(s))
}
