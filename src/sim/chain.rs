//! Ball chain: ordered balls on one path
//!
//! Balls are stored by value in path order (ascending `path_pos`), so the
//! neighbors of index `i` are `i - 1` and `i + 1`. The lowest ball that is
//! not sliding in pushes the rest: it moves at the chain speed while every
//! other ball runs its own state machine against its neighbors.
//!
//! Removal is deferred. Combos and bombs mark balls `DESTROYED`, and marked
//! balls are dropped at a single point so indices stay valid while a tick
//! is being processed.

use std::sync::Arc;

use bitflags::bitflags;
use glam::Vec2;

use super::ball::{
    Ball, BallColor, BallFlags, BallId, ConnectionState, InsertAnchor, Neighbor, StepContext,
    ToolProp,
};
use super::event::{ChainEvent, ComboInfo};
use super::path::Path;
use crate::ray_circle_intersect;
use crate::tuning::ChainTuning;

bitflags! {
    /// Modifiers for one chain update
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateFlags: u8 {
        /// Trailing segment crawls backward, nothing is pushed
        const BACKWARDS = 0x01;
        /// Forward speed scaled down
        const SLOW = 0x02;
    }
}

/// Side of the target ball an inserted ball goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertSide {
    /// Lower path position than the target
    Before,
    /// Higher path position than the target
    After,
}

/// Same-color run around a ball, as inclusive chain indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComboRun {
    pub start: usize,
    pub end: usize,
    pub len: usize,
}

/// An ordered chain of balls following one path
#[derive(Debug, Clone)]
pub struct BallChain {
    path: Arc<Path>,
    tuning: ChainTuning,
    balls: Vec<Ball>,
    /// Balls marked this tick, removed at the end of it
    destroy: Vec<BallId>,
    /// Balls to test for combos once the movement pass is done
    check: Vec<BallId>,
    events: Vec<ChainEvent>,
    speed_forward: f32,
    speed_cur: f32,
    finish_path_pos: f32,
    next_id: u32,
}

impl BallChain {
    pub fn new(path: Arc<Path>, tuning: ChainTuning) -> Self {
        Self {
            path,
            speed_forward: tuning.forward_speed,
            tuning,
            balls: Vec::new(),
            destroy: Vec::new(),
            check: Vec::new(),
            events: Vec::new(),
            speed_cur: 0.0,
            finish_path_pos: 0.0,
            next_id: 1,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tuning(&self) -> &ChainTuning {
        &self.tuning
    }

    /// Balls in path order
    pub fn balls(&self) -> &[Ball] {
        &self.balls
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.balls.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.balls.is_empty()
    }

    /// Ball with the lowest path position (the one pushing)
    pub fn first(&self) -> Option<&Ball> {
        self.balls.first()
    }

    /// Ball closest to the end of the path
    pub fn last(&self) -> Option<&Ball> {
        self.balls.last()
    }

    pub fn index_of(&self, id: BallId) -> Option<usize> {
        self.balls.iter().position(|b| b.id == id)
    }

    pub fn ball(&self, id: BallId) -> Option<&Ball> {
        self.balls.iter().find(|b| b.id == id)
    }

    pub fn prev_of(&self, id: BallId) -> Option<&Ball> {
        let idx = self.index_of(id)?;
        idx.checked_sub(1).map(|i| &self.balls[i])
    }

    pub fn next_of(&self, id: BallId) -> Option<&Ball> {
        let idx = self.index_of(id)?;
        self.balls.get(idx + 1)
    }

    /// Attach or clear a ball's tool; false if the ball is gone
    pub fn set_tool(&mut self, id: BallId, tool: ToolProp) -> bool {
        match self.balls.iter_mut().find(|b| b.id == id) {
            Some(ball) => {
                ball.tool = tool;
                true
            }
            None => false,
        }
    }

    pub fn forward_speed(&self) -> f32 {
        self.speed_forward
    }

    /// Eased speed actually applied this tick
    pub fn current_speed(&self) -> f32 {
        self.speed_cur
    }

    /// Change the target speed; `immediate` skips the easing
    pub fn set_forward_speed(&mut self, speed: f32, immediate: bool) {
        self.speed_forward = speed;
        if immediate {
            self.speed_cur = speed;
        }
    }

    /// Path position of the last ball removed when the chain ran empty
    pub fn finish_path_pos(&self) -> f32 {
        self.finish_path_pos
    }

    /// Events raised outside `update` (bombs), without waiting for the next tick
    pub fn take_events(&mut self) -> Vec<ChainEvent> {
        std::mem::take(&mut self.events)
    }

    fn alloc_id(&mut self) -> BallId {
        let id = BallId(self.next_id);
        self.next_id += 1;
        id
    }

    fn expect_index(&self, id: BallId) -> usize {
        self.index_of(id)
            .unwrap_or_else(|| panic!("ball {id:?} is not part of this chain"))
    }

    /// Feed a new ball in behind the current first ball
    pub fn add_ball(&mut self, color: BallColor) -> BallId {
        let id = self.alloc_id();
        let con_dist = self.tuning.con_dist();
        let radius = self.tuning.ball_radius;

        let start = match self.balls.first_mut() {
            Some(first) => {
                first.state = ConnectionState::Normal;
                first.path_pos - con_dist
            }
            None => -radius,
        };

        let mut ball = Ball::new(id, color);
        ball.set_path_pos(start, &self.path, radius);
        self.balls.insert(0, ball);
        id
    }

    /// Splice a ball next to `target`, sliding in from the target's position
    pub fn insert_ball(&mut self, target: BallId, color: BallColor, side: InsertSide) -> BallId {
        let from = self.balls[self.expect_index(target)].pos;
        self.insert_ball_from(target, color, side, from)
    }

    /// Splice a ball next to `target`; the slide starts at screen point `from`
    ///
    /// Panics if `target` is not in the chain.
    pub fn insert_ball_from(
        &mut self,
        target: BallId,
        color: BallColor,
        side: InsertSide,
        from: Vec2,
    ) -> BallId {
        let t = self.expect_index(target);
        let target_pos = self.balls[t].path_pos;
        let target_linked = self.balls[t].state.is_normal();

        let idx = match side {
            InsertSide::Before => t,
            InsertSide::After => t + 1,
        };
        let anchor = match side {
            InsertSide::After => InsertAnchor::AfterPrev,
            InsertSide::Before if target_linked && idx > 0 => InsertAnchor::AfterPrev,
            InsertSide::Before => InsertAnchor::BeforeNext,
        };

        let con_dist = self.tuning.con_dist();
        let prev_pos = idx.checked_sub(1).map(|i| self.balls[i].path_pos);
        let dest = match (anchor, prev_pos) {
            (InsertAnchor::AfterPrev, Some(p)) => p + con_dist,
            (_, Some(p)) => (target_pos - con_dist).max(p),
            (_, None) => target_pos - con_dist,
        };

        let id = self.alloc_id();
        let mut ball = Ball::new(id, color);
        // Starts on the neighbor opposite the insertion side, i.e. the target
        ball.set_path_pos(target_pos, &self.path, self.tuning.ball_radius);
        ball.pos = from;
        if side == InsertSide::After {
            ball.flags.insert(BallFlags::INSERT_NEXT);
        }
        ball.insert(anchor, from, target_pos - dest, self.tuning.insert_duration);
        self.balls.insert(idx, ball);

        log::debug!(
            "Inserted {:?} {:?} {:?} {:?} at index {}",
            id,
            color,
            side,
            target,
            idx
        );
        id
    }

    /// Run of same-colored, linked balls around `id`
    ///
    /// Walks back while the current ball is linked (`Normal`) to a
    /// same-colored predecessor, and forward while same-colored successors
    /// are linked. Destroyed balls end the run.
    pub fn calc_combo_num(&self, id: BallId) -> ComboRun {
        let idx = self.expect_index(id);
        self.combo_run_at(idx)
    }

    fn combo_run_at(&self, idx: usize) -> ComboRun {
        let color = self.balls[idx].color;
        let mut start = idx;
        let mut end = idx;

        let mut cur = idx;
        while self.balls[cur].state.is_normal() && cur > 0 {
            let prev = &self.balls[cur - 1];
            if prev.color != color || prev.is_destroyed() {
                break;
            }
            start = cur - 1;
            cur -= 1;
        }

        while let Some(next) = self.balls.get(end + 1) {
            if next.color != color || !next.state.is_normal() || next.is_destroyed() {
                break;
            }
            end += 1;
        }

        ComboRun {
            start,
            end,
            len: end - start + 1,
        }
    }

    /// Mark the ball at `idx` for removal; repeated calls are ignored
    fn destroy_at(&mut self, idx: usize) {
        let ball = &mut self.balls[idx];
        if ball.is_destroyed() {
            return;
        }
        ball.flags.insert(BallFlags::DESTROYED);
        self.destroy.push(ball.id);

        let path_pos = ball.path_pos;
        self.events.push(ChainEvent::BallDestroyed {
            id: ball.id,
            color: ball.color,
            tool: ball.tool,
            pos: ball.pos,
            path_pos,
            bombed: ball.flags.contains(BallFlags::BOMBED),
        });

        if self.destroy.len() == self.balls.len() {
            self.finish_path_pos = path_pos;
            self.events.push(ChainEvent::ChainEmpty { path_pos });
        }
    }

    fn remove_destroyed(&mut self) {
        if self.destroy.is_empty() {
            return;
        }
        self.balls.retain(|b| !b.is_destroyed());
        self.destroy.clear();
    }

    /// Destroy every ball within `radius` of `center`, regardless of color
    ///
    /// Balls are removed immediately; the rest of the chain is untouched.
    /// Returns the number of balls destroyed.
    pub fn apply_bomb(&mut self, center: Vec2, radius: f32) -> usize {
        let r2 = radius * radius;
        let before = self.destroy.len();
        for idx in 0..self.balls.len() {
            if self.balls[idx].pos.distance_squared(center) <= r2 {
                self.balls[idx].flags.insert(BallFlags::BOMBED);
                self.destroy_at(idx);
            }
        }
        let count = self.destroy.len() - before;
        self.remove_destroyed();
        if count > 0 {
            log::debug!("Bomb at {:?} removed {} balls", center, count);
        }
        count
    }

    /// Advance the chain by `dt` seconds and return what happened
    pub fn update(&mut self, dt: f32, flags: UpdateFlags) -> Vec<ChainEvent> {
        if self.balls.is_empty() {
            return self.take_events();
        }

        self.ease_speed(dt, flags);

        let backwards = flags.contains(UpdateFlags::BACKWARDS);
        let radius = self.tuning.ball_radius;
        let con_dist = self.tuning.con_dist();

        if backwards {
            // Leading ball of the trailing segment carries the segment back
            let mut idx = self.balls.len() - 1;
            while idx > 0 && self.balls[idx].state.is_normal() {
                idx -= 1;
            }
            let ball = &mut self.balls[idx];
            if !ball.state.is_inserting() {
                let s = ball.path_pos + self.speed_cur * dt;
                ball.update_path_pos(s, &self.path, radius);
            }
        }

        // The first ball that is not sliding in pushes everything ahead of
        // it; move it before the others read its position
        let pusher = self.balls.iter().position(|b| !b.state.is_inserting());
        if let Some(p) = pusher {
            let ball = &mut self.balls[p];
            ball.state = ConnectionState::Disconnected { grace: 0.0 };
            if !backwards {
                let s = ball.path_pos + self.speed_cur * dt;
                ball.update_path_pos(s, &self.path, radius);
            }
        }

        for i in 0..self.balls.len() {
            if Some(i) == pusher {
                continue;
            }
            let prev = i.checked_sub(1).map(|j| Neighbor::of(&self.balls[j]));
            let next = self.balls.get(i + 1).map(Neighbor::of);

            let ctx = StepContext {
                path: &self.path,
                tuning: &self.tuning,
                prev,
                next,
                dt,
            };
            let ball = &mut self.balls[i];
            let outcome = ball.update(&ctx);
            let id = ball.id;
            let color = ball.color;

            if outcome.insert_finished {
                self.events.push(ChainEvent::InsertFinished { id });
                self.queue_check(id);
            }
            if outcome.connected {
                self.events.push(ChainEvent::BallConnected { id });
                // A link between different colors cannot form a new run
                if prev.is_some_and(|p| p.color == color) {
                    self.queue_check(id);
                }
            }
        }

        let rigid = |w: &[Ball]| {
            !w[1].state.is_normal() || (w[1].path_pos - w[0].path_pos - con_dist).abs() < 1e-3
        };
        debug_assert!(self.balls.windows(2).all(rigid), "normal ball drifted");

        self.check_escape();
        self.process_checks();
        self.remove_destroyed();
        self.take_events()
    }

    fn ease_speed(&mut self, dt: f32, flags: UpdateFlags) {
        let target = if flags.contains(UpdateFlags::BACKWARDS) {
            self.tuning.backward_speed
        } else if flags.contains(UpdateFlags::SLOW) {
            self.speed_forward * self.tuning.slow_factor
        } else {
            self.speed_forward
        };

        let max_change = self.tuning.acceleration * dt;
        self.speed_cur = if target > self.speed_cur {
            target.min(self.speed_cur + max_change)
        } else {
            target.max(self.speed_cur - max_change)
        };
    }

    fn check_escape(&mut self) {
        let length = self.path.length();
        if let Some(ball) = self.balls.last_mut() {
            if ball.path_pos > length && !ball.flags.contains(BallFlags::ESCAPED) {
                ball.flags.insert(BallFlags::ESCAPED);
                log::info!("Ball {:?} escaped at {:.1}", ball.id, ball.path_pos);
                self.events.push(ChainEvent::BallEscaped {
                    id: ball.id,
                    path_pos: ball.path_pos,
                });
            }
        }
    }

    pub(crate) fn queue_check(&mut self, id: BallId) {
        if !self.check.contains(&id) {
            self.check.push(id);
        }
    }

    fn process_checks(&mut self) {
        let min_combo = self.tuning.min_combo;
        for id in std::mem::take(&mut self.check) {
            let Some(idx) = self.index_of(id) else {
                continue;
            };
            if self.balls[idx].is_destroyed() {
                continue;
            }

            let run = self.combo_run_at(idx);
            if run.len < min_combo {
                continue;
            }

            let tools = self.balls[run.start..=run.end]
                .iter()
                .map(|b| b.tool)
                .filter(|t| *t != ToolProp::Normal)
                .collect();
            let info = ComboInfo {
                color: self.balls[idx].color,
                ball_count: run.len,
                tools,
                pos: self.balls[idx].pos,
            };

            for k in run.start..=run.end {
                self.destroy_at(k);
            }
            log::debug!("Combo of {} {:?} balls", info.ball_count, info.color);
            self.events.push(ChainEvent::Combo(info));

            // Split the chain behind the gap
            let grace = self.tuning.disconnect_grace;
            if let Some(next) = self.balls.get_mut(run.end + 1) {
                if !next.is_destroyed() {
                    next.disconnect(grace);
                }
            }
        }
    }

    /// Closest ball to `pos` and its distance
    ///
    /// With `check_mask`, balls hidden by a masked range are skipped.
    pub fn find_nearest_ball(&self, pos: Vec2, check_mask: bool) -> Option<(BallId, f32)> {
        self.balls
            .iter()
            .filter(|b| !b.is_destroyed() && !(check_mask && b.is_masked()))
            .map(|b| (b.id, b.pos.distance_squared(pos)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, d2)| (id, d2.sqrt()))
    }

    /// First visible ball hit by the ray `origin + t * dir`, with its `t`
    ///
    /// `dir` must be normalized.
    pub fn ray_test(&self, origin: Vec2, dir: Vec2) -> Option<(BallId, f32)> {
        let radius = self.tuning.ball_radius;
        let mut best: Option<(BallId, f32)> = None;
        for ball in self.balls.iter().filter(|b| !b.is_masked() && !b.is_destroyed()) {
            let Some((t0, t1)) = ray_circle_intersect(origin, dir, ball.pos, radius) else {
                continue;
            };
            let t = if t0 > 0.0 {
                t0
            } else if t1 > 0.0 {
                t1
            } else {
                continue;
            };
            if best.is_none_or(|(_, bt)| t < bt) {
                best = Some((ball.id, t));
            }
        }
        best
    }

    #[cfg(test)]
    pub(crate) fn balls_mut(&mut self) -> &mut [Ball] {
        &mut self.balls
    }

    /// Drop every ball and pending state
    pub fn reset(&mut self) {
        self.balls.clear();
        self.destroy.clear();
        self.check.clear();
        self.events.clear();
        self.finish_path_pos = 0.0;
        self.speed_cur = 0.0;
    }
}
