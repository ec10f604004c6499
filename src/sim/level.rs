//! Level driver: chains, shots and timed tool effects
//!
//! Owns one chain per path and everything that happens between chains:
//! shots flying in from the shooter, tools handed out to chain balls,
//! effect timers, scoring and the win/lose verdict. Time is the sum of the
//! `dt`s fed to [`Level::tick`].

use std::collections::VecDeque;
use std::sync::Arc;

use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use super::ball::{BallColor, BallId, ConnectionState, ToolProp};
use super::chain::{BallChain, InsertSide, UpdateFlags};
use super::event::{ChainEvent, LevelEvent};
use super::path::Path;
use crate::tuning::Tuning;

/// Outcome of the level so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelStatus {
    Playing,
    /// Every chain was cleared
    Cleared,
    /// A ball reached the end of its path
    Failed,
}

/// A fired ball on its way to a chain
#[derive(Debug, Clone, Copy)]
pub struct Shot {
    pub pos: Vec2,
    pub dir: Vec2,
    pub speed: f32,
    pub color: BallColor,
}

/// Result of aiming along a ray
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AimHit {
    pub chain: usize,
    pub id: BallId,
    /// Distance along the ray
    pub t: f32,
    pub point: Vec2,
}

/// A tool that expires at `expires`
#[derive(Debug, Clone, Copy)]
struct ToolGrant {
    chain: usize,
    id: BallId,
    expires: f32,
}

/// One level in progress
#[derive(Debug, Clone)]
pub struct Level {
    tuning: Tuning,
    chains: Vec<BallChain>,
    shots: Vec<Shot>,
    seed: u64,
    rng: Pcg32,
    time: f32,
    status: LevelStatus,

    score: u64,
    combo_sequence: u32,
    last_combo_time: f32,
    /// Balls destroyed since the restart; refills stop once it reaches the max
    combo_gauge: u32,
    destroyed: u32,

    backwards_until: f32,
    slow_until: f32,
    accuracy_until: f32,
    next_tool_time: f32,
    tool_grants: Vec<ToolGrant>,

    /// Chance (percent) that the next generated ball keeps the run color
    cur_repeat: u32,
}

impl Level {
    /// Create a level with one chain per path; call [`Level::restart`] to fill it
    pub fn new(paths: Vec<Arc<Path>>, tuning: Tuning, seed: u64) -> Self {
        let chain_tuning = tuning.chain();
        let chains = paths
            .into_iter()
            .map(|path| BallChain::new(path, chain_tuning))
            .collect();
        Self {
            chains,
            shots: Vec::new(),
            seed,
            rng: Pcg32::seed_from_u64(seed),
            time: 0.0,
            status: LevelStatus::Playing,
            score: 0,
            combo_sequence: 0,
            last_combo_time: f32::NEG_INFINITY,
            combo_gauge: 0,
            destroyed: 0,
            backwards_until: f32::NEG_INFINITY,
            slow_until: f32::NEG_INFINITY,
            accuracy_until: f32::NEG_INFINITY,
            next_tool_time: tuning.tool_first_delay,
            tool_grants: Vec::new(),
            cur_repeat: tuning.repeat,
            tuning,
        }
    }

    /// Reset every chain and deal the starting balls
    pub fn restart(&mut self) {
        self.rng = Pcg32::seed_from_u64(self.seed);
        self.shots.clear();
        self.tool_grants.clear();
        self.status = LevelStatus::Playing;
        self.score = 0;
        self.combo_sequence = 0;
        self.last_combo_time = self.time - self.tuning.combo_keep_window;
        self.combo_gauge = 0;
        self.destroyed = 0;
        self.backwards_until = self.time;
        self.slow_until = self.time;
        self.accuracy_until = self.time;
        self.next_tool_time = self.time + self.tuning.tool_first_delay;

        for i in 0..self.chains.len() {
            self.chains[i].reset();
            self.chains[i].set_forward_speed(self.tuning.forward_speed, false);
            self.generate_balls(i, self.tuning.start_balls);
        }
        log::info!(
            "Level restarted: {} chains, {} balls each",
            self.chains.len(),
            self.tuning.start_balls
        );
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn chains(&self) -> &[BallChain] {
        &self.chains
    }

    pub fn chain(&self, index: usize) -> &BallChain {
        &self.chains[index]
    }

    pub fn shots(&self) -> &[Shot] {
        &self.shots
    }

    pub fn status(&self) -> LevelStatus {
        self.status
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn destroyed_count(&self) -> u32 {
        self.destroyed
    }

    pub fn total_balls(&self) -> usize {
        self.chains.iter().map(BallChain::len).sum()
    }

    pub fn backwards_active(&self) -> bool {
        self.backwards_until > self.time
    }

    pub fn slow_active(&self) -> bool {
        self.slow_until > self.time
    }

    pub fn accuracy_active(&self) -> bool {
        self.accuracy_until > self.time
    }

    /// Add `count` balls to the start of chain `index`
    ///
    /// Runs continue the color of the current first ball; every repeat makes
    /// another repeat less likely.
    pub fn generate_balls(&mut self, index: usize, count: usize) {
        let num_colors = self.tuning.num_colors;
        let mut color = match self.chains[index].first() {
            Some(ball) => ball.color,
            None => {
                self.cur_repeat = self.tuning.repeat;
                BallColor::from_index(self.rng.random_range(0..num_colors))
            }
        };
        let mut first = self.chains[index].is_empty();

        for _ in 0..count {
            if !first && self.rng.random_range(0..100) >= self.cur_repeat {
                color = BallColor::from_index(self.rng.random_range(0..num_colors));
                self.cur_repeat = self.tuning.repeat;
            } else {
                self.cur_repeat = self.cur_repeat.saturating_sub(self.tuning.repeat_decay);
            }
            first = false;
            self.chains[index].add_ball(color);
        }
    }

    /// Bit set of colors still present in any chain
    pub fn color_set(&self) -> u32 {
        self.chains
            .iter()
            .flat_map(|c| c.balls())
            .fold(0, |bits, b| bits | b.color.bit())
    }

    /// A random color that still appears on the board
    pub fn random_usable_color(&mut self) -> Option<BallColor> {
        let bits = self.color_set();
        let usable: Vec<_> = BallColor::ALL
            .into_iter()
            .filter(|c| bits & c.bit() != 0)
            .collect();
        if usable.is_empty() {
            return None;
        }
        Some(usable[self.rng.random_range(0..usable.len())])
    }

    /// Launch a shot from `origin` along `dir`
    pub fn fire(&mut self, origin: Vec2, dir: Vec2, color: BallColor) {
        let mut speed = self.tuning.shot_speed;
        if self.accuracy_active() {
            speed *= self.tuning.accuracy_factor;
        }
        self.shots.push(Shot {
            pos: origin,
            dir: dir.normalize_or(Vec2::X),
            speed,
            color,
        });
    }

    /// Closest visible ball along the ray from `origin`
    pub fn aim(&self, origin: Vec2, dir: Vec2) -> Option<AimHit> {
        let dir = dir.normalize_or(Vec2::X);
        self.chains
            .iter()
            .enumerate()
            .filter_map(|(chain, c)| c.ray_test(origin, dir).map(|(id, t)| (chain, id, t)))
            .min_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(chain, id, t)| AimHit {
                chain,
                id,
                t,
                point: origin + dir * t,
            })
    }

    /// Advance the level by `dt` seconds
    pub fn tick(&mut self, dt: f32) -> Vec<LevelEvent> {
        let mut events = Vec::new();
        if self.status != LevelStatus::Playing {
            return events;
        }

        self.time += dt;
        self.update_shots(dt, &mut events);
        self.expire_tools();

        let mut flags = UpdateFlags::empty();
        if self.backwards_active() {
            flags |= UpdateFlags::BACKWARDS;
        }
        if self.slow_active() {
            flags |= UpdateFlags::SLOW;
        }

        let mut queue = VecDeque::new();
        for (i, chain) in self.chains.iter_mut().enumerate() {
            queue.extend(chain.update(dt, flags).into_iter().map(|e| (i, e)));
        }
        self.handle_chain_events(queue, &mut events);

        self.assign_tools(&mut events);
        self.refill();
        self.judge(&mut events);
        events
    }

    fn update_shots(&mut self, dt: f32, events: &mut Vec<LevelEvent>) {
        let con_dist = self.tuning.con_dist();
        let radius = self.tuning.ball_radius;
        let (width, height) = (self.tuning.playfield_width, self.tuning.playfield_height);

        let mut i = 0;
        while i < self.shots.len() {
            let shot = &mut self.shots[i];
            shot.pos += shot.dir * shot.speed * dt;
            let shot = *shot;

            let nearest = self
                .chains
                .iter()
                .enumerate()
                .filter_map(|(c, chain)| {
                    chain.find_nearest_ball(shot.pos, true).map(|(id, d)| (c, id, d))
                })
                .min_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));

            if let Some((c, hit, _)) = nearest.filter(|n| n.2 < con_dist) {
                let id = self.insert_shot(c, hit, shot);
                events.push(LevelEvent::ShotInserted { chain: c, id });
                self.shots.swap_remove(i);
                continue;
            }

            let p = shot.pos;
            let on_screen = p.x + radius > 0.0
                && p.y + radius > 0.0
                && p.x - radius < width
                && p.y - radius < height;
            if !on_screen {
                events.push(LevelEvent::ShotMissed);
                self.shots.swap_remove(i);
                continue;
            }
            i += 1;
        }
    }

    /// Turn a shot touching ball `hit` of chain `c` into an insertion
    fn insert_shot(&mut self, c: usize, hit: BallId, shot: Shot) -> BallId {
        let chain = &mut self.chains[c];
        let Some(ball) = chain.ball(hit) else {
            unreachable!("nearest ball {hit:?} vanished from chain {c}");
        };

        // Ahead of the ball along its travel direction means after it
        let mut target = hit;
        let mut side = if (shot.pos - ball.pos).dot(ball.dir) > 0.0 {
            InsertSide::After
        } else {
            InsertSide::Before
        };
        // Behind a linked ball is the same gap as after its predecessor
        if side == InsertSide::Before && ball.state == ConnectionState::Normal {
            if let Some(prev) = chain.prev_of(hit) {
                target = prev.id;
                side = InsertSide::After;
            }
        }

        let id = chain.insert_ball_from(target, shot.color, side, shot.pos);
        log::debug!("Shot {:?} joined chain {} as {:?}", shot.color, c, id);
        id
    }

    fn handle_chain_events(
        &mut self,
        mut queue: VecDeque<(usize, ChainEvent)>,
        events: &mut Vec<LevelEvent>,
    ) {
        while let Some((chain, event)) = queue.pop_front() {
            match &event {
                ChainEvent::Combo(info) => {
                    if self.last_combo_time + self.tuning.combo_keep_window >= self.time {
                        self.combo_sequence += 1;
                    } else {
                        self.combo_sequence = 0;
                    }
                    self.last_combo_time = self.time;

                    let points = 100 * self.combo_sequence as u64 + 10 * info.ball_count as u64;
                    self.score += points;
                    events.push(LevelEvent::ScoreAdded {
                        points,
                        sequence: self.combo_sequence,
                    });
                }
                ChainEvent::BallDestroyed { tool, pos, .. } => {
                    self.combo_gauge += 1;
                    self.destroyed += 1;
                    match tool {
                        ToolProp::Normal => {}
                        ToolProp::Bomb => {
                            let radius = self.tuning.bomb_radius;
                            for (i, c) in self.chains.iter_mut().enumerate() {
                                c.apply_bomb(*pos, radius);
                                queue.extend(c.take_events().into_iter().map(|e| (i, e)));
                            }
                        }
                        ToolProp::Backwards => {
                            self.backwards_until = self.time + self.tuning.backwards_duration;
                        }
                        ToolProp::Slow => {
                            self.slow_until = self.time + self.tuning.slow_duration;
                        }
                        ToolProp::Accuracy => {
                            self.accuracy_until = self.time + self.tuning.accuracy_duration;
                        }
                    }
                }
                ChainEvent::BallEscaped { .. } => {
                    self.status = LevelStatus::Failed;
                }
                _ => {}
            }
            events.push(LevelEvent::Chain { chain, event });
        }
    }

    fn expire_tools(&mut self) {
        let now = self.time;
        let chains = &mut self.chains;
        self.tool_grants.retain(|grant| {
            if grant.expires > now {
                return true;
            }
            chains[grant.chain].set_tool(grant.id, ToolProp::Normal);
            false
        });
    }

    fn assign_tools(&mut self, events: &mut Vec<LevelEvent>) {
        if self.time < self.next_tool_time {
            return;
        }
        for c in 0..self.chains.len() {
            let candidates: Vec<BallId> = self.chains[c]
                .balls()
                .iter()
                .filter(|b| b.path_pos > 0.0 && b.tool == ToolProp::Normal)
                .map(|b| b.id)
                .collect();
            for id in candidates {
                if !self.rng.random_bool(self.tuning.tool_chance) {
                    continue;
                }
                let tool = ToolProp::SPECIAL[self.rng.random_range(0..ToolProp::SPECIAL.len())];
                self.chains[c].set_tool(id, tool);
                self.tool_grants.push(ToolGrant {
                    chain: c,
                    id,
                    expires: self.time + self.tuning.tool_lifetime,
                });
                self.next_tool_time = self.time
                    + self.tuning.tool_interval_min
                    + self.tuning.tool_interval_jitter * self.rng.random::<f32>();
                events.push(LevelEvent::ToolAssigned { chain: c, id, tool });
                return;
            }
        }
    }

    /// Keep feeding chains whose tail has entered the path
    fn refill(&mut self) {
        if self.combo_gauge >= self.tuning.max_combo_gauge {
            return;
        }
        for i in 0..self.chains.len() {
            let needs_more = self.chains[i]
                .first()
                .is_none_or(|b| b.path_pos > self.tuning.refill_threshold);
            if needs_more {
                self.generate_balls(i, self.tuning.refill_count);
            }
        }
    }

    fn judge(&mut self, events: &mut Vec<LevelEvent>) {
        if self.status == LevelStatus::Failed {
            log::info!("Level failed at t={:.2}s, score {}", self.time, self.score);
            self.shots.clear();
            events.push(LevelEvent::Failed);
        } else if self.chains.iter().all(BallChain::is_empty) {
            self.status = LevelStatus::Cleared;
            log::info!("Level cleared at t={:.2}s, score {}", self.time, self.score);
            self.shots.clear();
            events.push(LevelEvent::Cleared);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::path::ControlPoint;

    const DT: f32 = 1.0 / 60.0;

    fn line_path(len: f32, y: f32) -> Arc<Path> {
        let control: Vec<_> = (0..4)
            .map(|i| ControlPoint::new(Vec2::new(i as f32 * len / 3.0, y)))
            .collect();
        Arc::new(Path::build(&control, 2.0).unwrap())
    }

    fn quiet_tuning() -> Tuning {
        Tuning {
            forward_speed: 0.0,
            tool_chance: 0.0,
            max_combo_gauge: 0,
            start_balls: 0,
            playfield_width: 2000.0,
            playfield_height: 2000.0,
            ..Tuning::default()
        }
    }

    fn level_with(colors: &[BallColor], tuning: Tuning) -> Level {
        let mut level = Level::new(vec![line_path(1500.0, 300.0)], tuning, 7);
        level.restart();
        for &c in colors.iter().rev() {
            level.chains[0].add_ball(c);
        }
        // Move the whole chain onto the path
        let shift = 200.0;
        let path = level.chains[0].path().clone();
        for b in level.chains[0].balls_mut() {
            b.set_path_pos(b.path_pos + shift, &path, 16.0);
        }
        level
    }

    #[test]
    fn test_restart_generates_deterministic_chains() {
        let tuning = Tuning::default();
        let mut a = Level::new(vec![line_path(1500.0, 0.0)], tuning.clone(), 42);
        let mut b = Level::new(vec![line_path(1500.0, 0.0)], tuning.clone(), 42);
        a.restart();
        b.restart();
        assert_eq!(a.total_balls(), tuning.start_balls);
        let colors = |l: &Level| l.chain(0).balls().iter().map(|b| b.color).collect::<Vec<_>>();
        assert_eq!(colors(&a), colors(&b));
        assert!(colors(&a).iter().all(|c| c.index() < tuning.num_colors));
    }

    #[test]
    fn test_generate_balls_continues_first_color() {
        let tuning = Tuning {
            repeat: 100,
            repeat_decay: 0,
            ..quiet_tuning()
        };
        let mut level = level_with(&[BallColor::Blue], tuning);
        level.generate_balls(0, 5);
        assert_eq!(level.chain(0).len(), 6);
        assert!(level.chain(0).balls().iter().all(|b| b.color == BallColor::Blue));
    }

    #[test]
    fn test_shot_inserts_and_scores_combo() {
        use BallColor::*;
        let mut level = level_with(&[Green, Red, Red, Blue, Yellow], quiet_tuning());
        // Second Red sits at index 2; come down on it from above, slightly ahead
        let target = level.chain(0).balls()[2].pos;
        level.fire(target + Vec2::new(8.0, -200.0), Vec2::Y, Red);

        let mut all = Vec::new();
        for _ in 0..120 {
            all.extend(level.tick(DT));
        }

        assert!(all.iter().any(|e| matches!(e, LevelEvent::ShotInserted { chain: 0, .. })));
        assert!(all.contains(&LevelEvent::ScoreAdded {
            points: 30,
            sequence: 0
        }));
        assert_eq!(level.score(), 30);
        let colors: Vec<_> = level.chain(0).balls().iter().map(|b| b.color).collect();
        assert_eq!(colors, vec![Green, Blue, Yellow]);
        assert!(level.shots().is_empty());
    }

    #[test]
    fn test_shot_behind_linked_ball_goes_after_predecessor() {
        use BallColor::*;
        let mut level = level_with(&[Green, Blue, Yellow], quiet_tuning());
        let blue = level.chain(0).balls()[1].clone();
        let green = level.chain(0).balls()[0].id;
        let shot = Shot {
            pos: blue.pos - blue.dir * 4.0 + Vec2::new(0.0, -10.0),
            dir: Vec2::Y,
            speed: 0.0,
            color: Red,
        };
        let id = level.insert_shot(0, blue.id, shot);
        assert_eq!(level.chain(0).prev_of(id).map(|b| b.id), Some(green));
    }

    #[test]
    fn test_missed_shot_is_dropped() {
        let mut level = level_with(&[BallColor::Red], quiet_tuning());
        level.fire(Vec2::new(100.0, 100.0), -Vec2::Y, BallColor::Red);
        let mut missed = false;
        for _ in 0..60 {
            missed |= level.tick(DT).contains(&LevelEvent::ShotMissed);
        }
        assert!(missed);
        assert!(level.shots().is_empty());
    }

    #[test]
    fn test_aim_finds_closest_ball() {
        let level = level_with(&[BallColor::Red, BallColor::Green], quiet_tuning());
        let green = level.chain(0).balls()[1].clone();
        let hit = level
            .aim(green.pos + Vec2::new(0.0, -100.0), Vec2::Y)
            .expect("ray hits the chain");
        assert_eq!(hit.id, green.id);
        assert!((hit.t - (100.0 - 16.0)).abs() < 1e-2);
        assert!(level.aim(Vec2::new(-500.0, -500.0), -Vec2::Y).is_none());
    }

    #[test]
    fn test_tool_effects_arm_timers() {
        use BallColor::*;
        let mut level = level_with(&[Green, Red, Red, Red, Blue], quiet_tuning());
        let mid = level.chain(0).balls()[2].id;
        level.chains[0].set_tool(mid, ToolProp::Slow);
        level.chains[0].queue_check(mid);

        let events = level.tick(DT);
        assert!(events.iter().any(|e| matches!(
            e,
            LevelEvent::Chain {
                event: ChainEvent::Combo(info),
                ..
            } if info.tools == vec![ToolProp::Slow]
        )));
        assert!(level.slow_active());
        assert!(!level.backwards_active());
    }

    #[test]
    fn test_bomb_tool_clears_neighbourhood() {
        use BallColor::*;
        let mut level = level_with(&[Green, Yellow, Red, Red, Red, Blue, Purple], quiet_tuning());
        let bomb = level.chain(0).balls()[3].id;
        level.chains[0].set_tool(bomb, ToolProp::Bomb);
        level.chains[0].queue_check(bomb);

        level.tick(DT);
        // Bomb radius (100) covers three ball spacings either side
        assert!(level.chain(0).is_empty());
        assert_eq!(level.status(), LevelStatus::Cleared);
        assert_eq!(level.destroyed_count(), 7);
    }

    #[test]
    fn test_escape_fails_level() {
        let tuning = Tuning {
            forward_speed: 3000.0,
            ..quiet_tuning()
        };
        let mut level = level_with(&[BallColor::Red, BallColor::Green], tuning);
        let mut failed = 0;
        for _ in 0..240 {
            failed += level
                .tick(DT)
                .iter()
                .filter(|e| **e == LevelEvent::Failed)
                .count();
        }
        assert_eq!(failed, 1);
        assert_eq!(level.status(), LevelStatus::Failed);
    }

    #[test]
    fn test_refill_feeds_chain_until_gauge_full() {
        let tuning = Tuning {
            max_combo_gauge: 5,
            refill_count: 2,
            ..quiet_tuning()
        };
        let mut level = level_with(&[BallColor::Red], tuning);
        level.tick(DT);
        assert_eq!(level.chain(0).len(), 3);

        level.combo_gauge = 5;
        level.tick(DT);
        assert_eq!(level.chain(0).len(), 3);
    }

    #[test]
    fn test_tools_expire() {
        let tuning = Tuning {
            tool_chance: 1.0,
            tool_first_delay: 0.0,
            tool_lifetime: 0.5,
            tool_interval_min: 100.0,
            ..quiet_tuning()
        };
        let mut level = level_with(&[BallColor::Red, BallColor::Green], tuning);
        let events = level.tick(DT);
        assert!(events.iter().any(|e| matches!(e, LevelEvent::ToolAssigned { .. })));
        let tools = |l: &Level| {
            l.chain(0)
                .balls()
                .iter()
                .filter(|b| b.tool != ToolProp::Normal)
                .count()
        };
        assert_eq!(tools(&level), 1);
        for _ in 0..60 {
            level.tick(DT);
        }
        assert_eq!(tools(&level), 0);
    }

    #[test]
    fn test_random_usable_color_comes_from_board() {
        let mut level = level_with(&[BallColor::Purple, BallColor::Purple], quiet_tuning());
        assert_eq!(level.color_set(), BallColor::Purple.bit());
        for _ in 0..10 {
            assert_eq!(level.random_usable_color(), Some(BallColor::Purple));
        }
        level.chains[0].reset();
        assert_eq!(level.random_usable_color(), None);
    }
}
