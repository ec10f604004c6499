//! Data-driven game balance
//!
//! Every gameplay constant lives here so levels can be retuned from a JSON
//! file without rebuilding. Units are pixels and seconds.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consts;
use crate::error::TuningError;

/// Complete tuning table for a level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    // === Chain motion ===
    /// Radius of every chain ball; the rest spacing is twice this
    pub ball_radius: f32,
    /// Target speed of the pushing ball (pixels/s)
    pub forward_speed: f32,
    /// Target speed while the backwards effect is active (negative)
    pub backward_speed: f32,
    /// Speed multiplier while the slow effect is active
    pub slow_factor: f32,
    /// Maximum change of the eased chain speed (pixels/s²)
    pub acceleration: f32,
    /// Grace period after a split during which the cut-off ball keeps creeping
    pub disconnect_grace: f32,
    /// Duration of the insertion slide
    pub insert_duration: f32,
    /// Speed at which a segment is pulled back toward a same-colored segment
    pub speed_merge_move: f32,
    /// Shortest run that is destroyed
    pub min_combo: usize,

    // === Tools ===
    pub bomb_radius: f32,
    pub backwards_duration: f32,
    pub slow_duration: f32,
    pub accuracy_duration: f32,
    /// Shot speed multiplier while accuracy is active
    pub accuracy_factor: f32,
    /// How long a tool stays attached to a ball
    pub tool_lifetime: f32,
    /// Delay after a restart before the first tool may appear
    pub tool_first_delay: f32,
    pub tool_interval_min: f32,
    pub tool_interval_jitter: f32,
    /// Chance per ball per tick that a tool is handed out once allowed
    pub tool_chance: f64,

    // === Scoring ===
    /// Combos closer together than this count as a sequence
    pub combo_keep_window: f32,

    // === Spawning ===
    pub start_balls: usize,
    pub num_colors: usize,
    /// Percent chance that the next generated ball repeats the current color
    pub repeat: u32,
    /// Decrease of the repeat chance for every repeated ball
    pub repeat_decay: u32,
    /// Balls added per refill
    pub refill_count: usize,
    /// Refill only while fewer combos than this were scored
    pub max_combo_gauge: u32,
    /// Refill once the first ball has moved past this path position
    pub refill_threshold: f32,

    // === Shooter ===
    pub shot_speed: f32,
    pub playfield_width: f32,
    pub playfield_height: f32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            ball_radius: consts::BALL_RADIUS,
            forward_speed: 60.0,
            backward_speed: -30.0,
            slow_factor: 0.1,
            acceleration: 600.0,
            disconnect_grace: 0.3,
            insert_duration: 0.2,
            speed_merge_move: 180.0,
            min_combo: consts::MIN_COMBO,

            bomb_radius: 100.0,
            backwards_duration: 4.0,
            slow_duration: 5.0,
            accuracy_duration: 5.0,
            accuracy_factor: 1.5,
            tool_lifetime: 11.0,
            tool_first_delay: 5.0,
            tool_interval_min: 3.0,
            tool_interval_jitter: 1.0,
            tool_chance: 0.01,

            combo_keep_window: 1.0,

            start_balls: 10,
            num_colors: 4,
            repeat: 50,
            repeat_decay: 5,
            refill_count: 2,
            max_combo_gauge: 5,
            refill_threshold: -10.0,

            shot_speed: 600.0,
            playfield_width: 640.0,
            playfield_height: 480.0,
        }
    }
}

impl Tuning {
    /// Rest distance between two connected balls
    #[inline]
    pub fn con_dist(&self) -> f32 {
        2.0 * self.ball_radius
    }

    /// Parse and validate tuning from JSON text
    pub fn from_json_str(json: &str) -> Result<Self, TuningError> {
        let tuning: Tuning = serde_json::from_str(json)?;
        tuning.validate()?;
        Ok(tuning)
    }

    /// Load tuning from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TuningError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| TuningError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let tuning = Self::from_json_str(&json)?;
        log::info!("Loaded tuning from {}", path.display());
        Ok(tuning)
    }

    /// Reject values the simulation cannot work with
    pub fn validate(&self) -> Result<(), TuningError> {
        let invalid = |msg: &str| Err(TuningError::Invalid(msg.to_string()));

        if !(self.ball_radius > 0.0) {
            return invalid("ball_radius must be positive");
        }
        if self.forward_speed < 0.0 {
            return invalid("forward_speed must not be negative");
        }
        if self.backward_speed > 0.0 {
            return invalid("backward_speed must not be positive");
        }
        if !(self.acceleration > 0.0) {
            return invalid("acceleration must be positive");
        }
        if !(self.insert_duration > 0.0) {
            return invalid("insert_duration must be positive");
        }
        if self.disconnect_grace < 0.0 || self.speed_merge_move < 0.0 {
            return invalid("disconnect_grace and speed_merge_move must not be negative");
        }
        if self.min_combo < 2 {
            return invalid("min_combo must be at least 2");
        }
        if self.num_colors == 0 || self.num_colors > consts::NUM_COLORS {
            return invalid("num_colors out of range");
        }
        if self.repeat > 100 {
            return invalid("repeat is a percentage");
        }
        if !(0.0..=1.0).contains(&self.tool_chance) {
            return invalid("tool_chance must be a probability");
        }
        if !(0.0..=1.0).contains(&self.slow_factor) {
            return invalid("slow_factor must be between 0 and 1");
        }
        if self.bomb_radius < 0.0 {
            return invalid("bomb_radius must not be negative");
        }
        if !(self.shot_speed > 0.0) || !(self.accuracy_factor > 0.0) {
            return invalid("shot_speed and accuracy_factor must be positive");
        }
        if !(self.playfield_width > 0.0) || !(self.playfield_height > 0.0) {
            return invalid("playfield size must be positive");
        }
        Ok(())
    }

    /// The subset a single chain needs
    pub fn chain(&self) -> ChainTuning {
        ChainTuning {
            ball_radius: self.ball_radius,
            forward_speed: self.forward_speed,
            backward_speed: self.backward_speed,
            slow_factor: self.slow_factor,
            acceleration: self.acceleration,
            disconnect_grace: self.disconnect_grace,
            insert_duration: self.insert_duration,
            speed_merge_move: self.speed_merge_move,
            min_combo: self.min_combo,
        }
    }
}

/// Motion and matching parameters owned by one chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainTuning {
    pub ball_radius: f32,
    pub forward_speed: f32,
    pub backward_speed: f32,
    pub slow_factor: f32,
    pub acceleration: f32,
    pub disconnect_grace: f32,
    pub insert_duration: f32,
    pub speed_merge_move: f32,
    pub min_combo: usize,
}

impl ChainTuning {
    #[inline]
    pub fn con_dist(&self) -> f32 {
        2.0 * self.ball_radius
    }
}

impl Default for ChainTuning {
    fn default() -> Self {
        Tuning::default().chain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let tuning = Tuning::default();
        assert!(tuning.validate().is_ok());
        assert_eq!(tuning.con_dist(), 2.0 * consts::BALL_RADIUS);
        assert_eq!(tuning.chain().con_dist(), tuning.con_dist());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let tuning = Tuning::from_json_str(r#"{ "forward_speed": 90.0, "min_combo": 4 }"#).unwrap();
        assert_eq!(tuning.forward_speed, 90.0);
        assert_eq!(tuning.min_combo, 4);
        assert_eq!(tuning.bomb_radius, Tuning::default().bomb_radius);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            Tuning::from_json_str(r#"{ "ball_radius": 0.0 }"#),
            Err(TuningError::Invalid(_))
        ));
        assert!(matches!(
            Tuning::from_json_str(r#"{ "num_colors": 99 }"#),
            Err(TuningError::Invalid(_))
        ));
        for json in [
            r#"{ "slow_factor": -0.5 }"#,
            r#"{ "bomb_radius": -1.0 }"#,
            r#"{ "shot_speed": 0.0 }"#,
            r#"{ "playfield_height": -480.0 }"#,
        ] {
            assert!(
                matches!(Tuning::from_json_str(json), Err(TuningError::Invalid(_))),
                "accepted {json}"
            );
        }
        assert!(matches!(
            Tuning::from_json_str("{ not json"),
            Err(TuningError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Tuning::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, TuningError::Io { .. }));
    }

    #[test]
    fn test_json_roundtrip_keeps_values() {
        let mut tuning = Tuning::default();
        tuning.speed_merge_move = 123.0;
        let json = serde_json::to_string(&tuning).unwrap();
        assert_eq!(Tuning::from_json_str(&json).unwrap(), tuning);
    }
}
