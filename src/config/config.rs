use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::types::Level;
use crate::error::{QuizError, QuizResult};
use crate::reinforcement::action::Difficulty;

/// Immutable configuration injected into every component at construction
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct QuizConfig {
    pub q_learning: QLearningConfig,
    pub state: StateConfig,
    pub level_policy: LevelPolicyConfig,
    pub retry: RetryConfig,
    pub reward: RewardConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// A value per learner level
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerLevel<T> {
    pub beginner: T,
    pub intermediate: T,
    pub advanced: T,
    pub expert: T,
}

impl<T> PerLevel<T> {
    pub fn get(&self, level: Level) -> &T {
        match level {
            Level::Beginner => &self.beginner,
            Level::Intermediate => &self.intermediate,
            Level::Advanced => &self.advanced,
            Level::Expert => &self.expert,
        }
    }
}

/// A value per question difficulty
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerDifficulty<T> {
    pub easy: T,
    pub medium: T,
    pub hard: T,
}

impl<T> PerDifficulty<T> {
    pub fn get(&self, difficulty: Difficulty) -> &T {
        match difficulty {
            Difficulty::Easy => &self.easy,
            Difficulty::Medium => &self.medium,
            Difficulty::Hard => &self.hard,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QLearningConfig {
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub epsilon_by_level: PerLevel<f64>,
    pub allowed_actions: PerLevel<Vec<Difficulty>>,
    pub q_value_min: f64,
    pub q_value_max: f64,
    /// Consecutive wrong answers on any difficulty that halve exploration
    pub struggle_consecutive_wrong: u32,
    pub epsilon_damping: f64,
    /// Consecutive correct answers on any difficulty that boost exploration
    pub excel_consecutive_correct: u32,
    pub epsilon_boost: f64,
    pub epsilon_boost_cap: f64,
    /// Recent attempts inspected by the safety and epsilon checks
    pub safety_window: usize,
    /// Consecutive wrong answers at the current difficulty that shrink the action set
    pub safety_consecutive_wrong: u32,
    pub max_cas_attempts: u32,
    /// Entries at which a recommendation is considered fully confident
    pub maturity_entries: usize,
}

impl Default for QLearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.9,
            epsilon_by_level: PerLevel {
                beginner: 0.25,
                intermediate: 0.15,
                advanced: 0.10,
                expert: 0.05,
            },
            allowed_actions: PerLevel {
                beginner: vec![Difficulty::Easy, Difficulty::Medium],
                intermediate: vec![Difficulty::Easy, Difficulty::Medium, Difficulty::Hard],
                advanced: vec![Difficulty::Medium, Difficulty::Hard],
                expert: vec![Difficulty::Hard],
            },
            q_value_min: -5.0,
            q_value_max: 10.0,
            struggle_consecutive_wrong: 3,
            epsilon_damping: 0.5,
            excel_consecutive_correct: 5,
            epsilon_boost: 1.2,
            epsilon_boost_cap: 0.3,
            safety_window: 5,
            safety_consecutive_wrong: 2,
            max_cas_attempts: 8,
            maturity_entries: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StateConfig {
    /// Attempts per difficulty used for accuracy and consecutive runs
    pub performance_window: usize,
    /// Highest streak value kept in the state; at most 255
    pub streak_cap: u32,
    /// Which difficulty's run feeds the consecutive buckets
    pub run_source: RunSource,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            performance_window: 10,
            streak_cap: 5,
            run_source: RunSource::Easy,
        }
    }
}

/// Source of the consecutive correct/wrong run in the state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    /// Always the easy run, so easy struggles stay visible at any difficulty
    #[default]
    Easy,
    /// The last served difficulty, or the level's primary one
    LastServed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LevelPolicyConfig {
    /// XP needed to leave each level; expert has no successor
    pub promotion_xp: PerLevel<Option<i64>>,
    /// XP shown as the goal once expert is reached
    pub expert_xp_goal: i64,
    pub performance_window: usize,
    pub quick_check_window: usize,
    pub max_consecutive_wrong: u32,
    /// Windowed accuracy at or below which a level is lost
    pub demotion_accuracy: PerLevel<Option<f64>>,
}

impl LevelPolicyConfig {
    pub fn promotion_threshold(&self, level: Level) -> Option<i64> {
        *self.promotion_xp.get(level)
    }
}

impl Default for LevelPolicyConfig {
    fn default() -> Self {
        Self {
            promotion_xp: PerLevel {
                beginner: Some(200),
                intermediate: Some(500),
                advanced: Some(800),
                expert: None,
            },
            expert_xp_goal: 1000,
            performance_window: 10,
            quick_check_window: 5,
            max_consecutive_wrong: 3,
            demotion_accuracy: PerLevel {
                beginner: None,
                intermediate: Some(0.3),
                advanced: Some(0.5),
                expert: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub base_retries: PerDifficulty<u32>,
    /// Overall accuracy below which a learner gets extra retries
    pub struggling_accuracy: f64,
    pub struggling_bonus_retries: u32,
    /// XP multiplier for correct answers on attempts 1, 2, 3, ...
    pub xp_multipliers: Vec<f64>,
    pub xp_multiplier_floor: f64,
    pub first_wrong_penalty: f64,
    pub later_wrong_penalty: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_retries: PerDifficulty {
                easy: 1,
                medium: 2,
                hard: 3,
            },
            struggling_accuracy: 0.5,
            struggling_bonus_retries: 1,
            xp_multipliers: vec![1.0, 0.7, 0.5, 0.3],
            xp_multiplier_floor: 0.1,
            first_wrong_penalty: -2.0,
            later_wrong_penalty: -1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RewardConfig {
    pub base_correct_reward: f64,
    pub base_incorrect_penalty: f64,
    pub difficulty_multiplier: PerDifficulty<f64>,
    pub penalty_multiplier: PerDifficulty<f64>,
    pub streak_bonus_per_point: f64,
    pub streak_bonus_cap: f64,
    pub time_bonus_window_secs: f64,
    pub time_bonus_max: f64,
    pub base_xp: f64,
    /// XP decay for the 1st, 2nd, 3rd and later visits of one question
    pub repetition_decay: Vec<f64>,
    /// Every n-th consecutive correct first attempt earns a hidden bonus; 0 disables
    pub hidden_streak_every: u32,
    pub hidden_streak_bonus: i64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            base_correct_reward: 10.0,
            base_incorrect_penalty: -2.0,
            difficulty_multiplier: PerDifficulty {
                easy: 1.0,
                medium: 1.5,
                hard: 2.0,
            },
            penalty_multiplier: PerDifficulty {
                easy: 1.5,
                medium: 1.0,
                hard: 0.7,
            },
            streak_bonus_per_point: 0.5,
            streak_bonus_cap: 5.0,
            time_bonus_window_secs: 60.0,
            time_bonus_max: 2.0,
            base_xp: 10.0,
            repetition_decay: vec![1.0, 0.7, 0.5, 0.3],
            hidden_streak_every: 3,
            hidden_streak_bonus: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file; in-memory when unset
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    pub ansi: bool,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
            with_target: true,
        }
    }
}

impl QuizConfig {
    pub fn load(path: &Path) -> QuizResult<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let content =
            std::fs::read_to_string(path).map_err(|e| QuizError::io_error(e, Some(path)))?;

        let config: QuizConfig = match ext {
            "json" => serde_json::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            _ => {
                return Err(QuizError::invalid_argument(format!(
                    "Unsupported config format: {}",
                    ext
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> QuizResult<()> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let content = match ext {
            "json" => serde_json::to_string_pretty(self)?,
            "yaml" | "yml" => serde_yaml::to_string(self)?,
            "toml" => toml::to_string(self)?,
            _ => {
                return Err(QuizError::invalid_argument(format!(
                    "Unsupported config format: {}",
                    ext
                )))
            }
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| QuizError::io_error(e, Some(parent)))?;
            }
        }
        std::fs::write(path, content).map_err(|e| QuizError::io_error(e, Some(path)))?;
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quizpilot")
            .join("config.toml")
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> QuizResult<()> {
        let ql = &self.q_learning;

        if !(0.0..=1.0).contains(&ql.learning_rate) || !(0.0..=1.0).contains(&ql.discount_factor)
        {
            return Err(QuizError::config(
                "learning_rate and discount_factor must lie in [0, 1]",
            ));
        }

        if !ql.q_value_min.is_finite()
            || !ql.q_value_max.is_finite()
            || ql.q_value_min >= ql.q_value_max
        {
            return Err(QuizError::config(format!(
                "Invalid Q-value range [{}, {}]",
                ql.q_value_min, ql.q_value_max
            )));
        }

        for level in Level::ALL {
            let epsilon = *ql.epsilon_by_level.get(level);
            if !(0.0..=1.0).contains(&epsilon) {
                return Err(QuizError::config(format!(
                    "Epsilon for {} must lie in [0, 1], got {}",
                    level, epsilon
                )));
            }
            if ql.allowed_actions.get(level).is_empty() {
                return Err(QuizError::no_allowed_actions(level));
            }
        }

        if ql.max_cas_attempts == 0 {
            return Err(QuizError::config("max_cas_attempts must be at least 1"));
        }

        if self.state.performance_window == 0
            || self.level_policy.performance_window == 0
            || self.level_policy.quick_check_window == 0
            || ql.safety_window == 0
        {
            return Err(QuizError::config("History windows must be non-empty"));
        }

        if self.state.streak_cap > u32::from(u8::MAX) {
            return Err(QuizError::config(format!(
                "streak_cap must be at most {}, got {}",
                u8::MAX,
                self.state.streak_cap
            )));
        }

        if self.retry.xp_multipliers.is_empty() || self.reward.repetition_decay.is_empty() {
            return Err(QuizError::config("XP decay tables must not be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        QuizConfig::default().validate().unwrap();
    }

    #[test]
    fn test_streak_cap_must_fit_state_field() {
        let mut config = QuizConfig::default();
        config.state.streak_cap = 255;
        config.validate().unwrap();

        config.state.streak_cap = 300;
        assert!(matches!(config.validate(), Err(QuizError::Config { .. })));
    }

    #[test]
    fn test_run_source_parses_from_toml() {
        let loaded: QuizConfig = toml::from_str("[state]\nrun_source = \"last_served\"\n").unwrap();
        assert_eq!(loaded.state.run_source, RunSource::LastServed);
        assert_eq!(QuizConfig::default().state.run_source, RunSource::Easy);
    }

    #[test]
    fn test_save_and_load_each_format() {
        let dir = tempdir().unwrap();
        let mut config = QuizConfig::default();
        config.q_learning.learning_rate = 0.2;
        config.level_policy.promotion_xp.beginner = Some(100);

        for name in ["config.json", "config.yaml", "config.toml"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            let loaded = QuizConfig::load(&path).unwrap();
            assert_eq!(loaded, config, "format {name}");
        }
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[q_learning]\nlearning_rate = 0.3\n").unwrap();

        let loaded = QuizConfig::load(&path).unwrap();
        assert_eq!(loaded.q_learning.learning_rate, 0.3);
        assert_eq!(loaded.q_learning.discount_factor, 0.9);
        assert_eq!(loaded.level_policy.promotion_threshold(Level::Advanced), Some(800));
    }

    #[test]
    fn test_empty_action_set_rejected() {
        let mut config = QuizConfig::default();
        config.q_learning.allowed_actions.expert.clear();
        assert!(matches!(
            config.validate(),
            Err(QuizError::NoAllowedActions { .. })
        ));
    }

    #[test]
    fn test_inverted_clamp_range_rejected() {
        let mut config = QuizConfig::default();
        config.q_learning.q_value_min = 5.0;
        config.q_learning.q_value_max = -5.0;
        assert!(matches!(config.validate(), Err(QuizError::Config { .. })));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.ini");
        assert!(QuizConfig::default().save(&path).is_err());
    }
}
