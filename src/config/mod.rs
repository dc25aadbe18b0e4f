// Configuration module for quizpilot
// Every tunable threshold lives here and is injected at construction

#[allow(clippy::module_inception)]
pub mod config;
pub mod config_loader;

// Re-export main types for easier access
pub use config::{
    LevelPolicyConfig, LoggingConfig, PerDifficulty, PerLevel, QLearningConfig, QuizConfig,
    RetryConfig, RewardConfig, RunSource, StateConfig, StorageConfig,
};
pub use config_loader::{ConfigLoader, CONFIG_ENV_VAR};
