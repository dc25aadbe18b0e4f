// Quizpilot - adaptive quiz difficulty driven by tabular Q-learning
// Level rules and retry policies keep exploration safe for struggling learners

pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod history;
pub mod logging;
pub mod observability;
pub mod policy;
pub mod reinforcement;
pub mod sql;

pub use error::{QuizError, QuizResult};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
