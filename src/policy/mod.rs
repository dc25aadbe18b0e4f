// Rule-based policies consulted after every answer

pub mod level;
pub mod retry;

pub use level::{hint_for, LevelProgress, LevelTransitionCheck, LevelTransitionPolicy};
pub use retry::{HintLevel, ProgressiveHint, RetryPolicy};
