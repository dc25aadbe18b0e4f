// Per-question retry budget, progressive hints and XP decay across attempts

use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;
use crate::history::WindowStats;
use crate::policy::level::hint_for;
use crate::reinforcement::action::Difficulty;
use crate::reinforcement::reward::XpBreakdown;

/// How much help the learner gets after a wrong attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintLevel {
    General,
    Specific,
    Detailed,
    RevealAnswer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressiveHint {
    pub level: HintLevel,
    pub message: String,
    pub reveal_answer: bool,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Retries allowed after the first attempt
    pub fn max_retries(&self, difficulty: Difficulty, overall: WindowStats) -> u32 {
        let base = *self.config.base_retries.get(difficulty);
        match overall.accuracy() {
            Some(accuracy) if accuracy < self.config.struggling_accuracy => {
                base + self.config.struggling_bonus_retries
            }
            _ => base,
        }
    }

    /// Multiplier for a correct answer on the 1-based `attempt_number`
    pub fn attempt_multiplier(&self, attempt_number: u32) -> f64 {
        let index = attempt_number.saturating_sub(1) as usize;
        self.config
            .xp_multipliers
            .get(index)
            .copied()
            .unwrap_or(self.config.xp_multiplier_floor)
    }

    /// XP for one attempt given difficulty-weighted XP
    pub fn attempt_xp(&self, weighted_xp: f64, attempt_number: u32, is_correct: bool) -> f64 {
        if is_correct {
            weighted_xp * self.attempt_multiplier(attempt_number)
        } else if attempt_number <= 1 {
            self.config.first_wrong_penalty
        } else {
            self.config.later_wrong_penalty
        }
    }

    /// Fold the retry decay into a correct-answer breakdown
    pub fn apply_attempt(&self, mut breakdown: XpBreakdown, attempt_number: u32) -> XpBreakdown {
        if breakdown.is_correct {
            breakdown.attempt_multiplier = self.attempt_multiplier(attempt_number);
            if attempt_number > 1 {
                breakdown.time_bonus = 0.0;
            }
        } else {
            breakdown.penalty = self.attempt_xp(0.0, attempt_number, false);
        }
        breakdown
    }

    /// Hint after the `attempt_number`-th wrong attempt
    pub fn progressive_hint(
        &self,
        difficulty: Difficulty,
        attempt_number: u32,
        max_retries: u32,
    ) -> ProgressiveHint {
        if attempt_number > max_retries {
            return ProgressiveHint {
                level: HintLevel::RevealAnswer,
                message: "Here is the correct answer and its explanation.".to_string(),
                reveal_answer: true,
            };
        }

        let level = match attempt_number {
            0 | 1 => HintLevel::General,
            2 => HintLevel::Specific,
            _ => HintLevel::Detailed,
        };
        let fallback = match level {
            HintLevel::General => "Read the question again and check every option.",
            HintLevel::Specific => "Focus on the concept the question is really testing.",
            _ => "Eliminate the options you are sure are wrong, then compare the rest.",
        };

        ProgressiveHint {
            level,
            message: hint_for(difficulty, attempt_number)
                .unwrap_or(fallback)
                .to_string(),
            reveal_answer: false,
        }
    }

    pub fn should_auto_advance(wrong_attempts: u32, max_retries: u32) -> bool {
        wrong_attempts > max_retries
    }

    /// Learner-facing line shown after a wrong attempt
    pub fn retry_message(attempt_number: u32, max_retries: u32) -> String {
        let total = max_retries + 1;
        if attempt_number >= total {
            return "No attempts left. Review the answer and move on to the next question."
                .to_string();
        }

        match total - attempt_number {
            1 => "Last try! Use the hint and think it through.".to_string(),
            remaining => format!("Not quite. You have {} attempts left.", remaining),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reinforcement::reward::{RewardCalculator, XpCategory};

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::default();
        let strong = WindowStats { correct: 8, total: 10 };
        let weak = WindowStats { correct: 4, total: 10 };

        assert_eq!(policy.max_retries(Difficulty::Easy, strong), 1);
        assert_eq!(policy.max_retries(Difficulty::Medium, strong), 2);
        assert_eq!(policy.max_retries(Difficulty::Hard, strong), 3);
        assert_eq!(policy.max_retries(Difficulty::Hard, weak), 4);
        // no history is not struggling
        assert_eq!(policy.max_retries(Difficulty::Easy, WindowStats::default()), 1);
    }

    #[test]
    fn test_hard_question_xp_decay() {
        let policy = RetryPolicy::default();
        let base = 10.0;
        let weighted = base * 2.0;

        assert_eq!(policy.attempt_xp(weighted, 1, true), 20.0);
        assert_eq!(policy.attempt_xp(weighted, 3, true), 10.0);
        assert!((policy.attempt_xp(weighted, 5, true) - 2.0).abs() < 1e-12);
        assert!((policy.attempt_xp(weighted, 9, true) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_wrong_attempt_penalties() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempt_xp(20.0, 1, false), -2.0);
        assert_eq!(policy.attempt_xp(20.0, 2, false), -1.0);
        assert_eq!(policy.attempt_xp(20.0, 4, false), -1.0);

        let breakdown = policy.apply_attempt(XpBreakdown::incorrect(0.0, XpCategory::FirstAttempt), 2);
        assert_eq!(breakdown.total(), -1);
    }

    #[test]
    fn test_apply_attempt_drops_time_bonus_on_retry() {
        let policy = RetryPolicy::default();
        let calc = RewardCalculator::default();

        let first = policy.apply_attempt(calc.student_xp(Difficulty::Hard, 0, 0.0), 1);
        assert_eq!(first.total(), 22);

        let retry = policy.apply_attempt(calc.student_xp(Difficulty::Hard, 0, 0.0), 3);
        assert_eq!(retry.time_bonus, 0.0);
        assert_eq!(retry.total(), 10);
    }

    #[test]
    fn test_auto_advance() {
        assert!(RetryPolicy::should_auto_advance(4, 3));
        assert!(!RetryPolicy::should_auto_advance(3, 3));
        assert!(!RetryPolicy::should_auto_advance(0, 1));
    }

    #[test]
    fn test_progressive_hints() {
        let policy = RetryPolicy::default();

        let first = policy.progressive_hint(Difficulty::Hard, 1, 3);
        assert_eq!(first.level, HintLevel::General);
        assert!(!first.reveal_answer);

        assert_eq!(policy.progressive_hint(Difficulty::Hard, 2, 3).level, HintLevel::Specific);
        assert_eq!(policy.progressive_hint(Difficulty::Hard, 3, 3).level, HintLevel::Detailed);

        let reveal = policy.progressive_hint(Difficulty::Easy, 2, 1);
        assert_eq!(reveal.level, HintLevel::RevealAnswer);
        assert!(reveal.reveal_answer);
    }

    #[test]
    fn test_retry_messages() {
        assert_eq!(
            RetryPolicy::retry_message(1, 2),
            "Not quite. You have 2 attempts left."
        );
        assert!(RetryPolicy::retry_message(2, 2).starts_with("Last try"));
        assert!(RetryPolicy::retry_message(3, 2).starts_with("No attempts left"));
    }
}
