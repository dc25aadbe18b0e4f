// Reward system for the reinforcement learning agent
// The RL reward and the learner-facing XP are separate signals computed from the same answer

use serde::{Deserialize, Serialize};

use crate::config::RewardConfig;
use crate::reinforcement::action::Difficulty;

/// How many times the learner had already seen a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XpCategory {
    FirstAttempt,
    SecondAttempt,
    ThirdAttempt,
    RepeatedAttempt,
}

impl XpCategory {
    pub fn from_prior_visits(prior_visits: u32) -> Self {
        match prior_visits {
            0 => XpCategory::FirstAttempt,
            1 => XpCategory::SecondAttempt,
            2 => XpCategory::ThirdAttempt,
            _ => XpCategory::RepeatedAttempt,
        }
    }
}

/// Itemized XP for one answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XpBreakdown {
    pub is_correct: bool,
    pub base_xp: f64,
    pub repetition_multiplier: f64,
    pub difficulty_multiplier: f64,
    /// Decay across retries of the same presentation
    pub attempt_multiplier: f64,
    pub time_bonus: f64,
    pub streak_bonus: i64,
    /// Applied instead of the earned amount when the answer is wrong
    pub penalty: f64,
    pub category: XpCategory,
}

impl XpBreakdown {
    /// Breakdown for a wrong answer
    pub fn incorrect(penalty: f64, category: XpCategory) -> Self {
        Self {
            is_correct: false,
            base_xp: 0.0,
            repetition_multiplier: 0.0,
            difficulty_multiplier: 0.0,
            attempt_multiplier: 0.0,
            time_bonus: 0.0,
            streak_bonus: 0,
            penalty,
            category,
        }
    }

    /// Earned XP before the streak bonus
    pub fn earned(&self) -> f64 {
        if self.is_correct {
            self.base_xp
                * self.repetition_multiplier
                * self.difficulty_multiplier
                * self.attempt_multiplier
                + self.time_bonus
        } else {
            self.penalty
        }
    }

    /// Whole XP credited to the learner
    pub fn total(&self) -> i64 {
        self.earned().round() as i64 + self.streak_bonus
    }
}

/// Computes RL rewards and learner XP
#[derive(Debug, Clone)]
pub struct RewardCalculator {
    config: RewardConfig,
}

impl RewardCalculator {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    pub fn difficulty_multiplier(&self, difficulty: Difficulty) -> f64 {
        *self.config.difficulty_multiplier.get(difficulty)
    }

    /// min(0.5·streak, 5.0)
    pub fn streak_bonus(&self, streak: u32) -> f64 {
        (self.config.streak_bonus_per_point * streak as f64).min(self.config.streak_bonus_cap)
    }

    /// 2 − t/60 inside the window, else 0
    pub fn time_bonus(&self, time_spent_secs: f64) -> f64 {
        if time_spent_secs.is_finite()
            && time_spent_secs >= 0.0
            && time_spent_secs <= self.config.time_bonus_window_secs
        {
            self.config.time_bonus_max
                - time_spent_secs / self.config.time_bonus_window_secs
        } else {
            0.0
        }
    }

    /// Reward fed to the Q-update; `streak` is the run before this answer
    pub fn rl_reward(
        &self,
        is_correct: bool,
        difficulty: Difficulty,
        streak: u32,
        time_spent_secs: f64,
    ) -> f64 {
        if is_correct {
            self.config.base_correct_reward * self.difficulty_multiplier(difficulty)
                + self.streak_bonus(streak)
                + self.time_bonus(time_spent_secs)
        } else {
            self.config.base_incorrect_penalty * *self.config.penalty_multiplier.get(difficulty)
        }
    }

    /// Repetition decay for a question seen `prior_visits` times before
    pub fn repetition_multiplier(&self, prior_visits: u32) -> f64 {
        let decay = &self.config.repetition_decay;
        decay
            .get(prior_visits as usize)
            .or_else(|| decay.last())
            .copied()
            .unwrap_or(1.0)
    }

    /// XP for a correct answer before retry decay is applied
    pub fn student_xp(
        &self,
        difficulty: Difficulty,
        prior_visits: u32,
        time_spent_secs: f64,
    ) -> XpBreakdown {
        let time_bonus = if prior_visits == 0 {
            self.time_bonus(time_spent_secs)
        } else {
            0.0
        };

        XpBreakdown {
            is_correct: true,
            base_xp: self.config.base_xp,
            repetition_multiplier: self.repetition_multiplier(prior_visits),
            difficulty_multiplier: self.difficulty_multiplier(difficulty),
            attempt_multiplier: 1.0,
            time_bonus,
            streak_bonus: 0,
            penalty: 0.0,
            category: XpCategory::from_prior_visits(prior_visits),
        }
    }

    /// Hidden bonus paid on every n-th consecutive correct first answer
    pub fn hidden_streak_bonus(&self, streak_after: u32, first_attempt: bool) -> i64 {
        let every = self.config.hidden_streak_every;
        if first_attempt && every > 0 && streak_after > 0 && streak_after % every == 0 {
            self.config.hidden_streak_bonus
        } else {
            0
        }
    }
}

impl Default for RewardCalculator {
    fn default() -> Self {
        Self::new(RewardConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_reward_components() {
        let calc = RewardCalculator::default();

        // hard, no streak, slow answer: base only
        assert_eq!(calc.rl_reward(true, Difficulty::Hard, 0, 120.0), 20.0);

        // medium, streak 4, answered in 30s: 15 + 2 + 1.5
        let reward = calc.rl_reward(true, Difficulty::Medium, 4, 30.0);
        assert!((reward - 18.5).abs() < 1e-12);

        // streak bonus caps at 5
        assert_eq!(calc.streak_bonus(40), 5.0);
        assert_eq!(calc.time_bonus(60.0), 1.0);
        assert_eq!(calc.time_bonus(60.5), 0.0);
        assert_eq!(calc.time_bonus(f64::NAN), 0.0);
    }

    #[test]
    fn test_incorrect_penalty_scales_inversely_with_difficulty() {
        let calc = RewardCalculator::default();
        assert_eq!(calc.rl_reward(false, Difficulty::Easy, 3, 5.0), -3.0);
        assert_eq!(calc.rl_reward(false, Difficulty::Medium, 0, 5.0), -2.0);
        let hard = calc.rl_reward(false, Difficulty::Hard, 0, 5.0);
        assert!((hard + 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_student_xp_repetition_decay() {
        let calc = RewardCalculator::default();

        let first = calc.student_xp(Difficulty::Medium, 0, 30.0);
        assert_eq!(first.category, XpCategory::FirstAttempt);
        // 10 × 1.5 + 1.5 = 16.5 → 17
        assert_eq!(first.total(), 17);

        let second = calc.student_xp(Difficulty::Medium, 1, 30.0);
        assert_eq!(second.time_bonus, 0.0);
        // 10 × 0.7 × 1.5 = 10.5 → 11
        assert_eq!(second.total(), 11);

        let many = calc.student_xp(Difficulty::Hard, 9, 30.0);
        assert_eq!(many.category, XpCategory::RepeatedAttempt);
        assert_eq!(many.repetition_multiplier, 0.3);
        assert_eq!(many.total(), 6);
    }

    #[test]
    fn test_hidden_streak_bonus() {
        let calc = RewardCalculator::default();
        assert_eq!(calc.hidden_streak_bonus(3, true), 10);
        assert_eq!(calc.hidden_streak_bonus(6, true), 10);
        assert_eq!(calc.hidden_streak_bonus(4, true), 0);
        assert_eq!(calc.hidden_streak_bonus(3, false), 0);
        assert_eq!(calc.hidden_streak_bonus(0, true), 0);
    }

    #[test]
    fn test_incorrect_breakdown_total() {
        let breakdown = XpBreakdown::incorrect(-2.0, XpCategory::FirstAttempt);
        assert_eq!(breakdown.total(), -2);
    }
}
