// Level promotion and demotion rules
// Promotion is XP-gated; demotion looks at the level's working difficulty

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::LevelPolicyConfig;
use crate::core::types::{Level, UserProfile};
use crate::error::QuizResult;
use crate::history::{AttemptHistoryReader, ConsecutivePerformance, WindowStats};
use crate::observability::{LevelTransitionEvent, TransitionDirection};
use crate::reinforcement::action::Difficulty;

const EASY_HINTS: [&str; 3] = [
    "Try reading the question more carefully and look at all options.",
    "Consider the basic principles and most straightforward answer.",
    "The answer is related to fundamental concepts. Let me show you...",
];

const MEDIUM_HINTS: [&str; 2] = [
    "Think about the key concepts involved.",
    "Consider the most likely correct approach.",
];

const HARD_HINTS: [&str; 2] = [
    "This requires careful analysis.",
    "Consider all possibilities systematically.",
];

/// Hint for the `wrong_count`-th wrong answer on one question; `None` means reveal or move on
///
/// Callers pass the in-session attempt number of the wrong answer, not a
/// lifetime count of misses on the question. Each ladder is capped: easy and
/// medium stop after the third miss, hard starts at the second and stops after
/// the fourth.
pub fn hint_for(difficulty: Difficulty, wrong_count: u32) -> Option<&'static str> {
    match (difficulty, wrong_count) {
        (Difficulty::Easy, 1..=3) => Some(EASY_HINTS[wrong_count as usize - 1]),
        (Difficulty::Medium, 1..=3) => Some(MEDIUM_HINTS[wrong_count as usize % MEDIUM_HINTS.len()]),
        (Difficulty::Hard, 2..=4) => Some(HARD_HINTS[wrong_count as usize % HARD_HINTS.len()]),
        _ => None,
    }
}

/// Outcome of a transition check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelTransitionCheck {
    pub can_level_up: bool,
    pub can_level_down: bool,
    pub target_level: Option<Level>,
    pub reason: Option<String>,
}

impl LevelTransitionCheck {
    fn stay() -> Self {
        Self {
            can_level_up: false,
            can_level_down: false,
            target_level: None,
            reason: None,
        }
    }
}

/// Progress toward the next level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub level: Level,
    pub target_level: Option<Level>,
    pub current_xp: i64,
    pub required_xp: i64,
    pub remaining_xp: i64,
    pub progress_percentage: f64,
    pub can_level_up: bool,
}

/// Demotion verdict with the rule that fired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemotionCheck {
    pub should_demote: bool,
    pub target_level: Option<Level>,
    pub reason: Option<String>,
    pub window: WindowStats,
    pub recent: ConsecutivePerformance,
}

/// Rule-based level state machine
pub struct LevelTransitionPolicy {
    config: LevelPolicyConfig,
    history: Arc<dyn AttemptHistoryReader>,
}

impl LevelTransitionPolicy {
    pub fn new(config: LevelPolicyConfig, history: Arc<dyn AttemptHistoryReader>) -> Self {
        Self { config, history }
    }

    /// XP-gated promotion target, if the learner qualifies
    pub fn promotion_target(&self, profile: &UserProfile) -> Option<Level> {
        let threshold = self.config.promotion_threshold(profile.level)?;
        let next = profile.level.next()?;
        (profile.xp >= threshold).then_some(next)
    }

    /// Evaluate demotion from a single read of recent outcomes
    pub fn demotion_check(&self, profile: &UserProfile) -> QuizResult<DemotionCheck> {
        let mut check = DemotionCheck {
            should_demote: false,
            target_level: None,
            reason: None,
            window: WindowStats::default(),
            recent: ConsecutivePerformance::default(),
        };

        let (Some(target), Some(threshold)) = (
            profile.level.previous(),
            *self.config.demotion_accuracy.get(profile.level),
        ) else {
            return Ok(check);
        };

        let difficulty = profile.level.primary_difficulty();
        let outcomes = self.history.recent_outcomes(
            &profile.user_id,
            difficulty,
            self.config.performance_window,
        )?;
        let quick = &outcomes[..outcomes.len().min(self.config.quick_check_window)];

        check.window = WindowStats::from_outcomes(&outcomes);
        check.recent = ConsecutivePerformance::from_outcomes(quick);

        if check.recent.consecutive_wrong >= self.config.max_consecutive_wrong {
            check.should_demote = true;
            check.target_level = Some(target);
            check.reason = Some(format!(
                "{} consecutive wrong answers on {}",
                check.recent.consecutive_wrong, difficulty
            ));
            return Ok(check);
        }

        if check.window.total as usize >= self.config.performance_window {
            if let Some(accuracy) = check.window.accuracy() {
                if accuracy <= threshold {
                    check.should_demote = true;
                    check.target_level = Some(target);
                    check.reason = Some(format!(
                        "{:.0}% accuracy on {} over the last {} attempts",
                        accuracy * 100.0,
                        difficulty,
                        check.window.total
                    ));
                }
            }
        }

        Ok(check)
    }

    /// Whether the learner should move up or down; promotion wins when both apply
    pub fn check(&self, profile: &UserProfile) -> QuizResult<LevelTransitionCheck> {
        if let Some(target) = self.promotion_target(profile) {
            return Ok(LevelTransitionCheck {
                can_level_up: true,
                can_level_down: false,
                target_level: Some(target),
                reason: Some(format!(
                    "{} XP reached the {} threshold",
                    profile.xp, profile.level
                )),
            });
        }

        let demotion = self.demotion_check(profile)?;
        if demotion.should_demote {
            return Ok(LevelTransitionCheck {
                can_level_up: false,
                can_level_down: true,
                target_level: demotion.target_level,
                reason: demotion.reason,
            });
        }

        Ok(LevelTransitionCheck::stay())
    }

    /// Move the profile to `target`, returning the event to publish
    pub fn apply(
        &self,
        profile: &mut UserProfile,
        check: &LevelTransitionCheck,
    ) -> Option<LevelTransitionEvent> {
        let target = check.target_level?;
        let direction = if check.can_level_up {
            TransitionDirection::Promotion
        } else if check.can_level_down {
            TransitionDirection::Demotion
        } else {
            return None;
        };

        let from = profile.level;
        let xp_before = profile.xp;
        profile.level = target;
        // XP restarts from zero in both directions
        profile.xp = 0;

        info!(
            "User {} {:?}: {} -> {}",
            profile.user_id, direction, from, target
        );

        Some(LevelTransitionEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: profile.user_id.clone(),
            from,
            to: target,
            direction,
            xp_before,
            reason: check.reason.clone().unwrap_or_default(),
        })
    }

    pub fn level_progress(&self, profile: &UserProfile) -> LevelProgress {
        let (target_level, required_xp) = match (
            profile.level.next(),
            self.config.promotion_threshold(profile.level),
        ) {
            (Some(next), Some(threshold)) => (Some(next), threshold),
            _ => {
                return LevelProgress {
                    level: profile.level,
                    target_level: None,
                    current_xp: profile.xp,
                    required_xp: self.config.expert_xp_goal,
                    remaining_xp: 0,
                    progress_percentage: 100.0,
                    can_level_up: false,
                }
            }
        };

        let progress = if required_xp > 0 {
            (profile.xp as f64 / required_xp as f64 * 100.0).min(100.0)
        } else {
            100.0
        };

        LevelProgress {
            level: profile.level,
            target_level,
            current_xp: profile.xp,
            required_xp,
            remaining_xp: (required_xp - profile.xp).max(0),
            progress_percentage: (progress * 10.0).round() / 10.0,
            can_level_up: profile.xp >= required_xp,
        }
    }
}
