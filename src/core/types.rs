use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::QuizError;
use crate::reinforcement::action::Difficulty;

/// Identifier of a learner
pub type UserId = String;

/// Skill level of a learner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Level {
    pub const ALL: [Level; 4] = [
        Level::Beginner,
        Level::Intermediate,
        Level::Advanced,
        Level::Expert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Beginner => "beginner",
            Level::Intermediate => "intermediate",
            Level::Advanced => "advanced",
            Level::Expert => "expert",
        }
    }

    /// Level reached on promotion; `None` at expert
    pub fn next(&self) -> Option<Level> {
        match self {
            Level::Beginner => Some(Level::Intermediate),
            Level::Intermediate => Some(Level::Advanced),
            Level::Advanced => Some(Level::Expert),
            Level::Expert => None,
        }
    }

    /// Level reached on demotion; `None` at beginner
    pub fn previous(&self) -> Option<Level> {
        match self {
            Level::Beginner => None,
            Level::Intermediate => Some(Level::Beginner),
            Level::Advanced => Some(Level::Intermediate),
            Level::Expert => Some(Level::Advanced),
        }
    }

    /// Difficulty a learner at this level is expected to work on
    pub fn primary_difficulty(&self) -> Difficulty {
        match self {
            Level::Beginner => Difficulty::Easy,
            Level::Intermediate => Difficulty::Medium,
            Level::Advanced | Level::Expert => Difficulty::Hard,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = QuizError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Level::Beginner),
            "intermediate" => Ok(Level::Intermediate),
            "advanced" => Ok(Level::Advanced),
            "expert" => Ok(Level::Expert),
            other => Err(QuizError::invalid_argument(format!(
                "Unknown level: {}",
                other
            ))),
        }
    }
}

/// Gamification profile of a learner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub level: Level,
    /// Progress toward the next level, reset on promotion
    pub xp: i64,
    /// Lifetime XP, never decreases
    pub total_xp: i64,
    pub streak_correct: u32,
    pub last_difficulty: Option<Difficulty>,
}

impl UserProfile {
    /// Create a fresh beginner profile
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            level: Level::Beginner,
            xp: 0,
            total_xp: 0,
            streak_correct: 0,
            last_difficulty: None,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_xp(mut self, xp: i64) -> Self {
        self.xp = xp.max(0);
        self
    }

    /// Apply an XP delta; current XP never drops below zero and only gains count toward the total
    pub fn add_xp(&mut self, amount: i64) {
        self.xp = (self.xp + amount).max(0);
        self.total_xp += amount.max(0);
    }

    /// Update the correct-answer streak after an attempt
    pub fn record_answer(&mut self, difficulty: Difficulty, is_correct: bool) {
        if is_correct {
            self.streak_correct += 1;
        } else {
            self.streak_correct = 0;
        }
        self.last_difficulty = Some(difficulty);
    }

    /// Difficulty whose recent run feeds the state encoder
    pub fn focus_difficulty(&self) -> Difficulty {
        self.last_difficulty
            .unwrap_or_else(|| self.level.primary_difficulty())
    }
}

/// One past attempt, as seen through the history reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub user_id: UserId,
    pub question_id: Option<String>,
    pub difficulty: Difficulty,
    pub is_correct: bool,
    pub time_spent_seconds: f64,
    pub created_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(user_id: impl Into<UserId>, difficulty: Difficulty, is_correct: bool) -> Self {
        Self {
            user_id: user_id.into(),
            question_id: None,
            difficulty,
            is_correct,
            time_spent_seconds: 0.0,
            created_at: Utc::now(),
        }
    }

    pub fn with_question(mut self, question_id: impl Into<String>) -> Self {
        self.question_id = Some(question_id.into());
        self
    }

    pub fn with_time_spent(mut self, seconds: f64) -> Self {
        self.time_spent_seconds = seconds;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ladder_bounds() {
        assert_eq!(Level::Beginner.previous(), None);
        assert_eq!(Level::Expert.next(), None);
        assert_eq!(Level::Advanced.previous(), Some(Level::Intermediate));
        assert_eq!(Level::Beginner.next(), Some(Level::Intermediate));
    }

    #[test]
    fn test_xp_never_negative() {
        let mut profile = UserProfile::new("u1").with_xp(3);
        profile.add_xp(-10);
        assert_eq!(profile.xp, 0);
        assert_eq!(profile.total_xp, 0);

        profile.add_xp(25);
        assert_eq!(profile.xp, 25);
        assert_eq!(profile.total_xp, 25);
    }

    #[test]
    fn test_streak_tracking() {
        let mut profile = UserProfile::new("u1");
        profile.record_answer(Difficulty::Easy, true);
        profile.record_answer(Difficulty::Medium, true);
        assert_eq!(profile.streak_correct, 2);
        assert_eq!(profile.focus_difficulty(), Difficulty::Medium);

        profile.record_answer(Difficulty::Medium, false);
        assert_eq!(profile.streak_correct, 0);
    }
}
