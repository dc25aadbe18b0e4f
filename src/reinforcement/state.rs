// State representation for Reinforcement Learning
// Discretizes a learner's rolling performance into a small, hashable state

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::{RunSource, StateConfig};
use crate::core::types::{Level, UserProfile};
use crate::error::{QuizError, QuizResult};
use crate::history::AttemptHistoryReader;
use crate::reinforcement::action::Difficulty;

/// Version tag prepended to the canonical encoding
pub const STATE_ENCODING_VERSION: &str = "v1";

/// Accuracy bucket used when a difficulty has no attempts yet
pub const NEUTRAL_ACCURACY_BUCKET: u8 = 1;

/// Raw performance at one difficulty
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DifficultyPerformance {
    /// Fraction correct in the window, `None` without attempts
    pub accuracy: Option<f64>,
    /// Attempts in the window
    pub attempts: u32,
}

/// Rolling metrics gathered for one learner before discretization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub level: Level,
    pub overall_accuracy: Option<f64>,
    pub easy: DifficultyPerformance,
    pub medium: DifficultyPerformance,
    pub hard: DifficultyPerformance,
    pub streak: u32,
    /// Run at the configured run difficulty
    pub consecutive_correct: u32,
    pub consecutive_wrong: u32,
}

impl PerformanceSnapshot {
    /// Snapshot of a learner with no history
    pub fn empty(level: Level) -> Self {
        Self {
            level,
            overall_accuracy: None,
            easy: DifficultyPerformance::default(),
            medium: DifficultyPerformance::default(),
            hard: DifficultyPerformance::default(),
            streak: 0,
            consecutive_correct: 0,
            consecutive_wrong: 0,
        }
    }

    pub fn difficulty_mut(&mut self, difficulty: Difficulty) -> &mut DifficultyPerformance {
        match difficulty {
            Difficulty::Easy => &mut self.easy,
            Difficulty::Medium => &mut self.medium,
            Difficulty::Hard => &mut self.hard,
        }
    }
}

/// Discretized learner state; the Q-table key component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscretizedState {
    pub level: Level,
    pub overall_acc: u8,
    pub easy_acc: u8,
    pub medium_acc: u8,
    pub hard_acc: u8,
    pub easy_exp: u8,
    pub medium_exp: u8,
    pub hard_exp: u8,
    pub streak: u8,
    pub consec_correct: u8,
    pub consec_wrong: u8,
}

impl DiscretizedState {
    /// The single canonical text form, e.g. `v1|beginner|1|1|1|1|0|0|0|0|0|0`
    pub fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            STATE_ENCODING_VERSION,
            self.level,
            self.overall_acc,
            self.easy_acc,
            self.medium_acc,
            self.hard_acc,
            self.easy_exp,
            self.medium_exp,
            self.hard_exp,
            self.streak,
            self.consec_correct,
            self.consec_wrong
        )
    }

    pub fn state_hash(&self) -> StateHash {
        StateHash::of(&self.canonical())
    }
}

impl fmt::Display for DiscretizedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Stable 64-character hex digest of a canonical state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StateHash(String);

impl StateHash {
    fn of(canonical: &str) -> Self {
        let digest = Sha256::digest(canonical.as_bytes());
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Accept a previously stored hash
    pub fn from_hex(hex: impl Into<String>) -> QuizResult<Self> {
        let hex = hex.into();
        if hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(Self(hex))
        } else {
            Err(QuizError::invalid_state(format!(
                "Malformed state hash: {}",
                hex
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StateHash {
    type Error = QuizError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(value)
    }
}

impl From<StateHash> for String {
    fn from(hash: StateHash) -> Self {
        hash.0
    }
}

/// <50% → 0, 50–69% → 1, 70–89% → 2, ≥90% → 3
pub fn accuracy_bucket(accuracy: f64) -> QuizResult<u8> {
    if !accuracy.is_finite() || !(0.0..=1.0).contains(&accuracy) {
        return Err(QuizError::invalid_state(format!(
            "Accuracy out of range: {}",
            accuracy
        )));
    }

    Ok(if accuracy >= 0.90 {
        3
    } else if accuracy >= 0.70 {
        2
    } else if accuracy >= 0.50 {
        1
    } else {
        0
    })
}

/// 0 → 0, 1–4 → 1, 5–9 → 2, ≥10 → 3
pub fn experience_bucket(attempts: u32) -> u8 {
    match attempts {
        0 => 0,
        1..=4 => 1,
        5..=9 => 2,
        _ => 3,
    }
}

/// 0–1 → 0, 2–3 → 1, 4–5 → 2, ≥6 → 3
pub fn consecutive_bucket(count: u32) -> u8 {
    match count {
        0..=1 => 0,
        2..=3 => 1,
        4..=5 => 2,
        _ => 3,
    }
}

fn optional_accuracy_bucket(accuracy: Option<f64>) -> QuizResult<u8> {
    accuracy.map_or(Ok(NEUTRAL_ACCURACY_BUCKET), accuracy_bucket)
}

/// Turns learner history into a `DiscretizedState`
#[derive(Debug, Clone)]
pub struct StateEncoder {
    performance_window: usize,
    streak_cap: u32,
    run_source: RunSource,
}

impl StateEncoder {
    pub fn new(config: &StateConfig) -> Self {
        Self {
            performance_window: config.performance_window,
            streak_cap: config.streak_cap,
            run_source: config.run_source,
        }
    }

    /// Discretize a snapshot; pure and deterministic
    pub fn encode(&self, snapshot: &PerformanceSnapshot) -> QuizResult<DiscretizedState> {
        let streak = u8::try_from(snapshot.streak.min(self.streak_cap)).map_err(|_| {
            QuizError::invalid_state(format!(
                "streak cap {} does not fit the state encoding",
                self.streak_cap
            ))
        })?;

        Ok(DiscretizedState {
            level: snapshot.level,
            overall_acc: optional_accuracy_bucket(snapshot.overall_accuracy)?,
            easy_acc: optional_accuracy_bucket(snapshot.easy.accuracy)?,
            medium_acc: optional_accuracy_bucket(snapshot.medium.accuracy)?,
            hard_acc: optional_accuracy_bucket(snapshot.hard.accuracy)?,
            easy_exp: experience_bucket(snapshot.easy.attempts),
            medium_exp: experience_bucket(snapshot.medium.attempts),
            hard_exp: experience_bucket(snapshot.hard.attempts),
            streak,
            consec_correct: consecutive_bucket(snapshot.consecutive_correct),
            consec_wrong: consecutive_bucket(snapshot.consecutive_wrong),
        })
    }

    /// Gather the raw metrics for `profile` from history
    pub fn snapshot(
        &self,
        profile: &UserProfile,
        history: &dyn AttemptHistoryReader,
    ) -> QuizResult<PerformanceSnapshot> {
        let mut snapshot = PerformanceSnapshot::empty(profile.level);
        snapshot.streak = profile.streak_correct;
        snapshot.overall_accuracy = history.overall_stats(&profile.user_id)?.accuracy();

        for difficulty in Difficulty::ALL {
            let stats =
                history.window_stats(&profile.user_id, difficulty, self.performance_window)?;
            *snapshot.difficulty_mut(difficulty) = DifficultyPerformance {
                accuracy: stats.accuracy(),
                attempts: stats.total,
            };
        }

        let run = history.consecutive_performance(
            &profile.user_id,
            self.run_difficulty(profile),
            self.performance_window,
        )?;
        snapshot.consecutive_correct = run.consecutive_correct;
        snapshot.consecutive_wrong = run.consecutive_wrong;

        Ok(snapshot)
    }

    /// Difficulty whose leading run becomes the consecutive buckets
    pub fn run_difficulty(&self, profile: &UserProfile) -> Difficulty {
        match self.run_source {
            RunSource::Easy => Difficulty::Easy,
            RunSource::LastServed => profile.focus_difficulty(),
        }
    }

    /// Snapshot then encode
    pub fn current_state(
        &self,
        profile: &UserProfile,
        history: &dyn AttemptHistoryReader,
    ) -> QuizResult<DiscretizedState> {
        let snapshot = self.snapshot(profile, history)?;
        self.encode(&snapshot)
    }
}

impl Default for StateEncoder {
    fn default() -> Self {
        Self::new(&StateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AttemptRecord;
    use crate::history::{AttemptRecorder, InMemoryAttemptHistory};

    #[test]
    fn test_accuracy_bucket_boundaries() {
        assert_eq!(accuracy_bucket(0.70).unwrap(), 2);
        assert_eq!(accuracy_bucket(0.6999).unwrap(), 1);
        assert_eq!(accuracy_bucket(0.90).unwrap(), 3);
        assert_eq!(accuracy_bucket(0.4999).unwrap(), 0);
        assert_eq!(accuracy_bucket(0.50).unwrap(), 1);
        assert_eq!(accuracy_bucket(0.0).unwrap(), 0);
        assert_eq!(accuracy_bucket(1.0).unwrap(), 3);
    }

    #[test]
    fn test_invalid_accuracy_rejected() {
        assert!(matches!(
            accuracy_bucket(f64::NAN),
            Err(QuizError::InvalidState { .. })
        ));
        assert!(accuracy_bucket(1.2).is_err());
        assert!(accuracy_bucket(-0.1).is_err());

        let mut snapshot = PerformanceSnapshot::empty(Level::Beginner);
        snapshot.medium.accuracy = Some(f64::INFINITY);
        assert!(StateEncoder::default().encode(&snapshot).is_err());
    }

    #[test]
    fn test_experience_and_consecutive_buckets() {
        let exp: Vec<u8> = [0, 1, 4, 5, 9, 10, 40].iter().map(|&c| experience_bucket(c)).collect();
        assert_eq!(exp, vec![0, 1, 1, 2, 2, 3, 3]);

        let consec: Vec<u8> = [0, 1, 2, 3, 4, 5, 6, 12]
            .iter()
            .map(|&c| consecutive_bucket(c))
            .collect();
        assert_eq!(consec, vec![0, 0, 1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_empty_history_uses_neutral_buckets() {
        let state = StateEncoder::default()
            .encode(&PerformanceSnapshot::empty(Level::Beginner))
            .unwrap();
        assert_eq!(state.canonical(), "v1|beginner|1|1|1|1|0|0|0|0|0|0");
    }

    #[test]
    fn test_hash_is_deterministic() {
        let mut snapshot = PerformanceSnapshot::empty(Level::Advanced);
        snapshot.overall_accuracy = Some(0.82);
        snapshot.hard = DifficultyPerformance {
            accuracy: Some(0.6),
            attempts: 7,
        };
        snapshot.streak = 9;
        snapshot.consecutive_wrong = 4;

        let encoder = StateEncoder::default();
        let a = encoder.encode(&snapshot).unwrap();
        let b = encoder.encode(&snapshot.clone()).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.state_hash(), b.state_hash());
        assert_eq!(a.state_hash().as_str().len(), 64);
        assert_eq!(a.streak, 5);
        assert_eq!(a.canonical(), "v1|advanced|2|1|1|1|0|0|2|5|0|2");

        // Known digest of the canonical form; guards against accidental encoding drift
        let expected = StateHash::of("v1|advanced|2|1|1|1|0|0|2|5|0|2");
        assert_eq!(a.state_hash(), expected);

        let other = DiscretizedState { streak: 4, ..a };
        assert_ne!(other.state_hash(), a.state_hash());
    }

    #[test]
    fn test_state_hash_parsing() {
        let hash = StateEncoder::default()
            .encode(&PerformanceSnapshot::empty(Level::Expert))
            .unwrap()
            .state_hash();
        assert_eq!(StateHash::from_hex(hash.to_string()).unwrap(), hash);
        assert!(StateHash::from_hex("abc").is_err());
        assert!(StateHash::from_hex("Z".repeat(64)).is_err());

        let json = serde_json::to_string(&hash).unwrap();
        let back: StateHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn test_snapshot_from_history() {
        let history = InMemoryAttemptHistory::new();
        for correct in [true, true, true, false, false] {
            history
                .record_attempt(&AttemptRecord::new("u1", Difficulty::Easy, correct))
                .unwrap();
        }

        let mut profile = UserProfile::new("u1");
        profile.last_difficulty = Some(Difficulty::Easy);

        let encoder = StateEncoder::default();
        let snapshot = encoder.snapshot(&profile, &history).unwrap();
        assert_eq!(snapshot.easy.attempts, 5);
        assert_eq!(snapshot.easy.accuracy, Some(0.6));
        assert_eq!(snapshot.medium.accuracy, None);
        assert_eq!(snapshot.consecutive_wrong, 2);

        let state = encoder.encode(&snapshot).unwrap();
        assert_eq!(state.easy_acc, 1);
        assert_eq!(state.easy_exp, 2);
        assert_eq!(state.consec_wrong, 1);
        assert_eq!(state.medium_acc, NEUTRAL_ACCURACY_BUCKET);
    }

    #[test]
    fn test_easy_run_survives_other_difficulties() {
        let history = InMemoryAttemptHistory::new();
        for _ in 0..4 {
            history
                .record_attempt(&AttemptRecord::new("u1", Difficulty::Easy, false))
                .unwrap();
        }
        history
            .record_attempt(&AttemptRecord::new("u1", Difficulty::Medium, true))
            .unwrap();

        let mut profile = UserProfile::new("u1");
        profile.last_difficulty = Some(Difficulty::Medium);

        let state = StateEncoder::default()
            .current_state(&profile, &history)
            .unwrap();
        assert_eq!(state.consec_wrong, 2);
        assert_eq!(state.consec_correct, 0);

        let last_served = StateEncoder::new(&StateConfig {
            run_source: RunSource::LastServed,
            ..StateConfig::default()
        });
        let state = last_served.current_state(&profile, &history).unwrap();
        assert_eq!(state.consec_wrong, 0);
        assert_eq!(state.consec_correct, 0);
    }

    #[test]
    fn test_streak_cap_beyond_u8_is_rejected() {
        let encoder = StateEncoder::new(&StateConfig {
            streak_cap: 300,
            ..StateConfig::default()
        });

        let mut snapshot = PerformanceSnapshot::empty(Level::Beginner);
        assert_eq!(encoder.encode(&snapshot).unwrap().streak, 0);

        snapshot.streak = 256;
        assert!(matches!(
            encoder.encode(&snapshot),
            Err(QuizError::InvalidState { .. })
        ));

        snapshot.streak = 255;
        assert_eq!(encoder.encode(&snapshot).unwrap().streak, 255);
    }
}
