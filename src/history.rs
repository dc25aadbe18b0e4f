// Read access to past attempts
// The core never writes history; the caller records an attempt before asking for a decision

use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use crate::core::types::AttemptRecord;
use crate::error::{QuizError, QuizResult};
use crate::reinforcement::action::Difficulty;

/// Correct/total counts over some set of attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStats {
    pub correct: u32,
    pub total: u32,
}

impl WindowStats {
    pub fn from_outcomes(outcomes: &[bool]) -> Self {
        Self {
            correct: outcomes.iter().filter(|&&c| c).count() as u32,
            total: outcomes.len() as u32,
        }
    }

    /// Fraction correct, `None` when nothing was attempted
    pub fn accuracy(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.correct as f64 / self.total as f64)
        }
    }
}

/// Leading run of identical outcomes, most recent first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsecutivePerformance {
    pub consecutive_correct: u32,
    pub consecutive_wrong: u32,
    pub total_checked: usize,
    pub last_result: Option<bool>,
}

impl ConsecutivePerformance {
    /// Count the run at the head of `outcomes`; only one count is ever non-zero
    pub fn from_outcomes(outcomes: &[bool]) -> Self {
        let last_result = outcomes.first().copied();
        let run = match last_result {
            Some(head) => outcomes.iter().take_while(|&&o| o == head).count() as u32,
            None => 0,
        };

        Self {
            consecutive_correct: if last_result == Some(true) { run } else { 0 },
            consecutive_wrong: if last_result == Some(false) { run } else { 0 },
            total_checked: outcomes.len(),
            last_result,
        }
    }
}

/// Source of past attempt outcomes
pub trait AttemptHistoryReader: Send + Sync {
    /// Most recent first, at most `limit` outcomes at `difficulty`
    fn recent_outcomes(
        &self,
        user_id: &str,
        difficulty: Difficulty,
        limit: usize,
    ) -> QuizResult<Vec<bool>>;

    /// Lifetime counts across every difficulty
    fn overall_stats(&self, user_id: &str) -> QuizResult<WindowStats>;

    /// Counts over the last `window` attempts at `difficulty`
    fn window_stats(
        &self,
        user_id: &str,
        difficulty: Difficulty,
        window: usize,
    ) -> QuizResult<WindowStats> {
        let outcomes = self.recent_outcomes(user_id, difficulty, window)?;
        Ok(WindowStats::from_outcomes(&outcomes))
    }

    fn consecutive_performance(
        &self,
        user_id: &str,
        difficulty: Difficulty,
        window: usize,
    ) -> QuizResult<ConsecutivePerformance> {
        let outcomes = self.recent_outcomes(user_id, difficulty, window)?;
        Ok(ConsecutivePerformance::from_outcomes(&outcomes))
    }
}

/// Sink for new attempts, implemented by the reference stores
pub trait AttemptRecorder: Send + Sync {
    fn record_attempt(&self, attempt: &AttemptRecord) -> QuizResult<()>;
}

/// Process-local attempt history
#[derive(Debug, Default)]
pub struct InMemoryAttemptHistory {
    attempts: RwLock<Vec<AttemptRecord>>,
}

impl InMemoryAttemptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> QuizResult<std::sync::RwLockReadGuard<'_, Vec<AttemptRecord>>> {
        self.attempts
            .read()
            .map_err(|_| QuizError::storage("read_history", "history lock poisoned"))
    }
}

impl AttemptHistoryReader for InMemoryAttemptHistory {
    fn recent_outcomes(
        &self,
        user_id: &str,
        difficulty: Difficulty,
        limit: usize,
    ) -> QuizResult<Vec<bool>> {
        let attempts = self.read()?;
        Ok(attempts
            .iter()
            .rev()
            .filter(|a| a.user_id == user_id && a.difficulty == difficulty)
            .take(limit)
            .map(|a| a.is_correct)
            .collect())
    }

    fn overall_stats(&self, user_id: &str) -> QuizResult<WindowStats> {
        let attempts = self.read()?;
        let outcomes: Vec<bool> = attempts
            .iter()
            .filter(|a| a.user_id == user_id)
            .map(|a| a.is_correct)
            .collect();
        Ok(WindowStats::from_outcomes(&outcomes))
    }
}

impl AttemptRecorder for InMemoryAttemptHistory {
    fn record_attempt(&self, attempt: &AttemptRecord) -> QuizResult<()> {
        self.attempts
            .write()
            .map_err(|_| QuizError::storage("record_attempt", "history lock poisoned"))?
            .push(attempt.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(history: &InMemoryAttemptHistory, difficulty: Difficulty, outcomes: &[bool]) {
        for &correct in outcomes {
            history
                .record_attempt(&AttemptRecord::new("u1", difficulty, correct))
                .unwrap();
        }
    }

    #[test]
    fn test_consecutive_run_is_leading_only() {
        let perf = ConsecutivePerformance::from_outcomes(&[false, false, true, false]);
        assert_eq!(perf.consecutive_wrong, 2);
        assert_eq!(perf.consecutive_correct, 0);
        assert_eq!(perf.total_checked, 4);
        assert_eq!(perf.last_result, Some(false));

        let empty = ConsecutivePerformance::from_outcomes(&[]);
        assert_eq!(empty, ConsecutivePerformance::default());
    }

    #[test]
    fn test_recent_outcomes_most_recent_first() {
        let history = InMemoryAttemptHistory::new();
        seed(&history, Difficulty::Easy, &[true, true, false]);
        seed(&history, Difficulty::Medium, &[true]);

        let outcomes = history.recent_outcomes("u1", Difficulty::Easy, 2).unwrap();
        assert_eq!(outcomes, vec![false, true]);

        let stats = history.window_stats("u1", Difficulty::Easy, 10).unwrap();
        assert_eq!(stats, WindowStats { correct: 2, total: 3 });

        let overall = history.overall_stats("u1").unwrap();
        assert_eq!(overall.total, 4);
        assert!(history.overall_stats("someone-else").unwrap().accuracy().is_none());
    }
}
