// SQLite-backed attempt history

use rusqlite::params;

use crate::core::types::AttemptRecord;
use crate::error::{QuizError, QuizResult};
use crate::history::{AttemptHistoryReader, AttemptRecorder, WindowStats};
use crate::reinforcement::action::Difficulty;
use crate::sql::connection::DbConnection;

fn to_count(value: i64, what: &str) -> QuizResult<u32> {
    u32::try_from(value).map_err(|_| QuizError::invalid_state(format!("bad {} count {}", what, value)))
}

/// Attempt log persisted in the `attempts` table
#[derive(Debug, Clone)]
pub struct SqliteAttemptHistory {
    db: DbConnection,
}

impl SqliteAttemptHistory {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }
}

impl AttemptHistoryReader for SqliteAttemptHistory {
    fn recent_outcomes(
        &self,
        user_id: &str,
        difficulty: Difficulty,
        limit: usize,
    ) -> QuizResult<Vec<bool>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.db.with_connection("recent_outcomes", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT is_correct FROM attempts
                 WHERE user_id = ?1 AND difficulty = ?2
                 ORDER BY id DESC
                 LIMIT ?3",
            )?;
            let outcomes = stmt
                .query_map(params![user_id, difficulty.as_str(), limit], |row| {
                    row.get::<_, bool>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(outcomes)
        })
    }

    fn overall_stats(&self, user_id: &str) -> QuizResult<WindowStats> {
        let (correct, total) = self.db.with_connection("overall_stats", |conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(is_correct), 0), COUNT(*) FROM attempts WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
        })?;

        Ok(WindowStats {
            correct: to_count(correct, "correct")?,
            total: to_count(total, "attempt")?,
        })
    }
}

impl AttemptRecorder for SqliteAttemptHistory {
    fn record_attempt(&self, attempt: &AttemptRecord) -> QuizResult<()> {
        self.db.with_connection("record_attempt", |conn| {
            conn.execute(
                "INSERT INTO attempts
                     (user_id, question_id, difficulty, is_correct, time_spent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    attempt.user_id,
                    attempt.question_id,
                    attempt.difficulty.as_str(),
                    attempt.is_correct,
                    attempt.time_spent_seconds,
                    attempt.created_at.to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> SqliteAttemptHistory {
        SqliteAttemptHistory::new(DbConnection::open(None::<&str>).unwrap())
    }

    fn seed(history: &SqliteAttemptHistory, user: &str, difficulty: Difficulty, outcomes: &[bool]) {
        for &correct in outcomes {
            history
                .record_attempt(&AttemptRecord::new(user, difficulty, correct))
                .unwrap();
        }
    }

    #[test]
    fn test_recent_outcomes_newest_first() {
        let history = history();
        seed(&history, "u1", Difficulty::Easy, &[true, true, false, false]);
        seed(&history, "u1", Difficulty::Hard, &[true]);
        seed(&history, "u2", Difficulty::Easy, &[true]);

        assert_eq!(
            history.recent_outcomes("u1", Difficulty::Easy, 3).unwrap(),
            vec![false, false, true]
        );

        let perf = history
            .consecutive_performance("u1", Difficulty::Easy, 5)
            .unwrap();
        assert_eq!(perf.consecutive_wrong, 2);
        assert_eq!(perf.total_checked, 4);
    }

    #[test]
    fn test_overall_stats() {
        let history = history();
        assert_eq!(history.overall_stats("u1").unwrap(), WindowStats::default());

        seed(&history, "u1", Difficulty::Easy, &[true, false]);
        seed(&history, "u1", Difficulty::Medium, &[true]);

        let stats = history.overall_stats("u1").unwrap();
        assert_eq!(stats, WindowStats { correct: 2, total: 3 });
    }
}
