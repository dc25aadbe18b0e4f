// Learner profiles saved between CLI runs

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::core::types::{Level, UserProfile};
use crate::error::{QuizError, QuizResult};
use crate::reinforcement::action::Difficulty;
use crate::sql::connection::DbConnection;

struct RawProfile {
    user_id: String,
    level: String,
    xp: i64,
    total_xp: i64,
    streak_correct: i64,
    last_difficulty: Option<String>,
}

impl RawProfile {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            level: row.get(1)?,
            xp: row.get(2)?,
            total_xp: row.get(3)?,
            streak_correct: row.get(4)?,
            last_difficulty: row.get(5)?,
        })
    }

    fn into_profile(self) -> QuizResult<UserProfile> {
        let level: Level = self.level.parse()?;
        let last_difficulty = self
            .last_difficulty
            .map(|d| d.parse::<Difficulty>())
            .transpose()?;
        let streak_correct = u32::try_from(self.streak_correct).map_err(|_| {
            QuizError::invalid_state(format!("bad streak {} for {}", self.streak_correct, self.user_id))
        })?;

        Ok(UserProfile {
            user_id: self.user_id,
            level,
            xp: self.xp,
            total_xp: self.total_xp,
            streak_correct,
            last_difficulty,
        })
    }
}

const PROFILE_COLUMNS: &str = "user_id, level, xp, total_xp, streak_correct, last_difficulty";

#[derive(Debug, Clone)]
pub struct SqliteProfileStore {
    db: DbConnection,
}

impl SqliteProfileStore {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    pub fn save(&self, profile: &UserProfile) -> QuizResult<()> {
        self.db.with_connection("save_profile", |conn| {
            conn.execute(
                "INSERT INTO profiles
                     (user_id, level, xp, total_xp, streak_correct, last_difficulty, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (user_id) DO UPDATE SET
                     level = excluded.level,
                     xp = excluded.xp,
                     total_xp = excluded.total_xp,
                     streak_correct = excluded.streak_correct,
                     last_difficulty = excluded.last_difficulty,
                     updated_at = excluded.updated_at",
                params![
                    profile.user_id,
                    profile.level.as_str(),
                    profile.xp,
                    profile.total_xp,
                    profile.streak_correct,
                    profile.last_difficulty.map(|d| d.as_str()),
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
    }

    pub fn load(&self, user_id: &str) -> QuizResult<Option<UserProfile>> {
        let sql = format!("SELECT {} FROM profiles WHERE user_id = ?1", PROFILE_COLUMNS);
        let raw = self.db.with_connection("load_profile", |conn| {
            conn.query_row(&sql, params![user_id], RawProfile::from_row)
                .optional()
        })?;
        raw.map(RawProfile::into_profile).transpose()
    }

    /// Stored profile, or a fresh beginner when the learner is unknown
    pub fn load_or_new(&self, user_id: &str) -> QuizResult<UserProfile> {
        Ok(self
            .load(user_id)?
            .unwrap_or_else(|| UserProfile::new(user_id)))
    }

    pub fn list(&self) -> QuizResult<Vec<UserProfile>> {
        let sql = format!("SELECT {} FROM profiles ORDER BY user_id", PROFILE_COLUMNS);
        let raw = self.db.with_connection("list_profiles", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], RawProfile::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        raw.into_iter().map(RawProfile::into_profile).collect()
    }
}
