// SQLite-backed Q-table
// Writes go through a version column so concurrent workers never lose an update

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::error::{QuizError, QuizResult};
use crate::reinforcement::action::Difficulty;
use crate::reinforcement::q_table::{QKey, QTableEntry, QTableStore};
use crate::reinforcement::state::StateHash;
use crate::sql::connection::DbConnection;

const ENTRY_COLUMNS: &str =
    "user_id, state_hash, action, q_value, version, created_at, updated_at";

const ACTION_ORDER: &str =
    "CASE action WHEN 'easy' THEN 0 WHEN 'medium' THEN 1 WHEN 'hard' THEN 2 ELSE 3 END";

/// Row as stored, before the text columns are validated
struct RawEntry {
    user_id: String,
    state_hash: String,
    action: String,
    q_value: f64,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            state_hash: row.get(1)?,
            action: row.get(2)?,
            q_value: row.get(3)?,
            version: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_entry(self) -> QuizResult<QTableEntry> {
        let action: Difficulty = self.action.parse()?;
        Ok(QTableEntry {
            key: QKey::new(self.user_id, StateHash::from_hex(self.state_hash)?, action),
            q_value: self.q_value,
            version: u64::try_from(self.version).map_err(|_| {
                QuizError::invalid_state(format!("negative q-table version {}", self.version))
            })?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> QuizResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QuizError::invalid_state(format!("bad timestamp '{}': {}", value, e)))
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Q-table persisted in the `q_table` table
#[derive(Debug, Clone)]
pub struct SqliteQTable {
    db: DbConnection,
}

impl SqliteQTable {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    fn select(
        &self,
        operation: &str,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> QuizResult<Vec<QTableEntry>> {
        let sql = format!(
            "SELECT {} FROM q_table WHERE {} ORDER BY state_hash, {}",
            ENTRY_COLUMNS, filter, ACTION_ORDER
        );
        let raw = self.db.with_connection(operation, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(args, RawEntry::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        raw.into_iter().map(RawEntry::into_entry).collect()
    }
}

impl QTableStore for SqliteQTable {
    fn get_or_create(&self, key: &QKey) -> QuizResult<QTableEntry> {
        let stamp = now();
        let sql = format!(
            "SELECT {} FROM q_table WHERE user_id = ?1 AND state_hash = ?2 AND action = ?3",
            ENTRY_COLUMNS
        );
        let raw = self.db.with_connection("get_or_create", |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO q_table
                     (user_id, state_hash, action, q_value, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0.0, 0, ?4, ?4)",
                params![key.user_id, key.state_hash.as_str(), key.action.as_str(), stamp],
            )?;
            conn.query_row(
                &sql,
                params![key.user_id, key.state_hash.as_str(), key.action.as_str()],
                RawEntry::from_row,
            )
        })?;
        raw.into_entry()
    }

    fn get(&self, key: &QKey) -> QuizResult<Option<QTableEntry>> {
        let sql = format!(
            "SELECT {} FROM q_table WHERE user_id = ?1 AND state_hash = ?2 AND action = ?3",
            ENTRY_COLUMNS
        );
        let raw = self.db.with_connection("get", |conn| {
            conn.query_row(
                &sql,
                params![key.user_id, key.state_hash.as_str(), key.action.as_str()],
                RawEntry::from_row,
            )
            .optional()
        })?;
        raw.map(RawEntry::into_entry).transpose()
    }

    fn update(&self, key: &QKey, q_value: f64) -> QuizResult<QTableEntry> {
        let stamp = now();
        let sql = format!(
            "SELECT {} FROM q_table WHERE user_id = ?1 AND state_hash = ?2 AND action = ?3",
            ENTRY_COLUMNS
        );
        let raw = self.db.with_connection("update", |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO q_table
                     (user_id, state_hash, action, q_value, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                 ON CONFLICT (user_id, state_hash, action) DO UPDATE SET
                     q_value = excluded.q_value,
                     version = q_table.version + 1,
                     updated_at = excluded.updated_at",
                params![
                    key.user_id,
                    key.state_hash.as_str(),
                    key.action.as_str(),
                    q_value,
                    stamp
                ],
            )?;
            let raw = tx.query_row(
                &sql,
                params![key.user_id, key.state_hash.as_str(), key.action.as_str()],
                RawEntry::from_row,
            )?;
            tx.commit()?;
            Ok(raw)
        })?;
        raw.into_entry()
    }

    fn compare_and_swap(
        &self,
        key: &QKey,
        expected_version: u64,
        q_value: f64,
    ) -> QuizResult<bool> {
        let expected = i64::try_from(expected_version).map_err(|_| {
            QuizError::invalid_argument(format!("version {} out of range", expected_version))
        })?;
        let stamp = now();

        self.db.with_connection("compare_and_swap", |conn| {
            let changed = conn.execute(
                "UPDATE q_table
                 SET q_value = ?1, version = version + 1, updated_at = ?2
                 WHERE user_id = ?3 AND state_hash = ?4 AND action = ?5 AND version = ?6",
                params![
                    q_value,
                    stamp,
                    key.user_id,
                    key.state_hash.as_str(),
                    key.action.as_str(),
                    expected
                ],
            )?;
            if changed == 1 {
                return Ok(true);
            }

            // A missing row only matches a caller that saw the implicit 0 version
            if expected == 0 {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO q_table
                         (user_id, state_hash, action, q_value, version, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
                    params![
                        key.user_id,
                        key.state_hash.as_str(),
                        key.action.as_str(),
                        q_value,
                        stamp
                    ],
                )?;
                return Ok(inserted == 1);
            }
            Ok(false)
        })
    }

    fn query_by_state(
        &self,
        user_id: &str,
        state_hash: &StateHash,
    ) -> QuizResult<Vec<QTableEntry>> {
        self.select(
            "query_by_state",
            "user_id = ?1 AND state_hash = ?2",
            &[&user_id, &state_hash.as_str()],
        )
    }

    fn entries_for_user(&self, user_id: &str) -> QuizResult<Vec<QTableEntry>> {
        self.select("entries_for_user", "user_id = ?1", &[&user_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Level;
    use crate::reinforcement::q_table::QTableSummary;
    use crate::reinforcement::state::{PerformanceSnapshot, StateEncoder};
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn state_hash(level: Level) -> StateHash {
        StateEncoder::default()
            .encode(&PerformanceSnapshot::empty(level))
            .unwrap()
            .state_hash()
    }

    fn table() -> SqliteQTable {
        SqliteQTable::new(DbConnection::open(None::<&str>).unwrap())
    }

    #[test]
    fn test_get_or_create_is_lazy_and_idempotent() {
        let table = table();
        let key = QKey::new("u1", state_hash(Level::Beginner), Difficulty::Easy);

        assert!(table.get(&key).unwrap().is_none());
        let first = table.get_or_create(&key).unwrap();
        assert_eq!(first.q_value, 0.0);
        assert_eq!(first.version, 0);

        table.update(&key, 3.0).unwrap();
        let again = table.get_or_create(&key).unwrap();
        assert_eq!(again.q_value, 3.0);
        assert_eq!(again.version, 1);
    }

    #[test]
    fn test_compare_and_swap() {
        let table = table();
        let key = QKey::new("u1", state_hash(Level::Advanced), Difficulty::Hard);

        // missing row accepts the implicit version
        assert!(table.compare_and_swap(&key, 0, 1.0).unwrap());
        assert!(!table.compare_and_swap(&key, 0, 2.0).unwrap());
        assert!(table.compare_and_swap(&key, 1, 2.5).unwrap());

        let stored = table.get(&key).unwrap().unwrap();
        assert_eq!(stored.q_value, 2.5);
        assert_eq!(stored.version, 2);

        let unseen = QKey::new("u1", state_hash(Level::Advanced), Difficulty::Easy);
        assert!(!table.compare_and_swap(&unseen, 4, 1.0).unwrap());
        assert!(table.get(&unseen).unwrap().is_none());
    }

    #[test]
    fn test_query_ordering_and_summary() {
        let table = table();
        let beginner = state_hash(Level::Beginner);

        table.update(&QKey::new("u1", beginner.clone(), Difficulty::Hard), 1.0).unwrap();
        table.update(&QKey::new("u1", beginner.clone(), Difficulty::Easy), 3.0).unwrap();
        table.update(&QKey::new("u1", beginner.clone(), Difficulty::Medium), 2.0).unwrap();
        table.update(&QKey::new("u2", beginner.clone(), Difficulty::Easy), 9.0).unwrap();

        let actions: Vec<Difficulty> = table
            .query_by_state("u1", &beginner)
            .unwrap()
            .into_iter()
            .map(|e| e.key.action)
            .collect();
        assert_eq!(actions, Difficulty::ALL.to_vec());

        let summary = QTableSummary::from_entries(&table.entries_for_user("u1").unwrap());
        assert_eq!(summary.total_entries, 3);
        assert_eq!(summary.mean_q, 2.0);
    }

    #[test]
    fn test_concurrent_cas_on_file_database() {
        let file = NamedTempFile::new().unwrap();
        let table = Arc::new(SqliteQTable::new(DbConnection::open(Some(file.path())).unwrap()));
        let key = QKey::new("u1", state_hash(Level::Intermediate), Difficulty::Medium);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        loop {
                            let entry = table.get_or_create(&key).unwrap();
                            if table
                                .compare_and_swap(&key, entry.version, entry.q_value + 1.0)
                                .unwrap()
                            {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = table.get(&key).unwrap().unwrap();
        assert_eq!(stored.q_value, 100.0);
        assert_eq!(stored.version, 100);
    }
}
