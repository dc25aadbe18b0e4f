// Q-table storage
// Entries are keyed by (user, state hash, action) and created lazily at 0.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use crate::core::types::UserId;
use crate::error::{QuizError, QuizResult};
use crate::reinforcement::action::Difficulty;
use crate::reinforcement::state::StateHash;

/// Key of one Q-value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QKey {
    pub user_id: UserId,
    pub state_hash: StateHash,
    pub action: Difficulty,
}

impl QKey {
    pub fn new(user_id: impl Into<UserId>, state_hash: StateHash, action: Difficulty) -> Self {
        Self {
            user_id: user_id.into(),
            state_hash,
            action,
        }
    }
}

/// One stored Q-value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTableEntry {
    pub key: QKey,
    pub q_value: f64,
    /// Bumped on every write; compare-and-swap checks it
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QTableEntry {
    pub fn fresh(key: QKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            q_value: 0.0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persistent Q-table shared by every worker
pub trait QTableStore: Send + Sync {
    /// Entry for `key`, inserted with Q = 0.0 if absent
    fn get_or_create(&self, key: &QKey) -> QuizResult<QTableEntry>;

    /// Entry for `key`; absence is not an error
    fn get(&self, key: &QKey) -> QuizResult<Option<QTableEntry>>;

    /// Unconditional overwrite
    fn update(&self, key: &QKey, q_value: f64) -> QuizResult<QTableEntry>;

    /// Write only if the stored version still equals `expected_version`
    fn compare_and_swap(&self, key: &QKey, expected_version: u64, q_value: f64)
        -> QuizResult<bool>;

    fn query_by_state(&self, user_id: &str, state_hash: &StateHash)
        -> QuizResult<Vec<QTableEntry>>;

    fn entries_for_user(&self, user_id: &str) -> QuizResult<Vec<QTableEntry>>;
}

/// Aggregate view of a learner's Q-table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTableSummary {
    pub total_entries: usize,
    pub distinct_states: usize,
    pub mean_q: f64,
    pub min_q: f64,
    pub max_q: f64,
    pub entries_per_action: BTreeMap<Difficulty, usize>,
    pub mean_q_per_action: BTreeMap<Difficulty, f64>,
}

impl QTableSummary {
    pub fn from_entries(entries: &[QTableEntry]) -> Self {
        if entries.is_empty() {
            return Self {
                total_entries: 0,
                distinct_states: 0,
                mean_q: 0.0,
                min_q: 0.0,
                max_q: 0.0,
                entries_per_action: BTreeMap::new(),
                mean_q_per_action: BTreeMap::new(),
            };
        }

        let states: HashSet<&StateHash> = entries.iter().map(|e| &e.key.state_hash).collect();
        let mut per_action: BTreeMap<Difficulty, (usize, f64)> = BTreeMap::new();
        for entry in entries {
            let slot = per_action.entry(entry.key.action).or_insert((0, 0.0));
            slot.0 += 1;
            slot.1 += entry.q_value;
        }

        let sum: f64 = entries.iter().map(|e| e.q_value).sum();
        Self {
            total_entries: entries.len(),
            distinct_states: states.len(),
            mean_q: sum / entries.len() as f64,
            min_q: entries.iter().map(|e| e.q_value).fold(f64::INFINITY, f64::min),
            max_q: entries.iter().map(|e| e.q_value).fold(f64::NEG_INFINITY, f64::max),
            entries_per_action: per_action.iter().map(|(a, (n, _))| (*a, *n)).collect(),
            mean_q_per_action: per_action
                .iter()
                .map(|(a, (n, total))| (*a, total / *n as f64))
                .collect(),
        }
    }
}

/// Process-local Q-table
#[derive(Debug, Default)]
pub struct InMemoryQTable {
    entries: RwLock<HashMap<QKey, QTableEntry>>,
}

impl InMemoryQTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned(operation: &str) -> QuizError {
        QuizError::storage(operation, "q-table lock poisoned")
    }

    fn select<F>(&self, operation: &str, filter: F) -> QuizResult<Vec<QTableEntry>>
    where
        F: Fn(&QKey) -> bool,
    {
        let entries = self.entries.read().map_err(|_| Self::poisoned(operation))?;
        let mut selected: Vec<QTableEntry> = entries
            .values()
            .filter(|e| filter(&e.key))
            .cloned()
            .collect();
        selected.sort_by(|a, b| {
            a.key
                .state_hash
                .cmp(&b.key.state_hash)
                .then(a.key.action.cmp(&b.key.action))
        });
        Ok(selected)
    }
}

impl QTableStore for InMemoryQTable {
    fn get_or_create(&self, key: &QKey) -> QuizResult<QTableEntry> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Self::poisoned("get_or_create"))?;
        Ok(entries
            .entry(key.clone())
            .or_insert_with(|| QTableEntry::fresh(key.clone()))
            .clone())
    }

    fn get(&self, key: &QKey) -> QuizResult<Option<QTableEntry>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned("get"))?;
        Ok(entries.get(key).cloned())
    }

    fn update(&self, key: &QKey, q_value: f64) -> QuizResult<QTableEntry> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned("update"))?;
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| QTableEntry::fresh(key.clone()));
        entry.q_value = q_value;
        entry.version += 1;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    fn compare_and_swap(
        &self,
        key: &QKey,
        expected_version: u64,
        q_value: f64,
    ) -> QuizResult<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Self::poisoned("compare_and_swap"))?;

        match entries.get_mut(key) {
            Some(entry) if entry.version == expected_version => {
                entry.q_value = q_value;
                entry.version += 1;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            // A missing row only matches a caller that saw the implicit 0 version
            None if expected_version == 0 => {
                let mut entry = QTableEntry::fresh(key.clone());
                entry.q_value = q_value;
                entry.version = 1;
                entries.insert(key.clone(), entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn query_by_state(
        &self,
        user_id: &str,
        state_hash: &StateHash,
    ) -> QuizResult<Vec<QTableEntry>> {
        self.select("query_by_state", |k| {
            k.user_id == user_id && &k.state_hash == state_hash
        })
    }

    fn entries_for_user(&self, user_id: &str) -> QuizResult<Vec<QTableEntry>> {
        self.select("entries_for_user", |k| k.user_id == user_id)
    }
}
