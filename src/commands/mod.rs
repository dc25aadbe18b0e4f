// CLI commands over a SQLite-backed adaptive difficulty system

pub mod inspect;
pub mod simulate;

pub use inspect::{inspect_learner, learner_overview, LearnerReport};
pub use simulate::{run_simulation, LearnerOutcome, SimulationOptions, SimulationReport};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::QuizConfig;
use crate::observability::{MemoryObserver, ObserverHub, TracingObserver};
use crate::reinforcement::{AdaptiveDifficultySystem, RandomSource, SeededRandom, ThreadRandom};
use crate::sql::{DbConnection, SqliteAttemptHistory, SqliteProfileStore, SqliteQTable};

/// Everything a command needs, opened against one database
#[derive(Debug)]
pub struct Workspace {
    pub db: DbConnection,
    pub system: Arc<AdaptiveDifficultySystem>,
    pub history: Arc<SqliteAttemptHistory>,
    pub profiles: SqliteProfileStore,
    /// Set when events should be kept for export
    pub events: Option<Arc<MemoryObserver>>,
}

impl Workspace {
    /// Open the stores and build the system.
    /// `database` overrides the configured path; with neither, the database lives in memory.
    pub fn open(
        config: &QuizConfig,
        database: Option<&Path>,
        seed: Option<u64>,
        record_events: bool,
    ) -> Result<Self> {
        let path: Option<PathBuf> = database
            .map(Path::to_path_buf)
            .or_else(|| config.storage.database_path.clone());

        let db = DbConnection::open(path.as_deref()).context("Failed to open quiz database")?;
        debug!("Using {:?} database at {}", db.connection_type(), db.path().display());

        let store = Arc::new(SqliteQTable::new(db.clone()));
        let history = Arc::new(SqliteAttemptHistory::new(db.clone()));

        let mut hub = ObserverHub::new().with_observer(Arc::new(TracingObserver));
        let events = if record_events {
            let memory = Arc::new(MemoryObserver::new());
            hub = hub.with_observer(memory.clone());
            Some(memory)
        } else {
            None
        };

        let rng: Box<dyn RandomSource> = match seed {
            Some(seed) => {
                info!("Exploration seeded with {}", seed);
                Box::new(SeededRandom::new(seed))
            }
            None => Box::new(ThreadRandom),
        };

        let system = AdaptiveDifficultySystem::new(
            config,
            store,
            history.clone(),
            Arc::new(hub),
            rng,
        )
        .context("Invalid quiz configuration")?;

        Ok(Self {
            profiles: SqliteProfileStore::new(db.clone()),
            db,
            system: Arc::new(system),
            history,
            events,
        })
    }

    /// Write the recorded events as JSON lines
    pub fn export_events(&self, path: &Path) -> Result<usize> {
        let Some(memory) = &self.events else {
            return Ok(0);
        };
        let lines = memory.to_json_lines()?;
        std::fs::write(path, &lines)
            .with_context(|| format!("Failed to write events to {}", path.display()))?;
        Ok(lines.lines().count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_uses_configured_database() {
        let dir = TempDir::new().unwrap();
        let mut config = QuizConfig::default();
        config.storage.database_path = Some(dir.path().join("quiz.db"));

        let workspace = Workspace::open(&config, None, Some(7), false).unwrap();
        assert_eq!(workspace.db.path(), dir.path().join("quiz.db"));
        assert!(workspace.events.is_none());
        assert_eq!(workspace.export_events(&dir.path().join("events.jsonl")).unwrap(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = QuizConfig::default();
        config.q_learning.learning_rate = 2.0;
        assert!(Workspace::open(&config, None, None, false).is_err());
    }
}
