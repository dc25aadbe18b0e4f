// Simulated learners answering adaptive quizzes concurrently

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::commands::Workspace;
use crate::core::types::{AttemptRecord, Level};
use crate::error::QuizResult;
use crate::history::AttemptRecorder;
use crate::reinforcement::difficulty_selection::{fallback_difficulty, OutcomeInput};
use crate::reinforcement::{AdaptiveDifficultySystem, Difficulty};
use crate::sql::{SqliteAttemptHistory, SqliteProfileStore, TableView};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOptions {
    pub learners: usize,
    pub questions: usize,
    /// Base probability of answering a medium question correctly
    pub skill: f64,
    /// Learner skills are spread uniformly by this much around `skill`
    pub skill_spread: f64,
    /// Questions per difficulty; a small pool makes learners see repeats
    pub question_pool: usize,
    pub user_prefix: String,
    pub seed: Option<u64>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            learners: 4,
            questions: 30,
            skill: 0.7,
            skill_spread: 0.15,
            question_pool: 25,
            user_prefix: "learner".to_string(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerOutcome {
    pub user_id: String,
    pub skill: f64,
    pub start_level: Level,
    pub final_level: Level,
    pub xp: i64,
    pub total_xp: i64,
    pub questions: usize,
    pub attempts: usize,
    pub correct: usize,
    pub explorations: usize,
    pub fallbacks: usize,
    pub level_changes: usize,
    pub served: BTreeMap<Difficulty, usize>,
}

impl LearnerOutcome {
    pub fn accuracy(&self) -> Option<f64> {
        (self.attempts > 0).then(|| self.correct as f64 / self.attempts as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub learners: Vec<LearnerOutcome>,
    pub observer_failures: u64,
}

impl SimulationReport {
    pub fn to_table(&self) -> TableView {
        let mut view = TableView::new([
            "user", "skill", "start", "final", "xp", "total_xp", "attempts", "accuracy",
            "explore", "easy/med/hard",
        ]);
        for learner in &self.learners {
            let served = |d: Difficulty| learner.served.get(&d).copied().unwrap_or(0);
            view.push_row(vec![
                learner.user_id.clone(),
                format!("{:.2}", learner.skill),
                learner.start_level.to_string(),
                learner.final_level.to_string(),
                learner.xp.to_string(),
                learner.total_xp.to_string(),
                learner.attempts.to_string(),
                learner
                    .accuracy()
                    .map(|a| format!("{:.0}%", a * 100.0))
                    .unwrap_or_else(|| "-".to_string()),
                learner.explorations.to_string(),
                format!(
                    "{}/{}/{}",
                    served(Difficulty::Easy),
                    served(Difficulty::Medium),
                    served(Difficulty::Hard)
                ),
            ]);
        }
        view
    }
}

/// A learner whose chance of success depends on difficulty and retries
#[derive(Debug)]
struct SimulatedLearner {
    skill: f64,
    rng: StdRng,
}

impl SimulatedLearner {
    fn new(base_skill: f64, spread: f64, mut rng: StdRng) -> Self {
        let offset = if spread > 0.0 {
            rng.random_range(-spread..=spread)
        } else {
            0.0
        };
        Self {
            skill: (base_skill + offset).clamp(0.05, 0.95),
            rng,
        }
    }

    fn success_probability(&self, difficulty: Difficulty, attempt_number: u32) -> f64 {
        let shift = match difficulty {
            Difficulty::Easy => 0.15,
            Difficulty::Medium => 0.0,
            Difficulty::Hard => -0.2,
        };
        // hints make each retry a little easier
        let hint = 0.1 * attempt_number.saturating_sub(1) as f64;
        (self.skill + shift + hint).clamp(0.05, 0.95)
    }

    /// Correctness and seconds spent
    fn answer(&mut self, difficulty: Difficulty, attempt_number: u32) -> (bool, f64) {
        let p = self.success_probability(difficulty, attempt_number);
        let correct = self.rng.random::<f64>() < p;
        let seconds = self.rng.random_range(4.0..60.0);
        (correct, seconds)
    }
}

/// Handles one worker needs; cheap to clone into a blocking task
#[derive(Clone)]
struct LearnerContext {
    system: Arc<AdaptiveDifficultySystem>,
    history: Arc<SqliteAttemptHistory>,
    profiles: SqliteProfileStore,
}

fn run_learner(
    ctx: &LearnerContext,
    user_id: String,
    mut learner: SimulatedLearner,
    options: &SimulationOptions,
) -> QuizResult<LearnerOutcome> {
    let mut profile = ctx.profiles.load_or_new(&user_id)?;
    let mut presentations: HashMap<String, u32> = HashMap::new();
    let mut outcome = LearnerOutcome {
        user_id: user_id.clone(),
        skill: learner.skill,
        start_level: profile.level,
        final_level: profile.level,
        xp: profile.xp,
        total_xp: profile.total_xp,
        questions: 0,
        attempts: 0,
        correct: 0,
        explorations: 0,
        fallbacks: 0,
        level_changes: 0,
        served: BTreeMap::new(),
    };

    for _ in 0..options.questions {
        let (mut state, difficulty) = match ctx.system.select_difficulty(&profile, None) {
            Ok(selection) => {
                if selection.is_exploration {
                    outcome.explorations += 1;
                }
                (selection.state, selection.action)
            }
            Err(e) => {
                let difficulty = fallback_difficulty(&e);
                warn!("Selection failed for {}, serving {}: {}", user_id, difficulty, e);
                outcome.fallbacks += 1;
                (ctx.system.current_state(&profile)?, difficulty)
            }
        };
        *outcome.served.entry(difficulty).or_insert(0) += 1;
        outcome.questions += 1;

        let question_id = format!(
            "{}-{}",
            difficulty,
            learner.rng.random_range(0..options.question_pool.max(1))
        );
        let seen = presentations.entry(question_id.clone()).or_insert(0);
        let prior_visits = *seen;
        *seen += 1;

        let mut attempt_number = 1;
        loop {
            let (correct, seconds) = learner.answer(difficulty, attempt_number);
            ctx.history.record_attempt(
                &AttemptRecord::new(user_id.clone(), difficulty, correct)
                    .with_question(question_id.clone())
                    .with_time_spent(seconds),
            )?;

            let input = OutcomeInput::new(state, difficulty, correct)
                .with_attempt(attempt_number)
                .with_prior_visits(prior_visits)
                .with_question(question_id.clone())
                .with_time_spent(seconds);
            let report = ctx.system.record_outcome(&mut profile, &input)?;

            outcome.attempts += 1;
            if correct {
                outcome.correct += 1;
            }
            if report.level_change.is_some() {
                outcome.level_changes += 1;
            }
            if correct || report.should_auto_advance {
                break;
            }

            if let Some(message) = &report.retry_message {
                debug!("{} on {}: {}", user_id, question_id, message);
            }
            attempt_number += 1;
            state = ctx.system.current_state(&profile)?;
        }
    }

    ctx.profiles.save(&profile)?;
    outcome.final_level = profile.level;
    outcome.xp = profile.xp;
    outcome.total_xp = profile.total_xp;
    Ok(outcome)
}

/// Run every learner on its own blocking worker against the shared stores
pub async fn run_simulation(
    workspace: &Workspace,
    options: &SimulationOptions,
) -> Result<SimulationReport> {
    if !(0.0..=1.0).contains(&options.skill) {
        anyhow::bail!("skill must lie in [0, 1], got {}", options.skill);
    }
    info!(
        "Simulating {} learners x {} questions",
        options.learners, options.questions
    );

    let ctx = LearnerContext {
        system: workspace.system.clone(),
        history: workspace.history.clone(),
        profiles: workspace.profiles.clone(),
    };

    let mut handles = Vec::with_capacity(options.learners);
    for index in 0..options.learners {
        let ctx = ctx.clone();
        let opts = options.clone();
        let user_id = format!("{}-{:03}", options.user_prefix, index + 1);
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64 + 1)),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let learner = SimulatedLearner::new(options.skill, options.skill_spread, rng);

        handles.push(tokio::task::spawn_blocking(move || {
            run_learner(&ctx, user_id, learner, &opts)
        }));
    }

    let mut learners = Vec::with_capacity(handles.len());
    for handle in handles {
        let outcome = handle
            .await
            .context("Simulation worker panicked")?
            .context("Simulated learner failed")?;
        learners.push(outcome);
    }

    Ok(SimulationReport {
        learners,
        observer_failures: workspace.system.observers().failure_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuizConfig;
    use crate::history::AttemptHistoryReader;
    use crate::reinforcement::QTableStore;
    use crate::sql::SqliteQTable;
    use tempfile::TempDir;

    #[test]
    fn test_success_probability_ordering() {
        let learner = SimulatedLearner::new(0.6, 0.0, StdRng::seed_from_u64(1));
        let easy = learner.success_probability(Difficulty::Easy, 1);
        let medium = learner.success_probability(Difficulty::Medium, 1);
        let hard = learner.success_probability(Difficulty::Hard, 1);
        assert!(easy > medium && medium > hard);
        assert!(learner.success_probability(Difficulty::Hard, 3) > hard);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_simulation_persists_learning() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("sim.db");
        let workspace =
            Workspace::open(&QuizConfig::default(), Some(db_path.as_path()), Some(42), true).unwrap();

        let options = SimulationOptions {
            learners: 3,
            questions: 12,
            seed: Some(42),
            ..SimulationOptions::default()
        };
        let report = run_simulation(&workspace, &options).await.unwrap();

        assert_eq!(report.learners.len(), 3);
        assert_eq!(report.observer_failures, 0);
        for learner in &report.learners {
            assert_eq!(learner.questions, 12);
            assert!(learner.attempts >= 12);
            // beginners are never served hard questions before promotion
            if learner.final_level == Level::Beginner && learner.level_changes == 0 {
                assert!(!learner.served.contains_key(&Difficulty::Hard));
            }

            let stored = workspace.profiles.load(&learner.user_id).unwrap().unwrap();
            assert_eq!(stored.total_xp, learner.total_xp);

            let overall = workspace.history.overall_stats(&learner.user_id).unwrap();
            assert_eq!(overall.total as usize, learner.attempts);

            let q_table = SqliteQTable::new(workspace.db.clone());
            assert!(!q_table.entries_for_user(&learner.user_id).unwrap().is_empty());
        }

        let exported = workspace
            .export_events(&dir.path().join("events.jsonl"))
            .unwrap();
        assert!(exported > 0);
    }

    #[tokio::test]
    async fn test_rejects_bad_skill() {
        let workspace = Workspace::open(&QuizConfig::default(), None, Some(1), false).unwrap();
        let options = SimulationOptions {
            skill: 1.5,
            ..SimulationOptions::default()
        };
        assert!(run_simulation(&workspace, &options).await.is_err());
    }
}
