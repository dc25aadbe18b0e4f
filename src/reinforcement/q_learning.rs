// Q-Learning implementation for difficulty selection
// Epsilon-greedy choice over a safety-constrained action set, persisted through compare-and-swap

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::QLearningConfig;
use crate::core::types::Level;
use crate::error::{QuizError, QuizResult};
use crate::history::AttemptHistoryReader;
use crate::observability::{
    AdaptationEvent, DecisionEvent, DecisionKind, LearningUpdateEvent, ObserverHub, QuizEvent,
};
use crate::reinforcement::{
    action::{canonical_actions, Difficulty},
    bellman::{self, QValueRange},
    q_table::{QKey, QTableStore, QTableSummary},
    state::{DiscretizedState, StateHash},
    Policy, RandomSource,
};

/// Result of one ε-greedy decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionChoice {
    pub action: Difficulty,
    pub kind: DecisionKind,
    pub epsilon: f64,
    pub allowed_actions: Vec<Difficulty>,
    pub candidate_q: BTreeMap<Difficulty, f64>,
    pub best_value: f64,
    pub is_optimal: bool,
}

impl ActionChoice {
    pub fn is_exploration(&self) -> bool {
        self.kind == DecisionKind::Explore
    }
}

/// Result of one persisted Bellman step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QUpdate {
    pub q_before: f64,
    pub q_after: f64,
    pub max_next_q: f64,
    pub attempts: u32,
}

/// Greedy suggestion with a maturity-based confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommended: Difficulty,
    pub allowed_actions: Vec<Difficulty>,
    pub q_values: BTreeMap<Difficulty, f64>,
    pub confidence: f64,
    pub epsilon: f64,
    /// Chance the ε-greedy draw serves `recommended`
    pub selection_probability: f64,
    /// Value of the state under the current ε-greedy policy
    pub state_value: f64,
    pub reasoning: Vec<String>,
}

/// Tabular Q-learning engine shared by all users
pub struct QLearningEngine {
    config: QLearningConfig,
    range: QValueRange,
    store: Arc<dyn QTableStore>,
    history: Arc<dyn AttemptHistoryReader>,
    observers: Arc<ObserverHub>,
}

impl QLearningEngine {
    pub fn new(
        config: QLearningConfig,
        store: Arc<dyn QTableStore>,
        history: Arc<dyn AttemptHistoryReader>,
        observers: Arc<ObserverHub>,
    ) -> Self {
        let range = QValueRange::from_config(&config);
        Self {
            config,
            range,
            store,
            history,
            observers,
        }
    }

    pub fn config(&self) -> &QLearningConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn QTableStore> {
        &self.store
    }

    /// Level's configured action set in canonical order
    pub fn base_actions(&self, level: Level) -> QuizResult<Vec<Difficulty>> {
        let actions = canonical_actions(self.config.allowed_actions.get(level));
        if actions.is_empty() {
            return Err(QuizError::no_allowed_actions(level));
        }
        Ok(actions)
    }

    /// Level ε adjusted by recent runs on any difficulty
    pub fn dynamic_epsilon(&self, user_id: &str, level: Level) -> QuizResult<f64> {
        let base = *self.config.epsilon_by_level.get(level);

        let mut struggling = false;
        let mut excelling = false;
        for difficulty in Difficulty::ALL {
            let run = self.history.consecutive_performance(
                user_id,
                difficulty,
                self.config.safety_window,
            )?;
            struggling |= run.consecutive_wrong >= self.config.struggle_consecutive_wrong;
            excelling |= run.consecutive_correct >= self.config.excel_consecutive_correct;
        }

        let epsilon = if struggling {
            base * self.config.epsilon_damping
        } else if excelling {
            (base * self.config.epsilon_boost).min(self.config.epsilon_boost_cap)
        } else {
            base
        };
        Ok(epsilon)
    }

    /// Base actions, minus anything harder than `current` while the learner struggles at it
    pub fn allowed_actions(
        &self,
        user_id: &str,
        level: Level,
        current: Option<Difficulty>,
    ) -> QuizResult<Vec<Difficulty>> {
        let base = self.base_actions(level)?;
        let Some(current) = current else {
            return Ok(base);
        };

        let run =
            self.history
                .consecutive_performance(user_id, current, self.config.safety_window)?;
        if run.consecutive_wrong < self.config.safety_consecutive_wrong {
            return Ok(base);
        }

        let restricted: Vec<Difficulty> = base.iter().copied().filter(|d| *d <= current).collect();
        if restricted.is_empty() {
            // base is non-empty and sorted
            Ok(vec![base[0]])
        } else {
            Ok(restricted)
        }
    }

    fn q_values(
        &self,
        user_id: &str,
        state_hash: &StateHash,
        actions: &[Difficulty],
    ) -> QuizResult<BTreeMap<Difficulty, f64>> {
        let entries = self.store.query_by_state(user_id, state_hash)?;
        Ok(actions
            .iter()
            .map(|&action| {
                let q = entries
                    .iter()
                    .find(|e| e.key.action == action)
                    .map_or(0.0, |e| e.q_value);
                (action, q)
            })
            .collect())
    }

    /// First action in canonical order with the highest value
    fn greedy(allowed: &[Difficulty], q_values: &BTreeMap<Difficulty, f64>) -> (Difficulty, f64) {
        let mut best = allowed[0];
        let mut best_value = q_values.get(&best).copied().unwrap_or(0.0);
        for &action in &allowed[1..] {
            let q = q_values.get(&action).copied().unwrap_or(0.0);
            if q > best_value {
                best = action;
                best_value = q;
            }
        }
        (best, best_value)
    }

    /// ε-greedy choice; failures carry the allowed set for a safe fallback
    pub fn choose_action(
        &self,
        user_id: &str,
        state: &DiscretizedState,
        current: Option<Difficulty>,
        rng: &mut dyn RandomSource,
    ) -> QuizResult<ActionChoice> {
        let base = self.base_actions(state.level)?;
        let allowed = self
            .allowed_actions(user_id, state.level, current)
            .map_err(|e| QuizError::selection_failed(base.clone(), e))?;
        let epsilon = self
            .dynamic_epsilon(user_id, state.level)
            .map_err(|e| QuizError::selection_failed(allowed.clone(), e))?;

        let state_hash = state.state_hash();
        let candidate_q = self
            .q_values(user_id, &state_hash, &allowed)
            .map_err(|e| QuizError::selection_failed(allowed.clone(), e))?;
        let (best, best_value) = Self::greedy(&allowed, &candidate_q);

        let (action, kind) = if allowed.len() == 1 {
            (allowed[0], DecisionKind::SafetyOverride)
        } else if rng.uniform() < epsilon {
            (allowed[rng.index(allowed.len())], DecisionKind::Explore)
        } else {
            (best, DecisionKind::Exploit)
        };

        let chosen_value = candidate_q.get(&action).copied().unwrap_or(0.0);
        let choice = ActionChoice {
            action,
            kind,
            epsilon,
            is_optimal: chosen_value >= best_value,
            allowed_actions: allowed,
            candidate_q,
            best_value,
        };

        debug!(
            "User {} in state {}: {:?} chose {} (ε={:.3})",
            user_id,
            state_hash.short(),
            kind,
            action,
            epsilon
        );
        self.emit_decision(user_id, state, state_hash, &choice, current);

        Ok(choice)
    }

    fn emit_decision(
        &self,
        user_id: &str,
        state: &DiscretizedState,
        state_hash: StateHash,
        choice: &ActionChoice,
        current: Option<Difficulty>,
    ) {
        self.observers.emit(QuizEvent::Decision(DecisionEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            level: state.level,
            state_hash,
            kind: choice.kind,
            epsilon: choice.epsilon,
            chosen: choice.action,
            allowed_actions: choice.allowed_actions.clone(),
            candidate_q: choice.candidate_q.clone(),
            best_value: choice.best_value,
            is_optimal: choice.is_optimal,
        }));

        if let Some(from) = current.filter(|c| *c != choice.action) {
            let reason = match choice.kind {
                DecisionKind::SafetyOverride => {
                    format!("safety limited {} to {}", state.level, choice.action)
                }
                DecisionKind::Explore => {
                    format!("exploring {} at ε={:.3}", choice.action, choice.epsilon)
                }
                DecisionKind::Exploit if choice.action < from => {
                    format!("stepping down from {} to {}", from, choice.action)
                }
                DecisionKind::Exploit => format!("stepping up from {} to {}", from, choice.action),
            };
            self.observers.emit(QuizEvent::Adaptation(AdaptationEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                user_id: user_id.to_string(),
                from,
                to: choice.action,
                kind: choice.kind,
                reason,
            }));
        }
    }

    /// Highest Q over the next level's base actions; 0 without a next state
    fn max_next_q(&self, user_id: &str, next_state: Option<&DiscretizedState>) -> QuizResult<f64> {
        let Some(next) = next_state else {
            return Ok(0.0);
        };
        let actions = self.base_actions(next.level)?;
        let values = self.q_values(user_id, &next.state_hash(), &actions)?;
        Ok(bellman::max_q(values.into_values()))
    }

    /// One Bellman step on Q(state, action), retried on concurrent writes
    pub fn update_q(
        &self,
        user_id: &str,
        state: &DiscretizedState,
        action: Difficulty,
        reward: f64,
        next_state: Option<&DiscretizedState>,
    ) -> QuizResult<QUpdate> {
        if !reward.is_finite() {
            return Err(QuizError::invalid_argument(format!(
                "Reward must be finite, got {}",
                reward
            )));
        }

        let state_hash = state.state_hash();
        let key = QKey::new(user_id, state_hash.clone(), action);

        for attempt in 1..=self.config.max_cas_attempts {
            let entry = self.store.get_or_create(&key)?;
            let max_next_q = self.max_next_q(user_id, next_state)?;
            let q_after = bellman::bellman_update(
                entry.q_value,
                reward,
                max_next_q,
                self.config.learning_rate,
                self.config.discount_factor,
                self.range,
            );

            if self.store.compare_and_swap(&key, entry.version, q_after)? {
                let update = QUpdate {
                    q_before: entry.q_value,
                    q_after,
                    max_next_q,
                    attempts: attempt,
                };
                debug!(
                    "Q({}, {}) for {}: {:.3} -> {:.3} (r={:.2})",
                    state_hash.short(),
                    action,
                    user_id,
                    update.q_before,
                    update.q_after,
                    reward
                );
                self.observers.emit(QuizEvent::LearningUpdate(LearningUpdateEvent {
                    id: Uuid::new_v4(),
                    timestamp: Utc::now(),
                    user_id: user_id.to_string(),
                    state_hash,
                    action,
                    reward,
                    q_before: update.q_before,
                    q_after,
                    max_next_q,
                    attempts: attempt,
                }));
                return Ok(update);
            }
        }

        warn!(
            "Giving up on Q({}, {}) for {} after {} conflicting writes",
            state_hash.short(),
            action,
            user_id,
            self.config.max_cas_attempts
        );
        Err(QuizError::ConcurrentUpdateConflict {
            attempts: self.config.max_cas_attempts,
        })
    }

    /// Deterministic greedy suggestion with reasoning, no exploration draw
    pub fn recommend(
        &self,
        user_id: &str,
        state: &DiscretizedState,
        current: Option<Difficulty>,
    ) -> QuizResult<Recommendation> {
        let base = self.base_actions(state.level)?;
        let allowed = self.allowed_actions(user_id, state.level, current)?;
        let epsilon = self.dynamic_epsilon(user_id, state.level)?;
        let q_values = self.q_values(user_id, &state.state_hash(), &allowed)?;
        let (recommended, _) = Self::greedy(&allowed, &q_values);
        let selection_probability =
            self.action_probability(&allowed, recommended, recommended, epsilon);
        let weighted: Vec<(f64, f64)> = q_values
            .iter()
            .map(|(&action, &q)| {
                (self.action_probability(&allowed, recommended, action, epsilon), q)
            })
            .collect();
        let state_value = bellman::expected_value(&weighted);

        let entries = self.store.entries_for_user(user_id)?.len();
        let confidence =
            (entries as f64 / self.config.maturity_entries.max(1) as f64).min(1.0);

        let mut reasoning = Vec::new();
        if allowed.len() < base.len() {
            reasoning.push(format!(
                "Safety rules limit {} to {:?}",
                state.level, allowed
            ));
        }
        for difficulty in Difficulty::ALL {
            let run = self.history.consecutive_performance(
                user_id,
                difficulty,
                self.config.safety_window,
            )?;
            if run.consecutive_wrong >= self.config.safety_consecutive_wrong {
                reasoning.push(format!(
                    "Struggling with {} ({} wrong in a row)",
                    difficulty, run.consecutive_wrong
                ));
            }
            if run.consecutive_correct >= self.config.excel_consecutive_correct {
                reasoning.push(format!(
                    "Excelling at {} ({} correct in a row)",
                    difficulty, run.consecutive_correct
                ));
            }
        }
        if entries == 0 {
            reasoning.push("No learned values yet".to_string());
        }

        Ok(Recommendation {
            recommended,
            allowed_actions: allowed,
            q_values,
            confidence,
            epsilon,
            selection_probability,
            state_value,
            reasoning,
        })
    }

    /// Aggregate view of one learner's table
    pub fn summary(&self, user_id: &str) -> QuizResult<QTableSummary> {
        Ok(QTableSummary::from_entries(&self.store.entries_for_user(user_id)?))
    }
}

impl Policy for QLearningEngine {
    fn action_probability(
        &self,
        allowed: &[Difficulty],
        best: Difficulty,
        action: Difficulty,
        epsilon: f64,
    ) -> f64 {
        if !allowed.contains(&action) {
            return 0.0;
        }
        if allowed.len() == 1 {
            return 1.0;
        }

        let uniform = epsilon / allowed.len() as f64;
        if action == best {
            1.0 - epsilon + uniform
        } else {
            uniform
        }
    }
}

impl std::fmt::Debug for QLearningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QLearningEngine")
            .field("config", &self.config)
            .field("observers", &self.observers)
            .finish()
    }
}
