// Adaptive difficulty selection system
// Wires the encoder, engine, reward calculator and policies to the stores

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::config::QuizConfig;
use crate::core::types::{Level, UserProfile};
use crate::error::{QuizError, QuizResult};
use crate::history::AttemptHistoryReader;
use crate::observability::{DecisionKind, LevelTransitionEvent, ObserverHub, QuizEvent};
use crate::policy::{
    LevelProgress, LevelTransitionCheck, LevelTransitionPolicy, ProgressiveHint, RetryPolicy,
};
use crate::reinforcement::{
    action::Difficulty,
    q_learning::{QLearningEngine, Recommendation},
    q_table::{QTableStore, QTableSummary},
    reward::{RewardCalculator, XpBreakdown, XpCategory},
    state::{DiscretizedState, StateEncoder, StateHash},
    RandomSource,
};

/// Difficulty picked for the next question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultySelection {
    pub action: Difficulty,
    pub is_exploration: bool,
    pub decision: DecisionKind,
    pub allowed_actions: Vec<Difficulty>,
    pub epsilon_used: f64,
    /// State the decision was made in; hand it back to `record_outcome`
    pub state: DiscretizedState,
    pub state_hash: StateHash,
}

/// One answered attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeInput {
    pub state: DiscretizedState,
    pub difficulty: Difficulty,
    pub is_correct: bool,
    pub time_spent_secs: f64,
    /// 1-based attempt within the current presentation of the question
    pub attempt_number: u32,
    /// Times the learner saw this question before the current presentation
    pub prior_question_visits: u32,
    pub question_id: Option<String>,
}

impl OutcomeInput {
    pub fn new(state: DiscretizedState, difficulty: Difficulty, is_correct: bool) -> Self {
        Self {
            state,
            difficulty,
            is_correct,
            time_spent_secs: 0.0,
            attempt_number: 1,
            prior_question_visits: 0,
            question_id: None,
        }
    }

    pub fn with_time_spent(mut self, seconds: f64) -> Self {
        self.time_spent_secs = seconds;
        self
    }

    pub fn with_attempt(mut self, attempt_number: u32) -> Self {
        self.attempt_number = attempt_number;
        self
    }

    pub fn with_prior_visits(mut self, visits: u32) -> Self {
        self.prior_question_visits = visits;
        self
    }

    pub fn with_question(mut self, question_id: impl Into<String>) -> Self {
        self.question_id = Some(question_id.into());
        self
    }

    fn validate(&self) -> QuizResult<()> {
        if !self.time_spent_secs.is_finite() || self.time_spent_secs < 0.0 {
            return Err(QuizError::invalid_argument(format!(
                "time spent must be a non-negative number of seconds, got {}",
                self.time_spent_secs
            )));
        }
        if self.attempt_number == 0 {
            return Err(QuizError::invalid_argument("attempt numbers start at 1"));
        }
        Ok(())
    }

    fn is_first_attempt(&self) -> bool {
        self.attempt_number == 1 && self.prior_question_visits == 0
    }
}

/// Everything decided after an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub reward: f64,
    pub q_before: f64,
    pub new_q_value: f64,
    pub xp_earned: i64,
    pub xp_breakdown: XpBreakdown,
    pub hint: Option<ProgressiveHint>,
    pub retry_message: Option<String>,
    pub max_retries: u32,
    pub should_auto_advance: bool,
    pub level_change: Option<LevelTransitionEvent>,
    pub new_level: Level,
}

/// Per-learner learning overview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSummary {
    pub q_table: QTableSummary,
    pub current_epsilon: f64,
    pub progress: LevelProgress,
}

/// Safest difficulty to serve after a failed selection
pub fn fallback_difficulty(error: &QuizError) -> Difficulty {
    error
        .allowed_actions()
        .and_then(|allowed| allowed.iter().min().copied())
        .unwrap_or(Difficulty::Easy)
}

/// Adaptive difficulty selection over Q-learning and level rules
pub struct AdaptiveDifficultySystem {
    encoder: StateEncoder,
    engine: QLearningEngine,
    rewards: RewardCalculator,
    levels: LevelTransitionPolicy,
    retries: RetryPolicy,
    history: Arc<dyn AttemptHistoryReader>,
    observers: Arc<ObserverHub>,
    rng: Mutex<Box<dyn RandomSource>>,
}

impl AdaptiveDifficultySystem {
    /// Build the system; the configuration is validated once here
    pub fn new(
        config: &QuizConfig,
        store: Arc<dyn QTableStore>,
        history: Arc<dyn AttemptHistoryReader>,
        observers: Arc<ObserverHub>,
        rng: Box<dyn RandomSource>,
    ) -> QuizResult<Self> {
        config.validate()?;

        Ok(Self {
            encoder: StateEncoder::new(&config.state),
            engine: QLearningEngine::new(
                config.q_learning.clone(),
                store,
                history.clone(),
                observers.clone(),
            ),
            rewards: RewardCalculator::new(config.reward.clone()),
            levels: LevelTransitionPolicy::new(config.level_policy.clone(), history.clone()),
            retries: RetryPolicy::new(config.retry.clone()),
            history,
            observers,
            rng: Mutex::new(rng),
        })
    }

    pub fn engine(&self) -> &QLearningEngine {
        &self.engine
    }

    pub fn observers(&self) -> &ObserverHub {
        &self.observers
    }

    /// Current discretized state of a learner
    pub fn current_state(&self, profile: &UserProfile) -> QuizResult<DiscretizedState> {
        self.encoder.current_state(profile, self.history.as_ref())
    }

    /// Choose the difficulty of the next question.
    /// On failure the error carries the allowed actions; see [`fallback_difficulty`].
    pub fn select_difficulty(
        &self,
        profile: &UserProfile,
        current: Option<Difficulty>,
    ) -> QuizResult<DifficultySelection> {
        let state = self.current_state(profile).map_err(|e| {
            let allowed = self.engine.base_actions(profile.level).unwrap_or_default();
            QuizError::selection_failed(allowed, e)
        })?;

        let choice = {
            // A panic mid-draw leaves the generator usable
            let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
            self.engine.choose_action(
                &profile.user_id,
                &state,
                current.or(profile.last_difficulty),
                &mut **rng,
            )?
        };

        Ok(DifficultySelection {
            action: choice.action,
            is_exploration: choice.is_exploration(),
            decision: choice.kind,
            allowed_actions: choice.allowed_actions,
            epsilon_used: choice.epsilon,
            state_hash: state.state_hash(),
            state,
        })
    }

    /// Learn from an answer already appended to history and update the profile.
    /// The profile is only modified when every step succeeds.
    pub fn record_outcome(
        &self,
        profile: &mut UserProfile,
        input: &OutcomeInput,
    ) -> QuizResult<OutcomeReport> {
        input.validate()?;
        let mut updated = profile.clone();

        let reward = self.rewards.rl_reward(
            input.is_correct,
            input.difficulty,
            updated.streak_correct,
            input.time_spent_secs,
        );

        let earned = if input.is_correct {
            self.rewards.student_xp(
                input.difficulty,
                input.prior_question_visits,
                input.time_spent_secs,
            )
        } else {
            XpBreakdown::incorrect(
                0.0,
                XpCategory::from_prior_visits(input.prior_question_visits),
            )
        };
        let mut xp_breakdown = self.retries.apply_attempt(earned, input.attempt_number);

        updated.record_answer(input.difficulty, input.is_correct);
        if input.is_correct {
            xp_breakdown.streak_bonus = self
                .rewards
                .hidden_streak_bonus(updated.streak_correct, input.is_first_attempt());
        }
        let xp_earned = xp_breakdown.total();
        updated.add_xp(xp_earned);

        let check = self.levels.check(&updated)?;
        let level_change = self.levels.apply(&mut updated, &check);

        let next_state = self.current_state(&updated)?;
        let q = self.engine.update_q(
            &updated.user_id,
            &input.state,
            input.difficulty,
            reward,
            Some(&next_state),
        )?;

        let overall = self.history.overall_stats(&updated.user_id)?;
        let max_retries = self.retries.max_retries(input.difficulty, overall);
        let (hint, retry_message, should_auto_advance) = if input.is_correct {
            (None, None, false)
        } else {
            (
                Some(self.retries.progressive_hint(
                    input.difficulty,
                    input.attempt_number,
                    max_retries,
                )),
                Some(RetryPolicy::retry_message(input.attempt_number, max_retries)),
                RetryPolicy::should_auto_advance(input.attempt_number, max_retries),
            )
        };

        if let Some(event) = &level_change {
            self.observers.emit(QuizEvent::LevelTransition(event.clone()));
        }

        debug!(
            "User {} answered {} ({}): reward {:.2}, xp {:+}",
            updated.user_id,
            input.difficulty,
            if input.is_correct { "correct" } else { "wrong" },
            reward,
            xp_earned
        );

        *profile = updated;
        Ok(OutcomeReport {
            reward,
            q_before: q.q_before,
            new_q_value: q.q_after,
            xp_earned,
            xp_breakdown,
            hint,
            retry_message,
            max_retries,
            should_auto_advance,
            level_change,
            new_level: profile.level,
        })
    }

    /// Whether the learner qualifies for promotion or demotion right now
    pub fn check_level_transition(&self, profile: &UserProfile) -> QuizResult<LevelTransitionCheck> {
        self.levels.check(profile)
    }

    pub fn recommend(
        &self,
        profile: &UserProfile,
        current: Option<Difficulty>,
    ) -> QuizResult<Recommendation> {
        let state = self.current_state(profile)?;
        self.engine
            .recommend(&profile.user_id, &state, current.or(profile.last_difficulty))
    }

    pub fn learning_summary(&self, profile: &UserProfile) -> QuizResult<LearningSummary> {
        Ok(LearningSummary {
            q_table: self.engine.summary(&profile.user_id)?,
            current_epsilon: self.engine.dynamic_epsilon(&profile.user_id, profile.level)?,
            progress: self.levels.level_progress(profile),
        })
    }
}

impl std::fmt::Debug for AdaptiveDifficultySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveDifficultySystem")
            .field("engine", &self.engine)
            .field("retries", &self.retries)
            .finish()
    }
}
