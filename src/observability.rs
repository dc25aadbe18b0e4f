// Decision and learning events
// Observers receive every event; a failing observer is counted and logged, never propagated

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::types::{Level, UserId};
use crate::reinforcement::action::Difficulty;
use crate::reinforcement::state::StateHash;

/// How an action was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Explore,
    Exploit,
    /// Only one action was allowed, no draw happened
    SafetyOverride,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub level: Level,
    pub state_hash: StateHash,
    pub kind: DecisionKind,
    pub epsilon: f64,
    pub chosen: Difficulty,
    pub allowed_actions: Vec<Difficulty>,
    pub candidate_q: BTreeMap<Difficulty, f64>,
    pub best_value: f64,
    pub is_optimal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub from: Difficulty,
    pub to: Difficulty,
    pub kind: DecisionKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningUpdateEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub state_hash: StateHash,
    pub action: Difficulty,
    pub reward: f64,
    pub q_before: f64,
    pub q_after: f64,
    pub max_next_q: f64,
    /// Compare-and-swap rounds needed to persist
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionDirection {
    Promotion,
    Demotion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelTransitionEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    pub from: Level,
    pub to: Level,
    pub direction: TransitionDirection,
    pub xp_before: i64,
    pub reason: String,
}

/// Everything an observer can be told about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QuizEvent {
    Decision(DecisionEvent),
    Adaptation(AdaptationEvent),
    LearningUpdate(LearningUpdateEvent),
    LevelTransition(LevelTransitionEvent),
}

impl QuizEvent {
    pub fn id(&self) -> Uuid {
        match self {
            QuizEvent::Decision(e) => e.id,
            QuizEvent::Adaptation(e) => e.id,
            QuizEvent::LearningUpdate(e) => e.id,
            QuizEvent::LevelTransition(e) => e.id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QuizEvent::Decision(_) => "decision",
            QuizEvent::Adaptation(_) => "adaptation",
            QuizEvent::LearningUpdate(_) => "learning_update",
            QuizEvent::LevelTransition(_) => "level_transition",
        }
    }
}

#[derive(Error, Debug)]
#[error("Observer {observer} failed: {message}")]
pub struct ObserverError {
    pub observer: String,
    pub message: String,
}

impl ObserverError {
    pub fn new(observer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            observer: observer.into(),
            message: message.into(),
        }
    }
}

/// Receiver of quiz events
///
/// Implementations report failure through `Err` and must not panic: the hub
/// counts and logs errors but a panic unwinds through the call that emitted
/// the event.
pub trait Observer: Send + Sync {
    fn name(&self) -> &str;

    /// Called synchronously on the emitting thread; keep it short and panic-free
    fn on_event(&self, event: &QuizEvent) -> Result<(), ObserverError>;
}

/// Fans events out to every registered observer
#[derive(Default)]
pub struct ObserverHub {
    observers: Vec<Arc<dyn Observer>>,
    failures: AtomicU64,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Deliver to every observer in order; an `Err` is counted and skipped
    pub fn emit(&self, event: QuizEvent) {
        for observer in &self.observers {
            if let Err(e) = observer.on_event(&event) {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping {} event {}: {}", event.name(), event.id(), e);
            }
        }
    }

    /// Events an observer failed to accept since startup
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for ObserverHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHub")
            .field(
                "observers",
                &self.observers.iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            )
            .field("failures", &self.failure_count())
            .finish()
    }
}

/// Writes events to the tracing subscriber
#[derive(Debug, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_event(&self, event: &QuizEvent) -> Result<(), ObserverError> {
        match event {
            QuizEvent::Decision(e) => debug!(
                user = %e.user_id,
                state = e.state_hash.short(),
                kind = ?e.kind,
                epsilon = e.epsilon,
                chosen = %e.chosen,
                optimal = e.is_optimal,
                "difficulty decision"
            ),
            QuizEvent::Adaptation(e) => info!(
                user = %e.user_id,
                from = %e.from,
                to = %e.to,
                "difficulty adapted: {}",
                e.reason
            ),
            QuizEvent::LearningUpdate(e) => debug!(
                user = %e.user_id,
                state = e.state_hash.short(),
                action = %e.action,
                reward = e.reward,
                q_before = e.q_before,
                q_after = e.q_after,
                "q-value updated"
            ),
            QuizEvent::LevelTransition(e) => info!(
                user = %e.user_id,
                from = %e.from,
                to = %e.to,
                direction = ?e.direction,
                "level changed: {}",
                e.reason
            ),
        }
        Ok(())
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryObserver {
    events: Mutex<Vec<QuizEvent>>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<QuizEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Recorded events as JSON lines
    pub fn to_json_lines(&self) -> Result<String, ObserverError> {
        let mut out = String::new();
        for event in self.events() {
            let line = serde_json::to_string(&event)
                .map_err(|e| ObserverError::new("memory", e.to_string()))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}

impl Observer for MemoryObserver {
    fn name(&self) -> &str {
        "memory"
    }

    fn on_event(&self, event: &QuizEvent) -> Result<(), ObserverError> {
        self.events
            .lock()
            .map_err(|_| ObserverError::new("memory", "event buffer poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingObserver;

    impl Observer for FailingObserver {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_event(&self, _event: &QuizEvent) -> Result<(), ObserverError> {
            Err(ObserverError::new("failing", "sink offline"))
        }
    }

    fn adaptation() -> QuizEvent {
        QuizEvent::Adaptation(AdaptationEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: "u1".to_string(),
            from: Difficulty::Medium,
            to: Difficulty::Easy,
            kind: DecisionKind::Exploit,
            reason: "struggling".to_string(),
        })
    }

    #[test]
    fn test_failures_are_counted_not_propagated() {
        let memory = Arc::new(MemoryObserver::new());
        let hub = ObserverHub::new()
            .with_observer(Arc::new(FailingObserver))
            .with_observer(memory.clone())
            .with_observer(Arc::new(TracingObserver));

        hub.emit(adaptation());
        hub.emit(adaptation());

        assert_eq!(hub.failure_count(), 2);
        assert_eq!(memory.events().len(), 2);
        assert_eq!(hub.len(), 3);
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let memory = MemoryObserver::new();
        memory.on_event(&adaptation()).unwrap();

        let lines = memory.to_json_lines().unwrap();
        let value: serde_json::Value = serde_json::from_str(lines.trim()).unwrap();
        assert_eq!(value["event"], "adaptation");
        assert_eq!(value["to"], "easy");
    }
}
