// Main module for Reinforcement Learning components
// Tabular Q-learning over question difficulties, constrained by level safety rules

pub mod action;
pub mod bellman;
pub mod difficulty_selection;
pub mod q_learning;
pub mod q_table;
pub mod reward;
pub mod state;

// Re-export main components for easier access
pub use action::Difficulty;
pub use difficulty_selection::AdaptiveDifficultySystem;
pub use q_learning::QLearningEngine;
pub use q_table::{InMemoryQTable, QKey, QTableEntry, QTableStore, QTableSummary};
pub use reward::RewardCalculator;
pub use state::{DiscretizedState, PerformanceSnapshot, StateEncoder, StateHash};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Randomness used for exploration draws
pub trait RandomSource: Send {
    /// Uniform draw in [0, 1)
    fn uniform(&mut self) -> f64;

    /// Uniform index in 0..len; `len` is never zero
    fn index(&mut self, len: usize) -> usize;
}

/// Reproducible source for tests and simulations
#[derive(Debug, Clone)]
pub struct SeededRandom(StdRng);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for SeededRandom {
    fn uniform(&mut self) -> f64 {
        self.0.random::<f64>()
    }

    fn index(&mut self, len: usize) -> usize {
        self.0.random_range(0..len)
    }
}

/// Thread-local generator
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn uniform(&mut self) -> f64 {
        rand::rng().random::<f64>()
    }

    fn index(&mut self, len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

/// Interface of an action-selection policy over difficulties
pub trait Policy {
    /// Probability of choosing `action` given the allowed set, the greedy action and ε
    fn action_probability(
        &self,
        allowed: &[Difficulty],
        best: Difficulty,
        action: Difficulty,
        epsilon: f64,
    ) -> f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_random_is_reproducible() {
        let mut a = SeededRandom::new(42);
        let mut b = SeededRandom::new(42);
        for _ in 0..100 {
            assert_eq!(a.uniform(), b.uniform());
            assert_eq!(a.index(3), b.index(3));
        }
    }

    #[test]
    fn test_draws_stay_in_range() {
        let mut rng = ThreadRandom;
        for _ in 0..1000 {
            let u = rng.uniform();
            assert!((0.0..1.0).contains(&u));
            assert!(rng.index(2) < 2);
        }
    }
}
