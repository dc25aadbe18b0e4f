// Bellman equations implementation
// Pure update arithmetic, kept apart from storage so it can be tested directly

use serde::{Deserialize, Serialize};

use crate::config::QLearningConfig;

/// Closed interval every stored Q-value is clamped into
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QValueRange {
    pub min: f64,
    pub max: f64,
}

impl QValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn from_config(config: &QLearningConfig) -> Self {
        Self::new(config.q_value_min, config.q_value_max)
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

impl Default for QValueRange {
    fn default() -> Self {
        Self::new(-5.0, 10.0)
    }
}

/// r + γ·max_a' Q(s',a')
pub fn td_target(reward: f64, discount_factor: f64, max_next_q: f64) -> f64 {
    reward + discount_factor * max_next_q
}

/// Q(s,a) ← Q(s,a) + α[r + γ·max_a' Q(s',a') − Q(s,a)], clamped
pub fn bellman_update(
    current_q: f64,
    reward: f64,
    max_next_q: f64,
    learning_rate: f64,
    discount_factor: f64,
    range: QValueRange,
) -> f64 {
    let temporal_difference = td_target(reward, discount_factor, max_next_q) - current_q;
    range.clamp(current_q + learning_rate * temporal_difference)
}

/// Maximum of the given Q-values, 0.0 for an empty set
pub fn max_q<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    values.into_iter().fold(None, |best: Option<f64>, q| match best {
        Some(b) if b >= q => Some(b),
        _ => Some(q),
    })
    .unwrap_or(0.0)
}

/// V(s) = Σ_a π(a|s)·Q(s,a)
pub fn expected_value(action_values: &[(f64, f64)]) -> f64 {
    action_values
        .iter()
        .map(|(probability, q)| probability * q)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_moves_toward_target() {
        let range = QValueRange::default();

        let up = bellman_update(1.0, 10.0, 0.0, 0.1, 0.9, range);
        assert!(up > 1.0);
        assert!((up - 1.9).abs() < 1e-12);

        let down = bellman_update(4.0, -2.0, 0.0, 0.1, 0.9, range);
        assert!(down < 4.0);
        assert!((down - 3.4).abs() < 1e-12);

        // target equals current: no change
        let still = bellman_update(9.0, 0.0, 10.0, 0.1, 0.9, range);
        assert!((still - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_repeated_updates_respect_clamp() {
        let range = QValueRange::default();

        let mut q = 0.0;
        for _ in 0..1000 {
            q = bellman_update(q, 100.0, range.max, 0.5, 0.9, range);
            assert!(q <= range.max);
        }
        assert_eq!(q, range.max);

        let mut q = 0.0;
        for _ in 0..1000 {
            q = bellman_update(q, -100.0, range.min, 0.5, 0.9, range);
            assert!(q >= range.min);
        }
        assert_eq!(q, range.min);
    }

    #[test]
    fn test_max_q_defaults_to_zero() {
        assert_eq!(max_q(Vec::<f64>::new()), 0.0);
        assert_eq!(max_q(vec![-3.0, -1.0]), -1.0);
        assert_eq!(max_q(vec![0.5, 2.0, 1.0]), 2.0);
    }

    #[test]
    fn test_expected_value() {
        let v = expected_value(&[(0.9, 2.0), (0.1, -1.0)]);
        assert!((v - 1.7).abs() < 1e-12);
    }
}
