use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::BridgeError;
use crate::types::option_duration_ms;

/// Relative weight of each scoring component. Must sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub consecutive_failures: f64,
    pub success_rate: f64,
    pub speed: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            consecutive_failures: 0.7,
            success_rate: 0.2,
            speed: 0.1,
        }
    }
}

/// Configuration for the health registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Outcomes kept per protocol for the rolling success rate and latency
    pub window_size: usize,

    pub weights: ScoreWeights,

    /// Speed component used for a protocol with no timed success yet
    pub unobserved_speed: f64,

    /// Consecutive failures stop counting against the score once the last
    /// failure is older than this
    #[serde(with = "option_duration_ms", default)]
    pub failure_decay: Option<Duration>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            weights: ScoreWeights::default(),
            unobserved_speed: 0.5,
            failure_decay: Some(Duration::from_secs(300)),
        }
    }
}

impl HealthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Long memory, slow to forgive
    pub fn strict() -> Self {
        Self {
            window_size: 50,
            weights: ScoreWeights {
                consecutive_failures: 0.8,
                success_rate: 0.15,
                speed: 0.05,
            },
            unobserved_speed: 0.25,
            failure_decay: None,
        }
    }

    /// Short memory, favours speed more
    pub fn permissive() -> Self {
        Self {
            window_size: 10,
            weights: ScoreWeights {
                consecutive_failures: 0.6,
                success_rate: 0.2,
                speed: 0.2,
            },
            unobserved_speed: 0.75,
            failure_decay: Some(Duration::from_secs(60)),
        }
    }

    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size;
        self
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_unobserved_speed(mut self, speed: f64) -> Self {
        self.unobserved_speed = speed;
        self
    }

    pub fn with_failure_decay(mut self, decay: Option<Duration>) -> Self {
        self.failure_decay = decay;
        self
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.window_size == 0 {
            return Err(BridgeError::Configuration("health window size must be positive".to_string()));
        }
        let w = &self.weights;
        if [w.consecutive_failures, w.success_rate, w.speed]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(BridgeError::Configuration("score weights must be non-negative".to_string()));
        }
        let total = w.consecutive_failures + w.success_rate + w.speed;
        if (total - 1.0).abs() > 1e-6 {
            return Err(BridgeError::Configuration(format!(
                "score weights must sum to 1, got {:.3}",
                total
            )));
        }
        if w.consecutive_failures < w.success_rate || w.consecutive_failures < w.speed {
            return Err(BridgeError::Configuration(
                "consecutive failures must carry the largest score weight".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.unobserved_speed) {
            return Err(BridgeError::Configuration("unobserved speed must be within [0, 1]".to_string()));
        }
        Ok(())
    }
}
