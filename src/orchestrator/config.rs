use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::adapters::FlowSettings;
use crate::error::BridgeError;
use crate::registry::HealthConfig;
use crate::reliability::BreakerConfig;
use crate::types::{duration_ms, option_duration_ms};

/// Everything the orchestrator owns, passed in at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub breaker: BreakerConfig,
    pub health: HealthConfig,
    /// Settings for adapters built through the orchestrator's config
    pub flow: FlowSettings,
    /// Overall budget for one `execute`, across every candidate protocol
    #[serde(with = "option_duration_ms")]
    pub transfer_deadline: Option<Duration>,
    /// Budget for each adapter's estimate when quoting
    #[serde(with = "duration_ms")]
    pub quote_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let breaker = BreakerConfig::default();
        Self {
            health: HealthConfig::default().with_failure_decay(Some(breaker.reset_timeout)),
            breaker,
            flow: FlowSettings::default(),
            transfer_deadline: Some(Duration::from_secs(2 * 60 * 60)),
            quote_timeout: Duration::from_secs(10),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quick to open circuits, slow to trust them again
    pub fn strict() -> Self {
        Self {
            breaker: BreakerConfig {
                failure_threshold: 2,
                reset_timeout: Duration::from_secs(15 * 60),
            },
            health: HealthConfig::strict(),
            quote_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Tolerates more failures before routing around a protocol
    pub fn permissive() -> Self {
        Self {
            breaker: BreakerConfig {
                failure_threshold: 5,
                reset_timeout: Duration::from_secs(60),
            },
            health: HealthConfig::permissive(),
            transfer_deadline: None,
            quote_timeout: Duration::from_secs(20),
            ..Self::default()
        }
    }

    /// Replaces the breaker settings. When the health config forgives old
    /// failures, it forgives them on the breaker's reset schedule.
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        if self.health.failure_decay.is_some() {
            self.health.failure_decay = Some(breaker.reset_timeout);
        }
        self.breaker = breaker;
        self
    }

    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    pub fn with_flow(mut self, flow: FlowSettings) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_transfer_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.transfer_deadline = deadline;
        self
    }

    pub fn with_quote_timeout(mut self, timeout: Duration) -> Self {
        self.quote_timeout = timeout;
        self
    }

    /// Parses and validates a JSON config. Missing sections take defaults,
    /// and a missing health section decays failures on the breaker's reset.
    pub fn from_json_str(json: &str) -> Result<Self, BridgeError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| BridgeError::Configuration(format!("invalid orchestrator config: {}", e)))?;
        let health_given = value.get("health").is_some();
        let mut config: Self = serde_json::from_value(value)
            .map_err(|e| BridgeError::Configuration(format!("invalid orchestrator config: {}", e)))?;
        if !health_given {
            config.health.failure_decay = Some(config.breaker.reset_timeout);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.breaker.failure_threshold == 0 {
            return Err(BridgeError::Configuration(
                "breaker failure threshold must be at least 1".to_string(),
            ));
        }
        if self.breaker.reset_timeout.is_zero() {
            return Err(BridgeError::Configuration("breaker reset timeout must be positive".to_string()));
        }
        if self.transfer_deadline.is_some_and(|d| d.is_zero()) {
            return Err(BridgeError::Configuration("transfer deadline must be positive".to_string()));
        }
        if self.quote_timeout.is_zero() {
            return Err(BridgeError::Configuration("quote timeout must be positive".to_string()));
        }
        self.health.validate()?;
        self.flow.validate()
    }
}
