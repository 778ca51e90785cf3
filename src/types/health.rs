use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::duration_ms;

/// Coarse health of a protocol adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

/// Running counters kept by each adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub total_transfers: u64,
    pub failed_transfers: u64,
    pub consecutive_failures: u32,
    /// Mean duration of successful transfers
    #[serde(with = "duration_ms")]
    pub avg_duration: Duration,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub status: HealthStatus,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            total_transfers: 0,
            failed_transfers: 0,
            consecutive_failures: 0,
            avg_duration: Duration::ZERO,
            last_success_at: None,
            last_failure_at: None,
            status: HealthStatus::Unknown,
        }
    }
}

impl HealthMetrics {
    pub fn record_success(&mut self, duration: Duration) {
        self.total_transfers += 1;
        self.consecutive_failures = 0;
        self.last_success_at = Some(Utc::now());
        self.status = HealthStatus::Healthy;

        let successes = self.total_transfers - self.failed_transfers;
        if successes == 1 {
            self.avg_duration = duration;
        } else {
            let previous = self.avg_duration.as_millis() as f64 * (successes - 1) as f64;
            let mean = (previous + duration.as_millis() as f64) / successes as f64;
            self.avg_duration = Duration::from_millis(mean as u64);
        }
    }

    pub fn record_failure(&mut self) {
        self.total_transfers += 1;
        self.failed_transfers += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure_at = Some(Utc::now());
        self.status = if self.consecutive_failures > 2 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
    }

    /// 1.0 until anything has been observed.
    pub fn success_rate(&self) -> f64 {
        if self.total_transfers == 0 {
            1.0
        } else {
            (self.total_transfers - self.failed_transfers) as f64 / self.total_transfers as f64
        }
    }

    pub fn snapshot(&self) -> ProtocolHealthSnapshot {
        let successes = self.total_transfers - self.failed_transfers;
        ProtocolHealthSnapshot {
            success_rate: self.success_rate(),
            avg_duration_ms: (successes > 0).then(|| self.avg_duration.as_millis() as u64),
            consecutive_failures: self.consecutive_failures,
            samples: self.total_transfers,
            last_failure_at: self.last_failure_at,
            status: self.status,
        }
    }
}

/// Point-in-time view of a protocol's health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolHealthSnapshot {
    pub success_rate: f64,
    /// None until a successful transfer has been timed
    pub avg_duration_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub samples: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub status: HealthStatus,
}

impl Default for ProtocolHealthSnapshot {
    fn default() -> Self {
        HealthMetrics::default().snapshot()
    }
}
