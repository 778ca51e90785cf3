mod config;
pub use config::{HealthConfig, ScoreWeights};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::types::{HealthStatus, Protocol, ProtocolHealthSnapshot};

#[derive(Debug, Clone, Copy)]
struct Outcome {
    success: bool,
    duration_ms: u64,
}

/// Per-protocol counters
#[derive(Debug, Default)]
struct HealthRecord {
    successes: u64,
    failures: u64,
    cumulative_latency_ms: u128,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    last_failure: Option<Instant>,
    window: VecDeque<Outcome>,
}

impl HealthRecord {
    fn snapshot(&self) -> ProtocolHealthSnapshot {
        let samples = self.window.len();
        let window_successes: Vec<u64> = self
            .window
            .iter()
            .filter(|o| o.success)
            .map(|o| o.duration_ms)
            .collect();

        let success_rate = if samples == 0 {
            1.0
        } else {
            window_successes.len() as f64 / samples as f64
        };
        let avg_duration_ms = if window_successes.is_empty() {
            None
        } else {
            Some(window_successes.iter().sum::<u64>() / window_successes.len() as u64)
        };
        let status = match (self.successes + self.failures, self.consecutive_failures) {
            (0, _) => HealthStatus::Unknown,
            (_, 0) => HealthStatus::Healthy,
            (_, 1..=2) => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        };

        ProtocolHealthSnapshot {
            success_rate,
            avg_duration_ms,
            consecutive_failures: self.consecutive_failures,
            samples: self.successes + self.failures,
            last_failure_at: self.last_failure_at,
            status,
        }
    }
}

/// Observed health of every protocol, fed by transfer outcomes and read by
/// the route scorer.
///
/// Every protocol has its own lock; updates for one never block another.
#[derive(Debug)]
pub struct HealthRegistry {
    config: HealthConfig,
    records: HashMap<Protocol, Arc<Mutex<HealthRecord>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::with_config(HealthConfig::default())
    }

    pub fn with_config(config: HealthConfig) -> Self {
        let records = Protocol::ALL
            .iter()
            .map(|p| (*p, Arc::new(Mutex::new(HealthRecord::default()))))
            .collect();
        Self { config, records }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn record(&self, protocol: Protocol) -> Option<&Arc<Mutex<HealthRecord>>> {
        self.records.get(&protocol)
    }

    pub fn record_outcome(&self, protocol: Protocol, success: bool, duration_ms: u64) {
        let Some(record) = self.record(protocol) else {
            return;
        };
        let mut record = record.lock();

        if success {
            record.successes += 1;
            record.cumulative_latency_ms += duration_ms as u128;
            if record.consecutive_failures > 0 {
                info!(%protocol, after = record.consecutive_failures, "protocol recovered");
            }
            record.consecutive_failures = 0;
        } else {
            record.failures += 1;
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            record.last_failure_at = Some(Utc::now());
            record.last_failure = Some(Instant::now());
        }

        record.window.push_back(Outcome { success, duration_ms });
        while record.window.len() > self.config.window_size.max(1) {
            record.window.pop_front();
        }
        debug!(
            %protocol,
            success,
            duration_ms,
            consecutive_failures = record.consecutive_failures,
            "outcome recorded"
        );
    }

    pub fn snapshot(&self, protocol: Protocol) -> ProtocolHealthSnapshot {
        self.record(protocol)
            .map(|r| r.lock().snapshot())
            .unwrap_or_default()
    }

    /// Mean latency over every success ever recorded, unlike the windowed
    /// figure in [`snapshot`](Self::snapshot).
    pub fn lifetime_avg_duration_ms(&self, protocol: Protocol) -> Option<u64> {
        let record = self.record(protocol)?.lock();
        (record.successes > 0).then(|| (record.cumulative_latency_ms / record.successes as u128) as u64)
    }

    fn effective_failures(&self, protocol: Protocol) -> u32 {
        let Some(record) = self.record(protocol) else {
            return 0;
        };
        let record = record.lock();
        match (self.config.failure_decay, record.last_failure) {
            (Some(decay), Some(at)) if at.elapsed() >= decay => 0,
            _ => record.consecutive_failures,
        }
    }

    /// Score of `protocol` relative to `candidates`, higher is better.
    ///
    /// The speed component compares against the fastest average among the
    /// candidates, so scores are only comparable within one candidate set.
    pub fn score(&self, protocol: Protocol, candidates: &[Protocol]) -> f64 {
        let averages: Vec<Option<u64>> = candidates
            .iter()
            .map(|p| self.snapshot(*p).avg_duration_ms)
            .collect();
        let fastest = averages.iter().flatten().min().copied();
        self.score_with(protocol, fastest)
    }

    fn score_with(&self, protocol: Protocol, fastest_ms: Option<u64>) -> f64 {
        let snapshot = self.snapshot(protocol);
        let weights = &self.config.weights;

        let failures = 1.0 / (1.0 + self.effective_failures(protocol) as f64);
        let speed = match (snapshot.avg_duration_ms, fastest_ms) {
            (Some(avg), Some(fastest)) if avg > 0 => fastest as f64 / avg as f64,
            (Some(_), _) => 1.0,
            (None, _) => self.config.unobserved_speed,
        };

        weights.consecutive_failures * failures + weights.success_rate * snapshot.success_rate + weights.speed * speed
    }

    /// `candidates` ordered best first. Equal scores keep declaration order.
    pub fn rank(&self, candidates: &[Protocol]) -> Vec<(Protocol, f64)> {
        let fastest = candidates
            .iter()
            .filter_map(|p| self.snapshot(*p).avg_duration_ms)
            .min();
        let mut scored: Vec<(Protocol, f64)> = candidates
            .iter()
            .map(|p| (*p, self.score_with(*p, fastest)))
            .collect();
        scored.sort_by(|(pa, sa), (pb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| pa.ordinal().cmp(&pb.ordinal()))
        });
        scored
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}
