//! Waiting for cross-chain proofs.

pub mod http;

pub use http::HttpAttestationService;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::reliability::{poll_with_backoff, with_timeout, PollPolicy};
use crate::traits::{AttestationResponse, AttestationService, AttestationStatus};
use crate::types::{duration_ms, Proof};

/// Where and how long to look for a proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitOptions {
    pub primary_endpoint: String,
    /// Queried on a tick only when the primary errored on that tick
    #[serde(default)]
    pub fallback_endpoint: Option<String>,
    #[serde(with = "duration_ms")]
    pub max_wait: Duration,
    /// First interval between polls; later intervals back off from it
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    #[serde(with = "duration_ms")]
    pub max_interval: Duration,
    pub backoff_multiplier: f64,
}

impl WaitOptions {
    pub fn new(primary_endpoint: impl Into<String>) -> Self {
        Self {
            primary_endpoint: primary_endpoint.into(),
            fallback_endpoint: None,
            max_wait: Duration::from_secs(20 * 60),
            poll_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(30),
            backoff_multiplier: 1.5,
        }
    }

    pub fn with_fallback(mut self, endpoint: impl Into<String>) -> Self {
        self.fallback_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.max_wait, self.poll_interval)
            .with_max_delay(self.max_interval)
            .with_multiplier(self.backoff_multiplier)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.primary_endpoint.trim().is_empty() {
            return Err(BridgeError::Configuration("attestation endpoint is empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(BridgeError::Configuration("attestation poll interval must be positive".to_string()));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(BridgeError::Configuration("attestation backoff multiplier must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Polls an [`AttestationService`] until a proof is ready.
#[derive(Clone)]
pub struct AttestationWaiter {
    service: Arc<dyn AttestationService>,
    request_timeout: Duration,
}

impl AttestationWaiter {
    pub fn new(service: Arc<dyn AttestationService>) -> Self {
        Self {
            service,
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns the proof for `proof_key`, or `None` once `max_wait` has
    /// elapsed. A timeout is not an error: the proof may still appear later.
    pub async fn wait(&self, proof_key: &str, options: &WaitOptions) -> Option<Proof> {
        self.wait_until(proof_key, options, |_| true).await
    }

    /// Like [`wait`](Self::wait), but a complete proof that `accepts` turns
    /// down is treated as not ready and polling continues.
    pub async fn wait_until<F>(&self, proof_key: &str, options: &WaitOptions, accepts: F) -> Option<Proof>
    where
        F: Fn(&Proof) -> bool + Send + Sync,
    {
        info!(proof_key, endpoint = %options.primary_endpoint, "waiting for attestation");
        let accepts = &accepts;
        let proof = poll_with_backoff(&options.poll_policy(), |tick| async move {
            match self.query(&options.primary_endpoint, proof_key).await {
                Ok(response) => accept(proof_key, response, accepts),
                Err(error) => {
                    debug!(proof_key, tick, %error, "primary attestation endpoint failed");
                    let fallback = options.fallback_endpoint.as_deref()?;
                    match self.query(fallback, proof_key).await {
                        Ok(response) => accept(proof_key, response, accepts),
                        Err(error) => {
                            debug!(proof_key, tick, %error, "fallback attestation endpoint failed");
                            None
                        }
                    }
                }
            }
        })
        .await;

        if proof.is_none() {
            warn!(proof_key, max_wait = ?options.max_wait, "attestation not available before deadline");
        }
        proof
    }

    async fn query(&self, endpoint: &str, proof_key: &str) -> Result<AttestationResponse, BridgeError> {
        with_timeout(
            self.service.fetch(endpoint, proof_key),
            self.request_timeout,
            "attestation fetch",
        )
        .await
    }
}

fn accept<F>(proof_key: &str, response: AttestationResponse, accepts: &F) -> Option<Proof>
where
    F: Fn(&Proof) -> bool,
{
    if response.status != AttestationStatus::Complete {
        return None;
    }
    match response.proof.as_deref().and_then(Proof::parse) {
        Some(proof) if accepts(&proof) => Some(proof),
        _ => {
            warn!(proof_key, "attestation marked complete with malformed proof; still waiting");
            None
        }
    }
}
