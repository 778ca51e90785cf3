use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationStatus {
    Pending,
    Complete,
}

/// Body returned by an attestation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationResponse {
    pub status: AttestationStatus,
    pub proof: Option<String>,
}

impl AttestationResponse {
    pub fn pending() -> Self {
        Self {
            status: AttestationStatus::Pending,
            proof: None,
        }
    }

    pub fn complete(proof: impl Into<String>) -> Self {
        Self {
            status: AttestationStatus::Complete,
            proof: Some(proof.into()),
        }
    }
}

/// Queries one attestation endpoint for `proof_key`. Only used through
/// [`crate::attestation::AttestationWaiter`].
#[async_trait]
pub trait AttestationService: Send + Sync {
    async fn fetch(&self, endpoint: &str, proof_key: &str) -> Result<AttestationResponse, BridgeError>;
}
