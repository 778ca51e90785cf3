use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::BridgeError;
use crate::traits::{AttestationResponse, AttestationService, AttestationStatus};

/// [`AttestationService`] over HTTP/JSON.
///
/// Endpoints may contain a `{key}` placeholder; otherwise the key is
/// appended as the last path segment. Both Circle-style bodies
/// (`{"status": "complete", "attestation": "0x.."}`) and guardian-style
/// bodies (`{"data": {"vaa": "<base64>"}}`) are understood.
#[derive(Debug, Clone)]
pub struct HttpAttestationService {
    client: Client,
    complete_statuses: Vec<String>,
}

impl HttpAttestationService {
    pub fn new(timeout: Duration) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("frostgate-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            complete_statuses: vec!["complete".to_string()],
        }
    }

    /// Additional status strings that mean the proof is final.
    pub fn with_complete_status(mut self, status: impl Into<String>) -> Self {
        self.complete_statuses.push(status.into().to_ascii_lowercase());
        self
    }

    fn parse_body(&self, body: &Value) -> AttestationResponse {
        let root = body.get("data").filter(|d| d.is_object()).unwrap_or(body);
        let proof = ["attestation", "proof", "vaa"]
            .iter()
            .find_map(|field| root.get(*field).and_then(Value::as_str))
            .filter(|raw| !raw.is_empty() && *raw != "PENDING")
            .map(normalize_proof);

        let status = match root.get("status").and_then(Value::as_str) {
            Some(status) if self.is_complete(status) => AttestationStatus::Complete,
            Some(_) => AttestationStatus::Pending,
            // Guardian APIs omit status and only return a body once signed
            None if proof.is_some() => AttestationStatus::Complete,
            None => AttestationStatus::Pending,
        };

        AttestationResponse { status, proof }
    }

    fn is_complete(&self, status: &str) -> bool {
        let status = status.to_ascii_lowercase();
        self.complete_statuses.iter().any(|s| *s == status)
    }
}

pub(crate) fn endpoint_url(endpoint: &str, proof_key: &str) -> String {
    if endpoint.contains("{key}") {
        endpoint.replace("{key}", proof_key)
    } else {
        format!("{}/{}", endpoint.trim_end_matches('/'), proof_key)
    }
}

/// Hex passes through; anything else is tried as base64 and re-encoded as
/// 0x-hex. Undecodable input is returned unchanged and rejected later.
fn normalize_proof(raw: &str) -> String {
    if raw.starts_with("0x") {
        return raw.to_string();
    }
    match STANDARD.decode(raw) {
        Ok(bytes) => format!("0x{}", hex::encode(bytes)),
        Err(_) => raw.to_string(),
    }
}

#[async_trait]
impl AttestationService for HttpAttestationService {
    async fn fetch(&self, endpoint: &str, proof_key: &str) -> Result<AttestationResponse, BridgeError> {
        let url = endpoint_url(endpoint, proof_key);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Network(format!("{} returned {}", url, status)));
        }
        let body: Value = response.json().await?;
        let parsed = self.parse_body(&body);
        debug!(url = %url, status = ?parsed.status, "attestation response");
        Ok(parsed)
    }
}
