use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::{duration_ms, Amount, Asset, ChainId};
use crate::error::{BridgeError, ErrorKind};
use crate::status::Stage;

/// Bridge protocols, in declaration order. The order is the tie-breaker
/// when two protocols score the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Cctp,
    Wormhole,
    Gmp,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Cctp, Protocol::Wormhole, Protocol::Gmp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Cctp => "cctp",
            Protocol::Wormhole => "wormhole",
            Protocol::Gmp => "gmp",
        }
    }

    /// Position in declaration order.
    pub fn ordinal(&self) -> usize {
        match self {
            Protocol::Cctp => 0,
            Protocol::Wormhole => 1,
            Protocol::Gmp => 2,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Protocol::ALL
            .into_iter()
            .find(|p| p.as_str() == lowered)
            .ok_or_else(|| BridgeError::InvalidRequest(format!("unknown protocol '{}'", s)))
    }
}

/// A transaction on a specific chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef {
    pub chain: ChainId,
    pub hash: String,
}

impl TxRef {
    pub fn new(chain: ChainId, hash: impl Into<String>) -> Self {
        Self {
            chain,
            hash: hash.into(),
        }
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.hash)
    }
}

/// Cross-chain proof (attestation, VAA or gateway approval), always a
/// 0x-prefixed hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Proof(String);

impl Proof {
    /// Accepts only non-empty, even-length, 0x-prefixed hex.
    pub fn parse(raw: &str) -> Option<Proof> {
        let body = raw.strip_prefix("0x")?;
        if body.is_empty() || hex::decode(body).is_err() {
            return None;
        }
        Some(Proof(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Construction guarantees valid hex.
        hex::decode(&self.0[2..]).unwrap_or_default()
    }
}

impl fmt::Display for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One bridge attempt as described by the caller. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    source_chain: ChainId,
    destination_chain: ChainId,
    asset: Asset,
    amount: Amount,
    source_address: String,
    destination_address: String,
    #[serde(default)]
    protocol: Option<Protocol>,
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    nonce: u64,
    #[serde(default)]
    idempotency_key: Option<String>,
}

impl TransferRequest {
    pub fn builder() -> TransferRequestBuilder {
        TransferRequestBuilder::default()
    }

    pub fn source_chain(&self) -> ChainId {
        self.source_chain
    }

    pub fn destination_chain(&self) -> ChainId {
        self.destination_chain
    }

    pub fn asset(&self) -> Asset {
        self.asset
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn source_address(&self) -> &str {
        &self.source_address
    }

    pub fn destination_address(&self) -> &str {
        &self.destination_address
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Key under which at most one attempt may be in flight: the explicit
    /// idempotency key, else `<source address>:<nonce>`.
    pub fn idempotency_key(&self) -> String {
        self.idempotency_key
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.source_address, self.nonce))
    }

    /// Shape checks that need no protocol knowledge and no I/O.
    pub fn validate_shape(&self) -> Result<(), BridgeError> {
        if self.amount.is_zero() {
            return Err(BridgeError::InvalidRequest("amount must be greater than zero".to_string()));
        }
        if self.source_chain == self.destination_chain {
            return Err(BridgeError::InvalidRequest(format!(
                "source and destination chain are both {}",
                self.source_chain
            )));
        }
        if self.asset.token_address(self.source_chain).is_none()
            || self.asset.token_address(self.destination_chain).is_none()
        {
            return Err(BridgeError::InvalidRequest(format!(
                "{} is not available on this route",
                self.asset
            )));
        }
        self.source_chain.validate_address(&self.source_address)?;
        self.destination_chain.validate_address(&self.destination_address)?;
        Ok(())
    }
}

/// Builds a [`TransferRequest`]; the decimal amount is parsed here and
/// nowhere else.
#[derive(Debug, Default)]
pub struct TransferRequestBuilder {
    source_chain: Option<ChainId>,
    destination_chain: Option<ChainId>,
    asset: Option<Asset>,
    amount: Option<String>,
    amount_units: Option<Amount>,
    source_address: Option<String>,
    destination_address: Option<String>,
    protocol: Option<Protocol>,
    dry_run: bool,
    nonce: u64,
    idempotency_key: Option<String>,
}

impl TransferRequestBuilder {
    pub fn route(mut self, source: ChainId, destination: ChainId) -> Self {
        self.source_chain = Some(source);
        self.destination_chain = Some(destination);
        self
    }

    pub fn asset(mut self, asset: Asset) -> Self {
        self.asset = Some(asset);
        self
    }

    /// Decimal amount such as `"10.00"`.
    pub fn amount<S: Into<String>>(mut self, amount: S) -> Self {
        self.amount = Some(amount.into());
        self
    }

    pub fn amount_minor_units(mut self, amount: Amount) -> Self {
        self.amount_units = Some(amount);
        self
    }

    pub fn from_address<S: Into<String>>(mut self, address: S) -> Self {
        self.source_address = Some(address.into());
        self
    }

    pub fn to_address<S: Into<String>>(mut self, address: S) -> Self {
        self.destination_address = Some(address.into());
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn idempotency_key<S: Into<String>>(mut self, key: S) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn build(self) -> Result<TransferRequest, BridgeError> {
        let missing = |field: &str| BridgeError::InvalidRequest(format!("{} is required", field));
        let source_chain = self.source_chain.ok_or_else(|| missing("source chain"))?;
        let destination_chain = self.destination_chain.ok_or_else(|| missing("destination chain"))?;
        let asset = self.asset.ok_or_else(|| missing("asset"))?;
        let amount = match (self.amount, self.amount_units) {
            (Some(text), None) => Amount::parse(&text, asset)?,
            (None, Some(units)) => units,
            (Some(_), Some(_)) => {
                return Err(BridgeError::InvalidRequest(
                    "amount given both as decimal text and minor units".to_string(),
                ))
            }
            (None, None) => return Err(missing("amount")),
        };

        Ok(TransferRequest {
            source_chain,
            destination_chain,
            asset,
            amount,
            source_address: self.source_address.ok_or_else(|| missing("source address"))?,
            destination_address: self.destination_address.ok_or_else(|| missing("destination address"))?,
            protocol: self.protocol,
            dry_run: self.dry_run,
            nonce: self.nonce,
            idempotency_key: self.idempotency_key,
        })
    }
}

/// Cheap pre-flight verdict from an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub ok: bool,
    pub reason: Option<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self { ok: true, reason: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }

    pub fn into_result(self) -> Result<(), BridgeError> {
        if self.ok {
            Ok(())
        } else {
            Err(BridgeError::InvalidRequest(
                self.reason.unwrap_or_else(|| "rejected by adapter".to_string()),
            ))
        }
    }
}

/// Best-effort cost and speed of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub fee: Amount,
    #[serde(with = "duration_ms")]
    pub estimated_duration: Duration,
}

/// Everything known about a transfer that stopped before completing.
/// Enough to resume without re-spending the source funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialProgress {
    pub protocol: Protocol,
    pub last_stage: Stage,
    pub source_tx: Option<TxRef>,
    pub proof_key: Option<String>,
    /// Protocol message bytes (hex) the proof attests to
    pub message: Option<String>,
    pub proof: Option<Proof>,
    pub destination_tx: Option<TxRef>,
}

impl PartialProgress {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            last_stage: Stage::Idle,
            source_tx: None,
            proof_key: None,
            message: None,
            proof: None,
            destination_tx: None,
        }
    }

    pub fn source_submitted(&self) -> bool {
        self.source_tx.is_some()
    }
}

/// Why one protocol attempt failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolFailure {
    pub protocol: Protocol,
    pub kind: ErrorKind,
    pub message: String,
    pub partial: Option<PartialProgress>,
}

/// Failure attached to an unsuccessful [`TransferResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Progress of the attempt this failure describes
    pub partial: Option<PartialProgress>,
    /// Per-protocol breakdown when several routes were tried
    #[serde(default)]
    pub details: Vec<ProtocolFailure>,
}

impl TransferFailure {
    pub fn from_error(error: &BridgeError, partial: Option<PartialProgress>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            partial,
            details: Vec::new(),
        }
    }
}

/// Terminal outcome of a transfer. `success` is only true once the
/// destination-chain effect is confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    pub success: bool,
    pub protocol: Option<Protocol>,
    pub bridge_id: String,
    pub source_tx: Option<TxRef>,
    pub destination_tx: Option<TxRef>,
    pub proof: Option<Proof>,
    pub error: Option<TransferFailure>,
    /// Source burn/lock was broadcast but the transfer did not complete
    pub source_submitted_but_incomplete: bool,
    /// Earlier protocol attempts in the same transfer that left a broadcast
    /// burn/lock behind, oldest first. Each can be passed to `resume`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stranded: Vec<PartialProgress>,
    /// Stages passed through, in order
    pub stages: Vec<Stage>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl TransferResult {
    pub fn failure(
        protocol: Option<Protocol>,
        bridge_id: impl Into<String>,
        error: &BridgeError,
        partial: Option<PartialProgress>,
        stages: Vec<Stage>,
        duration: Duration,
    ) -> Self {
        let source_submitted = partial.as_ref().map(|p| p.source_submitted()).unwrap_or(false);
        Self {
            success: false,
            protocol,
            bridge_id: bridge_id.into(),
            source_tx: partial.as_ref().and_then(|p| p.source_tx.clone()),
            destination_tx: partial.as_ref().and_then(|p| p.destination_tx.clone()),
            proof: partial.as_ref().and_then(|p| p.proof.clone()),
            error: Some(TransferFailure::from_error(error, partial)),
            source_submitted_but_incomplete: source_submitted,
            stranded: Vec::new(),
            stages,
            duration,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn partial(&self) -> Option<&PartialProgress> {
        self.error.as_ref().and_then(|e| e.partial.as_ref())
    }

    /// Attaches burns/locks left behind by earlier attempts. A failed
    /// transfer with any of them is submitted but incomplete.
    pub fn with_stranded(mut self, stranded: Vec<PartialProgress>) -> Self {
        if !self.success && !stranded.is_empty() {
            self.source_submitted_but_incomplete = true;
        }
        self.stranded = stranded;
        self
    }
}
