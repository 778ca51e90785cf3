use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::reliability::{RetryExhaustedError, Retryable, TimeoutError};
use crate::types::{ChainId, Protocol, TxRef};

/// Machine-readable classification attached to every failed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    WalletRejected,
    UserCancelled,
    Cancelled,
    TransientNetwork,
    Timeout,
    SourceExecutionFailed,
    AttestationTimeout,
    DestinationExecutionFailed,
    CircuitOpen,
    AlreadyInFlight,
    AllRoutesFailed,
    Configuration,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::WalletRejected => "wallet_rejected",
            Self::UserCancelled => "user_cancelled",
            Self::Cancelled => "cancelled",
            Self::TransientNetwork => "transient_network",
            Self::Timeout => "timeout",
            Self::SourceExecutionFailed => "source_execution_failed",
            Self::AttestationTimeout => "attestation_timeout",
            Self::DestinationExecutionFailed => "destination_execution_failed",
            Self::CircuitOpen => "circuit_open",
            Self::AlreadyInFlight => "already_in_flight",
            Self::AllRoutesFailed => "all_routes_failed",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }

    /// Whether the reliability kit may re-run the failed operation.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientNetwork | Self::Timeout)
    }

    /// Whether a failure of this kind counts against a protocol's circuit
    /// breaker and health record.
    pub fn trips_breaker(self) -> bool {
        !matches!(
            self,
            Self::InvalidRequest
                | Self::WalletRejected
                | Self::UserCancelled
                | Self::Cancelled
                | Self::AlreadyInFlight
                | Self::CircuitOpen
                | Self::Configuration
        )
    }

    /// Failures that end the whole transfer instead of moving on to the next
    /// candidate protocol.
    pub fn stops_fallback(self) -> bool {
        matches!(
            self,
            Self::WalletRejected | Self::UserCancelled | Self::Cancelled | Self::AlreadyInFlight
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while orchestrating a bridge transfer.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    /// Malformed or unsupported request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Protocol has no route between the two chains
    #[error("{protocol} does not support {source_chain} -> {destination}")]
    UnsupportedRoute {
        protocol: Protocol,
        source_chain: ChainId,
        destination: ChainId,
    },

    /// Wallet refused to sign
    #[error("Wallet rejected the transaction: {0}")]
    WalletRejected(String),

    /// No wallet session for the chain
    #[error("Wallet not connected for {0}")]
    WalletNotConnected(ChainId),

    #[error("Transfer cancelled by user")]
    UserCancelled,

    /// Context cancelled or deadline hit at a suspension point
    #[error("Transfer cancelled{}", cancelled_suffix(.source_submitted))]
    Cancelled { source_submitted: bool },

    /// RPC or HTTP failure
    #[error("Network error: {0}")]
    Network(String),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    RetryExhausted(Box<RetryExhaustedError<BridgeError>>),

    /// Source transaction landed but reverted
    #[error("Source transaction {tx} reverted")]
    SourceReverted { tx: TxRef },

    /// Source transaction never reached the required confirmations
    #[error("Source transaction {tx} not confirmed within {waited:?}")]
    SourceUnconfirmed { tx: TxRef, waited: Duration },

    /// No proof for the message before the deadline
    #[error("Attestation for {proof_key} not available after {waited:?}")]
    AttestationTimeout { proof_key: String, waited: Duration },

    /// Destination mint/redeem failed or could not be confirmed
    #[error("Destination execution failed: {0}")]
    DestinationFailed(String),

    #[error("Circuit open for {0}")]
    CircuitOpen(String),

    #[error("Transfer {0} is already in flight")]
    AlreadyInFlight(String),

    #[error("All routes failed ({0} attempted)")]
    AllRoutesFailed(usize),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn cancelled_suffix(source_submitted: &bool) -> &'static str {
    if *source_submitted {
        " after source submission"
    } else {
        ""
    }
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) | Self::UnsupportedRoute { .. } => ErrorKind::InvalidRequest,
            Self::WalletRejected(_) | Self::WalletNotConnected(_) => ErrorKind::WalletRejected,
            Self::UserCancelled => ErrorKind::UserCancelled,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Network(_) => ErrorKind::TransientNetwork,
            Self::Timeout(_) | Self::SourceUnconfirmed { .. } => ErrorKind::Timeout,
            Self::RetryExhausted(inner) => inner.last.kind(),
            Self::SourceReverted { .. } => ErrorKind::SourceExecutionFailed,
            Self::AttestationTimeout { .. } => ErrorKind::AttestationTimeout,
            Self::DestinationFailed(_) => ErrorKind::DestinationExecutionFailed,
            Self::CircuitOpen(_) => ErrorKind::CircuitOpen,
            Self::AlreadyInFlight(_) => ErrorKind::AlreadyInFlight,
            Self::AllRoutesFailed(_) => ErrorKind::AllRoutesFailed,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Serialization(_) | Self::Internal(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }
}

impl Retryable for BridgeError {
    fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<RetryExhaustedError<BridgeError>> for BridgeError {
    fn from(error: RetryExhaustedError<BridgeError>) -> Self {
        BridgeError::RetryExhausted(Box::new(error))
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            BridgeError::Network(format!("request timed out: {}", error))
        } else if error.is_decode() {
            BridgeError::Serialization(error.to_string())
        } else {
            BridgeError::Network(error.to_string())
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(error: serde_json::Error) -> Self {
        BridgeError::Serialization(error.to_string())
    }
}

impl From<ethers::abi::Error> for BridgeError {
    fn from(error: ethers::abi::Error) -> Self {
        BridgeError::Internal(format!("ABI encoding failed: {}", error))
    }
}
