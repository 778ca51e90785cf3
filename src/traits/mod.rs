pub mod attestation;
pub mod chain_rpc;
pub mod wallet;

pub use attestation::{AttestationResponse, AttestationService, AttestationStatus};
pub use chain_rpc::{BlockData, ChainRpc, Confirmation, LogEntry};
pub use wallet::{TxPayload, WalletSigner};

use async_trait::async_trait;

use crate::context::BridgeContext;
use crate::error::BridgeError;
use crate::status::StatusSink;
use crate::types::{
    ChainId, FeeEstimate, PartialProgress, Protocol, ProtocolHealthSnapshot, TransferRequest,
    TransferResult, Validation,
};

/// One bridge protocol's implementation of the transfer state machine.
///
/// Implementations must be safe to call concurrently for different
/// requests. `bridge` and `resume` never return an error directly: every
/// failure is carried in the returned [`TransferResult`].
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Pure route check, no I/O.
    fn supports(&self, source: ChainId, destination: ChainId) -> bool;

    /// Best-effort fee and duration for `request`.
    async fn estimate(&self, request: &TransferRequest) -> Result<FeeEstimate, BridgeError>;

    /// Cheap pre-flight check run before committing to execution.
    async fn validate(&self, request: &TransferRequest) -> Validation;

    /// Runs the transfer end to end, reporting each stage to `sink`.
    async fn bridge(
        &self,
        request: &TransferRequest,
        ctx: &BridgeContext,
        sink: &dyn StatusSink,
    ) -> TransferResult;

    /// Continues a transfer whose source side was already submitted. The
    /// source burn/lock is never sent again.
    async fn resume(
        &self,
        request: &TransferRequest,
        partial: &PartialProgress,
        ctx: &BridgeContext,
        sink: &dyn StatusSink,
    ) -> TransferResult;

    /// The adapter's own view of its health. Advisory only.
    fn health(&self) -> ProtocolHealthSnapshot;
}
