use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::types::{Proof, Protocol, TxRef};

/// Where a transfer is in its lifecycle. Stages only move forward, apart
/// from the jump to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Validating,
    Preparing,
    AwaitingSourceSignature,
    SourceSubmitted,
    SourceConfirmed,
    AwaitingAttestation,
    AttestationReceived,
    DestinationSubmitted,
    Complete,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Validating => "validating",
            Stage::Preparing => "preparing",
            Stage::AwaitingSourceSignature => "awaiting_source_signature",
            Stage::SourceSubmitted => "source_submitted",
            Stage::SourceConfirmed => "source_confirmed",
            Stage::AwaitingAttestation => "awaiting_attestation",
            Stage::AttestationReceived => "attestation_received",
            Stage::DestinationSubmitted => "destination_submitted",
            Stage::Complete => "complete",
            Stage::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }

    /// Forward moves and `Error` from any non-terminal stage.
    pub fn can_advance_to(&self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Stage::Error || next > *self
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional data attached to a stage event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<TxRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StageDetail {
    pub fn tx(tx: TxRef) -> Self {
        Self {
            tx: Some(tx),
            ..Self::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Progress notification delivered to a [`StatusSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    Stage {
        protocol: Protocol,
        stage: Stage,
        #[serde(flatten)]
        detail: StageDetail,
    },
    ProtocolFailed {
        protocol: Protocol,
        kind: ErrorKind,
        message: String,
    },
    ProtocolSkipped {
        protocol: Protocol,
        reason: String,
    },
}

impl StatusEvent {
    pub fn stage(protocol: Protocol, stage: Stage, detail: StageDetail) -> Self {
        StatusEvent::Stage {
            protocol,
            stage,
            detail,
        }
    }

    /// Namespaced event name, e.g. `cctp:source_submitted` or `wormhole:failed`.
    pub fn name(&self) -> String {
        match self {
            StatusEvent::Stage { protocol, stage, .. } => format!("{}:{}", protocol, stage),
            StatusEvent::ProtocolFailed { protocol, .. } => format!("{}:failed", protocol),
            StatusEvent::ProtocolSkipped { protocol, .. } => format!("{}:skipped", protocol),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            StatusEvent::Stage { protocol, .. }
            | StatusEvent::ProtocolFailed { protocol, .. }
            | StatusEvent::ProtocolSkipped { protocol, .. } => *protocol,
        }
    }
}

/// Receives progress events. Implementations must not block.
pub trait StatusSink: Send + Sync {
    fn on_status(&self, event: &StatusEvent);
}

impl<F> StatusSink for F
where
    F: Fn(&StatusEvent) + Send + Sync,
{
    fn on_status(&self, event: &StatusEvent) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl StatusSink for NoopSink {
    fn on_status(&self, _event: &StatusEvent) {}
}

/// Delivers `event` to `sink`. A panicking sink is logged and otherwise
/// ignored so it can never abort a transfer.
pub fn emit(sink: &dyn StatusSink, event: StatusEvent) {
    debug!(event = %event.name(), "status");
    if catch_unwind(AssertUnwindSafe(|| sink.on_status(&event))).is_err() {
        warn!(event = %event.name(), "status sink panicked; event dropped");
    }
}
