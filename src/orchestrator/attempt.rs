use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{BridgeError, ErrorKind};
use crate::status::{emit, Stage, StatusEvent, StatusSink};
use crate::types::{PartialProgress, Protocol, ProtocolFailure, TransferFailure, TransferResult};

/// State of one `execute` call. Owned by that call and never shared.
///
/// Sits between the adapters and the caller's sink so it can keep the
/// stage trace of every protocol it tried.
pub struct TransferAttempt<'a> {
    sink: &'a dyn StatusSink,
    started: Instant,
    trace: Mutex<Vec<(Protocol, Stage)>>,
    failures: Vec<ProtocolFailure>,
}

impl<'a> TransferAttempt<'a> {
    pub fn new(sink: &'a dyn StatusSink) -> Self {
        Self {
            sink,
            started: Instant::now(),
            trace: Mutex::new(Vec::new()),
            failures: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stages `protocol` reported, in order.
    pub fn stages(&self, protocol: Protocol) -> Vec<Stage> {
        self.trace
            .lock()
            .iter()
            .filter(|(p, _)| *p == protocol)
            .map(|(_, stage)| *stage)
            .collect()
    }

    pub fn failures(&self) -> &[ProtocolFailure] {
        &self.failures
    }

    /// Protocol passed over without calling its adapter.
    pub fn skip(&mut self, protocol: Protocol, error: &BridgeError) {
        let reason = error.to_string();
        emit(
            self.sink,
            StatusEvent::ProtocolSkipped {
                protocol,
                reason: reason.clone(),
            },
        );
        self.failures.push(ProtocolFailure {
            protocol,
            kind: error.kind(),
            message: reason,
            partial: None,
        });
    }

    /// Records a failed adapter run and announces it as `<protocol>:failed`.
    pub fn fail(&mut self, protocol: Protocol, result: &TransferResult) {
        let (kind, message, partial) = match &result.error {
            Some(failure) => (failure.kind, failure.message.clone(), failure.partial.clone()),
            None => (ErrorKind::Internal, "adapter reported failure without an error".to_string(), None),
        };
        emit(
            self.sink,
            StatusEvent::ProtocolFailed {
                protocol,
                kind,
                message: message.clone(),
            },
        );
        self.failures.push(ProtocolFailure {
            protocol,
            kind,
            message,
            partial,
        });
    }

    /// Progress of every failed attempt that broadcast its source
    /// transaction, oldest first.
    pub fn stranded(&self) -> Vec<PartialProgress> {
        self.failures
            .iter()
            .filter_map(|f| f.partial.clone())
            .filter(|p| p.source_submitted())
            .collect()
    }

    /// Aggregate failure once every candidate is exhausted.
    pub fn all_routes_failed(self) -> TransferResult {
        let error = BridgeError::AllRoutesFailed(self.failures.len());
        self.aggregate(&error)
    }

    /// The caller cancelled between two candidates.
    pub fn cancelled(self) -> TransferResult {
        let error = BridgeError::Cancelled {
            source_submitted: !self.stranded().is_empty(),
        };
        self.aggregate(&error)
    }

    fn aggregate(self, error: &BridgeError) -> TransferResult {
        let duration = self.elapsed();
        let stranded = self.stranded();
        let stages = self.trace.into_inner().into_iter().map(|(_, stage)| stage).collect();
        // The latest attempt that reached the source chain is the one a
        // caller would resume first.
        let latest = stranded.last().cloned();

        let mut failure = TransferFailure::from_error(error, latest.clone());
        failure.details = self.failures;

        TransferResult {
            success: false,
            protocol: None,
            bridge_id: format!("bridge-{}", Uuid::new_v4()),
            source_tx: latest.as_ref().and_then(|p| p.source_tx.clone()),
            destination_tx: None,
            proof: latest.as_ref().and_then(|p| p.proof.clone()),
            error: Some(failure),
            source_submitted_but_incomplete: latest.is_some(),
            stranded,
            stages,
            duration,
        }
    }
}

impl StatusSink for TransferAttempt<'_> {
    fn on_status(&self, event: &StatusEvent) {
        if let StatusEvent::Stage { protocol, stage, .. } = event {
            self.trace.lock().push((*protocol, *stage));
        }
        // Panics here are contained by the adapter's `emit`.
        self.sink.on_status(event);
    }
}
