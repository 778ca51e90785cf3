//! The transfer state machine shared by every protocol adapter.
//!
//! A protocol only describes its own steps through [`BridgeSteps`]: which
//! transaction burns or locks on the source chain, where the proof key lives
//! in the source receipt, and which call redeems on the destination.
//! [`BridgeFlow`] drives those steps through the common stage sequence and
//! owns everything protocol-independent: confirmation polling, attestation
//! waiting, cancellation, partial-progress capture and health counters.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::Collaborators;
use crate::attestation::{AttestationWaiter, WaitOptions};
use crate::context::BridgeContext;
use crate::error::{BridgeError, ErrorKind};
use crate::idempotency::InFlightSet;
use crate::reliability::{poll_with_backoff, with_retry, with_timeout, PollPolicy, RetryPolicy};
use crate::status::{emit, Stage, StageDetail, StatusEvent, StatusSink};
use crate::traits::{BlockData, ChainRpc, ProtocolAdapter, TxPayload, WalletSigner};
use crate::types::{
    duration_ms, Amount, ChainId, FeeEstimate, HealthMetrics, PartialProgress, Proof, Protocol,
    ProtocolHealthSnapshot, TransferRequest, TransferResult, TxRef, Validation,
};

/// Timing and confirmation settings shared by all adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSettings {
    /// Applied to every individual RPC read
    pub rpc_retry: RetryPolicy,
    pub source_confirmation: PollPolicy,
    pub destination_confirmation: PollPolicy,
    /// How long the wallet may take to sign and broadcast
    #[serde(with = "duration_ms")]
    pub signature_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub estimate_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub attestation_request_timeout: Duration,
    /// Confirmations required before a transaction counts as final
    pub confirmations: BTreeMap<ChainId, u64>,
}

impl Default for FlowSettings {
    fn default() -> Self {
        let confirmations = ChainId::ALL
            .iter()
            .map(|chain| {
                let required = match chain {
                    ChainId::Ethereum => 12,
                    ChainId::Polygon => 64,
                    _ => 1,
                };
                (*chain, required)
            })
            .collect();

        Self {
            rpc_retry: RetryPolicy::new(4, Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(8))
                .with_attempt_timeout(Some(Duration::from_secs(15))),
            source_confirmation: PollPolicy::new(Duration::from_secs(30 * 60), Duration::from_secs(3)),
            destination_confirmation: PollPolicy::new(Duration::from_secs(10 * 60), Duration::from_secs(2)),
            signature_timeout: Duration::from_secs(5 * 60),
            estimate_timeout: Duration::from_secs(10),
            attestation_request_timeout: Duration::from_secs(15),
            confirmations,
        }
    }
}

impl FlowSettings {
    pub fn confirmations_for(&self, chain: ChainId) -> u64 {
        self.confirmations.get(&chain).copied().unwrap_or(1).max(1)
    }

    pub fn with_confirmations(mut self, chain: ChainId, required: u64) -> Self {
        self.confirmations.insert(chain, required);
        self
    }

    pub fn with_signature_timeout(mut self, timeout: Duration) -> Self {
        self.signature_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.rpc_retry.max_attempts == 0 {
            return Err(BridgeError::Configuration("rpc retry needs at least one attempt".to_string()));
        }
        if self.rpc_retry.backoff_multiplier < 1.0 {
            return Err(BridgeError::Configuration("rpc retry multiplier must be >= 1".to_string()));
        }
        for (name, policy) in [
            ("source confirmation", &self.source_confirmation),
            ("destination confirmation", &self.destination_confirmation),
        ] {
            if policy.initial_delay.is_zero() {
                return Err(BridgeError::Configuration(format!("{} poll interval must be positive", name)));
            }
            if policy.backoff_multiplier < 1.0 {
                return Err(BridgeError::Configuration(format!("{} multiplier must be >= 1", name)));
            }
        }
        if self.signature_timeout.is_zero() || self.estimate_timeout.is_zero() {
            return Err(BridgeError::Configuration("timeouts must be positive".to_string()));
        }
        Ok(())
    }
}

/// Where to look for the proof of a submitted source transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofTarget {
    /// Identifier the attestation service is queried with
    pub key: String,
    /// Protocol message the proof attests to (0x-hex), when the destination
    /// call needs it alongside the proof
    pub message: Option<String>,
}

/// The protocol-specific parts of a transfer.
pub trait BridgeSteps: Send + Sync + 'static {
    fn protocol(&self) -> Protocol;

    fn supports(&self, source: ChainId, destination: ChainId) -> bool;

    /// Protocol bounds beyond route support, e.g. amount limits.
    fn check(&self, request: &TransferRequest) -> Result<(), BridgeError>;

    fn fee(&self, request: &TransferRequest) -> Amount;

    fn estimated_duration(&self, request: &TransferRequest) -> Duration;

    /// The burn/lock transaction on the source chain.
    fn source_payload(&self, request: &TransferRequest) -> Result<TxPayload, BridgeError>;

    /// Extracts the proof key from the confirmed source transaction.
    fn proof_target(
        &self,
        request: &TransferRequest,
        source_tx: &TxRef,
        block: &BlockData,
    ) -> Result<ProofTarget, BridgeError>;

    fn attestation(&self) -> &WaitOptions;

    /// Whether a proof marked complete is usable for the redeem call. A
    /// proof turned down here counts as not ready yet.
    fn accepts_proof(&self, _proof: &Proof) -> bool {
        true
    }

    /// The mint/redeem transaction on the destination chain.
    fn redeem_payload(
        &self,
        request: &TransferRequest,
        progress: &PartialProgress,
        proof: &Proof,
    ) -> Result<TxPayload, BridgeError>;
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Source,
    Destination,
}

impl Side {
    fn reverted(self, tx: &TxRef) -> BridgeError {
        match self {
            Side::Source => BridgeError::SourceReverted { tx: tx.clone() },
            Side::Destination => BridgeError::DestinationFailed(format!("transaction {} reverted", tx)),
        }
    }

    fn unconfirmed(self, tx: &TxRef, waited: Duration) -> BridgeError {
        match self {
            Side::Source => BridgeError::SourceUnconfirmed {
                tx: tx.clone(),
                waited,
            },
            Side::Destination => {
                BridgeError::DestinationFailed(format!("transaction {} not confirmed within {:?}", tx, waited))
            }
        }
    }
}

/// Once the proof is in hand, funds wait on the destination chain whatever
/// went wrong. Wallet refusals and cancellation keep their own kind.
fn destination_failure(error: BridgeError) -> BridgeError {
    match error.kind() {
        ErrorKind::WalletRejected
        | ErrorKind::UserCancelled
        | ErrorKind::Cancelled
        | ErrorKind::DestinationExecutionFailed => error,
        _ => BridgeError::DestinationFailed(error.to_string()),
    }
}

/// Stage bookkeeping for one run of the flow.
struct FlowRun<'a> {
    protocol: Protocol,
    bridge_id: String,
    sink: &'a dyn StatusSink,
    stage: Stage,
    stages: Vec<Stage>,
    partial: PartialProgress,
    started: Instant,
}

impl<'a> FlowRun<'a> {
    fn new(protocol: Protocol, sink: &'a dyn StatusSink) -> Self {
        Self {
            protocol,
            bridge_id: format!("{}-{}", protocol, Uuid::new_v4()),
            sink,
            stage: Stage::Idle,
            stages: Vec::new(),
            partial: PartialProgress::new(protocol),
            started: Instant::now(),
        }
    }

    fn advance(&mut self, stage: Stage, detail: StageDetail) {
        if !self.stage.can_advance_to(stage) {
            warn!(protocol = %self.protocol, from = %self.stage, to = %stage, "out-of-order stage ignored");
            return;
        }
        trace!(protocol = %self.protocol, bridge_id = %self.bridge_id, %stage, "stage");
        self.stage = stage;
        if stage != Stage::Error {
            self.partial.last_stage = stage;
        }
        self.stages.push(stage);
        emit(self.sink, StatusEvent::stage(self.protocol, stage, detail));
    }

    fn source_submitted(&self) -> bool {
        self.partial.source_submitted()
    }

    fn success(self, destination_tx: TxRef) -> TransferResult {
        TransferResult {
            success: true,
            protocol: Some(self.protocol),
            bridge_id: self.bridge_id,
            source_tx: self.partial.source_tx,
            destination_tx: Some(destination_tx),
            proof: self.partial.proof,
            error: None,
            source_submitted_but_incomplete: false,
            stranded: Vec::new(),
            stages: self.stages,
            duration: self.started.elapsed(),
        }
    }

    fn failure(self, error: &BridgeError) -> TransferResult {
        let partial = (self.partial.source_submitted() || self.partial.proof_key.is_some()).then_some(self.partial);
        TransferResult::failure(
            Some(self.protocol),
            self.bridge_id,
            error,
            partial,
            self.stages,
            self.started.elapsed(),
        )
    }
}

/// A [`ProtocolAdapter`] built from a protocol's [`BridgeSteps`].
pub struct BridgeFlow<S> {
    steps: S,
    signer: Arc<dyn WalletSigner>,
    rpc: Arc<dyn ChainRpc>,
    waiter: AttestationWaiter,
    settings: FlowSettings,
    in_flight: InFlightSet,
    metrics: Mutex<HealthMetrics>,
}

impl<S: BridgeSteps> BridgeFlow<S> {
    pub fn with_steps(steps: S, collaborators: Collaborators, settings: FlowSettings) -> Result<Self, BridgeError> {
        settings.validate()?;
        steps.attestation().validate()?;
        let waiter = AttestationWaiter::new(collaborators.attestation)
            .with_request_timeout(settings.attestation_request_timeout);
        Ok(Self {
            steps,
            signer: collaborators.signer,
            rpc: collaborators.rpc,
            waiter,
            settings,
            in_flight: InFlightSet::new(),
            metrics: Mutex::new(HealthMetrics::default()),
        })
    }

    pub fn steps(&self) -> &S {
        &self.steps
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    fn preflight(&self, request: &TransferRequest) -> Result<(), BridgeError> {
        request.validate_shape()?;
        if !self.steps.supports(request.source_chain(), request.destination_chain()) {
            return Err(BridgeError::UnsupportedRoute {
                protocol: self.steps.protocol(),
                source_chain: request.source_chain(),
                destination: request.destination_chain(),
            });
        }
        self.steps.check(request)
    }

    async fn submit(
        &self,
        chain: ChainId,
        payload: TxPayload,
        ctx: &BridgeContext,
        source_submitted: bool,
        context: &str,
    ) -> Result<TxRef, BridgeError> {
        // Signing is never retried: a retry could broadcast twice.
        let signed = with_timeout(
            self.signer.sign_and_submit(chain, payload),
            self.settings.signature_timeout,
            context,
        );
        ctx.run(source_submitted, signed).await
    }

    async fn await_confirmation(&self, tx: &TxRef, side: Side, ctx: &BridgeContext) -> Result<u64, BridgeError> {
        let required = self.settings.confirmations_for(tx.chain);
        let policy = match side {
            Side::Source => &self.settings.source_confirmation,
            Side::Destination => &self.settings.destination_confirmation,
        };
        let started = Instant::now();

        let polled = poll_with_backoff(policy, |tick| async move {
            let confirmation = with_retry(
                "get_confirmation",
                &self.settings.rpc_retry,
                |_| self.rpc.get_confirmation(tx.chain, tx),
                |attempt, error| debug!(tx = %tx, attempt, %error, "confirmation query failed"),
            )
            .await;
            match confirmation {
                Ok(c) if c.reverted => Some(Err(side.reverted(tx))),
                Ok(c) if c.confirmations >= required => Some(Ok(c.confirmations)),
                Ok(c) => {
                    trace!(tx = %tx, tick, have = c.confirmations, required, "awaiting confirmations");
                    None
                }
                Err(error) => Some(Err(error)),
            }
        });

        match ctx.guard(true, polled).await? {
            Some(outcome) => outcome,
            None => Err(side.unconfirmed(tx, started.elapsed())),
        }
    }

    async fn locate_proof(
        &self,
        request: &TransferRequest,
        source_tx: &TxRef,
        ctx: &BridgeContext,
    ) -> Result<ProofTarget, BridgeError> {
        let block = with_retry(
            "get_block_data",
            &self.settings.rpc_retry,
            |_| self.rpc.get_block_data(source_tx.chain, source_tx),
            |attempt, error| debug!(tx = %source_tx, attempt, %error, "block data query failed"),
        );
        let block = ctx.run(true, block).await?;
        self.steps.proof_target(request, source_tx, &block)
    }

    /// Runs every stage not already covered by `run.partial`.
    async fn drive(
        &self,
        request: &TransferRequest,
        ctx: &BridgeContext,
        run: &mut FlowRun<'_>,
    ) -> Result<TxRef, BridgeError> {
        let protocol = self.steps.protocol();

        let source_tx = match run.partial.source_tx.clone() {
            Some(tx) => tx,
            None => {
                run.advance(Stage::Preparing, StageDetail::default());
                let payload = self.steps.source_payload(request)?;

                run.advance(Stage::AwaitingSourceSignature, StageDetail::default());
                let tx = self
                    .submit(request.source_chain(), payload, ctx, false, "source signature")
                    .await?;
                info!(%protocol, tx = %tx, "source transaction submitted");
                run.partial.source_tx = Some(tx.clone());
                run.advance(Stage::SourceSubmitted, StageDetail::tx(tx.clone()));
                tx
            }
        };

        if run.partial.proof.is_none() || run.partial.proof_key.is_none() {
            let confirmations = self.await_confirmation(&source_tx, Side::Source, ctx).await?;
            debug!(%protocol, tx = %source_tx, confirmations, "source confirmed");
            run.advance(Stage::SourceConfirmed, StageDetail::tx(source_tx.clone()));

            if run.partial.proof_key.is_none() {
                let target = self.locate_proof(request, &source_tx, ctx).await?;
                run.partial.proof_key = Some(target.key);
                run.partial.message = target.message;
            }
        }

        let proof_key = run
            .partial
            .proof_key
            .clone()
            .ok_or_else(|| BridgeError::Internal("proof key missing after source confirmation".to_string()))?;

        let proof = match run.partial.proof.clone() {
            Some(proof) => proof,
            None => {
                run.advance(
                    Stage::AwaitingAttestation,
                    StageDetail {
                        proof_key: Some(proof_key.clone()),
                        ..StageDetail::default()
                    },
                );
                let options = self.steps.attestation();
                let wait = self
                    .waiter
                    .wait_until(&proof_key, options, |proof| self.steps.accepts_proof(proof));
                let proof = ctx
                    .guard(true, wait)
                    .await?
                    .ok_or_else(|| BridgeError::AttestationTimeout {
                        proof_key: proof_key.clone(),
                        waited: options.max_wait,
                    })?;
                run.partial.proof = Some(proof.clone());
                proof
            }
        };
        run.advance(
            Stage::AttestationReceived,
            StageDetail {
                proof_key: Some(proof_key),
                proof: Some(proof.clone()),
                ..StageDetail::default()
            },
        );

        self.redeem(request, ctx, run, &proof).await.map_err(destination_failure)
    }

    /// Submits and confirms the destination call for an attested transfer.
    async fn redeem(
        &self,
        request: &TransferRequest,
        ctx: &BridgeContext,
        run: &mut FlowRun<'_>,
        proof: &Proof,
    ) -> Result<TxRef, BridgeError> {
        let destination_tx = match run.partial.destination_tx.clone() {
            Some(tx) => tx,
            None => {
                let payload = self.steps.redeem_payload(request, &run.partial, proof)?;
                let tx = self
                    .submit(request.destination_chain(), payload, ctx, true, "destination signature")
                    .await?;
                info!(protocol = %self.steps.protocol(), tx = %tx, "destination transaction submitted");
                run.partial.destination_tx = Some(tx.clone());
                tx
            }
        };
        run.advance(Stage::DestinationSubmitted, StageDetail::tx(destination_tx.clone()));

        self.await_confirmation(&destination_tx, Side::Destination, ctx).await?;
        Ok(destination_tx)
    }

    fn finish(&self, mut run: FlowRun<'_>, outcome: Result<TxRef, BridgeError>) -> TransferResult {
        let protocol = self.steps.protocol();
        match outcome {
            Ok(destination_tx) => {
                run.advance(Stage::Complete, StageDetail::tx(destination_tx.clone()));
                let result = run.success(destination_tx);
                self.metrics.lock().record_success(result.duration);
                info!(%protocol, bridge_id = %result.bridge_id, duration = ?result.duration, "transfer complete");
                result
            }
            Err(error) => {
                // A cancelled run makes no further transitions.
                if error.kind() != ErrorKind::Cancelled {
                    run.advance(Stage::Error, StageDetail::message(error.to_string()));
                }
                if error.kind().trips_breaker() {
                    self.metrics.lock().record_failure();
                }
                warn!(
                    %protocol,
                    bridge_id = %run.bridge_id,
                    stage = %run.partial.last_stage,
                    source_submitted = run.source_submitted(),
                    %error,
                    "transfer failed"
                );
                run.failure(&error)
            }
        }
    }
}

#[async_trait]
impl<S: BridgeSteps> ProtocolAdapter for BridgeFlow<S> {
    fn protocol(&self) -> Protocol {
        self.steps.protocol()
    }

    fn supports(&self, source: ChainId, destination: ChainId) -> bool {
        self.steps.supports(source, destination)
    }

    async fn estimate(&self, request: &TransferRequest) -> Result<FeeEstimate, BridgeError> {
        let quote = async {
            self.preflight(request)?;
            Ok::<_, BridgeError>(FeeEstimate {
                fee: self.steps.fee(request),
                estimated_duration: self.steps.estimated_duration(request),
            })
        };
        with_timeout(quote, self.settings.estimate_timeout, "estimate").await
    }

    async fn validate(&self, request: &TransferRequest) -> Validation {
        match self.preflight(request) {
            Ok(()) => Validation::ok(),
            Err(error) => Validation::rejected(error.to_string()),
        }
    }

    async fn bridge(&self, request: &TransferRequest, ctx: &BridgeContext, sink: &dyn StatusSink) -> TransferResult {
        let protocol = self.steps.protocol();
        let mut run = FlowRun::new(protocol, sink);
        run.advance(Stage::Validating, StageDetail::default());

        if let Err(error) = self.preflight(request) {
            return self.finish(run, Err(error));
        }
        if request.is_dry_run() {
            run.bridge_id = format!("dryrun-{}", protocol);
            run.advance(Stage::Complete, StageDetail::message("dry run"));
            info!(%protocol, "dry run complete");
            return TransferResult {
                success: true,
                protocol: Some(protocol),
                bridge_id: run.bridge_id,
                source_tx: None,
                destination_tx: None,
                proof: None,
                error: None,
                source_submitted_but_incomplete: false,
                stranded: Vec::new(),
                stages: run.stages,
                duration: run.started.elapsed(),
            };
        }

        let _permit = match self.in_flight.acquire(&request.idempotency_key()) {
            Ok(permit) => permit,
            Err(error) => return self.finish(run, Err(error)),
        };
        info!(
            %protocol,
            bridge_id = %run.bridge_id,
            route = %format!("{}->{}", request.source_chain(), request.destination_chain()),
            amount = %request.amount().display(request.asset()),
            "starting transfer"
        );

        let outcome = self.drive(request, ctx, &mut run).await;
        self.finish(run, outcome)
    }

    async fn resume(
        &self,
        request: &TransferRequest,
        partial: &PartialProgress,
        ctx: &BridgeContext,
        sink: &dyn StatusSink,
    ) -> TransferResult {
        let protocol = self.steps.protocol();
        let mut run = FlowRun::new(protocol, sink);
        run.advance(Stage::Validating, StageDetail::default());

        if partial.protocol != protocol {
            let error = BridgeError::InvalidRequest(format!(
                "progress belongs to {}, not {}",
                partial.protocol, protocol
            ));
            return self.finish(run, Err(error));
        }
        if !partial.source_submitted() {
            let error = BridgeError::InvalidRequest("nothing to resume: source was never submitted".to_string());
            return self.finish(run, Err(error));
        }
        if let Err(error) = self.preflight(request) {
            return self.finish(run, Err(error));
        }

        let _permit = match self.in_flight.acquire(&request.idempotency_key()) {
            Ok(permit) => permit,
            Err(error) => return self.finish(run, Err(error)),
        };
        run.partial = partial.clone();
        info!(%protocol, from = %partial.last_stage, "resuming transfer");

        let outcome = self.drive(request, ctx, &mut run).await;
        self.finish(run, outcome)
    }

    fn health(&self) -> ProtocolHealthSnapshot {
        self.metrics.lock().snapshot()
    }
}
