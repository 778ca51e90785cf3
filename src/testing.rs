//! Fakes shared by the unit tests.

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::types::{Bytes, U256};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::Collaborators;
use crate::context::BridgeContext;
use crate::error::BridgeError;
use crate::status::{emit, Stage, StageDetail, StatusEvent, StatusSink};
use crate::traits::{
    AttestationResponse, AttestationService, BlockData, ChainRpc, Confirmation, LogEntry, ProtocolAdapter,
    TxPayload, WalletSigner,
};
use crate::types::{
    Amount, Asset, ChainId, FeeEstimate, PartialProgress, Protocol, ProtocolHealthSnapshot, TransferRequest,
    TransferRequestBuilder, TransferResult, TxRef, Validation,
};

pub const EVM_SENDER: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f8fA0d";
pub const EVM_RECIPIENT: &str = "0x8ba1f109551bD432803012645Ac136ddd64DBA72";
pub const SOLANA_SENDER: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";

/// USDC request builder with addresses matching each chain's family.
pub fn request(source: ChainId, destination: ChainId, amount: &str) -> TransferRequestBuilder {
    let address = |chain: ChainId| if chain.is_evm() { EVM_SENDER } else { SOLANA_SENDER };
    let recipient = if destination.is_evm() { EVM_RECIPIENT } else { SOLANA_SENDER };
    TransferRequest::builder()
        .route(source, destination)
        .asset(Asset::Usdc)
        .amount(amount)
        .from_address(address(source))
        .to_address(recipient)
}

pub fn cctp_message_log(message: &[u8], evm: bool) -> LogEntry {
    let data = if evm {
        abi::encode(&[Token::Bytes(message.to_vec())])
    } else {
        message.to_vec()
    };
    LogEntry {
        emitter: "message-transmitter".to_string(),
        event: "MessageSent".to_string(),
        data: Bytes::from(data),
    }
}

pub fn wormhole_publish_log(sequence: u64, evm: bool) -> LogEntry {
    let data = if evm {
        abi::encode(&[
            Token::Uint(U256::from(sequence)),
            Token::Uint(U256::zero()),
            Token::Bytes(vec![1, 2, 3]),
            Token::Uint(U256::from(1u8)),
        ])
    } else {
        let mut raw = sequence.to_le_bytes().to_vec();
        raw.extend_from_slice(&[0u8; 4]);
        raw
    };
    LogEntry {
        emitter: "core-bridge".to_string(),
        event: "LogMessagePublished".to_string(),
        data: Bytes::from(data),
    }
}

pub fn gmp_call_log() -> LogEntry {
    LogEntry {
        emitter: "gateway".to_string(),
        event: "ContractCallWithToken".to_string(),
        data: Bytes::default(),
    }
}

#[derive(Default)]
struct SignerState {
    ledger: Vec<(ChainId, TxPayload, TxRef)>,
    rejected: HashSet<ChainId>,
    failing: HashMap<ChainId, fn() -> BridgeError>,
    delay: Option<Duration>,
    next: u64,
}

/// Wallet that records every submission in a ledger.
#[derive(Default)]
pub struct FakeSigner {
    state: Mutex<SignerState>,
}

impl FakeSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, chain: ChainId) {
        self.state.lock().rejected.insert(chain);
    }

    /// Every submission on `chain` fails with `error()`.
    pub fn fail_on(&self, chain: ChainId, error: fn() -> BridgeError) {
        self.state.lock().failing.insert(chain, error);
    }

    /// Makes every signature take `delay`.
    pub fn with_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    pub fn submissions(&self) -> Vec<TxRef> {
        self.state.lock().ledger.iter().map(|(_, _, tx)| tx.clone()).collect()
    }

    pub fn payloads_on(&self, chain: ChainId) -> Vec<TxPayload> {
        self.state
            .lock()
            .ledger
            .iter()
            .filter(|(c, _, _)| *c == chain)
            .map(|(_, payload, _)| payload.clone())
            .collect()
    }

    pub fn count_on(&self, chain: ChainId) -> usize {
        self.payloads_on(chain).len()
    }
}

#[async_trait]
impl WalletSigner for FakeSigner {
    async fn sign_and_submit(&self, chain: ChainId, payload: TxPayload) -> Result<TxRef, BridgeError> {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.rejected.contains(&chain) {
            return Err(BridgeError::WalletRejected("user declined".to_string()));
        }
        if let Some(error) = state.failing.get(&chain) {
            return Err(error());
        }
        state.next += 1;
        let hash = if chain.is_evm() {
            format!("0x{:064x}", state.next)
        } else {
            format!("5ig{}", state.next)
        };
        let tx = TxRef::new(chain, hash);
        state.ledger.push((chain, payload, tx.clone()));
        Ok(tx)
    }
}

struct RpcState {
    confirmations: u64,
    blocks: HashMap<ChainId, BlockData>,
    reverted: HashSet<ChainId>,
    failures_left: u32,
}

/// Chain RPC returning canned confirmations and receipts, with a call spy.
pub struct FakeRpc {
    state: Mutex<RpcState>,
    calls: AtomicUsize,
}

impl Default for FakeRpc {
    fn default() -> Self {
        Self {
            state: Mutex::new(RpcState {
                confirmations: 100,
                blocks: HashMap::new(),
                reverted: HashSet::new(),
                failures_left: 0,
            }),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeRpc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `log` to the receipt of every transaction on `chain`.
    pub fn with_log(&self, chain: ChainId, log: LogEntry) {
        let mut state = self.state.lock();
        let block = state.blocks.entry(chain).or_default();
        block.block_number = 1_000;
        block.logs.push(log);
    }

    pub fn set_confirmations(&self, confirmations: u64) {
        self.state.lock().confirmations = confirmations;
    }

    pub fn revert_all_on(&self, chain: ChainId) {
        self.state.lock().reverted.insert(chain);
    }

    /// The next `count` queries fail with a network error.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().failures_left = count;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn transient(&self) -> Result<(), BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(BridgeError::Network("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainRpc for FakeRpc {
    async fn get_confirmation(&self, chain: ChainId, _tx: &TxRef) -> Result<Confirmation, BridgeError> {
        self.transient()?;
        let state = self.state.lock();
        Ok(Confirmation {
            confirmations: state.confirmations,
            reverted: state.reverted.contains(&chain),
        })
    }

    async fn get_block_data(&self, chain: ChainId, _tx: &TxRef) -> Result<BlockData, BridgeError> {
        self.transient()?;
        Ok(self.state.lock().blocks.get(&chain).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct AttestationState {
    scripts: HashMap<String, VecDeque<Result<AttestationResponse, BridgeError>>>,
    always: HashMap<String, AttestationResponse>,
    calls: Vec<(String, String)>,
}

/// Attestation endpoint answering from per-endpoint scripts. Once a script
/// runs out the endpoint answers with its standing response, else pending.
#[derive(Default)]
pub struct FakeAttestationService {
    state: Mutex<AttestationState>,
}

impl FakeAttestationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, endpoint: &str, responses: Vec<Result<AttestationResponse, BridgeError>>) {
        self.state
            .lock()
            .scripts
            .insert(endpoint.to_string(), responses.into_iter().collect());
    }

    pub fn always(&self, endpoint: &str, response: AttestationResponse) {
        self.state.lock().always.insert(endpoint.to_string(), response);
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.state.lock().calls.iter().filter(|(e, _)| e == endpoint).count()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Distinct proof keys queried, in first-seen order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for (_, key) in self.state.lock().calls.iter() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

#[async_trait]
impl AttestationService for FakeAttestationService {
    async fn fetch(&self, endpoint: &str, proof_key: &str) -> Result<AttestationResponse, BridgeError> {
        let mut state = self.state.lock();
        state.calls.push((endpoint.to_string(), proof_key.to_string()));
        if let Some(next) = state.scripts.get_mut(endpoint).and_then(|s| s.pop_front()) {
            return next;
        }
        Ok(state
            .always
            .get(endpoint)
            .cloned()
            .unwrap_or_else(AttestationResponse::pending))
    }
}

/// One set of collaborator fakes.
pub struct Fakes {
    pub signer: Arc<FakeSigner>,
    pub rpc: Arc<FakeRpc>,
    pub attestation: Arc<FakeAttestationService>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            signer: Arc::new(FakeSigner::new()),
            rpc: Arc::new(FakeRpc::new()),
            attestation: Arc::new(FakeAttestationService::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(self.signer.clone(), self.rpc.clone(), self.attestation.clone())
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Sink that keeps every event and can run a hook when a stage is reached.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
    hooks: Mutex<Vec<(Stage, Hook)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_stage(&self, stage: Stage, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.lock().push((stage, Box::new(hook)));
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.name()).collect()
    }

    pub fn stages(&self, protocol: Protocol) -> Vec<Stage> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Stage { protocol: p, stage, .. } if *p == protocol => Some(*stage),
                _ => None,
            })
            .collect()
    }
}

impl StatusSink for RecordingSink {
    fn on_status(&self, event: &StatusEvent) {
        self.events.lock().push(event.clone());
        if let StatusEvent::Stage { stage, .. } = event {
            for (wanted, hook) in self.hooks.lock().iter() {
                if wanted == stage {
                    hook();
                }
            }
        }
    }
}

/// How a [`ScriptedAdapter`] answers `bridge`.
#[derive(Clone, Copy)]
pub enum Outcome {
    Succeed,
    /// Fails before anything reaches the source chain
    Fail(fn() -> BridgeError),
    /// Fails after the source transaction was broadcast
    FailAfterSource(fn() -> BridgeError),
}

/// Protocol adapter with a programmable outcome sequence.
pub struct ScriptedAdapter {
    protocol: Protocol,
    routes: Vec<(ChainId, ChainId)>,
    outcomes: Mutex<VecDeque<Outcome>>,
    rejection: Option<String>,
    fee: Amount,
    estimate_delay: Option<Duration>,
    bridge_calls: AtomicUsize,
    resume_calls: AtomicUsize,
}

impl ScriptedAdapter {
    /// Supports every route and always succeeds.
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            routes: Vec::new(),
            outcomes: Mutex::new(VecDeque::new()),
            rejection: None,
            fee: Amount::ZERO,
            estimate_delay: None,
            bridge_calls: AtomicUsize::new(0),
            resume_calls: AtomicUsize::new(0),
        }
    }

    /// Restricts support to the listed routes.
    pub fn with_route(mut self, source: ChainId, destination: ChainId) -> Self {
        self.routes.push((source, destination));
        self
    }

    /// Queues outcomes; once drained the adapter succeeds.
    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        self.outcomes.lock().extend(outcomes);
        self
    }

    pub fn failing(self, error: fn() -> BridgeError) -> Self {
        self.with_outcomes(std::iter::repeat(Outcome::Fail(error)).take(64))
    }

    pub fn rejecting(mut self, reason: &str) -> Self {
        self.rejection = Some(reason.to_string());
        self
    }

    pub fn with_fee(mut self, fee: Amount) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_estimate_delay(mut self, delay: Duration) -> Self {
        self.estimate_delay = Some(delay);
        self
    }

    pub fn bridge_calls(&self) -> usize {
        self.bridge_calls.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> usize {
        self.resume_calls.load(Ordering::SeqCst)
    }

    fn succeed(&self, sink: &dyn StatusSink, mut stages: Vec<Stage>, source_tx: TxRef) -> TransferResult {
        let destination_tx = TxRef::new(ChainId::Base, format!("0xdest-{}", self.protocol));
        for stage in [
            Stage::AttestationReceived,
            Stage::DestinationSubmitted,
            Stage::Complete,
        ] {
            self.stage(sink, &mut stages, stage);
        }
        TransferResult {
            success: true,
            protocol: Some(self.protocol),
            bridge_id: format!("{}-scripted", self.protocol),
            source_tx: Some(source_tx),
            destination_tx: Some(destination_tx),
            proof: None,
            error: None,
            source_submitted_but_incomplete: false,
            stranded: Vec::new(),
            stages,
            duration: Duration::from_millis(10),
        }
    }

    fn stage(&self, sink: &dyn StatusSink, stages: &mut Vec<Stage>, stage: Stage) {
        stages.push(stage);
        emit(sink, StatusEvent::stage(self.protocol, stage, StageDetail::default()));
    }
}

#[async_trait]
impl ProtocolAdapter for ScriptedAdapter {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn supports(&self, source: ChainId, destination: ChainId) -> bool {
        self.routes.is_empty() || self.routes.contains(&(source, destination))
    }

    async fn estimate(&self, _request: &TransferRequest) -> Result<FeeEstimate, BridgeError> {
        if let Some(delay) = self.estimate_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(FeeEstimate {
            fee: self.fee,
            estimated_duration: Duration::from_secs(60),
        })
    }

    async fn validate(&self, _request: &TransferRequest) -> Validation {
        match &self.rejection {
            Some(reason) => Validation::rejected(reason.clone()),
            None => Validation::ok(),
        }
    }

    async fn bridge(&self, request: &TransferRequest, _ctx: &BridgeContext, sink: &dyn StatusSink) -> TransferResult {
        self.bridge_calls.fetch_add(1, Ordering::SeqCst);
        let mut stages = Vec::new();
        self.stage(sink, &mut stages, Stage::Validating);
        if request.is_dry_run() {
            self.stage(sink, &mut stages, Stage::Complete);
            return TransferResult {
                success: true,
                protocol: Some(self.protocol),
                bridge_id: format!("dryrun-{}", self.protocol),
                source_tx: None,
                destination_tx: None,
                proof: None,
                error: None,
                source_submitted_but_incomplete: false,
                stranded: Vec::new(),
                stages,
                duration: Duration::ZERO,
            };
        }

        let outcome = self.outcomes.lock().pop_front().unwrap_or(Outcome::Succeed);
        let source_tx = TxRef::new(request.source_chain(), format!("src-{}", self.protocol));
        match outcome {
            Outcome::Succeed => {
                self.stage(sink, &mut stages, Stage::SourceSubmitted);
                self.succeed(sink, stages, source_tx)
            }
            Outcome::Fail(error) => {
                self.stage(sink, &mut stages, Stage::Error);
                TransferResult::failure(Some(self.protocol), "scripted", &error(), None, stages, Duration::ZERO)
            }
            Outcome::FailAfterSource(error) => {
                self.stage(sink, &mut stages, Stage::SourceSubmitted);
                self.stage(sink, &mut stages, Stage::Error);
                let mut partial = PartialProgress::new(self.protocol);
                partial.last_stage = Stage::SourceSubmitted;
                partial.source_tx = Some(source_tx);
                TransferResult::failure(
                    Some(self.protocol),
                    "scripted",
                    &error(),
                    Some(partial),
                    stages,
                    Duration::ZERO,
                )
            }
        }
    }

    async fn resume(
        &self,
        _request: &TransferRequest,
        partial: &PartialProgress,
        _ctx: &BridgeContext,
        sink: &dyn StatusSink,
    ) -> TransferResult {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        let mut stages = Vec::new();
        self.stage(sink, &mut stages, Stage::Validating);
        let source_tx = partial
            .source_tx
            .clone()
            .unwrap_or_else(|| TxRef::new(ChainId::Solana, "missing"));
        self.succeed(sink, stages, source_tx)
    }

    fn health(&self) -> ProtocolHealthSnapshot {
        ProtocolHealthSnapshot::default()
    }
}
