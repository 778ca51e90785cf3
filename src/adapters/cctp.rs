//! Circle CCTP: burn USDC on the source chain, mint it on the destination
//! once Circle has attested the `MessageSent` message.

use ethers::abi::Token;
use ethers::types::U256;
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::evm::{self, contract_for, recipient_bytes32, to_hex};
use super::flow::{BridgeFlow, BridgeSteps, FlowSettings, ProofTarget};
use super::Collaborators;
use crate::attestation::WaitOptions;
use crate::error::BridgeError;
use crate::traits::{BlockData, TxPayload};
use crate::types::{Amount, Asset, ChainId, PartialProgress, Proof, Protocol, TransferRequest, TxRef};

const DEPOSIT_FOR_BURN: &str = "depositForBurn(uint256,uint32,bytes32,address)";
const RECEIVE_MESSAGE: &str = "receiveMessage(bytes,bytes)";
const MESSAGE_SENT: &str = "MessageSent";

/// CCTP domain of a chain.
pub fn domain(chain: ChainId) -> u32 {
    match chain {
        ChainId::Ethereum => 0,
        ChainId::Avalanche => 1,
        ChainId::Optimism => 2,
        ChainId::Arbitrum => 3,
        ChainId::Solana => 5,
        ChainId::Base => 6,
        ChainId::Polygon => 7,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CctpConfig {
    /// `TokenMessenger` per EVM source chain
    pub token_messengers: BTreeMap<ChainId, String>,
    /// `MessageTransmitter` per EVM destination chain
    pub message_transmitters: BTreeMap<ChainId, String>,
    /// Solana `TokenMessengerMinter` program; Solana sources are disabled
    /// when unset
    pub solana_program: Option<String>,
    pub attestation: WaitOptions,
    pub min_amount: Amount,
    pub max_amount: Amount,
}

impl CctpConfig {
    pub fn mainnet() -> Self {
        let token_messengers = [
            (ChainId::Ethereum, "0xBd3fa81B58Ba92a82136038B25aDec7066af3155"),
            (ChainId::Avalanche, "0x6B25532e1060CE10cc3B0A99e5683b91BFDe6982"),
            (ChainId::Optimism, "0x2B4069517957735bE00ceE0fadAE88a26365528f"),
            (ChainId::Arbitrum, "0x19330d10D9Cc8751218eaf51E8885D058642E08A"),
            (ChainId::Base, "0x1682Ae6375C4E4A97e4B583BC394c861A46D8962"),
            (ChainId::Polygon, "0x9daF8c91AEFAE50b9c0E69629D3F6Ca40cA3B3FE"),
        ];
        let message_transmitters = [
            (ChainId::Ethereum, "0x0a992d191DEeC32aFe36203Ad87D7d289a738F81"),
            (ChainId::Avalanche, "0x8186359aF5F57FbB40c6b14A588d2A59C0C29880"),
            (ChainId::Optimism, "0x4D41f22c5a0e5c74090899E5a8Fb597a8842b3e8"),
            (ChainId::Arbitrum, "0xC30362313FBBA5cf9163F0bb16a0e01f01A896ca"),
            (ChainId::Base, "0xAD09780d193884d503182aD4588450C416D6F9D4"),
            (ChainId::Polygon, "0xF3be9355363857F3e001be68856A2f96b4C39Ba9"),
        ];

        Self {
            token_messengers: token_messengers
                .into_iter()
                .map(|(c, a)| (c, a.to_string()))
                .collect(),
            message_transmitters: message_transmitters
                .into_iter()
                .map(|(c, a)| (c, a.to_string()))
                .collect(),
            solana_program: Some("CCTPiPYPc6AsJuwueEnWgSgucamXDZwBd53dQ11YiKX3".to_string()),
            attestation: WaitOptions::new("https://iris-api.circle.com/attestations/{key}")
                .with_fallback("https://iris-api.circle.com/v1/attestations/{key}")
                .with_max_wait(Duration::from_secs(30 * 60))
                .with_poll_interval(Duration::from_secs(5)),
            min_amount: Amount::from_minor_units(1),
            max_amount: Amount::from_minor_units(1_000_000 * 1_000_000),
        }
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        evm::validate_contracts(&self.token_messengers, "token messenger")?;
        evm::validate_contracts(&self.message_transmitters, "message transmitter")?;
        if let Some(program) = &self.solana_program {
            ChainId::Solana
                .validate_address(program)
                .map_err(|e| BridgeError::Configuration(format!("CCTP Solana program: {}", e)))?;
        }
        if self.min_amount.is_zero() || self.min_amount > self.max_amount {
            return Err(BridgeError::Configuration(
                "CCTP amount bounds must satisfy 0 < min <= max".to_string(),
            ));
        }
        self.attestation.validate()
    }
}

#[derive(Debug, Clone)]
pub struct CctpSteps {
    config: CctpConfig,
}

impl CctpSteps {
    pub fn new(config: CctpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CctpConfig {
        &self.config
    }
}

impl BridgeSteps for CctpSteps {
    fn protocol(&self) -> Protocol {
        Protocol::Cctp
    }

    fn supports(&self, source: ChainId, destination: ChainId) -> bool {
        let source_ok = match source {
            ChainId::Solana => self.config.solana_program.is_some(),
            chain => self.config.token_messengers.contains_key(&chain),
        };
        source != destination
            && destination.is_evm()
            && source_ok
            && self.config.message_transmitters.contains_key(&destination)
    }

    fn check(&self, request: &TransferRequest) -> Result<(), BridgeError> {
        if request.asset() != Asset::Usdc {
            return Err(BridgeError::InvalidRequest(format!("CCTP cannot move {}", request.asset())));
        }
        let amount = request.amount();
        if amount < self.config.min_amount || amount > self.config.max_amount {
            return Err(BridgeError::InvalidRequest(format!(
                "CCTP accepts {} to {} {}",
                self.config.min_amount.display(request.asset()),
                self.config.max_amount.display(request.asset()),
                request.asset()
            )));
        }
        Ok(())
    }

    fn fee(&self, _request: &TransferRequest) -> Amount {
        Amount::ZERO
    }

    fn estimated_duration(&self, request: &TransferRequest) -> Duration {
        // Attestation waits for source-chain finality.
        let secs = match request.source_chain() {
            ChainId::Solana => 25,
            ChainId::Avalanche => 20,
            ChainId::Polygon => 8 * 60,
            ChainId::Ethereum | ChainId::Base | ChainId::Arbitrum | ChainId::Optimism => 15 * 60,
        };
        Duration::from_secs(secs)
    }

    fn source_payload(&self, request: &TransferRequest) -> Result<TxPayload, BridgeError> {
        let source = request.source_chain();
        let destination = request.destination_chain();
        let recipient = recipient_bytes32(destination, request.destination_address())?;
        let burn_token = request
            .asset()
            .token_address(source)
            .ok_or_else(|| BridgeError::InvalidRequest(format!("no {} on {}", request.asset(), source)))?;

        if source == ChainId::Solana {
            let program = self
                .config
                .solana_program
                .clone()
                .ok_or_else(|| BridgeError::Configuration("CCTP Solana program not configured".to_string()))?;
            return Ok(TxPayload::Program {
                program_id: program,
                instruction: "deposit_for_burn".to_string(),
                args: json!({
                    "owner": request.source_address(),
                    "amount": request.amount().minor_units().to_string(),
                    "destination_domain": domain(destination),
                    "mint_recipient": to_hex(&recipient),
                    "burn_token_mint": burn_token,
                }),
            });
        }

        let messenger = contract_for(&self.config.token_messengers, source, "token messenger")?;
        let data = evm::encode_call(
            DEPOSIT_FOR_BURN,
            &[
                Token::Uint(U256::from(request.amount().minor_units())),
                Token::Uint(U256::from(domain(destination))),
                Token::FixedBytes(recipient.to_vec()),
                Token::Address(crate::types::parse_evm_address(burn_token)?),
            ],
        );
        Ok(TxPayload::evm_call(messenger, data))
    }

    fn proof_target(
        &self,
        _request: &TransferRequest,
        source_tx: &TxRef,
        block: &BlockData,
    ) -> Result<ProofTarget, BridgeError> {
        let log = block
            .find_log(MESSAGE_SENT)
            .ok_or_else(|| BridgeError::Internal(format!("no {} event in {}", MESSAGE_SENT, source_tx)))?;
        // EVM logs carry the message ABI-encoded; Solana returns it raw.
        let message = if source_tx.chain.is_evm() {
            evm::decode_bytes(&log.data)?
        } else {
            log.data.to_vec()
        };
        let key = to_hex(&keccak256(&message));
        debug!(tx = %source_tx, message_hash = %key, "CCTP message located");
        Ok(ProofTarget {
            key,
            message: Some(to_hex(&message)),
        })
    }

    fn attestation(&self) -> &WaitOptions {
        &self.config.attestation
    }

    fn redeem_payload(
        &self,
        request: &TransferRequest,
        progress: &PartialProgress,
        proof: &Proof,
    ) -> Result<TxPayload, BridgeError> {
        let message = progress
            .message
            .as_deref()
            .ok_or_else(|| BridgeError::Internal("CCTP message missing for receiveMessage".to_string()))?;
        let transmitter = contract_for(
            &self.config.message_transmitters,
            request.destination_chain(),
            "message transmitter",
        )?;
        let data = evm::encode_call(
            RECEIVE_MESSAGE,
            &[Token::Bytes(evm::from_hex(message)?), Token::Bytes(proof.to_bytes())],
        );
        Ok(TxPayload::evm_call(transmitter, data))
    }
}

pub type CctpAdapter = BridgeFlow<CctpSteps>;

impl CctpAdapter {
    pub fn new(config: CctpConfig, collaborators: Collaborators, settings: FlowSettings) -> Result<Self, BridgeError> {
        config.validate()?;
        BridgeFlow::with_steps(CctpSteps::new(config), collaborators, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BridgeContext;
    use crate::error::ErrorKind;
    use crate::status::{Stage, StatusSink};
    use crate::testing::{
        cctp_message_log, request, Fakes, RecordingSink, EVM_RECIPIENT, SOLANA_SENDER,
    };
    use crate::traits::{AttestationResponse, ProtocolAdapter};
    use ethers::abi::ParamType;

    const MESSAGE: &[u8] = b"cctp message body";

    fn attestation_hex() -> String {
        format!("0x{}", "ab".repeat(65))
    }

    fn adapter(fakes: &Fakes) -> CctpAdapter {
        CctpAdapter::new(CctpConfig::mainnet(), fakes.collaborators(), FlowSettings::default()).unwrap()
    }

    fn ready_fakes() -> Fakes {
        let fakes = Fakes::new();
        fakes.rpc.with_log(ChainId::Solana, cctp_message_log(MESSAGE, false));
        fakes.attestation.always(
            &CctpConfig::mainnet().attestation.primary_endpoint,
            AttestationResponse::complete(attestation_hex()),
        );
        fakes
    }

    #[test]
    fn test_mainnet_config_is_valid() {
        assert!(CctpConfig::mainnet().validate().is_ok());
    }

    #[test]
    fn test_supports_evm_destinations_only() {
        let steps = CctpSteps::new(CctpConfig::mainnet());
        assert!(steps.supports(ChainId::Solana, ChainId::Base));
        assert!(steps.supports(ChainId::Ethereum, ChainId::Arbitrum));
        assert!(!steps.supports(ChainId::Base, ChainId::Solana));
        assert!(!steps.supports(ChainId::Base, ChainId::Base));
    }

    #[test]
    fn test_evm_source_payload_encodes_deposit_for_burn() {
        let steps = CctpSteps::new(CctpConfig::mainnet());
        let req = request(ChainId::Ethereum, ChainId::Base, "10.00").build().unwrap();
        let payload = steps.source_payload(&req).unwrap();
        assert_eq!(payload.selector(), Some(evm::selector(DEPOSIT_FOR_BURN)));

        let TxPayload::Evm { data, .. } = payload else {
            panic!("expected EVM call");
        };
        let tokens = ethers::abi::decode(
            &[ParamType::Uint(256), ParamType::Uint(32), ParamType::FixedBytes(32), ParamType::Address],
            &data[4..],
        )
        .unwrap();
        assert_eq!(tokens[0], Token::Uint(U256::from(10_000_000u64)));
        assert_eq!(tokens[1], Token::Uint(U256::from(6u32)));
    }

    #[test]
    fn test_solana_source_payload_is_program_call() {
        let steps = CctpSteps::new(CctpConfig::mainnet());
        let req = request(ChainId::Solana, ChainId::Base, "10.00").build().unwrap();
        match steps.source_payload(&req).unwrap() {
            TxPayload::Program { instruction, args, .. } => {
                assert_eq!(instruction, "deposit_for_burn");
                assert_eq!(args["amount"], "10000000");
                assert_eq!(args["destination_domain"], 6);
                assert_eq!(args["owner"], SOLANA_SENDER);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_proof_key_is_message_hash() {
        let steps = CctpSteps::new(CctpConfig::mainnet());
        let req = request(ChainId::Ethereum, ChainId::Base, "1").build().unwrap();
        let block = BlockData {
            block_number: 10,
            logs: vec![cctp_message_log(MESSAGE, true)],
        };
        let target = steps
            .proof_target(&req, &TxRef::new(ChainId::Ethereum, "0x01"), &block)
            .unwrap();
        assert_eq!(target.key, to_hex(&keccak256(MESSAGE)));
        assert_eq!(target.message, Some(to_hex(MESSAGE)));

        let empty = steps.proof_target(&req, &TxRef::new(ChainId::Ethereum, "0x01"), &BlockData::default());
        assert!(empty.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bridge_completes_after_attestation() {
        let fakes = ready_fakes();
        let cctp = adapter(&fakes);
        let sink = RecordingSink::new();
        let req = request(ChainId::Solana, ChainId::Base, "10.00").build().unwrap();

        let result = cctp.bridge(&req, &BridgeContext::new(), &sink).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.protocol, Some(Protocol::Cctp));
        assert_eq!(result.proof.as_ref().unwrap().as_str(), attestation_hex());
        assert_eq!(
            result.stages,
            vec![
                Stage::Validating,
                Stage::Preparing,
                Stage::AwaitingSourceSignature,
                Stage::SourceSubmitted,
                Stage::SourceConfirmed,
                Stage::AwaitingAttestation,
                Stage::AttestationReceived,
                Stage::DestinationSubmitted,
                Stage::Complete,
            ]
        );
        assert_eq!(sink.stages(Protocol::Cctp), result.stages);

        assert_eq!(fakes.signer.count_on(ChainId::Solana), 1);
        let redeems = fakes.signer.payloads_on(ChainId::Base);
        assert_eq!(redeems.len(), 1);
        assert_eq!(redeems[0].selector(), Some(evm::selector(RECEIVE_MESSAGE)));
        assert_eq!(fakes.attestation.keys(), vec![to_hex(&keccak256(MESSAGE))]);
        assert_eq!(cctp.health().samples, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attestation_timeout_keeps_partial_progress() {
        let fakes = Fakes::new();
        fakes.rpc.with_log(ChainId::Solana, cctp_message_log(MESSAGE, false));
        let cctp = adapter(&fakes);
        let req = request(ChainId::Solana, ChainId::Base, "10.00").build().unwrap();

        let result = cctp.bridge(&req, &BridgeContext::new(), &RecordingSink::new()).await;
        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::AttestationTimeout));
        assert!(result.source_submitted_but_incomplete);
        let partial = result.partial().unwrap();
        assert_eq!(partial.last_stage, Stage::AwaitingAttestation);
        assert!(partial.source_tx.is_some());
        assert_eq!(partial.proof_key.as_deref(), Some(to_hex(&keccak256(MESSAGE)).as_str()));
        assert_eq!(fakes.signer.count_on(ChainId::Base), 0);
        assert_eq!(result.stages.last(), Some(&Stage::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_never_burns_again() {
        let fakes = Fakes::new();
        fakes.rpc.with_log(ChainId::Solana, cctp_message_log(MESSAGE, false));
        let cctp = adapter(&fakes);
        let req = request(ChainId::Solana, ChainId::Base, "10.00").build().unwrap();

        let first = cctp.bridge(&req, &BridgeContext::new(), &RecordingSink::new()).await;
        let partial = first.partial().unwrap().clone();

        fakes.attestation.always(
            &CctpConfig::mainnet().attestation.primary_endpoint,
            AttestationResponse::complete(attestation_hex()),
        );
        let resumed = cctp.resume(&req, &partial, &BridgeContext::new(), &RecordingSink::new()).await;
        assert!(resumed.success, "{:?}", resumed.error);
        assert_eq!(resumed.source_tx, partial.source_tx);
        assert_eq!(fakes.signer.count_on(ChainId::Solana), 1);
        assert_eq!(fakes.signer.count_on(ChainId::Base), 1);
        assert!(!resumed.stages.contains(&Stage::AwaitingSourceSignature));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_touches_no_network() {
        let fakes = ready_fakes();
        let cctp = adapter(&fakes);
        let req = request(ChainId::Solana, ChainId::Base, "10.00").dry_run(true).build().unwrap();

        let result = cctp.bridge(&req, &BridgeContext::new(), &RecordingSink::new()).await;
        assert!(result.success);
        assert_eq!(result.bridge_id, "dryrun-cctp");
        assert_eq!(result.stages, vec![Stage::Validating, Stage::Complete]);
        assert_eq!(fakes.rpc.calls(), 0);
        assert_eq!(fakes.attestation.total_calls(), 0);
        assert_eq!(fakes.signer.submissions().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wallet_rejection_is_not_a_health_failure() {
        let fakes = ready_fakes();
        fakes.signer.reject(ChainId::Solana);
        let cctp = adapter(&fakes);
        let req = request(ChainId::Solana, ChainId::Base, "10.00").build().unwrap();

        let result = cctp.bridge(&req, &BridgeContext::new(), &RecordingSink::new()).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::WalletRejected));
        assert!(!result.source_submitted_but_incomplete);
        assert_eq!(cctp.health().samples, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_source_reports_incomplete() {
        let fakes = Fakes::new();
        fakes.rpc.with_log(ChainId::Solana, cctp_message_log(MESSAGE, false));
        let cctp = adapter(&fakes);
        let req = request(ChainId::Solana, ChainId::Base, "10.00").build().unwrap();
        let ctx = BridgeContext::new();
        let token = ctx.cancellation_token();
        let sink = RecordingSink::new();
        sink.on_stage(Stage::AwaitingAttestation, move || token.cancel());

        let result = cctp.bridge(&req, &ctx, &sink).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
        assert!(result.source_submitted_but_incomplete);
        assert_eq!(result.stages.last(), Some(&Stage::AwaitingAttestation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destination_broadcast_error_is_destination_failure() {
        let fakes = ready_fakes();
        fakes.signer.fail_on(ChainId::Base, || BridgeError::Network("rpc 502".into()));
        let cctp = adapter(&fakes);
        let req = request(ChainId::Solana, ChainId::Base, "10.00").build().unwrap();

        let result = cctp.bridge(&req, &BridgeContext::new(), &RecordingSink::new()).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::DestinationExecutionFailed));
        assert!(result.error.as_ref().unwrap().message.contains("rpc 502"));
        assert!(result.source_submitted_but_incomplete);
        assert!(result.proof.is_some());
        let partial = result.partial().unwrap();
        assert_eq!(partial.last_stage, Stage::AttestationReceived);
        assert!(partial.destination_tx.is_none());
        assert_eq!(cctp.health().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destination_wallet_rejection_keeps_its_kind() {
        let fakes = ready_fakes();
        fakes.signer.reject(ChainId::Base);
        let cctp = adapter(&fakes);
        let req = request(ChainId::Solana, ChainId::Base, "10.00").build().unwrap();

        let result = cctp.bridge(&req, &BridgeContext::new(), &RecordingSink::new()).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::WalletRejected));
        assert!(result.source_submitted_but_incomplete);
        assert!(result.proof.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_source_fails_without_attestation() {
        let fakes = ready_fakes();
        fakes.rpc.revert_all_on(ChainId::Solana);
        let cctp = adapter(&fakes);
        let req = request(ChainId::Solana, ChainId::Base, "10.00").build().unwrap();

        let result = cctp.bridge(&req, &BridgeContext::new(), &RecordingSink::new()).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::SourceExecutionFailed));
        assert_eq!(fakes.attestation.total_calls(), 0);
    }

    #[test]
    fn test_amount_bounds() {
        let mut config = CctpConfig::mainnet();
        config.max_amount = Amount::from_minor_units(5_000_000);
        let steps = CctpSteps::new(config);
        let req = request(ChainId::Solana, ChainId::Base, "10.00").build().unwrap();
        assert!(steps.check(&req).is_err());
        assert_eq!(steps.fee(&req), Amount::ZERO);
    }

    #[test]
    fn test_recipient_constant_is_valid() {
        assert!(recipient_bytes32(ChainId::Base, EVM_RECIPIENT).is_ok());
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

        #[test]
        fn prop_duplicate_key_redeems_at_most_once(callers in 2usize..5, nonce in 0u64..1_000) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();
            let (successes, redeems) = runtime.block_on(async {
                let fakes = ready_fakes();
                fakes.signer.with_delay(Duration::from_millis(200));
                let cctp = adapter(&fakes);
                let req = request(ChainId::Solana, ChainId::Base, "10.00").nonce(nonce).build().unwrap();
                let ctx = BridgeContext::new();
                let sink = RecordingSink::new();
                let results =
                    futures::future::join_all((0..callers).map(|_| cctp.bridge(&req, &ctx, &sink))).await;
                let rejected = results
                    .iter()
                    .filter(|r| r.error_kind() == Some(ErrorKind::AlreadyInFlight))
                    .count();
                assert_eq!(rejected, callers - 1);
                (results.iter().filter(|r| r.success).count(), fakes.signer.count_on(ChainId::Base))
            });
            proptest::prop_assert!(redeems <= 1);
            proptest::prop_assert_eq!(successes, redeems);
        }
    }
}
