//! Axelar general message passing: send tokens with a contract call through
//! the source gateway, then execute the approved command on the destination.

use ethers::abi::{self, Token};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::evm::{self, contract_for, to_hex};
use super::flow::{BridgeFlow, BridgeSteps, FlowSettings, ProofTarget};
use super::Collaborators;
use crate::attestation::WaitOptions;
use crate::error::BridgeError;
use crate::traits::{BlockData, TxPayload};
use crate::types::{parse_evm_address, Amount, ChainId, PartialProgress, Proof, Protocol, TransferRequest, TxRef};

const CALL_CONTRACT_WITH_TOKEN: &str = "callContractWithToken(string,string,bytes,string,uint256)";
const EXECUTE: &str = "execute(bytes32,string,string,bytes)";
const CONTRACT_CALL: &str = "ContractCallWithToken";

/// Name Axelar uses for an EVM chain.
pub fn axelar_chain(chain: ChainId) -> Option<&'static str> {
    match chain {
        ChainId::Ethereum => Some("Ethereum"),
        ChainId::Polygon => Some("Polygon"),
        ChainId::Avalanche => Some("Avalanche"),
        ChainId::Arbitrum => Some("arbitrum"),
        ChainId::Optimism => Some("optimism"),
        ChainId::Base => Some("base"),
        ChainId::Solana => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmpConfig {
    /// Axelar gateway per EVM chain
    pub gateways: BTreeMap<ChainId, String>,
    /// Receiving contract that executes approved calls on the destination
    pub executable: String,
    /// Symbol the gateway knows the asset by
    pub token_symbol: String,
    pub attestation: WaitOptions,
    pub fee_bps: u32,
    pub min_fee: Amount,
}

impl GmpConfig {
    pub fn mainnet() -> Self {
        let shared = "0xe432150cce91c13a887f7D836923d5597adD8E31";
        let gateways = [
            (ChainId::Ethereum, "0x4F4495243837681061C4743b74B3eEdf548D56A5"),
            (ChainId::Polygon, "0x6f015F16De9fC8791b234eF68D486d2bF203FBA8"),
            (ChainId::Avalanche, "0x5029C0EFf6C34351a0CEc334542cDb22c7928f78"),
            (ChainId::Arbitrum, shared),
            (ChainId::Optimism, shared),
            (ChainId::Base, shared),
        ];

        Self {
            gateways: gateways.into_iter().map(|(c, a)| (c, a.to_string())).collect(),
            executable: "0xce16F69375520ab01377ce7B88f5BA8C48F8D666".to_string(),
            token_symbol: "USDC".to_string(),
            attestation: WaitOptions::new("https://api.gmp.axelarscan.io/gmp/{key}")
                .with_max_wait(Duration::from_secs(45 * 60))
                .with_poll_interval(Duration::from_secs(10)),
            fee_bps: 10,
            min_fee: Amount::from_minor_units(500_000),
        }
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        evm::validate_contracts(&self.gateways, "gateway")?;
        parse_evm_address(&self.executable)
            .map_err(|e| BridgeError::Configuration(format!("GMP executable: {}", e)))?;
        if self.token_symbol.is_empty() {
            return Err(BridgeError::Configuration("GMP token symbol is empty".to_string()));
        }
        if self.fee_bps > 10_000 {
            return Err(BridgeError::Configuration("GMP fee cannot exceed 10000 bps".to_string()));
        }
        self.attestation.validate()
    }
}

#[derive(Debug, Clone)]
pub struct GmpSteps {
    config: GmpConfig,
}

impl GmpSteps {
    pub fn new(config: GmpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GmpConfig {
        &self.config
    }

    /// Payload handed to the executable: the final recipient.
    fn call_payload(request: &TransferRequest) -> Result<Vec<u8>, BridgeError> {
        let recipient = parse_evm_address(request.destination_address())?;
        Ok(abi::encode(&[Token::Address(recipient)]))
    }

    fn chain_name(chain: ChainId) -> Result<&'static str, BridgeError> {
        axelar_chain(chain).ok_or_else(|| BridgeError::InvalidRequest(format!("Axelar does not serve {}", chain)))
    }
}

impl BridgeSteps for GmpSteps {
    fn protocol(&self) -> Protocol {
        Protocol::Gmp
    }

    fn supports(&self, source: ChainId, destination: ChainId) -> bool {
        source != destination
            && source.is_evm()
            && destination.is_evm()
            && self.config.gateways.contains_key(&source)
            && self.config.gateways.contains_key(&destination)
    }

    fn check(&self, request: &TransferRequest) -> Result<(), BridgeError> {
        let fee = self.fee(request);
        if request.amount() <= fee {
            return Err(BridgeError::InvalidRequest(format!(
                "amount must exceed the GMP fee of {} {}",
                fee.display(request.asset()),
                request.asset()
            )));
        }
        Ok(())
    }

    fn fee(&self, request: &TransferRequest) -> Amount {
        request.amount().basis_points(self.config.fee_bps).max(self.config.min_fee)
    }

    fn estimated_duration(&self, request: &TransferRequest) -> Duration {
        let minutes = match request.source_chain() {
            ChainId::Ethereum => 20,
            ChainId::Polygon => 6,
            _ => 3,
        };
        Duration::from_secs(minutes * 60)
    }

    fn source_payload(&self, request: &TransferRequest) -> Result<TxPayload, BridgeError> {
        let gateway = contract_for(&self.config.gateways, request.source_chain(), "gateway")?;
        let data = evm::encode_call(
            CALL_CONTRACT_WITH_TOKEN,
            &[
                Token::String(Self::chain_name(request.destination_chain())?.to_string()),
                Token::String(self.config.executable.clone()),
                Token::Bytes(Self::call_payload(request)?),
                Token::String(self.config.token_symbol.clone()),
                Token::Uint(U256::from(request.amount().minor_units())),
            ],
        );
        Ok(TxPayload::evm_call(gateway, data))
    }

    fn proof_target(
        &self,
        request: &TransferRequest,
        source_tx: &TxRef,
        block: &BlockData,
    ) -> Result<ProofTarget, BridgeError> {
        if block.find_log(CONTRACT_CALL).is_none() {
            return Err(BridgeError::Internal(format!("no {} event in {}", CONTRACT_CALL, source_tx)));
        }
        debug!(tx = %source_tx, "GMP call located");
        // Axelar indexes calls by source transaction.
        Ok(ProofTarget {
            key: source_tx.hash.clone(),
            message: Some(to_hex(&Self::call_payload(request)?)),
        })
    }

    fn attestation(&self) -> &WaitOptions {
        &self.config.attestation
    }

    /// The approval is the gateway command id.
    fn accepts_proof(&self, proof: &Proof) -> bool {
        proof.to_bytes().len() == 32
    }

    fn redeem_payload(
        &self,
        request: &TransferRequest,
        progress: &PartialProgress,
        proof: &Proof,
    ) -> Result<TxPayload, BridgeError> {
        let command_id = proof.to_bytes();
        if command_id.len() != 32 {
            return Err(BridgeError::Internal(format!(
                "GMP command id must be 32 bytes, got {}",
                command_id.len()
            )));
        }
        let payload = match progress.message.as_deref() {
            Some(message) => evm::from_hex(message)?,
            None => Self::call_payload(request)?,
        };
        let executable = parse_evm_address(&self.config.executable)
            .map_err(|e| BridgeError::Configuration(format!("GMP executable: {}", e)))?;
        let data = evm::encode_call(
            EXECUTE,
            &[
                Token::FixedBytes(command_id),
                Token::String(Self::chain_name(request.source_chain())?.to_string()),
                Token::String(request.source_address().to_string()),
                Token::Bytes(payload),
            ],
        );
        Ok(TxPayload::evm_call(executable, data))
    }
}

pub type GmpAdapter = BridgeFlow<GmpSteps>;

impl GmpAdapter {
    pub fn new(config: GmpConfig, collaborators: Collaborators, settings: FlowSettings) -> Result<Self, BridgeError> {
        config.validate()?;
        BridgeFlow::with_steps(GmpSteps::new(config), collaborators, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BridgeContext;
    use crate::error::ErrorKind;
    use crate::testing::{gmp_call_log, request, Fakes, RecordingSink, EVM_SENDER};
    use crate::traits::{AttestationResponse, ProtocolAdapter};

    fn command_id() -> String {
        format!("0x{}", "5a".repeat(32))
    }

    #[test]
    fn test_mainnet_config_is_valid() {
        assert!(GmpConfig::mainnet().validate().is_ok());
    }

    #[test]
    fn test_evm_routes_only() {
        let steps = GmpSteps::new(GmpConfig::mainnet());
        assert!(steps.supports(ChainId::Ethereum, ChainId::Base));
        assert!(!steps.supports(ChainId::Solana, ChainId::Base));
        assert!(!steps.supports(ChainId::Base, ChainId::Solana));
    }

    #[test]
    fn test_fee_has_floor() {
        let steps = GmpSteps::new(GmpConfig::mainnet());
        let small = request(ChainId::Ethereum, ChainId::Base, "10").build().unwrap();
        assert_eq!(steps.fee(&small), Amount::from_minor_units(500_000));

        let large = request(ChainId::Ethereum, ChainId::Base, "10000").build().unwrap();
        assert_eq!(steps.fee(&large), Amount::from_minor_units(10_000_000));

        let dust = request(ChainId::Ethereum, ChainId::Base, "0.5").build().unwrap();
        assert!(steps.check(&dust).is_err());
    }

    #[test]
    fn test_proof_key_is_source_hash() {
        let steps = GmpSteps::new(GmpConfig::mainnet());
        let req = request(ChainId::Ethereum, ChainId::Base, "10").build().unwrap();
        let block = BlockData {
            block_number: 3,
            logs: vec![gmp_call_log()],
        };
        let tx = TxRef::new(ChainId::Ethereum, "0xfeed");
        let target = steps.proof_target(&req, &tx, &block).unwrap();
        assert_eq!(target.key, "0xfeed");
        assert!(target.message.is_some());
        assert!(steps.proof_target(&req, &tx, &BlockData::default()).is_err());
    }

    #[test]
    fn test_redeem_rejects_short_command_id() {
        let steps = GmpSteps::new(GmpConfig::mainnet());
        let req = request(ChainId::Ethereum, ChainId::Base, "10").build().unwrap();
        let short = Proof::parse("0x1234").unwrap();
        assert!(steps.redeem_payload(&req, &PartialProgress::new(Protocol::Gmp), &short).is_err());

        let full = Proof::parse(&command_id()).unwrap();
        let payload = steps.redeem_payload(&req, &PartialProgress::new(Protocol::Gmp), &full).unwrap();
        assert_eq!(payload.selector(), Some(evm::selector(EXECUTE)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bridge_executes_command() {
        let fakes = Fakes::new();
        fakes.rpc.with_log(ChainId::Ethereum, gmp_call_log());
        let config = GmpConfig::mainnet();
        fakes
            .attestation
            .always(&config.attestation.primary_endpoint, AttestationResponse::complete(command_id()));
        let adapter = GmpAdapter::new(config, fakes.collaborators(), FlowSettings::default()).unwrap();
        let req = request(ChainId::Ethereum, ChainId::Base, "10")
            .from_address(EVM_SENDER)
            .build()
            .unwrap();

        let result = adapter.bridge(&req, &BridgeContext::new(), &RecordingSink::new()).await;
        assert!(result.success, "{:?}", result.error);
        let source = fakes.signer.payloads_on(ChainId::Ethereum);
        assert_eq!(source[0].selector(), Some(evm::selector(CALL_CONTRACT_WITH_TOKEN)));
        let source_hash = result.source_tx.as_ref().unwrap().hash.clone();
        assert_eq!(fakes.attestation.keys(), vec![source_hash]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_command_id_is_not_ready() {
        let fakes = Fakes::new();
        fakes.rpc.with_log(ChainId::Ethereum, gmp_call_log());
        let config = GmpConfig::mainnet();
        let endpoint = config.attestation.primary_endpoint.clone();
        fakes
            .attestation
            .script(&endpoint, vec![Ok(AttestationResponse::complete("0x1234"))]);
        fakes.attestation.always(&endpoint, AttestationResponse::complete(command_id()));
        let adapter = GmpAdapter::new(config, fakes.collaborators(), FlowSettings::default()).unwrap();
        let req = request(ChainId::Ethereum, ChainId::Base, "10")
            .from_address(EVM_SENDER)
            .build()
            .unwrap();

        let result = adapter.bridge(&req, &BridgeContext::new(), &RecordingSink::new()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.proof.as_ref().map(|p| p.as_str().to_string()), Some(command_id()));
        assert_eq!(fakes.attestation.calls(&endpoint), 2);
        assert_eq!(fakes.signer.count_on(ChainId::Base), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_route_is_invalid_request() {
        let fakes = Fakes::new();
        let adapter = GmpAdapter::new(GmpConfig::mainnet(), fakes.collaborators(), FlowSettings::default()).unwrap();
        let req = request(ChainId::Solana, ChainId::Base, "10").build().unwrap();

        let result = adapter.bridge(&req, &BridgeContext::new(), &RecordingSink::new()).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidRequest));
        assert!(!adapter.validate(&req).await.ok);
        assert_eq!(fakes.signer.submissions().len(), 0);
    }
}
