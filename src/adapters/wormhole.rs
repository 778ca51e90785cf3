//! Wormhole token bridge: lock or burn on the source chain, redeem the
//! signed VAA on the destination.

use ethers::abi::{self, ParamType, Token};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::evm::{self, address_to_bytes32, contract_for, recipient_bytes32, to_hex};
use super::flow::{BridgeFlow, BridgeSteps, FlowSettings, ProofTarget};
use super::Collaborators;
use crate::attestation::WaitOptions;
use crate::error::BridgeError;
use crate::traits::{BlockData, TxPayload};
use crate::types::{
    parse_evm_address, Amount, ChainId, PartialProgress, Proof, Protocol, TransferRequest, TxRef,
};

const TRANSFER_TOKENS: &str = "transferTokens(address,uint256,uint16,bytes32,uint256,uint32)";
const COMPLETE_TRANSFER: &str = "completeTransfer(bytes)";
const MESSAGE_PUBLISHED: &str = "LogMessagePublished";

/// Wormhole's own chain id.
pub fn wormhole_chain(chain: ChainId) -> u16 {
    match chain {
        ChainId::Solana => 1,
        ChainId::Ethereum => 2,
        ChainId::Polygon => 5,
        ChainId::Avalanche => 6,
        ChainId::Arbitrum => 23,
        ChainId::Optimism => 24,
        ChainId::Base => 30,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WormholeConfig {
    /// Token bridge contract per EVM chain
    pub token_bridges: BTreeMap<ChainId, String>,
    /// Solana token bridge program
    pub solana_program: Option<String>,
    /// Emitter of the Solana token bridge (32-byte hex, no prefix)
    pub solana_emitter: String,
    pub attestation: WaitOptions,
    /// Flat fee paid to the relayer that redeems on the destination
    pub relayer_fee: Amount,
}

impl WormholeConfig {
    pub fn mainnet() -> Self {
        let token_bridges = [
            (ChainId::Ethereum, "0x3ee18B2214AFF97000D974cf647E7C347E8fa585"),
            (ChainId::Polygon, "0x5a58505a96D1dbf8dF91cB21B54419FC36e93fdE"),
            (ChainId::Avalanche, "0x0e082F06FF657D94310cB8cE8B0D9a04541d8052"),
            (ChainId::Arbitrum, "0x0b2402144Bb366A632D14B83F244D2e0e21bD39c"),
            (ChainId::Optimism, "0x1D68124e65faFC907325e3EDbF8c4d84499DAa8b"),
            (ChainId::Base, "0x8d2de8d2f73F1F4cAB472AC9A881C9b123C79627"),
        ];

        Self {
            token_bridges: token_bridges
                .into_iter()
                .map(|(c, a)| (c, a.to_string()))
                .collect(),
            solana_program: Some("wormDTUJ6AWPNvk59vGQbDvGJmqbDTdgWgAqcLBCgUb".to_string()),
            solana_emitter: "ec7372995d5cc8732397fb0ad35c0121e0eaa90d26f828a534cab54391b3a4f5".to_string(),
            attestation: WaitOptions::new("https://api.wormholescan.io/api/v1/vaas/{key}")
                .with_fallback("https://api.wormholescan.io/v1/signed_vaa/{key}")
                .with_max_wait(Duration::from_secs(30 * 60))
                .with_poll_interval(Duration::from_secs(5)),
            relayer_fee: Amount::from_minor_units(100_000),
        }
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        evm::validate_contracts(&self.token_bridges, "token bridge")?;
        if let Some(program) = &self.solana_program {
            ChainId::Solana
                .validate_address(program)
                .map_err(|e| BridgeError::Configuration(format!("Wormhole Solana program: {}", e)))?;
        }
        let emitter_ok = self.solana_emitter.len() == 64 && hex::decode(&self.solana_emitter).is_ok();
        if !emitter_ok {
            return Err(BridgeError::Configuration(
                "Wormhole Solana emitter must be 32 bytes of hex".to_string(),
            ));
        }
        self.attestation.validate()
    }

    /// Emitter address of the token bridge on `chain`, as used in VAA ids.
    pub fn emitter(&self, chain: ChainId) -> Result<String, BridgeError> {
        if chain == ChainId::Solana {
            return Ok(self.solana_emitter.to_lowercase());
        }
        let bridge = contract_for(&self.token_bridges, chain, "token bridge")?;
        Ok(hex::encode(address_to_bytes32(bridge)))
    }
}

#[derive(Debug, Clone)]
pub struct WormholeSteps {
    config: WormholeConfig,
}

impl WormholeSteps {
    pub fn new(config: WormholeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WormholeConfig {
        &self.config
    }

    fn sequence(source: ChainId, data: &[u8]) -> Result<u64, BridgeError> {
        if source.is_evm() {
            // LogMessagePublished(sender indexed, sequence, nonce, payload, consistencyLevel)
            let tokens = abi::decode(
                &[ParamType::Uint(64), ParamType::Uint(32), ParamType::Bytes, ParamType::Uint(8)],
                data,
            )?;
            return match tokens.into_iter().next() {
                Some(Token::Uint(sequence)) if sequence <= U256::from(u64::MAX) => Ok(sequence.as_u64()),
                _ => Err(BridgeError::Internal("malformed Wormhole sequence".to_string())),
            };
        }
        let bytes: [u8; 8] = data
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| BridgeError::Internal("Wormhole sequence shorter than 8 bytes".to_string()))?;
        Ok(u64::from_le_bytes(bytes))
    }
}

impl BridgeSteps for WormholeSteps {
    fn protocol(&self) -> Protocol {
        Protocol::Wormhole
    }

    fn supports(&self, source: ChainId, destination: ChainId) -> bool {
        let source_ok = match source {
            ChainId::Solana => self.config.solana_program.is_some(),
            chain => self.config.token_bridges.contains_key(&chain),
        };
        source != destination
            && destination.is_evm()
            && source_ok
            && self.config.token_bridges.contains_key(&destination)
    }

    fn check(&self, request: &TransferRequest) -> Result<(), BridgeError> {
        if request.amount() <= self.config.relayer_fee {
            return Err(BridgeError::InvalidRequest(format!(
                "amount must exceed the Wormhole relayer fee of {} {}",
                self.config.relayer_fee.display(request.asset()),
                request.asset()
            )));
        }
        Ok(())
    }

    fn fee(&self, _request: &TransferRequest) -> Amount {
        self.config.relayer_fee
    }

    fn estimated_duration(&self, request: &TransferRequest) -> Duration {
        // Guardians sign once the source block is final.
        let secs = match request.source_chain() {
            ChainId::Solana => 60,
            ChainId::Avalanche => 30,
            ChainId::Polygon => 5 * 60,
            ChainId::Ethereum | ChainId::Base | ChainId::Arbitrum | ChainId::Optimism => 16 * 60,
        };
        Duration::from_secs(secs)
    }

    fn source_payload(&self, request: &TransferRequest) -> Result<TxPayload, BridgeError> {
        let source = request.source_chain();
        let destination = request.destination_chain();
        let recipient = recipient_bytes32(destination, request.destination_address())?;
        let token = request
            .asset()
            .token_address(source)
            .ok_or_else(|| BridgeError::InvalidRequest(format!("no {} on {}", request.asset(), source)))?;
        let nonce = (request.nonce() & u64::from(u32::MAX)) as u32;

        if source == ChainId::Solana {
            let program = self
                .config
                .solana_program
                .clone()
                .ok_or_else(|| BridgeError::Configuration("Wormhole Solana program not configured".to_string()))?;
            return Ok(TxPayload::Program {
                program_id: program,
                instruction: "transfer_native".to_string(),
                args: json!({
                    "owner": request.source_address(),
                    "mint": token,
                    "amount": request.amount().minor_units().to_string(),
                    "fee": self.config.relayer_fee.minor_units().to_string(),
                    "target_address": to_hex(&recipient),
                    "target_chain": wormhole_chain(destination),
                    "nonce": nonce,
                }),
            });
        }

        let bridge = contract_for(&self.config.token_bridges, source, "token bridge")?;
        let data = evm::encode_call(
            TRANSFER_TOKENS,
            &[
                Token::Address(parse_evm_address(token)?),
                Token::Uint(U256::from(request.amount().minor_units())),
                Token::Uint(U256::from(wormhole_chain(destination))),
                Token::FixedBytes(recipient.to_vec()),
                Token::Uint(U256::from(self.config.relayer_fee.minor_units())),
                Token::Uint(U256::from(nonce)),
            ],
        );
        Ok(TxPayload::evm_call(bridge, data))
    }

    fn proof_target(
        &self,
        _request: &TransferRequest,
        source_tx: &TxRef,
        block: &BlockData,
    ) -> Result<ProofTarget, BridgeError> {
        let log = block
            .find_log(MESSAGE_PUBLISHED)
            .ok_or_else(|| BridgeError::Internal(format!("no {} event in {}", MESSAGE_PUBLISHED, source_tx)))?;
        let sequence = Self::sequence(source_tx.chain, &log.data)?;
        let key = format!(
            "{}/{}/{}",
            wormhole_chain(source_tx.chain),
            self.config.emitter(source_tx.chain)?,
            sequence
        );
        debug!(tx = %source_tx, vaa = %key, "Wormhole message located");
        Ok(ProofTarget { key, message: None })
    }

    fn attestation(&self) -> &WaitOptions {
        &self.config.attestation
    }

    fn redeem_payload(
        &self,
        request: &TransferRequest,
        _progress: &PartialProgress,
        proof: &Proof,
    ) -> Result<TxPayload, BridgeError> {
        let bridge = contract_for(&self.config.token_bridges, request.destination_chain(), "token bridge")?;
        let data = evm::encode_call(COMPLETE_TRANSFER, &[Token::Bytes(proof.to_bytes())]);
        Ok(TxPayload::evm_call(bridge, data))
    }
}

pub type WormholeAdapter = BridgeFlow<WormholeSteps>;

impl WormholeAdapter {
    pub fn new(
        config: WormholeConfig,
        collaborators: Collaborators,
        settings: FlowSettings,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        BridgeFlow::with_steps(WormholeSteps::new(config), collaborators, settings)
    }
}
