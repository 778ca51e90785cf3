//! ABI helpers shared by the EVM sides of every protocol.

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes};
use ethers::utils::keccak256;
use std::collections::BTreeMap;

use crate::error::BridgeError;
use crate::types::{parse_evm_address, ChainId};

/// First four bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Calldata for `signature` called with `tokens`.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend(abi::encode(tokens));
    Bytes::from(data)
}

/// Left-pads an EVM address to 32 bytes.
pub fn address_to_bytes32(address: Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(address.as_bytes());
    out
}

/// 32-byte recipient for an EVM destination.
pub fn recipient_bytes32(chain: ChainId, address: &str) -> Result<[u8; 32], BridgeError> {
    if !chain.is_evm() {
        return Err(BridgeError::InvalidRequest(format!(
            "{} is not an EVM chain",
            chain
        )));
    }
    parse_evm_address(address).map(address_to_bytes32)
}

/// Looks up and parses the contract configured for `chain`.
pub fn contract_for(
    contracts: &BTreeMap<ChainId, String>,
    chain: ChainId,
    what: &str,
) -> Result<Address, BridgeError> {
    let raw = contracts
        .get(&chain)
        .ok_or_else(|| BridgeError::Configuration(format!("no {} configured for {}", what, chain)))?;
    parse_evm_address(raw).map_err(|e| BridgeError::Configuration(format!("{} on {}: {}", what, chain, e)))
}

/// Parses every address in `contracts`.
pub fn validate_contracts(contracts: &BTreeMap<ChainId, String>, what: &str) -> Result<(), BridgeError> {
    for chain in contracts.keys() {
        if !chain.is_evm() {
            return Err(BridgeError::Configuration(format!(
                "{} configured for non-EVM chain {}",
                what, chain
            )));
        }
        contract_for(contracts, *chain, what)?;
    }
    Ok(())
}

/// Decodes a single dynamic `bytes` value, as emitted by events such as
/// `MessageSent(bytes)`.
pub fn decode_bytes(data: &[u8]) -> Result<Vec<u8>, BridgeError> {
    let tokens = abi::decode(&[ParamType::Bytes], data)?;
    match tokens.into_iter().next() {
        Some(Token::Bytes(bytes)) => Ok(bytes),
        _ => Err(BridgeError::Internal("expected a bytes value".to_string())),
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decodes 0x-prefixed hex.
pub fn from_hex(text: &str) -> Result<Vec<u8>, BridgeError> {
    let body = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(body).map_err(|e| BridgeError::Serialization(format!("invalid hex '{}': {}", text, e)))
}
