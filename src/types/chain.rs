use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Execution environment of a chain, which decides address format and how
/// transactions are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainFamily {
    Evm,
    Solana,
}

/// Chains the orchestrator can move funds between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainId {
    Solana,
    Ethereum,
    Base,
    Arbitrum,
    Optimism,
    Polygon,
    Avalanche,
}

impl ChainId {
    pub const ALL: [ChainId; 7] = [
        ChainId::Solana,
        ChainId::Ethereum,
        ChainId::Base,
        ChainId::Arbitrum,
        ChainId::Optimism,
        ChainId::Polygon,
        ChainId::Avalanche,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::Solana => "solana",
            ChainId::Ethereum => "ethereum",
            ChainId::Base => "base",
            ChainId::Arbitrum => "arbitrum",
            ChainId::Optimism => "optimism",
            ChainId::Polygon => "polygon",
            ChainId::Avalanche => "avalanche",
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            ChainId::Solana => ChainFamily::Solana,
            _ => ChainFamily::Evm,
        }
    }

    pub fn is_evm(&self) -> bool {
        self.family() == ChainFamily::Evm
    }

    /// EIP-155 chain id for EVM chains.
    pub fn evm_chain_id(&self) -> Option<u64> {
        match self {
            ChainId::Solana => None,
            ChainId::Ethereum => Some(1),
            ChainId::Base => Some(8453),
            ChainId::Arbitrum => Some(42161),
            ChainId::Optimism => Some(10),
            ChainId::Polygon => Some(137),
            ChainId::Avalanche => Some(43114),
        }
    }

    /// Checks that `address` is well formed for this chain.
    pub fn validate_address(&self, address: &str) -> Result<(), BridgeError> {
        match self.family() {
            ChainFamily::Evm => parse_evm_address(address).map(|_| ()),
            ChainFamily::Solana => {
                let plausible = (32..=44).contains(&address.len())
                    && address.chars().all(|c| BASE58_ALPHABET.contains(c));
                if plausible {
                    Ok(())
                } else {
                    Err(BridgeError::InvalidRequest(format!(
                        "'{}' is not a valid Solana address",
                        address
                    )))
                }
            }
        }
    }
}

/// Parses a 0x-prefixed EVM address, rejecting the zero address.
pub fn parse_evm_address(address: &str) -> Result<Address, BridgeError> {
    if !address.starts_with("0x") {
        return Err(BridgeError::InvalidRequest(format!(
            "EVM address '{}' must start with 0x",
            address
        )));
    }
    let parsed = Address::from_str(address)
        .map_err(|e| BridgeError::InvalidRequest(format!("invalid EVM address '{}': {}", address, e)))?;
    if parsed == Address::zero() {
        return Err(BridgeError::InvalidRequest("EVM address cannot be the zero address".to_string()));
    }
    Ok(parsed)
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        ChainId::ALL
            .into_iter()
            .find(|chain| chain.as_str() == lowered)
            .ok_or_else(|| BridgeError::InvalidRequest(format!("unknown chain '{}'", s)))
    }
}
