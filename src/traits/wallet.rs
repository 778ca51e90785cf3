use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::types::{ChainId, TxRef};

/// Unsigned transaction handed to the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxPayload {
    /// Contract call on an EVM chain
    Evm { to: Address, data: Bytes, value: U256 },
    /// Program instruction on a non-EVM chain; the signer builds the
    /// concrete transaction.
    Program {
        program_id: String,
        instruction: String,
        args: serde_json::Value,
    },
}

impl TxPayload {
    pub fn evm_call(to: Address, data: impl Into<Bytes>) -> Self {
        TxPayload::Evm {
            to,
            data: data.into(),
            value: U256::zero(),
        }
    }

    /// Four-byte selector of an EVM call, if any.
    pub fn selector(&self) -> Option<[u8; 4]> {
        match self {
            TxPayload::Evm { data, .. } if data.len() >= 4 => {
                let mut selector = [0u8; 4];
                selector.copy_from_slice(&data[..4]);
                Some(selector)
            }
            _ => None,
        }
    }
}

/// Signs and broadcasts transactions on behalf of the user.
///
/// Refusals map to [`BridgeError::WalletRejected`], a missing session to
/// [`BridgeError::WalletNotConnected`].
#[async_trait]
pub trait WalletSigner: Send + Sync {
    async fn sign_and_submit(&self, chain: ChainId, payload: TxPayload) -> Result<TxRef, BridgeError>;
}
