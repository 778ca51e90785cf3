use async_trait::async_trait;
use ethers::types::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::types::{ChainId, TxRef};

/// Inclusion status of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// 0 while still pending or unknown
    pub confirmations: u64,
    pub reverted: bool,
}

/// Event emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Contract or program that emitted the event
    pub emitter: String,
    /// Event name, e.g. `MessageSent`
    pub event: String,
    /// Raw event payload
    pub data: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub block_number: u64,
    pub logs: Vec<LogEntry>,
}

impl BlockData {
    pub fn find_log(&self, event: &str) -> Option<&LogEntry> {
        self.logs.iter().find(|log| log.event == event)
    }
}

/// Read-only chain queries. Endpoint rotation is the implementor's concern;
/// errors are surfaced so the caller can retry.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_confirmation(&self, chain: ChainId, tx: &TxRef) -> Result<Confirmation, BridgeError>;

    async fn get_block_data(&self, chain: ChainId, tx: &TxRef) -> Result<BlockData, BridgeError>;
}
