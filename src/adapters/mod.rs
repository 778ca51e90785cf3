pub mod cctp;
pub mod evm;
pub mod flow;
pub mod gmp;
pub mod wormhole;

pub use cctp::{CctpAdapter, CctpConfig, CctpSteps};
pub use flow::{BridgeFlow, BridgeSteps, FlowSettings, ProofTarget};
pub use gmp::{GmpAdapter, GmpConfig, GmpSteps};
pub use wormhole::{WormholeAdapter, WormholeConfig, WormholeSteps};

use std::sync::Arc;

use crate::traits::{AttestationService, ChainRpc, WalletSigner};

/// External services an adapter is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub signer: Arc<dyn WalletSigner>,
    pub rpc: Arc<dyn ChainRpc>,
    pub attestation: Arc<dyn AttestationService>,
}

impl Collaborators {
    pub fn new(
        signer: Arc<dyn WalletSigner>,
        rpc: Arc<dyn ChainRpc>,
        attestation: Arc<dyn AttestationService>,
    ) -> Self {
        Self {
            signer,
            rpc,
            attestation,
        }
    }
}
