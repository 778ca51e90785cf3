//! Frostgate Bridge
//!
//! Moves a token amount between chains over one of several bridge
//! protocols (CCTP, Wormhole, Axelar GMP). The orchestrator picks
//! protocols by health, skips those whose circuit is open, and falls back
//! to the next candidate when one fails.

pub mod adapter_registry;
pub mod adapters;
pub mod attestation;
pub mod context;
pub mod error;
pub mod idempotency;
pub mod orchestrator;
pub mod registry;
pub mod reliability;
pub mod status;
pub mod telemetry;
pub mod traits;
pub mod types;

#[cfg(test)]
mod testing;

pub use adapter_registry::AdapterRegistry;
pub use adapters::{CctpAdapter, Collaborators, FlowSettings, GmpAdapter, WormholeAdapter};
pub use attestation::{AttestationWaiter, HttpAttestationService, WaitOptions};
pub use context::BridgeContext;
pub use error::{BridgeError, ErrorKind};
pub use orchestrator::{BridgeOrchestrator, OrchestratorConfig, RouteQuote};
pub use registry::{HealthConfig, HealthRegistry};
pub use reliability::{BreakerConfig, CircuitBreaker};
pub use status::{NoopSink, Stage, StatusEvent, StatusSink};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use traits::{AttestationService, ChainRpc, ProtocolAdapter, WalletSigner};
pub use types::*;

pub type Result<T> = std::result::Result<T, BridgeError>;
