//! Protocol selection and fallback.
//!
//! Candidates are tried strictly one after another, never raced, so two
//! protocols can never both burn or lock the same funds.

pub mod attempt;
pub mod config;

pub use attempt::TransferAttempt;
pub use config::OrchestratorConfig;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::adapter_registry::{AdapterRegistry, AdapterRegistryError, DynProtocolAdapter};
use crate::context::BridgeContext;
use crate::error::{BridgeError, ErrorKind};
use crate::idempotency::InFlightSet;
use crate::registry::HealthRegistry;
use crate::reliability::{with_timeout, BreakerState, CircuitBreaker, CircuitError};
use crate::status::StatusSink;
use crate::types::{option_duration_ms, Amount, PartialProgress, Protocol, TransferRequest, TransferResult};

/// One route as `execute` would consider it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteQuote {
    pub protocol: Protocol,
    pub fee: Option<Amount>,
    #[serde(with = "option_duration_ms")]
    pub estimated_duration: Option<Duration>,
    pub score: f64,
    pub circuit: BreakerState,
    /// Why the estimate failed, if it did
    pub error: Option<String>,
}

pub struct BridgeOrchestrator {
    config: OrchestratorConfig,
    adapters: AdapterRegistry,
    breaker: CircuitBreaker,
    health: HealthRegistry,
    in_flight: InFlightSet,
}

impl BridgeOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            breaker: CircuitBreaker::new(config.breaker.clone()),
            health: HealthRegistry::with_config(config.health.clone()),
            adapters: AdapterRegistry::new(),
            in_flight: InFlightSet::new(),
            config,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub async fn register(&self, adapter: Arc<DynProtocolAdapter>) -> Result<(), BridgeError> {
        let protocol = adapter.protocol();
        self.adapters
            .register_adapter(adapter)
            .await
            .map_err(|e| BridgeError::Configuration(e.to_string()))?;
        info!(%protocol, "adapter registered");
        Ok(())
    }

    /// Runs `request` with a fresh context bounded by the configured
    /// transfer deadline.
    pub async fn execute(&self, request: &TransferRequest, sink: &dyn StatusSink) -> TransferResult {
        self.execute_with_context(request, &BridgeContext::new(), sink).await
    }

    #[instrument(skip_all, fields(route = %format!("{}->{}", request.source_chain(), request.destination_chain())))]
    pub async fn execute_with_context(
        &self,
        request: &TransferRequest,
        ctx: &BridgeContext,
        sink: &dyn StatusSink,
    ) -> TransferResult {
        let started = Instant::now();
        let rejected = |error: BridgeError| {
            warn!(%error, "transfer rejected");
            TransferResult::failure(None, "rejected", &error, None, Vec::new(), started.elapsed())
        };

        if let Err(error) = request.validate_shape() {
            return rejected(error);
        }
        let plan = match self.plan(request).await {
            Ok(plan) => plan,
            Err(error) => return rejected(error),
        };
        if request.is_dry_run() {
            return self.dry_run(request, ctx, sink, plan).await;
        }

        let _permit = match self.in_flight.acquire(&request.idempotency_key()) {
            Ok(permit) => permit,
            Err(error) => return rejected(error),
        };
        let ctx = ctx.clone().with_default_timeout(self.config.transfer_deadline);
        let explicit = request.protocol().is_some();
        let mut attempt = TransferAttempt::new(sink);
        info!(
            candidates = ?plan.iter().map(|a| a.protocol()).collect::<Vec<_>>(),
            amount = %request.amount().display(request.asset()),
            "executing transfer"
        );

        for adapter in plan {
            let protocol = adapter.protocol();
            let key = protocol.as_str();

            if ctx.is_cancelled() {
                info!(%protocol, "cancelled before trying next protocol");
                return attempt.cancelled();
            }
            if self.breaker.is_open(key) {
                debug!(%protocol, "circuit open, skipping");
                attempt.skip(protocol, &BridgeError::CircuitOpen(protocol.to_string()));
                continue;
            }
            let validation = adapter.validate(request).await;
            if let Err(error) = validation.into_result() {
                if explicit {
                    return rejected(error);
                }
                debug!(%protocol, %error, "adapter declined request");
                attempt.skip(protocol, &error);
                continue;
            }

            let (runner, ctx_ref, sink_ref) = (&adapter, &ctx, &attempt);
            let outcome = self
                .breaker
                .execute(key, move || async move {
                    let result = runner.bridge(request, ctx_ref, sink_ref).await;
                    if result.success {
                        Ok(result)
                    } else {
                        Err(result)
                    }
                })
                .await;

            match outcome {
                Ok(result) => {
                    self.health.record_outcome(protocol, true, result.duration.as_millis() as u64);
                    let stranded = attempt.stranded();
                    if !stranded.is_empty() {
                        warn!(%protocol, stranded = stranded.len(), "transfer succeeded after earlier attempts left funds in flight");
                    }
                    info!(%protocol, bridge_id = %result.bridge_id, "transfer succeeded");
                    return result.with_stranded(stranded);
                }
                Err(CircuitError::Open(_)) => {
                    // Opened by a concurrent transfer since the check above.
                    attempt.skip(protocol, &BridgeError::CircuitOpen(protocol.to_string()));
                }
                Err(CircuitError::Inner(result)) => {
                    let kind = result.error_kind().unwrap_or(ErrorKind::Internal);
                    if kind.trips_breaker() {
                        self.health.record_outcome(protocol, false, result.duration.as_millis() as u64);
                    }
                    warn!(%protocol, %kind, incomplete = result.source_submitted_but_incomplete, "protocol attempt failed");
                    let earlier = attempt.stranded();
                    attempt.fail(protocol, &result);
                    if explicit || kind.stops_fallback() {
                        return result.with_stranded(earlier);
                    }
                }
            }
        }

        let result = attempt.all_routes_failed();
        warn!(attempted = result.error.as_ref().map(|e| e.details.len()).unwrap_or(0), "all routes failed");
        result
    }

    /// Dry runs go to the first candidate that accepts the request. The
    /// breaker and health records are left alone.
    async fn dry_run(
        &self,
        request: &TransferRequest,
        ctx: &BridgeContext,
        sink: &dyn StatusSink,
        plan: Vec<Arc<DynProtocolAdapter>>,
    ) -> TransferResult {
        let mut attempt = TransferAttempt::new(sink);
        for adapter in plan {
            let protocol = adapter.protocol();
            if let Err(error) = adapter.validate(request).await.into_result() {
                if request.protocol().is_some() {
                    return TransferResult::failure(Some(protocol), "rejected", &error, None, Vec::new(), attempt.elapsed());
                }
                attempt.skip(protocol, &error);
                continue;
            }
            let result = adapter.bridge(request, ctx, &attempt).await;
            if result.success {
                info!(%protocol, "dry run accepted");
                return result;
            }
            attempt.fail(protocol, &result);
        }
        attempt.all_routes_failed()
    }

    /// Candidate adapters in the order `execute` tries them.
    async fn plan(&self, request: &TransferRequest) -> Result<Vec<Arc<DynProtocolAdapter>>, BridgeError> {
        let (source, destination) = (request.source_chain(), request.destination_chain());

        if let Some(protocol) = request.protocol() {
            let adapter = self.adapters.get_adapter(protocol).await.map_err(|e| match e {
                AdapterRegistryError::AdapterNotFound(p) => {
                    BridgeError::InvalidRequest(format!("no adapter registered for {}", p))
                }
                other => BridgeError::Configuration(other.to_string()),
            })?;
            if !adapter.supports(source, destination) {
                return Err(BridgeError::UnsupportedRoute {
                    protocol,
                    source_chain: source,
                    destination,
                });
            }
            return Ok(vec![adapter]);
        }

        let supporting = self.adapters.supporting(source, destination).await;
        if supporting.is_empty() {
            return Err(BridgeError::InvalidRequest(format!(
                "no protocol supports {} -> {}",
                source, destination
            )));
        }
        let protocols: Vec<Protocol> = supporting.iter().map(|a| a.protocol()).collect();
        let ranked = self.health.rank(&protocols);
        debug!(?ranked, "candidates ranked");

        Ok(ranked
            .into_iter()
            .filter_map(|(protocol, _)| supporting.iter().find(|a| a.protocol() == protocol).cloned())
            .collect())
    }

    /// Fee and timing of every candidate route, ranked as `execute` would
    /// try them. Estimates run concurrently.
    pub async fn quote(&self, request: &TransferRequest) -> Result<Vec<RouteQuote>, BridgeError> {
        request.validate_shape()?;
        let plan = self.plan(request).await?;
        let protocols: Vec<Protocol> = plan.iter().map(|a| a.protocol()).collect();

        let estimates = join_all(plan.iter().map(|adapter| {
            with_timeout(adapter.estimate(request), self.config.quote_timeout, "quote")
        }))
        .await;

        Ok(plan
            .iter()
            .zip(estimates)
            .map(|(adapter, estimate)| {
                let protocol = adapter.protocol();
                let (fee, estimated_duration, error) = match estimate {
                    Ok(e) => (Some(e.fee), Some(e.estimated_duration), None),
                    Err(e) => {
                        debug!(%protocol, error = %e, "estimate failed");
                        (None, None, Some(e.to_string()))
                    }
                };
                RouteQuote {
                    protocol,
                    fee,
                    estimated_duration,
                    score: self.health.score(protocol, &protocols),
                    circuit: self.breaker.state(protocol.as_str()),
                    error,
                }
            })
            .collect())
    }

    /// Continues a transfer from `partial` on the protocol that started it.
    ///
    /// Funds are already committed on the source chain, so an open circuit
    /// does not block the resume; the outcome still feeds the breaker and
    /// health records.
    pub async fn resume(
        &self,
        request: &TransferRequest,
        partial: &PartialProgress,
        sink: &dyn StatusSink,
    ) -> TransferResult {
        let started = Instant::now();
        let protocol = partial.protocol;
        let adapter = match self.adapters.get_adapter(protocol).await {
            Ok(adapter) => adapter,
            Err(e) => {
                let error = BridgeError::InvalidRequest(e.to_string());
                return TransferResult::failure(Some(protocol), "rejected", &error, Some(partial.clone()), Vec::new(), started.elapsed());
            }
        };
        let _permit = match self.in_flight.acquire(&request.idempotency_key()) {
            Ok(permit) => permit,
            Err(error) => {
                return TransferResult::failure(Some(protocol), "rejected", &error, Some(partial.clone()), Vec::new(), started.elapsed())
            }
        };

        info!(%protocol, from = %partial.last_stage, "resuming transfer");
        let ctx = BridgeContext::new().with_default_timeout(self.config.transfer_deadline);
        let result = adapter.resume(request, partial, &ctx, sink).await;

        let key = protocol.as_str();
        if result.success {
            self.breaker.record_success(key);
            self.health.record_outcome(protocol, true, result.duration.as_millis() as u64);
        } else if result.error_kind().is_some_and(|k| k.trips_breaker()) {
            self.breaker.record_failure(key);
            self.health.record_outcome(protocol, false, result.duration.as_millis() as u64);
        }
        result
    }
}

impl std::fmt::Debug for BridgeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeOrchestrator")
            .field("config", &self.config)
            .field("adapters", &self.adapters)
            .finish()
    }
}
