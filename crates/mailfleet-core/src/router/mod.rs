//! Provider Router
//!
//! Picks a provider per message, fails over on error, isolates degraded
//! providers behind a circuit breaker and keeps provider health fresh with
//! a cancellable background poll.
//!
//! All per-provider state lives in one slot per provider. Breaker and
//! metrics share a `parking_lot::Mutex` so admission and outcome recording
//! are atomic per attempt; health sits behind its own `RwLock` since the
//! health loop writes it independently of traffic.

mod circuit_breaker;
mod health;
mod metrics;
mod selection;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState};
pub use health::HEALTH_CHECK_TIMED_OUT;
pub use metrics::{ProviderMetrics, RouterMetrics};
pub use selection::{rank, score, Candidate, FEATURE_MATCH_BONUS};

use crate::providers::{
    BulkResult, EmailProvider, Message, MessageType, ProviderError, ProviderHealth,
    ProviderRegistry, SendErrorKind, SendResult,
};
use futures_util::future::join_all;
use mailfleet_common::config::{CircuitBreakerConfig, Config, HealthCheckConfig, RouterConfig};
use mailfleet_common::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error reported when no provider could deliver a message
pub const ALL_PROVIDERS_FAILED: &str = "All email providers failed.";

struct SlotState {
    breaker: CircuitBreaker,
    metrics: ProviderMetrics,
}

pub(crate) struct ProviderSlot {
    pub(crate) provider: Arc<dyn EmailProvider>,
    state: Mutex<SlotState>,
    pub(crate) health: RwLock<ProviderHealth>,
}

impl ProviderSlot {
    fn new(provider: Arc<dyn EmailProvider>, breaker_config: &CircuitBreakerConfig) -> Self {
        let health = ProviderHealth::unknown(provider.name());
        Self {
            provider,
            state: Mutex::new(SlotState {
                breaker: CircuitBreaker::new(breaker_config),
                metrics: ProviderMetrics::default(),
            }),
            health: RwLock::new(health),
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.provider.name()
    }

    pub(crate) fn error_rate(&self) -> f64 {
        self.state.lock().metrics.error_rate()
    }

    fn is_healthy(&self) -> bool {
        self.health.read().healthy
    }
}

/// Breaker admission for one send.
///
/// Dropping an unsettled trial permit (the send future was cancelled)
/// reopens the circuit instead of leaving the trial in flight.
struct Permit<'a> {
    router: &'a ProviderRouter,
    index: usize,
    admission: Admission,
    settled: bool,
}

impl Permit<'_> {
    fn is_trial(&self) -> bool {
        self.admission == Admission::Trial
    }

    /// Hand the admission over to outcome recording
    fn settle(mut self) -> Admission {
        self.settled = true;
        self.admission
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.is_trial() {
            self.router.abandon_trial(self.index);
        }
    }
}

pub(crate) struct RouterInner {
    pub(crate) slots: Vec<ProviderSlot>,
    by_name: HashMap<String, usize>,
    config: RouterConfig,
    pub(crate) probe_timeout: Duration,
    metrics: RouterMetrics,
}

/// Routes messages across the registered providers
pub struct ProviderRouter {
    inner: Arc<RouterInner>,
    health_config: HealthCheckConfig,
    shutdown: CancellationToken,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl ProviderRouter {
    /// Create a router without starting the health monitor
    pub fn new(registry: ProviderRegistry, config: &Config) -> Result<Self> {
        let slots: Vec<ProviderSlot> = registry
            .iter()
            .map(|provider| ProviderSlot::new(provider.clone(), &config.circuit_breaker))
            .collect();

        let by_name = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (slot.name().to_string(), i))
            .collect();

        let metrics = RouterMetrics::new()
            .map_err(|e| Error::Internal(format!("Failed to register router metrics: {}", e)))?;

        Ok(Self {
            inner: Arc::new(RouterInner {
                slots,
                by_name,
                config: config.router.clone(),
                probe_timeout: config.health.probe_timeout(),
                metrics,
            }),
            health_config: config.health.clone(),
            shutdown: CancellationToken::new(),
            health_task: Mutex::new(None),
        })
    }

    /// Create a router and start its health monitor if enabled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(registry: ProviderRegistry, config: &Config) -> Result<Self> {
        let router = Self::new(registry, config)?;
        if router.health_config.enabled {
            router.start_health_monitor();
        }
        Ok(router)
    }

    /// Spawn the periodic health poll; a no-op if it is already running
    pub fn start_health_monitor(&self) {
        let mut task = self.health_task.lock();
        if task.is_some() {
            return;
        }

        *task = Some(health::spawn(
            self.inner.clone(),
            self.health_config.interval(),
            self.shutdown.child_token(),
        ));
    }

    /// Stop the health monitor and wait for it to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.health_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Health monitor task failed");
            }
        }
    }

    /// Probe every provider once, outside the periodic schedule
    pub async fn check_health_now(&self) {
        health::check_all(&self.inner).await;
    }

    /// Route one message, failing over across providers.
    ///
    /// Never returns an error: every failure becomes an unsuccessful
    /// [`SendResult`].
    pub async fn route_email(&self, message: &Message, preferred: Option<&str>) -> SendResult {
        let message_type = message.message_type();
        let max_attempts = self.inner.config.max_attempts.max(1);
        let mut tried: Vec<usize> = Vec::new();
        let mut attempted: Vec<String> = Vec::new();

        while tried.len() < max_attempts {
            let Some((index, permit)) = self.acquire_next(message_type, preferred, &tried)
            else {
                break;
            };

            tried.push(index);
            let slot = &self.inner.slots[index];
            attempted.push(slot.name().to_string());

            debug!(
                provider = %slot.name(),
                message_id = %message.id,
                trial = permit.is_trial(),
                "Sending via provider"
            );

            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                self.inner.config.send_timeout(),
                slot.provider.send(message),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout(self.inner.config.send_timeout())),
            };
            let admission = permit.settle();
            self.record_outcome(index, admission, outcome.is_ok(), started.elapsed());

            match outcome {
                Ok(provider_message_id) => {
                    return SendResult::sent(slot.name(), provider_message_id, attempted);
                }
                Err(e) => {
                    warn!(
                        provider = %slot.name(),
                        message_id = %message.id,
                        error = %e,
                        "Provider send failed, trying next provider"
                    );
                }
            }
        }

        self.inner.metrics.observe_exhausted();
        warn!(
            message_id = %message.id,
            attempted = ?attempted,
            "{}", ALL_PROVIDERS_FAILED
        );
        SendResult::failed(None, ALL_PROVIDERS_FAILED, SendErrorKind::Exhausted, attempted)
    }

    /// Route a batch across the currently selectable providers.
    ///
    /// `results[i]` always belongs to `messages[i]`.
    pub async fn route_bulk(&self, messages: Vec<Message>) -> BulkResult {
        if messages.is_empty() {
            return BulkResult::from_results(Vec::new());
        }

        let providers = self.selectable_providers();
        if providers.is_empty() {
            let mut results = Vec::with_capacity(messages.len());
            for message in &messages {
                results.push(self.route_email(message, None).await);
            }
            return BulkResult::from_results(results);
        }

        let chunk_size = messages.len().div_ceil(providers.len());
        debug!(
            messages = messages.len(),
            providers = providers.len(),
            chunk_size,
            "Distributing bulk send"
        );

        let chunks = messages
            .chunks(chunk_size)
            .zip(providers.iter())
            .map(|(chunk, &index)| self.send_chunk(index, chunk));

        let results: Vec<SendResult> = join_all(chunks).await.into_iter().flatten().collect();
        BulkResult::from_results(results)
    }

    /// Health snapshot per provider
    pub fn get_health(&self) -> HashMap<String, ProviderHealth> {
        self.inner
            .slots
            .iter()
            .map(|slot| (slot.name().to_string(), slot.health.read().clone()))
            .collect()
    }

    /// Metrics snapshot per provider
    pub fn get_metrics(&self) -> HashMap<String, ProviderMetrics> {
        self.inner
            .slots
            .iter()
            .map(|slot| (slot.name().to_string(), slot.state.lock().metrics.clone()))
            .collect()
    }

    /// Circuit state per provider
    pub fn circuit_states(&self) -> HashMap<String, CircuitState> {
        self.inner
            .slots
            .iter()
            .map(|slot| (slot.name().to_string(), slot.state.lock().breaker.state()))
            .collect()
    }

    /// Clear every provider's counters. Circuit state is left alone.
    pub fn reset_metrics(&self) {
        for slot in &self.inner.slots {
            slot.state.lock().metrics = ProviderMetrics::default();
            slot.health.write().error_rate = 0.0;
        }
        info!("Provider metrics reset");
    }

    /// Prometheus collectors for this router
    pub fn prometheus(&self) -> &RouterMetrics {
        &self.inner.metrics
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.inner.slots.iter().map(|s| s.name().to_string()).collect()
    }

    /// Pick and admit the next provider not yet tried
    fn acquire_next(
        &self,
        message_type: MessageType,
        preferred: Option<&str>,
        tried: &[usize],
    ) -> Option<(usize, Permit<'_>)> {
        let now = Instant::now();

        if let Some(&index) = preferred.and_then(|name| self.inner.by_name.get(name)) {
            if !tried.contains(&index) && self.inner.slots[index].is_healthy() {
                if let Some(permit) = self.try_admit(index, now) {
                    return Some((index, permit));
                }
            }
        }

        let candidates: Vec<Candidate> = self
            .inner
            .slots
            .iter()
            .enumerate()
            .filter(|(index, slot)| !tried.contains(index) && slot.is_healthy())
            .filter_map(|(index, slot)| {
                let state = slot.state.lock();
                state.breaker.is_selectable(now).then(|| Candidate {
                    index,
                    score: score(slot.provider.capabilities(), &state.metrics, message_type),
                    average_response_time_ms: state.metrics.average_response_time_ms,
                })
            })
            .collect();

        rank(candidates)
            .into_iter()
            .find_map(|candidate| {
                self.try_admit(candidate.index, now)
                    .map(|permit| (candidate.index, permit))
            })
    }

    fn try_admit(&self, index: usize, now: Instant) -> Option<Permit<'_>> {
        let slot = &self.inner.slots[index];
        let (admission, transition) = slot.state.lock().breaker.try_acquire(now);

        if let Some(state) = transition {
            info!(provider = %slot.name(), state = %state, "Circuit breaker transition");
            self.inner.metrics.observe_transition(slot.name(), state);
        }

        admission.is_admitted().then_some(Permit {
            router: self,
            index,
            admission,
            settled: false,
        })
    }

    /// Reopen a circuit whose trial send was dropped before it finished
    fn abandon_trial(&self, index: usize) {
        let slot = &self.inner.slots[index];
        let transition = slot.state.lock().breaker.abandon_trial(Instant::now());

        if let Some(state) = transition {
            warn!(provider = %slot.name(), "Trial send abandoned, circuit reopened");
            self.inner.metrics.observe_transition(slot.name(), state);
        }
    }

    /// Record one attempt against breaker and metrics
    fn record_outcome(&self, index: usize, admission: Admission, success: bool, elapsed: Duration) {
        let slot = &self.inner.slots[index];
        let (transition, error_rate) = {
            let mut state = slot.state.lock();
            state.metrics.record(success, elapsed);
            let transition = if success {
                state.breaker.record_success(admission)
            } else {
                state.breaker.record_failure(admission, Instant::now())
            };
            (transition, state.metrics.error_rate())
        };

        slot.health.write().error_rate = error_rate;
        self.inner.metrics.observe_send(slot.name(), success, elapsed);

        if let Some(state) = transition {
            if state == CircuitState::Open {
                warn!(provider = %slot.name(), "Circuit breaker opened");
            } else {
                info!(provider = %slot.name(), state = %state, "Circuit breaker transition");
            }
            self.inner.metrics.observe_transition(slot.name(), state);
        }
    }

    /// Healthy providers whose circuit would admit a send, in declaration order
    fn selectable_providers(&self) -> Vec<usize> {
        let now = Instant::now();
        self.inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_healthy() && slot.state.lock().breaker.is_selectable(now))
            .map(|(index, _)| index)
            .collect()
    }

    async fn send_chunk(&self, index: usize, chunk: &[Message]) -> Vec<SendResult> {
        let slot = &self.inner.slots[index];

        if slot.provider.capabilities().supports_bulk {
            if let Some(results) = self.send_native_bulk(index, chunk).await {
                return results;
            }
            let mut results = Vec::with_capacity(chunk.len());
            for message in chunk {
                results.push(self.route_email(message, None).await);
            }
            return results;
        }

        let mut results = Vec::with_capacity(chunk.len());
        for message in chunk {
            results.push(self.route_email(message, Some(slot.name())).await);
        }
        results
    }

    /// One native bulk call; `None` means the chunk must fall back to
    /// per-message routing
    async fn send_native_bulk(&self, index: usize, chunk: &[Message]) -> Option<Vec<SendResult>> {
        let slot = &self.inner.slots[index];
        let permit = self.try_admit(index, Instant::now())?;

        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            self.inner.config.send_timeout(),
            slot.provider.send_bulk(chunk),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::Timeout(self.inner.config.send_timeout())),
        };
        let elapsed = started.elapsed();
        let admission = permit.settle();

        let items = match outcome {
            Ok(items) if items.len() == chunk.len() => items,
            Ok(items) => {
                warn!(
                    provider = %slot.name(),
                    expected = chunk.len(),
                    received = items.len(),
                    "Bulk send returned wrong result count, falling back"
                );
                self.record_outcome(index, admission, false, elapsed);
                return None;
            }
            Err(e) => {
                warn!(provider = %slot.name(), error = %e, "Bulk send failed, falling back");
                self.record_outcome(index, admission, false, elapsed);
                return None;
            }
        };

        self.record_bulk_outcome(index, admission, &items, elapsed);

        let name = slot.name();
        Some(
            items
                .into_iter()
                .map(|item| match item {
                    Ok(id) => SendResult::sent(name, id, vec![name.to_string()]),
                    Err(e) => {
                        SendResult::failed(Some(name), e.to_string(), e.kind(), vec![name.to_string()])
                    }
                })
                .collect(),
        )
    }

    /// A completed bulk call counts once for the breaker and once per item
    /// for the metrics
    fn record_bulk_outcome(
        &self,
        index: usize,
        admission: Admission,
        items: &[crate::providers::BulkItemResult],
        elapsed: Duration,
    ) {
        let slot = &self.inner.slots[index];
        let per_item = elapsed / items.len().max(1) as u32;

        let (transition, error_rate) = {
            let mut state = slot.state.lock();
            for item in items {
                state.metrics.record(item.is_ok(), per_item);
            }
            (state.breaker.record_success(admission), state.metrics.error_rate())
        };

        slot.health.write().error_rate = error_rate;
        for item in items {
            self.inner.metrics.observe_send(slot.name(), item.is_ok(), per_item);
        }
        if let Some(state) = transition {
            info!(provider = %slot.name(), state = %state, "Circuit breaker transition");
            self.inner.metrics.observe_transition(slot.name(), state);
        }
    }
}

impl Drop for ProviderRouter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Sender;
    use crate::testing::MockProvider;
    use mailfleet_common::config::ProviderFeature;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn config() -> Config {
        let mut config = Config::default();
        config.circuit_breaker.failure_threshold = 2;
        config.circuit_breaker.reset_timeout_secs = 30;
        config.router.send_timeout_secs = 5;
        config
    }

    fn router(providers: Vec<Arc<MockProvider>>, config: &Config) -> ProviderRouter {
        let mut registry = ProviderRegistry::new();
        for provider in providers {
            registry.register(provider).unwrap();
        }
        ProviderRouter::new(registry, config).unwrap()
    }

    fn message(to: &str) -> Message {
        Message::new(Uuid::new_v4(), Sender::new("app@example.com"), to, "Receipt")
    }

    #[tokio::test]
    async fn test_routes_to_highest_score() {
        let low = MockProvider::new("low").reliability(0.5).into_arc();
        let high = MockProvider::new("high").reliability(0.99).into_arc();
        let router = router(vec![low.clone(), high.clone()], &config());

        let result = router.route_email(&message("a@example.com"), None).await;
        assert!(result.success);
        assert_eq!(result.provider.as_deref(), Some("high"));
        assert_eq!(result.message_id.as_deref(), Some("high-1"));
        assert_eq!(low.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_feature_match_changes_choice() {
        let transactional = MockProvider::new("tx")
            .reliability(0.8)
            .features(vec![ProviderFeature::Transactional])
            .into_arc();
        let marketing = MockProvider::new("mkt")
            .reliability(0.8)
            .features(vec![ProviderFeature::Marketing])
            .into_arc();
        let router = router(vec![transactional, marketing], &config());

        let receipt = router.route_email(&message("a@example.com"), None).await;
        assert_eq!(receipt.provider.as_deref(), Some("tx"));

        let promo = message("a@example.com").with_tag("marketing");
        let result = router.route_email(&promo, None).await;
        assert_eq!(result.provider.as_deref(), Some("mkt"));
    }

    #[tokio::test]
    async fn test_preferred_provider_first() {
        let best = MockProvider::new("best").reliability(0.99).into_arc();
        let chosen = MockProvider::new("chosen").reliability(0.5).into_arc();
        let router = router(vec![best, chosen], &config());

        let result = router
            .route_email(&message("a@example.com"), Some("chosen"))
            .await;
        assert_eq!(result.provider.as_deref(), Some("chosen"));
    }

    #[tokio::test]
    async fn test_unhealthy_preferred_provider_is_skipped() {
        let best = MockProvider::new("best").reliability(0.99).into_arc();
        let chosen = MockProvider::new("chosen").unhealthy().into_arc();
        let router = router(vec![best, chosen.clone()], &config());
        router.check_health_now().await;

        let result = router
            .route_email(&message("a@example.com"), Some("chosen"))
            .await;
        assert_eq!(result.provider.as_deref(), Some("best"));
        assert_eq!(chosen.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_failover_to_next_provider() {
        let primary = MockProvider::new("primary").reliability(0.99).failing().into_arc();
        let backup = MockProvider::new("backup").reliability(0.7).into_arc();
        let router = router(vec![primary.clone(), backup], &config());

        let result = router.route_email(&message("a@example.com"), None).await;
        assert!(result.success);
        assert_eq!(result.provider.as_deref(), Some("backup"));
        assert_eq!(result.attempted_providers, vec!["primary", "backup"]);
        assert_eq!(primary.sent_count(), 1);

        let metrics = router.get_metrics();
        assert_eq!(metrics["primary"].failed_requests, 1);
        assert_eq!(metrics["backup"].successful_requests, 1);
    }

    #[tokio::test]
    async fn test_all_providers_failing() {
        let providers: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|name| MockProvider::new(*name).failing().into_arc())
            .collect();
        let router = router(providers.clone(), &config());

        let result = router.route_email(&message("a@example.com"), None).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("All email providers failed."));
        assert_eq!(result.error_kind, Some(SendErrorKind::Exhausted));
        assert_eq!(result.attempted_providers.len(), 3);
        for provider in &providers {
            assert_eq!(provider.sent_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_no_providers_is_exhausted() {
        let router = router(vec![], &config());
        let result = router.route_email(&message("a@example.com"), None).await;
        assert!(!result.success);
        assert!(result.attempted_providers.is_empty());
        assert_eq!(result.error.as_deref(), Some(ALL_PROVIDERS_FAILED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_then_half_opens() {
        let flaky = MockProvider::new("flaky").reliability(0.99).failing().into_arc();
        let steady = MockProvider::new("steady").reliability(0.1).into_arc();
        let router = router(vec![flaky.clone(), steady], &config());

        // Two failures trip the breaker (threshold 2)
        router.route_email(&message("a@example.com"), None).await;
        router.route_email(&message("b@example.com"), None).await;
        assert_eq!(router.circuit_states()["flaky"], CircuitState::Open);

        // Open providers are never selected for fresh attempts
        let result = router.route_email(&message("c@example.com"), None).await;
        assert_eq!(result.attempted_providers, vec!["steady"]);
        let result = router
            .route_email(&message("d@example.com"), Some("flaky"))
            .await;
        assert_eq!(result.attempted_providers, vec!["steady"]);
        assert_eq!(flaky.sent_count(), 2);

        // The state only moves when a routing attempt happens
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(router.circuit_states()["flaky"], CircuitState::Open);

        flaky.set_failing(false);
        let result = router
            .route_email(&message("e@example.com"), Some("flaky"))
            .await;
        assert_eq!(result.provider.as_deref(), Some("flaky"));
        assert_eq!(router.circuit_states()["flaky"], CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_circuit() {
        let flaky = MockProvider::new("flaky").reliability(0.99).failing().into_arc();
        let steady = MockProvider::new("steady").reliability(0.1).into_arc();
        let router = router(vec![flaky.clone(), steady], &config());

        router.route_email(&message("a@example.com"), None).await;
        router.route_email(&message("b@example.com"), None).await;

        tokio::time::advance(Duration::from_secs(31)).await;
        let result = router
            .route_email(&message("c@example.com"), Some("flaky"))
            .await;
        assert_eq!(result.attempted_providers, vec!["flaky", "steady"]);
        assert_eq!(router.circuit_states()["flaky"], CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_while_half_open() {
        let flaky = MockProvider::new("flaky").reliability(0.99).failing().into_arc();
        let steady = MockProvider::new("steady").reliability(0.1).into_arc();
        let router = router(vec![flaky.clone(), steady.clone()], &config());

        router.route_email(&message("a@example.com"), None).await;
        router.route_email(&message("b@example.com"), None).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        flaky.set_failing(false);
        flaky.set_delay(Duration::from_secs(1));

        let first = message("c@example.com");
        let second = message("d@example.com");
        let (trial, other) = tokio::join!(
            router.route_email(&first, Some("flaky")),
            router.route_email(&second, Some("flaky")),
        );

        assert_eq!(trial.provider.as_deref(), Some("flaky"));
        assert_eq!(other.provider.as_deref(), Some("steady"));
        assert_eq!(router.circuit_states()["flaky"], CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_reopens_circuit() {
        let flaky = MockProvider::new("flaky").reliability(0.99).failing().into_arc();
        let steady = MockProvider::new("steady").reliability(0.1).into_arc();
        let router = router(vec![flaky.clone(), steady], &config());

        router.route_email(&message("a@example.com"), None).await;
        router.route_email(&message("b@example.com"), None).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        // The caller gives up while the trial send is still running
        flaky.set_failing(false);
        flaky.set_delay(Duration::from_secs(2));
        let trial = message("c@example.com");
        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            router.route_email(&trial, Some("flaky")),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(router.circuit_states()["flaky"], CircuitState::Open);

        // The reset timeout restarted; a later trial can close the circuit
        flaky.set_delay(Duration::ZERO);
        let result = router.route_email(&message("d@example.com"), None).await;
        assert_eq!(result.attempted_providers, vec!["steady"]);

        tokio::time::advance(Duration::from_secs(31)).await;
        let result = router.route_email(&message("e@example.com"), None).await;
        assert_eq!(result.provider.as_deref(), Some("flaky"));
        assert_eq!(router.circuit_states()["flaky"], CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failures_counted_once() {
        let solo = MockProvider::new("solo")
            .failing()
            .delay(Duration::from_millis(10))
            .into_arc();
        let router = router(vec![solo.clone()], &config());

        let messages: Vec<Message> = (0..5)
            .map(|i| message(&format!("user{}@example.com", i)))
            .collect();
        let results = join_all(messages.iter().map(|m| router.route_email(m, None))).await;

        assert!(results.iter().all(|r| !r.success));
        assert_eq!(solo.sent_count(), 5);

        let metrics = &router.get_metrics()["solo"];
        assert_eq!(metrics.total_requests, 5);
        assert_eq!(metrics.failed_requests, 5);
        assert_eq!(router.circuit_states()["solo"], CircuitState::Open);

        let text = router.prometheus().encode_text();
        assert!(
            text.contains(r#"mailfleet_circuit_transitions_total{provider="solo",state="open"} 1"#),
            "{}",
            text
        );
        assert!(text.contains(r#"mailfleet_provider_sends_total{outcome="failure",provider="solo"} 5"#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout_is_failure() {
        let slow = MockProvider::new("slow")
            .reliability(0.99)
            .delay(Duration::from_secs(60))
            .into_arc();
        let fast = MockProvider::new("fast").reliability(0.5).into_arc();
        let router = router(vec![slow, fast], &config());

        let result = router.route_email(&message("a@example.com"), None).await;
        assert_eq!(result.provider.as_deref(), Some("fast"));
        assert_eq!(router.get_metrics()["slow"].failed_requests, 1);
    }

    #[tokio::test]
    async fn test_route_bulk_preserves_order() {
        let a = MockProvider::new("a").into_arc();
        let b = MockProvider::new("b").into_arc();
        let router = router(vec![a.clone(), b.clone()], &config());

        let messages: Vec<Message> = (0..5)
            .map(|i| message(&format!("user{}@example.com", i)))
            .collect();
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();

        let bulk = router.route_bulk(messages).await;
        assert_eq!(bulk.total, 5);
        assert_eq!(bulk.results.len(), 5);
        assert_eq!(bulk.successful + bulk.failed, 5);

        // Contiguous chunks of ceil(5 / 2) = 3
        assert_eq!(a.sent_ids(), ids[..3].to_vec());
        assert_eq!(b.sent_ids(), ids[3..].to_vec());
        assert_eq!(bulk.results[0].provider.as_deref(), Some("a"));
        assert_eq!(bulk.results[4].provider.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_route_bulk_uses_native_bulk() {
        let native = MockProvider::new("native").with_bulk().into_arc();
        let router = router(vec![native.clone()], &config());

        let messages = vec![message("a@example.com"), message("b@example.com")];
        let bulk = router.route_bulk(messages).await;

        assert_eq!(bulk.successful, 2);
        assert_eq!(native.bulk_calls(), 1);
        assert_eq!(native.sent_count(), 0);
        assert_eq!(router.get_metrics()["native"].total_requests, 2);
    }

    #[tokio::test]
    async fn test_route_bulk_falls_back_when_bulk_call_fails() {
        let native = MockProvider::new("native").with_bulk().bulk_failing().into_arc();
        let router = router(vec![native.clone()], &config());

        let bulk = router
            .route_bulk(vec![message("a@example.com"), message("b@example.com")])
            .await;

        assert_eq!(bulk.total, 2);
        assert_eq!(bulk.successful, 2);
        assert_eq!(native.bulk_calls(), 1);
        assert_eq!(native.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_route_bulk_all_failing_counts_every_message() {
        let a = MockProvider::new("a").failing().into_arc();
        let b = MockProvider::new("b").failing().into_arc();
        let router = router(vec![a, b], &config());

        let messages: Vec<Message> = (0..4)
            .map(|i| message(&format!("user{}@example.com", i)))
            .collect();
        let bulk = router.route_bulk(messages).await;

        assert_eq!(bulk.results.len(), 4);
        assert_eq!(bulk.failed, 4);
        assert_eq!(bulk.successful, 0);
    }

    #[tokio::test]
    async fn test_route_bulk_empty() {
        let router = router(vec![MockProvider::new("a").into_arc()], &config());
        let bulk = router.route_bulk(Vec::new()).await;
        assert_eq!(bulk.total, 0);
        assert!(bulk.results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_probe_timeout() {
        let stuck = MockProvider::new("stuck")
            .health_delay(Duration::from_secs(60))
            .into_arc();
        let mut config = config();
        config.health.probe_timeout_secs = 2;
        let router = router(vec![stuck], &config);

        router.check_health_now().await;
        let health = &router.get_health()["stuck"];
        assert!(!health.healthy);
        assert_eq!(health.issues, vec![HEALTH_CHECK_TIMED_OUT]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_monitor_polls_until_shutdown() {
        let provider = MockProvider::new("a").into_arc();
        let mut config = config();
        config.health.interval_secs = 10;
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone()).unwrap();
        let router = ProviderRouter::start(registry, &config).unwrap();

        tokio::time::sleep(Duration::from_secs(25)).await;
        let polled = provider.health_checks();
        assert_eq!(polled, 3);

        router.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(provider.health_checks(), polled);
    }

    #[tokio::test]
    async fn test_health_does_not_touch_circuit() {
        let provider = MockProvider::new("a").unhealthy().into_arc();
        let router = router(vec![provider], &config());

        router.check_health_now().await;
        assert!(!router.get_health()["a"].healthy);
        assert_eq!(router.circuit_states()["a"], CircuitState::Closed);

        let result = router.route_email(&message("a@example.com"), None).await;
        assert!(!result.success);
        assert!(result.attempted_providers.is_empty());
    }

    #[tokio::test]
    async fn test_reset_metrics() {
        let provider = MockProvider::new("a").failing().into_arc();
        let router = router(vec![provider], &config());

        router.route_email(&message("a@example.com"), None).await;
        assert_eq!(router.get_metrics()["a"].total_requests, 1);
        assert_eq!(router.get_health()["a"].error_rate, 1.0);

        router.reset_metrics();
        assert_eq!(router.get_metrics()["a"], ProviderMetrics::default());
        assert_eq!(router.get_health()["a"].error_rate, 0.0);
    }
}
