//! Provider and router metrics

use super::circuit_breaker::CircuitState;
use chrono::{DateTime, Utc};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rolling per-provider counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Cumulative mean over every recorded attempt
    pub average_response_time_ms: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl ProviderMetrics {
    /// Share of successful attempts; 1.0 with no history
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }

    pub fn record(&mut self, success: bool, elapsed: Duration) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.total_requests += 1;
        self.average_response_time_ms +=
            (elapsed_ms - self.average_response_time_ms) / self.total_requests as f64;

        if success {
            self.successful_requests += 1;
            self.last_success = Some(Utc::now());
        } else {
            self.failed_requests += 1;
            self.last_failure = Some(Utc::now());
        }
    }
}

/// Prometheus collectors owned by one router
pub struct RouterMetrics {
    registry: Registry,
    sends: IntCounterVec,
    send_duration: HistogramVec,
    circuit_transitions: IntCounterVec,
    exhausted: IntCounter,
}

impl RouterMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("mailfleet".to_string()), None)?;

        let sends = IntCounterVec::new(
            Opts::new("provider_sends_total", "Send attempts by provider and outcome"),
            &["provider", "outcome"],
        )?;
        let send_duration = HistogramVec::new(
            HistogramOpts::new("provider_send_duration_seconds", "Provider send latency"),
            &["provider"],
        )?;
        let circuit_transitions = IntCounterVec::new(
            Opts::new(
                "circuit_transitions_total",
                "Circuit breaker transitions by provider and new state",
            ),
            &["provider", "state"],
        )?;
        let exhausted = IntCounter::new(
            "routing_exhausted_total",
            "Messages for which every provider failed",
        )?;

        registry.register(Box::new(sends.clone()))?;
        registry.register(Box::new(send_duration.clone()))?;
        registry.register(Box::new(circuit_transitions.clone()))?;
        registry.register(Box::new(exhausted.clone()))?;

        Ok(Self {
            registry,
            sends,
            send_duration,
            circuit_transitions,
            exhausted,
        })
    }

    pub fn observe_send(&self, provider: &str, success: bool, elapsed: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.sends.with_label_values(&[provider, outcome]).inc();
        self.send_duration
            .with_label_values(&[provider])
            .observe(elapsed.as_secs_f64());
    }

    pub fn observe_transition(&self, provider: &str, state: CircuitState) {
        self.circuit_transitions
            .with_label_values(&[provider, &state.to_string()])
            .inc();
    }

    pub fn observe_exhausted(&self) {
        self.exhausted.inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all collectors in the Prometheus text format
    pub fn encode_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode router metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
