//! Provider scoring

use super::metrics::ProviderMetrics;
use crate::providers::{MessageType, ProviderCapabilities};
use std::cmp::Ordering;

/// Bonus for a provider whose features match the message type
pub const FEATURE_MATCH_BONUS: f64 = 25.0;

/// Score a provider for a message; higher is better
pub fn score(
    capabilities: &ProviderCapabilities,
    metrics: &ProviderMetrics,
    message_type: MessageType,
) -> f64 {
    let feature_bonus = if capabilities.supports(message_type) {
        FEATURE_MATCH_BONUS
    } else {
        0.0
    };

    capabilities.reliability * 100.0 + metrics.success_rate() * 50.0 + feature_bonus
}

/// An admissible provider with its score
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// Declaration index
    pub index: usize,
    pub score: f64,
    pub average_response_time_ms: f64,
}

/// Order candidates best first.
///
/// Highest score wins, then lowest average response time, then
/// declaration order.
pub fn rank(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(
                a.average_response_time_ms
                    .partial_cmp(&b.average_response_time_ms)
                    .unwrap_or(Ordering::Equal),
            )
            .then(a.index.cmp(&b.index))
    });
    candidates
}
