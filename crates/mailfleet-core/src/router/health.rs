//! Background provider health monitoring

use super::RouterInner;
use crate::providers::{EmailProvider, ProviderHealth};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const HEALTH_CHECK_TIMED_OUT: &str = "Health check timed out";

/// Run one provider's probe, bounded by `timeout`
pub async fn probe(provider: &dyn EmailProvider, timeout: Duration) -> ProviderHealth {
    match tokio::time::timeout(timeout, provider.check_health()).await {
        Ok(health) => health,
        Err(_) => ProviderHealth::unhealthy(provider.name(), HEALTH_CHECK_TIMED_OUT),
    }
}

/// Probe every provider concurrently and store the results
pub(crate) async fn check_all(inner: &RouterInner) {
    let probes = inner.slots.iter().map(|slot| async move {
        let mut health = probe(slot.provider.as_ref(), inner.probe_timeout).await;
        health.error_rate = slot.error_rate();

        if health.healthy {
            debug!(provider = %slot.name(), response_time_ms = ?health.response_time_ms, "Provider healthy");
        } else {
            warn!(provider = %slot.name(), issues = ?health.issues, "Provider unhealthy");
        }

        *slot.health.write() = health;
    });

    join_all(probes).await;
}

/// Spawn the periodic health loop; it exits when `token` is cancelled
pub(crate) fn spawn(
    inner: Arc<RouterInner>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = interval.as_secs(),
            providers = inner.slots.len(),
            "Health monitor started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = check_all(&inner) => {}
                    }
                }
            }
        }

        info!("Health monitor stopped");
    })
}
