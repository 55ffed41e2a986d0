//! Scripted collaborators for unit tests

use crate::campaign::{
    AnalyticsEvent, AnalyticsSink, AudienceService, CampaignScheduler, Contact, Shuffler,
};
use crate::providers::{
    BulkItemResult, EmailProvider, Message, ProviderCapabilities, ProviderError, ProviderHealth,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailfleet_common::config::ProviderFeature;
use mailfleet_common::types::CampaignId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Provider whose outcomes are controlled by the test
pub struct MockProvider {
    name: String,
    capabilities: ProviderCapabilities,
    failing: AtomicBool,
    bulk_failing: AtomicBool,
    healthy: AtomicBool,
    delay: Mutex<Duration>,
    health_delay: Duration,
    /// Recipients that always fail on this provider
    failing_recipients: Mutex<Vec<String>>,
    sent: Mutex<Vec<Message>>,
    bulk_calls: AtomicUsize,
    health_checks: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: ProviderCapabilities::new(0.9, Vec::new()),
            failing: AtomicBool::new(false),
            bulk_failing: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            delay: Mutex::new(Duration::ZERO),
            health_delay: Duration::ZERO,
            failing_recipients: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            bulk_calls: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
        }
    }

    pub fn reliability(mut self, reliability: f64) -> Self {
        self.capabilities.reliability = reliability;
        self
    }

    pub fn features(mut self, features: Vec<ProviderFeature>) -> Self {
        self.capabilities.features = features;
        self
    }

    pub fn with_bulk(mut self) -> Self {
        self.capabilities.supports_bulk = true;
        self
    }

    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    pub fn bulk_failing(self) -> Self {
        self.bulk_failing.store(true, Ordering::SeqCst);
        self
    }

    pub fn unhealthy(self) -> Self {
        self.healthy.store(false, Ordering::SeqCst);
        self
    }

    pub fn delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    pub fn health_delay(mut self, delay: Duration) -> Self {
        self.health_delay = delay;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn fail_recipient(&self, recipient: &str) {
        self.failing_recipients.lock().push(recipient.to_string());
    }

    /// Single sends attempted, successful or not
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn sent_ids(&self) -> Vec<Uuid> {
        self.sent.lock().iter().map(|m| m.id).collect()
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    fn outcome(&self, message: &Message, n: usize) -> Result<String, ProviderError> {
        if self.failing.load(Ordering::SeqCst)
            || self.failing_recipients.lock().contains(&message.to)
        {
            Err(ProviderError::Unavailable(format!("{} is down", self.name)))
        } else {
            Ok(format!("{}-{}", self.name, n))
        }
    }
}

#[async_trait]
impl EmailProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn send(&self, message: &Message) -> Result<String, ProviderError> {
        let n = {
            let mut sent = self.sent.lock();
            sent.push(message.clone());
            sent.len()
        };

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.outcome(message, n)
    }

    async fn send_bulk(&self, messages: &[Message]) -> Result<Vec<BulkItemResult>, ProviderError> {
        if !self.capabilities.supports_bulk {
            return Err(ProviderError::Unsupported);
        }

        let call = self.bulk_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.bulk_failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("bulk endpoint down".to_string()));
        }

        Ok(messages
            .iter()
            .enumerate()
            .map(|(i, m)| self.outcome(m, call * 1000 + i))
            .collect())
    }

    async fn check_health(&self) -> ProviderHealth {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        if !self.health_delay.is_zero() {
            tokio::time::sleep(self.health_delay).await;
        }

        if self.healthy.load(Ordering::SeqCst) {
            ProviderHealth::healthy(&self.name, 1)
        } else {
            ProviderHealth::unhealthy(&self.name, "probe failed")
        }
    }
}

/// Audience returning a fixed contact list
#[derive(Default)]
pub struct MockAudience {
    contacts: Vec<Contact>,
    error: Option<String>,
    counts: Mutex<HashMap<Vec<String>, usize>>,
    resolve_calls: AtomicUsize,
    count_calls: AtomicUsize,
}

impl MockAudience {
    pub fn with_contacts(count: usize) -> Self {
        Self {
            contacts: (0..count).map(|i| contact(&format!("user{}@example.com", i))).collect(),
            ..Default::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Count reported for a specific segment list
    pub fn set_count(&self, segments: &[&str], count: usize) {
        self.counts
            .lock()
            .insert(segments.iter().map(|s| s.to_string()).collect(), count);
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }
}

pub fn contact(email: &str) -> Contact {
    Contact {
        id: Uuid::new_v4(),
        email: email.to_string(),
        first_name: None,
        last_name: None,
        attributes: HashMap::new(),
    }
}

#[async_trait]
impl AudienceService for MockAudience {
    async fn resolve_contacts(
        &self,
        _segment_ids: &[String],
        _exclude_ids: &[String],
    ) -> anyhow::Result<Vec<Contact>> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(message) => Err(anyhow::anyhow!(message.clone())),
            None => Ok(self.contacts.clone()),
        }
    }

    async fn count(&self, segment_ids: &[String], _exclude_ids: &[String]) -> anyhow::Result<usize> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(count) = self.counts.lock().get(segment_ids) {
            return Ok(*count);
        }
        Ok(self.contacts.len())
    }
}

/// Sink recording every event
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AnalyticsEvent>>,
    failing: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl AnalyticsSink for RecordingSink {
    async fn record_event(&self, event: AnalyticsEvent) -> anyhow::Result<()> {
        self.events.lock().push(event);
        if self.failing {
            anyhow::bail!("analytics store unavailable");
        }
        Ok(())
    }
}

/// Scheduler recording every request
#[derive(Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<(CampaignId, DateTime<Utc>, String)>>,
}

impl RecordingScheduler {
    pub fn calls(&self) -> Vec<(CampaignId, DateTime<Utc>, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CampaignScheduler for RecordingScheduler {
    async fn schedule_at(
        &self,
        campaign_id: CampaignId,
        at: DateTime<Utc>,
        timezone: &str,
    ) -> anyhow::Result<()> {
        self.calls.lock().push((campaign_id, at, timezone.to_string()));
        Ok(())
    }
}

/// Shuffler that keeps the audience order
pub struct IdentityShuffler;

impl Shuffler for IdentityShuffler {
    fn shuffle(&self, _contacts: &mut [Contact]) {}
}
