//! Provider-facing message and result types

use chrono::{DateTime, Utc};
use mailfleet_common::config::ProviderFeature;
use mailfleet_common::types::{CampaignId, ContactId, OrganizationId, VariantId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Envelope sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub email: String,
    pub name: Option<String>,
}

impl Sender {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Kind of traffic a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Transactional,
    Marketing,
}

impl MessageType {
    /// Provider feature that matches this traffic
    pub fn feature(&self) -> ProviderFeature {
        match self {
            MessageType::Transactional => ProviderFeature::Transactional,
            MessageType::Marketing => ProviderFeature::Marketing,
        }
    }
}

/// Outbound email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Local id, reported to analytics
    pub id: Uuid,
    pub to: String,
    pub from: Sender,
    pub reply_to: Option<String>,
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub organization_id: OrganizationId,
    pub campaign_id: Option<CampaignId>,
    pub variant_id: Option<VariantId>,
    pub contact_id: Option<ContactId>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub template_data: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Explicit type; inferred when unset
    pub message_type: Option<MessageType>,
}

impl Message {
    /// Create a message with no body
    pub fn new(
        organization_id: OrganizationId,
        from: Sender,
        to: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            to: to.into(),
            from,
            reply_to: None,
            subject: subject.into(),
            html_body: None,
            text_body: None,
            organization_id,
            campaign_id: None,
            variant_id: None,
            contact_id: None,
            template_id: None,
            template_data: BTreeMap::new(),
            tags: Vec::new(),
            headers: BTreeMap::new(),
            message_type: None,
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html_body = Some(html.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_body = Some(text.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    /// Effective message type.
    ///
    /// Campaign mail and anything tagged `marketing` counts as marketing.
    pub fn message_type(&self) -> MessageType {
        if let Some(explicit) = self.message_type {
            return explicit;
        }
        if self.campaign_id.is_some() || self.tags.iter().any(|t| t == "marketing") {
            MessageType::Marketing
        } else {
            MessageType::Transactional
        }
    }
}

/// Classification of a failed send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendErrorKind {
    InvalidMessage,
    Rejected,
    Unavailable,
    Timeout,
    Unsupported,
    /// Every admissible provider was tried and failed
    Exhausted,
    Other,
}

/// Outcome of routing one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    /// Provider that produced the final outcome
    pub provider: Option<String>,
    /// Provider-assigned id on success
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<SendErrorKind>,
    /// Providers tried, in order
    pub attempted_providers: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl SendResult {
    pub fn sent(provider: &str, message_id: String, attempted_providers: Vec<String>) -> Self {
        Self {
            success: true,
            provider: Some(provider.to_string()),
            message_id: Some(message_id),
            error: None,
            error_kind: None,
            attempted_providers,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        provider: Option<&str>,
        error: impl Into<String>,
        kind: SendErrorKind,
        attempted_providers: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            provider: provider.map(str::to_string),
            message_id: None,
            error: Some(error.into()),
            error_kind: Some(kind),
            attempted_providers,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of routing a batch of messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// One entry per input message, in input order
    pub results: Vec<SendResult>,
}

impl BulkResult {
    pub fn from_results(results: Vec<SendResult>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }
}

/// Health snapshot of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub healthy: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u64>,
    /// Share of failed sends, 0.0 to 1.0
    pub error_rate: f64,
    pub issues: Vec<String>,
}

impl ProviderHealth {
    /// Initial state before any probe ran
    pub fn unknown(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            healthy: true,
            last_checked: None,
            response_time_ms: None,
            error_rate: 0.0,
            issues: Vec::new(),
        }
    }

    pub fn healthy(provider: &str, response_time_ms: u64) -> Self {
        Self {
            provider: provider.to_string(),
            healthy: true,
            last_checked: Some(Utc::now()),
            response_time_ms: Some(response_time_ms),
            error_rate: 0.0,
            issues: Vec::new(),
        }
    }

    pub fn unhealthy(provider: &str, issue: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            healthy: false,
            last_checked: Some(Utc::now()),
            response_time_ms: None,
            error_rate: 0.0,
            issues: vec![issue.into()],
        }
    }
}

/// Static description of what a provider can do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Reliability estimate between 0.0 and 1.0
    pub reliability: f64,
    pub features: Vec<ProviderFeature>,
    pub supports_bulk: bool,
}

impl ProviderCapabilities {
    pub fn new(reliability: f64, features: Vec<ProviderFeature>) -> Self {
        Self {
            reliability,
            features,
            supports_bulk: false,
        }
    }

    pub fn with_bulk(mut self) -> Self {
        self.supports_bulk = true;
        self
    }

    pub fn supports(&self, message_type: MessageType) -> bool {
        self.features.contains(&message_type.feature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message::new(Uuid::new_v4(), Sender::new("news@example.com"), "a@example.com", "Hi")
    }

    #[test]
    fn test_message_type_inference() {
        assert_eq!(message().message_type(), MessageType::Transactional);

        let tagged = message().with_tag("marketing");
        assert_eq!(tagged.message_type(), MessageType::Marketing);

        let mut campaign = message();
        campaign.campaign_id = Some(Uuid::new_v4());
        assert_eq!(campaign.message_type(), MessageType::Marketing);

        let explicit = campaign.with_type(MessageType::Transactional);
        assert_eq!(explicit.message_type(), MessageType::Transactional);
    }

    #[test]
    fn test_bulk_result_counts() {
        let results = vec![
            SendResult::sent("a", "id-1".to_string(), vec!["a".to_string()]),
            SendResult::failed(None, "nope", SendErrorKind::Exhausted, vec![]),
            SendResult::sent("b", "id-2".to_string(), vec!["b".to_string()]),
        ];

        let bulk = BulkResult::from_results(results);
        assert_eq!(bulk.total, 3);
        assert_eq!(bulk.successful, 2);
        assert_eq!(bulk.failed, 1);
    }

    #[test]
    fn test_capabilities_feature_match() {
        let caps = ProviderCapabilities::new(0.9, vec![ProviderFeature::Marketing]);
        assert!(caps.supports(MessageType::Marketing));
        assert!(!caps.supports(MessageType::Transactional));
        assert!(!caps.supports_bulk);
        assert!(caps.with_bulk().supports_bulk);
    }
}
