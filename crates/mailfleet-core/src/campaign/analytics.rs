//! Analytics sink interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailfleet_common::types::{CampaignId, ContactId, OrganizationId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEventType {
    EmailSent,
    EmailFailed,
}

impl std::fmt::Display for AnalyticsEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalyticsEventType::EmailSent => write!(f, "email_sent"),
            AnalyticsEventType::EmailFailed => write!(f, "email_failed"),
        }
    }
}

/// Terminal outcome of one campaign send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_type: AnalyticsEventType,
    pub email_id: Uuid,
    pub contact_id: Option<ContactId>,
    pub campaign_id: Option<CampaignId>,
    pub organization_id: OrganizationId,
    /// Provider, variant, provider message id or error
    pub metadata: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Event store consumed by the executor; best effort
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn record_event(&self, event: AnalyticsEvent) -> anyhow::Result<()>;
}
