//! External scheduler interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailfleet_common::types::CampaignId;

/// Triggers execution of a scheduled campaign at the requested time
#[async_trait]
pub trait CampaignScheduler: Send + Sync {
    async fn schedule_at(
        &self,
        campaign_id: CampaignId,
        at: DateTime<Utc>,
        timezone: &str,
    ) -> anyhow::Result<()>;
}
