//! Campaign repository

use crate::models::{Campaign, CampaignStatus};
use async_trait::async_trait;
use chrono::Utc;
use mailfleet_common::types::{CampaignId, OrganizationId};
use mailfleet_common::{Error, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn insert(&self, campaign: Campaign) -> Result<Campaign>;
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn list_by_organization(&self, organization_id: OrganizationId) -> Result<Vec<Campaign>>;

    /// Replace a stored campaign if its status still equals `expected`.
    ///
    /// Returns false when the status moved on since the caller read it.
    async fn update_if_status(&self, campaign: &Campaign, expected: CampaignStatus)
        -> Result<bool>;

    /// Delete a campaign if its status is one of `allowed`
    async fn delete_if_status(&self, id: CampaignId, allowed: &[CampaignStatus]) -> Result<bool>;

    /// Compare-and-set the campaign status.
    ///
    /// Moves the campaign to `to` only if its current status is in `from`,
    /// stamping `started_at` on entering running and `completed_at` on
    /// entering a terminal status.
    async fn transition_status(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<bool>;
}

/// In-memory campaign repository
#[derive(Default)]
pub struct InMemoryCampaignRepository {
    campaigns: RwLock<HashMap<CampaignId, Campaign>>,
}

impl InMemoryCampaignRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignRepository for InMemoryCampaignRepository {
    async fn insert(&self, campaign: Campaign) -> Result<Campaign> {
        let mut campaigns = self.campaigns.write().await;
        if campaigns.contains_key(&campaign.id) {
            return Err(Error::Conflict(format!(
                "Campaign {} already exists",
                campaign.id
            )));
        }
        campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.campaigns.read().await.get(&id).cloned())
    }

    async fn list_by_organization(&self, organization_id: OrganizationId) -> Result<Vec<Campaign>> {
        let campaigns = self.campaigns.read().await;
        let mut result: Vec<Campaign> = campaigns
            .values()
            .filter(|c| c.organization_id == organization_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn update_if_status(
        &self,
        campaign: &Campaign,
        expected: CampaignStatus,
    ) -> Result<bool> {
        let mut campaigns = self.campaigns.write().await;
        let stored = campaigns
            .get_mut(&campaign.id)
            .ok_or_else(|| Error::NotFound("Campaign not found".to_string()))?;

        if stored.status != expected {
            return Ok(false);
        }

        *stored = campaign.clone();
        Ok(true)
    }

    async fn delete_if_status(&self, id: CampaignId, allowed: &[CampaignStatus]) -> Result<bool> {
        let mut campaigns = self.campaigns.write().await;
        let status = campaigns
            .get(&id)
            .map(|c| c.status)
            .ok_or_else(|| Error::NotFound("Campaign not found".to_string()))?;

        if !allowed.contains(&status) {
            return Ok(false);
        }

        campaigns.remove(&id);
        Ok(true)
    }

    async fn transition_status(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<bool> {
        let mut campaigns = self.campaigns.write().await;
        let campaign = campaigns
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound("Campaign not found".to_string()))?;

        if !from.contains(&campaign.status) {
            debug!(
                campaign_id = %id,
                current = %campaign.status,
                requested = %to,
                "Status transition rejected"
            );
            return Ok(false);
        }

        let now = Utc::now();
        campaign.status = to;
        campaign.updated_at = now;
        if to == CampaignStatus::Running && campaign.started_at.is_none() {
            campaign.started_at = Some(now);
        }
        if to.is_terminal() {
            campaign.completed_at = Some(now);
        }

        Ok(true)
    }
}
