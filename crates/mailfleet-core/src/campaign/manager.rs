//! Campaign Manager - Manages campaign lifecycle

use super::{AudienceService, CampaignScheduler};
use chrono::{DateTime, Utc};
use mailfleet_common::config::CampaignConfig;
use mailfleet_common::types::{CampaignId, EmailAddress, ExecutionId, OrganizationId};
use mailfleet_storage::{
    AbTestConfig, Campaign, CampaignExecution, CampaignRepository, CampaignSchedule,
    CampaignStatus, CreateCampaign, ExecutionRepository, SendingConfig, UpdateCampaign,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Campaign errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Campaign is not in draft status")]
    NotDraft,

    #[error("Campaign is not running")]
    NotRunning,

    #[error("Cannot modify campaign in {0} status")]
    NotModifiable(CampaignStatus),

    #[error("Cannot schedule campaign in the past")]
    ScheduleInPast,

    #[error("Execution not found")]
    ExecutionNotFound,

    /// Input validation failure; the message is part of the contract
    #[error("{0}")]
    Validation(String),

    #[error("Audience service error: {0}")]
    Audience(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error(transparent)]
    Storage(#[from] mailfleet_common::Error),
}

impl CampaignError {
    fn invalid(message: &str) -> Self {
        CampaignError::Validation(message.to_string())
    }
}

/// Check a campaign definition before it is stored
pub(crate) fn validate_campaign(
    template_id: &str,
    audience_segment_ids: &[String],
    sending_config: &SendingConfig,
    ab_test_config: Option<&AbTestConfig>,
) -> Result<(), CampaignError> {
    if template_id.trim().is_empty() {
        return Err(CampaignError::invalid("Template ID is required"));
    }

    if audience_segment_ids.is_empty() {
        return Err(CampaignError::invalid(
            "At least one audience segment is required",
        ));
    }

    if !EmailAddress::is_valid(&sending_config.from_email) {
        return Err(CampaignError::invalid("Valid from email is required"));
    }

    if sending_config.subject.trim().is_empty() {
        return Err(CampaignError::invalid("Subject line is required"));
    }

    if sending_config.batch_size == Some(0) {
        return Err(CampaignError::invalid("Batch size must be greater than 0"));
    }

    if let Some(ab) = ab_test_config.filter(|ab| ab.enabled) {
        if ab.variants.len() < 2 {
            return Err(CampaignError::invalid(
                "A/B test requires at least 2 variants",
            ));
        }

        if ab
            .variants
            .iter()
            .any(|v| !(0.0..=100.0).contains(&v.percentage))
        {
            return Err(CampaignError::invalid(
                "A/B test variant percentages must be between 0 and 100",
            ));
        }

        let total: f64 = ab.variants.iter().map(|v| v.percentage).sum();
        if (total - 100.0).abs() > 0.01 {
            return Err(CampaignError::invalid(
                "A/B test variant percentages must sum to 100%",
            ));
        }

        if ab.test_duration_hours < 1.0 {
            return Err(CampaignError::invalid(
                "A/B test duration must be at least 1 hour",
            ));
        }
    }

    Ok(())
}

/// Campaign Manager - Manages campaign lifecycle
pub struct CampaignManager {
    campaigns: Arc<dyn CampaignRepository>,
    executions: Arc<dyn ExecutionRepository>,
    audience: Arc<dyn AudienceService>,
    scheduler: Arc<dyn CampaignScheduler>,
    config: CampaignConfig,
}

impl CampaignManager {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        executions: Arc<dyn ExecutionRepository>,
        audience: Arc<dyn AudienceService>,
        scheduler: Arc<dyn CampaignScheduler>,
        config: CampaignConfig,
    ) -> Self {
        Self {
            campaigns,
            executions,
            audience,
            scheduler,
            config,
        }
    }

    async fn audience_count(&self, segments: &[String], excluded: &[String]) -> Result<usize, CampaignError> {
        self.audience
            .count(segments, excluded)
            .await
            .map_err(|e| CampaignError::Audience(e.to_string()))
    }

    /// Validate and store a new draft campaign
    pub async fn create_campaign(&self, input: CreateCampaign) -> Result<Campaign, CampaignError> {
        validate_campaign(
            &input.template_id,
            &input.audience_segment_ids,
            &input.sending_config,
            input.ab_test_config.as_ref(),
        )?;

        let audience_count = self
            .audience_count(&input.audience_segment_ids, &input.excluded_segment_ids)
            .await?;

        let campaign = self
            .campaigns
            .insert(Campaign::from_input(input, audience_count))
            .await?;

        info!(
            campaign_id = %campaign.id,
            organization_id = %campaign.organization_id,
            audience_count,
            "Campaign created"
        );

        Ok(campaign)
    }

    pub async fn get_campaign(&self, campaign_id: CampaignId) -> Result<Campaign, CampaignError> {
        self.campaigns
            .get(campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    /// Campaigns of an organization, newest first
    pub async fn list_campaigns(
        &self,
        organization_id: OrganizationId,
    ) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self.campaigns.list_by_organization(organization_id).await?)
    }

    /// Merge changes into a campaign that is not running or finished
    pub async fn update_campaign(
        &self,
        campaign_id: CampaignId,
        update: UpdateCampaign,
    ) -> Result<Campaign, CampaignError> {
        let current = self.get_campaign(campaign_id).await?;
        Self::ensure_modifiable(current.status)?;

        let mut campaign = current.clone();
        let audience_changed = campaign.apply_update(update);

        validate_campaign(
            &campaign.template_id,
            &campaign.audience_segment_ids,
            &campaign.sending_config,
            campaign.ab_test_config.as_ref(),
        )?;

        if audience_changed {
            campaign.audience_count = self
                .audience_count(&campaign.audience_segment_ids, &campaign.excluded_segment_ids)
                .await?;
        }

        if !self
            .campaigns
            .update_if_status(&campaign, current.status)
            .await?
        {
            return Err(self.status_conflict(campaign_id).await);
        }

        info!(campaign_id = %campaign_id, audience_changed, "Campaign updated");
        Ok(campaign)
    }

    /// Delete a campaign that is not running or finished
    pub async fn delete_campaign(&self, campaign_id: CampaignId) -> Result<(), CampaignError> {
        let campaign = self.get_campaign(campaign_id).await?;
        Self::ensure_modifiable(campaign.status)?;

        let allowed = [
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::Paused,
        ];
        if !self.campaigns.delete_if_status(campaign_id, &allowed).await? {
            return Err(self.status_conflict(campaign_id).await);
        }

        info!(campaign_id = %campaign_id, "Campaign deleted");
        Ok(())
    }

    /// Schedule a draft campaign and hand it to the external scheduler
    pub async fn schedule_campaign(
        &self,
        campaign_id: CampaignId,
        send_at: DateTime<Utc>,
        timezone: &str,
    ) -> Result<Campaign, CampaignError> {
        let current = self.get_campaign(campaign_id).await?;

        if !matches!(
            current.status,
            CampaignStatus::Draft | CampaignStatus::Scheduled
        ) {
            return Err(CampaignError::NotDraft);
        }

        if timezone.trim().is_empty() {
            return Err(CampaignError::invalid("Timezone is required"));
        }

        if send_at < Utc::now() && !self.config.allow_past_schedule {
            return Err(CampaignError::ScheduleInPast);
        }

        let mut campaign = current.clone();
        campaign.status = CampaignStatus::Scheduled;
        campaign.schedule = Some(CampaignSchedule {
            send_at,
            timezone: timezone.to_string(),
        });
        campaign.updated_at = Utc::now();

        if !self
            .campaigns
            .update_if_status(&campaign, current.status)
            .await?
        {
            return Err(CampaignError::NotDraft);
        }

        if let Err(e) = self
            .scheduler
            .schedule_at(campaign_id, send_at, timezone)
            .await
        {
            warn!(campaign_id = %campaign_id, error = %e, "Scheduler rejected campaign, reverting");
            if let Err(revert) = self
                .campaigns
                .update_if_status(&current, CampaignStatus::Scheduled)
                .await
            {
                warn!(campaign_id = %campaign_id, error = %revert, "Failed to revert schedule");
            }
            return Err(CampaignError::Scheduler(e.to_string()));
        }

        info!(
            campaign_id = %campaign_id,
            send_at = %send_at,
            timezone,
            "Campaign scheduled"
        );
        Ok(campaign)
    }

    /// Stop a running campaign after its in-flight batch
    pub async fn pause_campaign(&self, campaign_id: CampaignId) -> Result<Campaign, CampaignError> {
        if !self
            .campaigns
            .transition_status(
                campaign_id,
                &[CampaignStatus::Running],
                CampaignStatus::Paused,
            )
            .await
            .map_err(Self::not_found)?
        {
            return Err(CampaignError::NotRunning);
        }

        info!(campaign_id = %campaign_id, "Campaign paused");
        self.get_campaign(campaign_id).await
    }

    /// Cancel a campaign that has not finished
    pub async fn cancel_campaign(&self, campaign_id: CampaignId) -> Result<Campaign, CampaignError> {
        let from = [
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::Running,
            CampaignStatus::Paused,
        ];

        if !self
            .campaigns
            .transition_status(campaign_id, &from, CampaignStatus::Cancelled)
            .await
            .map_err(Self::not_found)?
        {
            return Err(self.status_conflict(campaign_id).await);
        }

        info!(campaign_id = %campaign_id, "Campaign cancelled");
        self.get_campaign(campaign_id).await
    }

    pub async fn get_execution(
        &self,
        execution_id: ExecutionId,
    ) -> Result<CampaignExecution, CampaignError> {
        self.executions
            .get(execution_id)
            .await?
            .ok_or(CampaignError::ExecutionNotFound)
    }

    /// Executions of a campaign, oldest first
    pub async fn list_executions(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<CampaignExecution>, CampaignError> {
        Ok(self.executions.list_by_campaign(campaign_id).await?)
    }

    fn ensure_modifiable(status: CampaignStatus) -> Result<(), CampaignError> {
        if status == CampaignStatus::Running || status.is_terminal() {
            return Err(CampaignError::NotModifiable(status));
        }
        Ok(())
    }

    /// Error for a write that lost a race with a status change
    async fn status_conflict(&self, campaign_id: CampaignId) -> CampaignError {
        match self.campaigns.get(campaign_id).await {
            Ok(Some(campaign)) => CampaignError::NotModifiable(campaign.status),
            Ok(None) => CampaignError::NotFound,
            Err(e) => CampaignError::Storage(e),
        }
    }

    fn not_found(e: mailfleet_common::Error) -> CampaignError {
        match e {
            mailfleet_common::Error::NotFound(_) => CampaignError::NotFound,
            other => CampaignError::Storage(other),
        }
    }
}
