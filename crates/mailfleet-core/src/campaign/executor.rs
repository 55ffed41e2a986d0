//! Campaign Executor - Sends a campaign through the provider router

use super::{
    AnalyticsEvent, AnalyticsEventType, AnalyticsSink, AudienceService, CampaignError, Contact,
    Shuffler, TemplateRenderer,
};
use crate::providers::{Message, SendResult, Sender};
use crate::router::ProviderRouter;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use mailfleet_common::config::CampaignConfig;
use mailfleet_common::types::CampaignId;
use mailfleet_storage::{
    AbTestConfig, AbVariant, Campaign, CampaignExecution, CampaignRepository, CampaignStatus,
    ExecutionRepository, ExecutionStatus, VariantResult,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Contacts assigned to one send group; `None` is the whole audience
struct SendGroup<'a> {
    variant: Option<&'a AbVariant>,
    contacts: Vec<Contact>,
}

/// Campaign executor
pub struct CampaignExecutor {
    campaigns: Arc<dyn CampaignRepository>,
    executions: Arc<dyn ExecutionRepository>,
    router: Arc<ProviderRouter>,
    audience: Arc<dyn AudienceService>,
    analytics: Arc<dyn AnalyticsSink>,
    shuffler: Arc<dyn Shuffler>,
    renderer: TemplateRenderer,
    config: CampaignConfig,
}

impl CampaignExecutor {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        executions: Arc<dyn ExecutionRepository>,
        router: Arc<ProviderRouter>,
        audience: Arc<dyn AudienceService>,
        analytics: Arc<dyn AnalyticsSink>,
        shuffler: Arc<dyn Shuffler>,
        config: CampaignConfig,
    ) -> Self {
        Self {
            campaigns,
            executions,
            router,
            audience,
            analytics,
            shuffler,
            renderer: TemplateRenderer::new(),
            config,
        }
    }

    /// Execute a draft or scheduled campaign to completion.
    ///
    /// Only lookup and status errors are returned; anything that goes wrong
    /// while sending is recorded on the returned execution.
    pub async fn execute_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<CampaignExecution, CampaignError> {
        let campaign = self
            .campaigns
            .get(campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)?;

        if !matches!(
            campaign.status,
            CampaignStatus::Draft | CampaignStatus::Scheduled
        ) {
            return Err(CampaignError::NotDraft);
        }

        // Claim the campaign before any execution exists
        if !self
            .campaigns
            .transition_status(
                campaign_id,
                &[CampaignStatus::Draft, CampaignStatus::Scheduled],
                CampaignStatus::Running,
            )
            .await?
        {
            return Err(CampaignError::NotDraft);
        }

        let mut execution = CampaignExecution::new(campaign_id);
        self.executions.save(&execution).await?;

        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        self.executions.save(&execution).await?;

        info!(
            campaign_id = %campaign_id,
            execution_id = %execution.id,
            "Campaign execution started"
        );

        match self.run(&campaign, &mut execution).await {
            Ok(()) => {
                // A campaign deleted mid-run finishes its execution as cancelled
                let completed = match self
                    .campaigns
                    .transition_status(
                        campaign_id,
                        &[CampaignStatus::Running],
                        CampaignStatus::Completed,
                    )
                    .await
                {
                    Ok(completed) => completed,
                    Err(e) => {
                        warn!(
                            campaign_id = %campaign_id,
                            error = %e,
                            "Failed to mark campaign completed"
                        );
                        false
                    }
                };

                if completed {
                    execution.finish(ExecutionStatus::Completed, None);
                    info!(
                        campaign_id = %campaign_id,
                        execution_id = %execution.id,
                        successful = execution.successful_sends,
                        failed = execution.failed_sends,
                        "Campaign execution completed"
                    );
                } else {
                    execution.finish(ExecutionStatus::Cancelled, None);
                    info!(
                        campaign_id = %campaign_id,
                        execution_id = %execution.id,
                        processed = execution.processed_contacts,
                        "Campaign execution stopped before completion"
                    );
                }
            }
            Err(e) => {
                error!(
                    campaign_id = %campaign_id,
                    execution_id = %execution.id,
                    error = %e,
                    "Campaign execution failed"
                );
                execution.finish(ExecutionStatus::Failed, Some(e.to_string()));

                if let Err(e) = self
                    .campaigns
                    .transition_status(
                        campaign_id,
                        &[CampaignStatus::Running, CampaignStatus::Paused],
                        CampaignStatus::Failed,
                    )
                    .await
                {
                    warn!(campaign_id = %campaign_id, error = %e, "Failed to mark campaign failed");
                }
            }
        }

        if let Err(e) = self.executions.save(&execution).await {
            error!(
                campaign_id = %campaign_id,
                execution_id = %execution.id,
                error = %e,
                "Failed to persist finished execution"
            );
        }
        Ok(execution)
    }

    async fn run(
        &self,
        campaign: &Campaign,
        execution: &mut CampaignExecution,
    ) -> anyhow::Result<()> {
        let contacts = self
            .audience
            .resolve_contacts(
                &campaign.audience_segment_ids,
                &campaign.excluded_segment_ids,
            )
            .await?;

        execution.total_contacts = contacts.len() as u64;
        self.executions.save(execution).await?;

        let groups = self.partition(campaign, contacts, execution);

        let batch_size = campaign
            .sending_config
            .batch_size
            .unwrap_or(self.config.default_batch_size)
            .max(1);
        let batch_delay = campaign
            .sending_config
            .send_rate_per_hour
            .filter(|rate| *rate > 0)
            .map(|rate| Duration::from_secs_f64(batch_size as f64 / rate as f64 * 3600.0));

        let mut dispatched = 0usize;
        for group in groups {
            let variant_index = group.variant.map(|variant| {
                execution.variant_results.push(VariantResult {
                    variant_id: variant.id.clone(),
                    contact_count: group.contacts.len() as u64,
                    successful_sends: 0,
                    failed_sends: 0,
                });
                execution.variant_results.len() - 1
            });

            for batch in group.contacts.chunks(batch_size) {
                if dispatched > 0 {
                    if let Some(delay) = batch_delay {
                        debug!(campaign_id = %campaign.id, delay_secs = delay.as_secs_f64(), "Rate limiting batch");
                        tokio::time::sleep(delay).await;
                    }
                }

                let status = self
                    .campaigns
                    .get(campaign.id)
                    .await?
                    .map(|c| c.status);
                if status != Some(CampaignStatus::Running) {
                    info!(
                        campaign_id = %campaign.id,
                        status = ?status,
                        "Campaign no longer running, stopping dispatch"
                    );
                    return Ok(());
                }

                let (successful, failed) = self.send_batch(campaign, group.variant, batch).await;
                dispatched += 1;

                execution.processed_contacts += batch.len() as u64;
                execution.successful_sends += successful;
                execution.failed_sends += failed;
                if let Some(index) = variant_index {
                    let result = &mut execution.variant_results[index];
                    result.successful_sends += successful;
                    result.failed_sends += failed;
                }

                self.executions.save(execution).await?;
                debug!(
                    campaign_id = %campaign.id,
                    processed = execution.processed_contacts,
                    total = execution.total_contacts,
                    "Batch dispatched"
                );
            }
        }

        Ok(())
    }

    /// Split the audience into send groups.
    ///
    /// A/B slices take `floor(percentage * total / 100)` contacts each, in
    /// declaration order; whatever is left is dropped.
    fn partition<'a>(
        &self,
        campaign: &'a Campaign,
        mut contacts: Vec<Contact>,
        execution: &mut CampaignExecution,
    ) -> Vec<SendGroup<'a>> {
        let ab = match campaign.ab_test_config.as_ref() {
            Some(ab) if AbTestConfig::is_active(Some(ab)) => ab,
            _ => {
                return vec![SendGroup {
                    variant: None,
                    contacts,
                }]
            }
        };

        self.shuffler.shuffle(&mut contacts);
        let total = contacts.len();
        let mut remaining = contacts.into_iter();

        let groups: Vec<SendGroup<'a>> = ab
            .variants
            .iter()
            .map(|variant| {
                let size = (variant.percentage / 100.0 * total as f64).floor() as usize;
                SendGroup {
                    variant: Some(variant),
                    contacts: remaining.by_ref().take(size).collect(),
                }
            })
            .collect();

        execution.dropped_contacts = remaining.count() as u64;
        if execution.dropped_contacts > 0 {
            warn!(
                campaign_id = %campaign.id,
                dropped = execution.dropped_contacts,
                "Contacts left out of every A/B variant"
            );
        }

        groups
    }

    /// Send one batch; returns (successful, failed)
    async fn send_batch(
        &self,
        campaign: &Campaign,
        variant: Option<&AbVariant>,
        batch: &[Contact],
    ) -> (u64, u64) {
        let successful = AtomicU64::new(0);
        let failed = AtomicU64::new(0);
        let (successful_ref, failed_ref) = (&successful, &failed);
        let preferred = campaign.sending_config.preferred_provider.as_deref();

        stream::iter(batch)
            .for_each_concurrent(self.config.worker_concurrency.max(1), move |contact| async move {
                let message = self.build_message(campaign, variant, contact);
                let result = self.router.route_email(&message, preferred).await;

                if result.success {
                    successful_ref.fetch_add(1, Ordering::Relaxed);
                } else {
                    failed_ref.fetch_add(1, Ordering::Relaxed);
                }

                self.record_outcome(campaign, variant, &message, &result).await;
            })
            .await;

        (successful.into_inner(), failed.into_inner())
    }

    fn build_message(
        &self,
        campaign: &Campaign,
        variant: Option<&AbVariant>,
        contact: &Contact,
    ) -> Message {
        let config = &campaign.sending_config;
        let variables = self.renderer.merge_variables(
            &campaign.template_variables,
            variant.map(|v| &v.template_variables),
            contact,
        );

        let subject_template = variant
            .and_then(|v| v.subject.as_deref())
            .unwrap_or(&config.subject);
        let subject = self.renderer.render(subject_template, &variables);

        let mut from = Sender::new(config.from_email.as_str());
        if let Some(name) = &config.from_name {
            from = from.with_name(name.as_str());
        }

        let mut message = Message::new(campaign.organization_id, from, contact.email.as_str(), subject);
        message.reply_to = config.reply_to.clone();
        message.campaign_id = Some(campaign.id);
        message.variant_id = variant.map(|v| v.id.clone());
        message.contact_id = Some(contact.id);
        message.template_id = Some(campaign.template_id.clone());
        message.template_data = variables;
        message.tags = campaign.tags.clone();

        message
            .headers
            .insert("X-Campaign-ID".to_string(), campaign.id.to_string());
        message
            .headers
            .insert("X-Contact-ID".to_string(), contact.id.to_string());
        if let Some(variant) = variant {
            message
                .headers
                .insert("X-Variant-ID".to_string(), variant.id.clone());
        }

        message
    }

    /// Report a terminal send outcome; analytics failures never stop a campaign
    async fn record_outcome(
        &self,
        campaign: &Campaign,
        variant: Option<&AbVariant>,
        message: &Message,
        result: &SendResult,
    ) {
        let mut metadata = BTreeMap::new();
        if let Some(provider) = &result.provider {
            metadata.insert("provider".to_string(), provider.clone());
        }
        if let Some(variant) = variant {
            metadata.insert("variant_id".to_string(), variant.id.clone());
        }
        if let Some(id) = &result.message_id {
            metadata.insert("provider_message_id".to_string(), id.clone());
        }
        if let Some(error) = &result.error {
            metadata.insert("error".to_string(), error.clone());
        }
        if !result.attempted_providers.is_empty() {
            metadata.insert(
                "attempted_providers".to_string(),
                result.attempted_providers.join(","),
            );
        }

        let event = AnalyticsEvent {
            event_type: if result.success {
                AnalyticsEventType::EmailSent
            } else {
                AnalyticsEventType::EmailFailed
            },
            email_id: message.id,
            contact_id: message.contact_id,
            campaign_id: Some(campaign.id),
            organization_id: campaign.organization_id,
            metadata,
            timestamp: result.timestamp,
        };

        if let Err(e) = self.analytics.record_event(event).await {
            warn!(
                campaign_id = %campaign.id,
                email_id = %message.id,
                error = %e,
                "Failed to record analytics event"
            );
        }
    }
}
