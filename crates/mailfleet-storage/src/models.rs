//! Campaign and execution models

use chrono::{DateTime, Utc};
use mailfleet_common::types::{CampaignId, ExecutionId, OrganizationId, VariantId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Template variables keyed by placeholder name
pub type TemplateVariables = HashMap<String, String>;

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    /// Completed, failed and cancelled campaigns are never mutated again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Cancelled
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Scheduled => write!(f, "scheduled"),
            CampaignStatus::Running => write!(f, "running"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Completed => write!(f, "completed"),
            CampaignStatus::Failed => write!(f, "failed"),
            CampaignStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "running" => Ok(CampaignStatus::Running),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// How a campaign's messages are sent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendingConfig {
    pub from_email: String,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub subject: String,
    /// Contacts per batch; the configured default applies when unset
    pub batch_size: Option<usize>,
    /// Hourly cap used to pace batches
    pub send_rate_per_hour: Option<u32>,
    /// Provider tried first for every message of the campaign
    pub preferred_provider: Option<String>,
}

/// Metric that decides the winning A/B variant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinnerCriterion {
    #[default]
    OpenRate,
    ClickRate,
    ConversionRate,
}

/// One A/B test branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbVariant {
    pub id: VariantId,
    pub name: String,
    /// Share of the audience, in percent
    pub percentage: f64,
    /// Overrides the campaign subject
    pub subject: Option<String>,
    /// Merged over the campaign template variables
    #[serde(default)]
    pub template_variables: TemplateVariables,
}

/// A/B test configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestConfig {
    pub enabled: bool,
    pub variants: Vec<AbVariant>,
    #[serde(default)]
    pub winner_criterion: WinnerCriterion,
    pub test_duration_hours: f64,
}

impl AbTestConfig {
    /// Whether the campaign should be split into variants
    pub fn is_active(config: Option<&AbTestConfig>) -> bool {
        config.is_some_and(|c| c.enabled)
    }
}

/// When a scheduled campaign should start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSchedule {
    pub send_at: DateTime<Utc>,
    pub timezone: String,
}

/// Campaign model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub template_id: String,
    pub template_variables: TemplateVariables,
    pub audience_segment_ids: Vec<String>,
    pub excluded_segment_ids: Vec<String>,
    pub audience_count: usize,
    pub status: CampaignStatus,
    pub sending_config: SendingConfig,
    pub ab_test_config: Option<AbTestConfig>,
    pub schedule: Option<CampaignSchedule>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Build a draft campaign from validated input
    pub fn from_input(input: CreateCampaign, audience_count: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            organization_id: input.organization_id,
            name: input.name,
            description: input.description,
            template_id: input.template_id,
            template_variables: input.template_variables,
            audience_segment_ids: input.audience_segment_ids,
            excluded_segment_ids: input.excluded_segment_ids,
            audience_count,
            status: CampaignStatus::Draft,
            sending_config: input.sending_config,
            ab_test_config: input.ab_test_config,
            schedule: None,
            tags: input.tags,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Merge an update into the campaign.
    ///
    /// Returns true when the audience definition changed.
    pub fn apply_update(&mut self, update: UpdateCampaign) -> bool {
        let mut audience_changed = false;

        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(template_id) = update.template_id {
            self.template_id = template_id;
        }
        if let Some(variables) = update.template_variables {
            self.template_variables = variables;
        }
        if let Some(segments) = update.audience_segment_ids {
            audience_changed |= segments != self.audience_segment_ids;
            self.audience_segment_ids = segments;
        }
        if let Some(excluded) = update.excluded_segment_ids {
            audience_changed |= excluded != self.excluded_segment_ids;
            self.excluded_segment_ids = excluded;
        }
        if let Some(sending_config) = update.sending_config {
            self.sending_config = sending_config;
        }
        if let Some(ab_test_config) = update.ab_test_config {
            self.ab_test_config = ab_test_config;
        }
        if let Some(tags) = update.tags {
            self.tags = tags;
        }

        self.updated_at = Utc::now();
        audience_changed
    }
}

/// Create campaign input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: Option<String>,
    pub template_id: String,
    #[serde(default)]
    pub template_variables: TemplateVariables,
    pub audience_segment_ids: Vec<String>,
    #[serde(default)]
    pub excluded_segment_ids: Vec<String>,
    pub sending_config: SendingConfig,
    pub ab_test_config: Option<AbTestConfig>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Update campaign input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCampaign {
    pub name: Option<String>,
    pub description: Option<String>,
    pub template_id: Option<String>,
    pub template_variables: Option<TemplateVariables>,
    pub audience_segment_ids: Option<Vec<String>>,
    pub excluded_segment_ids: Option<Vec<String>>,
    pub sending_config: Option<SendingConfig>,
    /// `Some(None)` removes the A/B configuration
    pub ab_test_config: Option<Option<AbTestConfig>>,
    pub tags: Option<Vec<String>>,
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Queued => write!(f, "queued"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-variant outcome of an A/B execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantResult {
    pub variant_id: VariantId,
    pub contact_count: u64,
    pub successful_sends: u64,
    pub failed_sends: u64,
}

/// Runtime record of one campaign execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignExecution {
    pub id: ExecutionId,
    pub campaign_id: CampaignId,
    pub status: ExecutionStatus,
    pub total_contacts: u64,
    pub processed_contacts: u64,
    pub successful_sends: u64,
    pub failed_sends: u64,
    /// Contacts left out of every variant by percentage truncation
    pub dropped_contacts: u64,
    pub variant_results: Vec<VariantResult>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CampaignExecution {
    /// Create a queued execution
    pub fn new(campaign_id: CampaignId) -> Self {
        Self {
            id: Uuid::now_v7(),
            campaign_id,
            status: ExecutionStatus::Queued,
            total_contacts: 0,
            processed_contacts: 0,
            successful_sends: 0,
            failed_sends: 0,
            dropped_contacts: 0,
            variant_results: Vec::new(),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Mark the execution finished with the given status
    pub fn finish(&mut self, status: ExecutionStatus, error_message: Option<String>) {
        self.status = status;
        self.error_message = error_message;
        self.completed_at = Some(Utc::now());
    }

    /// Calculate progress percentage
    pub fn progress_percentage(&self) -> f64 {
        if self.total_contacts == 0 {
            0.0
        } else {
            (self.processed_contacts as f64 / self.total_contacts as f64) * 100.0
        }
    }
}
