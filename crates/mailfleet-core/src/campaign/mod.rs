//! Campaign lifecycle and execution
//!
//! [`CampaignManager`] owns the campaign lifecycle; [`CampaignExecutor`]
//! runs a campaign through the provider router. Audience resolution,
//! analytics and wall-clock scheduling are external collaborators reached
//! through the traits in this module.

mod analytics;
mod audience;
mod executor;
mod manager;
mod scheduler;
mod shuffle;
mod template;

pub use analytics::{AnalyticsEvent, AnalyticsEventType, AnalyticsSink};
pub use audience::{AudienceService, Contact};
pub use executor::CampaignExecutor;
pub use manager::{CampaignError, CampaignManager};
pub use scheduler::CampaignScheduler;
pub use shuffle::{RandomShuffler, SeededShuffler, Shuffler};
pub use template::TemplateRenderer;
