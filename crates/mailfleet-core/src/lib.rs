//! MailFleet Core - Provider routing and campaign execution
//!
//! This crate provides the email provider abstraction, the failover router
//! with circuit breakers and health monitoring, and the campaign lifecycle
//! and execution engine built on top of it.

pub mod campaign;
pub mod providers;
pub mod router;

#[cfg(test)]
mod testing;

pub use campaign::{
    AnalyticsEvent, AnalyticsEventType, AnalyticsSink, AudienceService, CampaignError,
    CampaignExecutor, CampaignManager, CampaignScheduler, Contact, RandomShuffler,
    SeededShuffler, Shuffler, TemplateRenderer,
};
pub use providers::{
    BulkResult, EmailProvider, HttpApiProvider, Message, MessageType, ProviderError,
    ProviderHealth, ProviderRegistry, SendResult, Sender, SmtpProvider,
};
pub use router::{CircuitState, ProviderMetrics, ProviderRouter};
