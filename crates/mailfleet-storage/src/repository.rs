//! Repository layer for data access

pub mod campaigns;
pub mod executions;

pub use campaigns::{CampaignRepository, InMemoryCampaignRepository};
pub use executions::{ExecutionRepository, InMemoryExecutionRepository};
