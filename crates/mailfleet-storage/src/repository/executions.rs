//! Campaign execution repository

use crate::models::CampaignExecution;
use async_trait::async_trait;
use mailfleet_common::types::{CampaignId, ExecutionId};
use mailfleet_common::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Execution repository trait
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert or replace a snapshot of an execution
    async fn save(&self, execution: &CampaignExecution) -> Result<()>;
    async fn get(&self, id: ExecutionId) -> Result<Option<CampaignExecution>>;
    /// Executions of a campaign, oldest first
    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<CampaignExecution>>;
}

/// In-memory execution repository
#[derive(Default)]
pub struct InMemoryExecutionRepository {
    executions: RwLock<HashMap<ExecutionId, CampaignExecution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, execution: &CampaignExecution) -> Result<()> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<CampaignExecution>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<CampaignExecution>> {
        let executions = self.executions.read().await;
        let mut result: Vec<CampaignExecution> = executions
            .values()
            .filter(|e| e.campaign_id == campaign_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(result)
    }
}
