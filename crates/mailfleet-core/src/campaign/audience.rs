//! Audience service interface

use async_trait::async_trait;
use mailfleet_common::types::ContactId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Recipient supplied by the audience service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Contact {
    /// First and last name joined, if any
    pub fn full_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => None,
        }
    }
}

/// Resolves audience segments to contacts
#[async_trait]
pub trait AudienceService: Send + Sync {
    /// Contacts in any of `segment_ids` and none of `exclude_ids`
    async fn resolve_contacts(
        &self,
        segment_ids: &[String],
        exclude_ids: &[String],
    ) -> anyhow::Result<Vec<Contact>>;

    async fn count(&self, segment_ids: &[String], exclude_ids: &[String]) -> anyhow::Result<usize>;
}
