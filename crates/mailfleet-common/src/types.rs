//! Common types for MailFleet

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for organizations
pub type OrganizationId = Uuid;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for campaign executions
pub type ExecutionId = Uuid;

/// Unique identifier for contacts
pub type ContactId = Uuid;

/// Identifier of an A/B test variant, unique within its campaign
pub type VariantId = String;

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string.
    ///
    /// This is a syntactic check only: exactly one `@`, no whitespace, a
    /// non-empty local part and a dotted domain without empty labels.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.chars().any(char::is_whitespace) {
            return None;
        }

        let (local, domain) = s.split_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return None;
        }

        if !domain.contains('.') || domain.split('.').any(str::is_empty) {
            return None;
        }

        Some(Self::new(local, domain))
    }

    /// Whether the string is a syntactically valid address
    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_some()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation("Invalid email address".to_string()))
    }
}
