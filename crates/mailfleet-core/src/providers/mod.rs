//! Email delivery providers
//!
//! A provider is a named backend able to transmit one message, optionally a
//! native batch, and to report its own health. The router only sees the
//! [`EmailProvider`] trait; [`SmtpProvider`] and [`HttpApiProvider`] are the
//! concrete transports built from configuration by [`ProviderRegistry`].

mod http;
mod registry;
mod smtp;
mod types;

pub use http::HttpApiProvider;
pub use registry::ProviderRegistry;
pub use smtp::SmtpProvider;
pub use types::{
    BulkResult, Message, MessageType, ProviderCapabilities, ProviderHealth, SendErrorKind,
    SendResult, Sender,
};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Provider errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Bulk send not supported")]
    Unsupported,

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn kind(&self) -> SendErrorKind {
        match self {
            ProviderError::InvalidMessage(_) => SendErrorKind::InvalidMessage,
            ProviderError::Rejected(_) => SendErrorKind::Rejected,
            ProviderError::Unavailable(_) => SendErrorKind::Unavailable,
            ProviderError::Timeout(_) => SendErrorKind::Timeout,
            ProviderError::Unsupported => SendErrorKind::Unsupported,
            ProviderError::Other(_) => SendErrorKind::Other,
        }
    }
}

/// Result of one message inside a native bulk send
pub type BulkItemResult = Result<String, ProviderError>;

/// Email delivery provider trait
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Unique provider name
    fn name(&self) -> &str;

    /// Static capabilities used for selection
    fn capabilities(&self) -> &ProviderCapabilities;

    /// Send one message, returning the provider message id
    async fn send(&self, message: &Message) -> Result<String, ProviderError>;

    /// Send a batch natively.
    ///
    /// On success the returned vector has one entry per input message, in
    /// order. An `Err` means the batch call as a whole failed.
    async fn send_bulk(&self, _messages: &[Message]) -> Result<Vec<BulkItemResult>, ProviderError> {
        Err(ProviderError::Unsupported)
    }

    /// Cheap synthetic health probe
    async fn check_health(&self) -> ProviderHealth;
}
