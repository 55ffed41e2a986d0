//! SMTP relay provider

use super::{EmailProvider, Message, ProviderCapabilities, ProviderError, ProviderHealth};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use mailfleet_common::config::{SmtpProviderConfig, SmtpSecurity};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Provider that relays mail through an SMTP server
pub struct SmtpProvider {
    name: String,
    capabilities: ProviderCapabilities,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpProvider {
    /// Build the relay transport. No connection is made until the first send.
    pub fn new(
        name: impl Into<String>,
        config: &SmtpProviderConfig,
        capabilities: ProviderCapabilities,
    ) -> Result<Self, ProviderError> {
        let builder = match config.security {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| ProviderError::Other(format!("Failed to create SMTP transport: {}", e)))?,
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host).map_err(|e| {
                    ProviderError::Other(format!("Failed to create SMTP transport: {}", e))
                })?
            }
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
        };

        let mut builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            name: name.into(),
            // SMTP has no native batch call
            capabilities: ProviderCapabilities {
                supports_bulk: false,
                ..capabilities
            },
            transport: builder.build(),
        })
    }
}

/// Convert a message into a lettre message, returning it with its Message-ID
pub(crate) fn build_email(message: &Message) -> Result<(lettre::Message, String), ProviderError> {
    let from_address: Address = message
        .from
        .email
        .parse()
        .map_err(|e| ProviderError::InvalidMessage(format!("Invalid from address: {}", e)))?;

    let to: Mailbox = message
        .to
        .parse()
        .map_err(|e| ProviderError::InvalidMessage(format!("Invalid to address: {}", e)))?;

    let msg_id = format!("<{}@{}>", Uuid::new_v4(), from_address.domain());

    let mut email_builder = lettre::Message::builder()
        .from(Mailbox::new(message.from.name.clone(), from_address))
        .to(to)
        .subject(&message.subject)
        .message_id(Some(msg_id.clone()));

    if let Some(reply_to) = &message.reply_to {
        let reply_to: Mailbox = reply_to
            .parse()
            .map_err(|e| ProviderError::InvalidMessage(format!("Invalid reply-to address: {}", e)))?;
        email_builder = email_builder.reply_to(reply_to);
    }

    for key in message.headers.keys() {
        // lettre only accepts typed headers
        debug!(header = %key, "Skipping custom header on SMTP relay");
    }

    let email = match (&message.html_body, &message.text_body) {
        (Some(html), Some(text)) => email_builder.multipart(
            MultiPart::alternative()
                .singlepart(SinglePart::plain(text.clone()))
                .singlepart(SinglePart::html(html.clone())),
        ),
        (Some(html), None) => email_builder.header(ContentType::TEXT_HTML).body(html.clone()),
        (None, Some(text)) => email_builder.header(ContentType::TEXT_PLAIN).body(text.clone()),
        (None, None) => email_builder.body(String::new()),
    }
    .map_err(|e| ProviderError::InvalidMessage(format!("Failed to build email: {}", e)))?;

    Ok((email, msg_id))
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn send(&self, message: &Message) -> Result<String, ProviderError> {
        let (email, msg_id) = build_email(message)?;

        match self.transport.send(email).await {
            Ok(response) => {
                debug!(provider = %self.name, code = %response.code(), "Email relayed");
                Ok(msg_id)
            }
            Err(e) if e.is_permanent() => Err(ProviderError::Rejected(e.to_string())),
            Err(e) if e.is_timeout() => Err(ProviderError::Unavailable(format!(
                "SMTP timeout: {}",
                e
            ))),
            Err(e) => Err(ProviderError::Unavailable(e.to_string())),
        }
    }

    async fn check_health(&self) -> ProviderHealth {
        let started = Instant::now();
        match self.transport.test_connection().await {
            Ok(true) => ProviderHealth::healthy(&self.name, started.elapsed().as_millis() as u64),
            Ok(false) => ProviderHealth::unhealthy(&self.name, "SMTP relay rejected NOOP"),
            Err(e) => ProviderHealth::unhealthy(&self.name, format!("SMTP connection failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Sender;
    use mailfleet_common::config::ProviderFeature;

    fn message() -> Message {
        Message::new(
            Uuid::new_v4(),
            Sender::new("news@example.com").with_name("Example News"),
            "reader@example.org",
            "Weekly digest",
        )
    }

    fn config() -> SmtpProviderConfig {
        SmtpProviderConfig {
            host: "localhost".to_string(),
            port: 2525,
            username: None,
            password: None,
            security: SmtpSecurity::None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_build_email_assigns_message_id() {
        let message = message().with_html("<p>Hi</p>").with_text("Hi");
        let (email, msg_id) = build_email(&message).unwrap();

        assert!(msg_id.starts_with('<'));
        assert!(msg_id.ends_with("@example.com>"));

        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject: Weekly digest"));
        assert!(raw.contains(&msg_id));
    }

    #[test]
    fn test_build_email_rejects_bad_recipient() {
        let mut message = message();
        message.to = "not-an-address".to_string();

        let err = build_email(&message).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_provider_never_claims_bulk() {
        let caps = ProviderCapabilities::new(0.95, vec![ProviderFeature::Transactional]).with_bulk();
        let provider = SmtpProvider::new("relay", &config(), caps).unwrap();

        assert_eq!(provider.name(), "relay");
        assert!(!provider.capabilities().supports_bulk);
        assert_eq!(
            provider.send_bulk(&[message()]).await.unwrap_err(),
            ProviderError::Unsupported
        );
    }
}
