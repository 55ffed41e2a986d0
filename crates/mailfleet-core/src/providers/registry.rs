//! Provider registry

use super::{EmailProvider, HttpApiProvider, ProviderCapabilities, SmtpProvider};
use mailfleet_common::config::{ProviderConfig, ProviderTransport};
use mailfleet_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Named providers in declaration order
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn EmailProvider>>,
    by_name: HashMap<String, usize>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every enabled provider from configuration
    pub fn from_config(configs: &[ProviderConfig]) -> Result<Self> {
        let mut registry = Self::new();

        for config in configs.iter().filter(|c| c.enabled) {
            let capabilities = ProviderCapabilities::new(config.reliability, config.features.clone());

            let provider: Arc<dyn EmailProvider> = match &config.transport {
                ProviderTransport::Smtp(smtp) => Arc::new(
                    SmtpProvider::new(&config.name, smtp, capabilities)
                        .map_err(|e| Error::Config(format!("Provider {}: {}", config.name, e)))?,
                ),
                ProviderTransport::Http(http) => Arc::new(
                    HttpApiProvider::new(&config.name, http.clone(), capabilities)
                        .map_err(|e| Error::Config(format!("Provider {}: {}", config.name, e)))?,
                ),
            };

            registry.register(provider)?;
        }

        info!(providers = ?registry.names(), "Provider registry built");
        Ok(registry)
    }

    /// Register a provider; names must be unique
    pub fn register(&mut self, provider: Arc<dyn EmailProvider>) -> Result<()> {
        let name = provider.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(Error::Config(format!("Duplicate provider name: {}", name)));
        }

        self.by_name.insert(name, self.providers.len());
        self.providers.push(provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn EmailProvider>> {
        self.by_name.get(name).map(|&i| &self.providers[i])
    }

    /// Providers in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn EmailProvider>> {
        self.providers.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use mailfleet_common::Config;

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = ProviderRegistry::new();
        registry.register(MockProvider::new("a").into_arc()).unwrap();
        registry.register(MockProvider::new("b").into_arc()).unwrap();

        let err = registry.register(MockProvider::new("a").into_arc()).unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: Duplicate provider name: a");
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert!(registry.get("b").is_some());
        assert!(registry.get("c").is_none());
    }

    #[tokio::test]
    async fn test_from_config_skips_disabled() {
        let config = Config::from_toml_str(
            r#"
[[providers]]
name = "relay"
type = "smtp"
host = "localhost"
security = "none"

[[providers]]
name = "api"
type = "http"
endpoint = "http://localhost:9/send"
bulk_endpoint = "http://localhost:9/send/batch"
features = ["marketing"]

[[providers]]
name = "spare"
type = "http"
endpoint = "http://localhost:9/send"
enabled = false
"#,
        )
        .unwrap();

        let registry = ProviderRegistry::from_config(&config.providers).unwrap();
        assert_eq!(registry.names(), vec!["relay", "api"]);

        let api = registry.get("api").unwrap();
        assert!(api.capabilities().supports_bulk);
        assert_eq!(api.capabilities().reliability, 0.9);
    }
}
