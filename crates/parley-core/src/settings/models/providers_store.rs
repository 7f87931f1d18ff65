use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend flavour a set of assistants and threads belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientType {
    #[default]
    OpenAi,
    AzureOpenAi,
    OpenAiRealtime,
    AzureOpenAiRealtime,
}

impl ClientType {
    pub const ALL: [ClientType; 4] = [
        ClientType::OpenAi,
        ClientType::AzureOpenAi,
        ClientType::OpenAiRealtime,
        ClientType::AzureOpenAiRealtime,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            ClientType::OpenAi => "OpenAI",
            ClientType::AzureOpenAi => "Azure OpenAI",
            ClientType::OpenAiRealtime => "OpenAI Realtime",
            ClientType::AzureOpenAiRealtime => "Azure OpenAI Realtime",
        }
    }

    /// Key used to section persisted data per client type.
    pub fn key(&self) -> &'static str {
        match self {
            ClientType::OpenAi => "OPEN_AI",
            ClientType::AzureOpenAi => "AZURE_OPEN_AI",
            ClientType::OpenAiRealtime => "OPEN_AI_REALTIME",
            ClientType::AzureOpenAiRealtime => "AZURE_OPEN_AI_REALTIME",
        }
    }

    pub fn is_realtime(&self) -> bool {
        matches!(
            self,
            ClientType::OpenAiRealtime | ClientType::AzureOpenAiRealtime
        )
    }

    pub fn is_azure(&self) -> bool {
        matches!(
            self,
            ClientType::AzureOpenAi | ClientType::AzureOpenAiRealtime
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| {
            t.key().eq_ignore_ascii_case(value) || t.display_name().eq_ignore_ascii_case(value)
        })
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub client_type: ClientType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// API base URL for OpenAI, resource endpoint for Azure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl ProviderConfig {
    pub fn new(client_type: ClientType) -> Self {
        Self {
            client_type,
            api_key: None,
            base_url: None,
            api_version: None,
        }
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn with_api_version(mut self, api_version: String) -> Self {
        self.api_version = Some(api_version);
        self
    }

    /// Azure needs an endpoint on top of the key.
    pub fn is_complete(&self) -> bool {
        let has_key = self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if self.client_type.is_azure() {
            has_key && self.base_url.as_deref().is_some_and(|u| !u.trim().is_empty())
        } else {
            has_key
        }
    }
}

/// Provider credentials, one entry per client type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvidersStore {
    providers: Vec<ProviderConfig>,
}

impl ProvidersStore {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self { providers }
    }

    pub fn get(&self, client_type: ClientType) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.client_type == client_type)
    }

    pub fn all(&self) -> &[ProviderConfig] {
        &self.providers
    }

    pub fn upsert(&mut self, config: ProviderConfig) {
        match self
            .providers
            .iter_mut()
            .find(|p| p.client_type == config.client_type)
        {
            Some(existing) => *existing = config,
            None => self.providers.push(config),
        }
    }

    fn entry(&mut self, client_type: ClientType) -> &mut ProviderConfig {
        let index = match self
            .providers
            .iter()
            .position(|p| p.client_type == client_type)
        {
            Some(index) => index,
            None => {
                self.providers.push(ProviderConfig::new(client_type));
                self.providers.len() - 1
            }
        };
        &mut self.providers[index]
    }

    /// Fill credentials from the environment. `lookup` is `std::env::var`
    /// in production.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            for client_type in [ClientType::OpenAi, ClientType::OpenAiRealtime] {
                self.entry(client_type).api_key = Some(key.clone());
            }
        }

        let azure_key = lookup("AZURE_OPENAI_API_KEY");
        let azure_endpoint = lookup("AZURE_OPENAI_ENDPOINT");
        let azure_version = lookup("AZURE_OPENAI_API_VERSION");
        if azure_key.is_none() && azure_endpoint.is_none() && azure_version.is_none() {
            return;
        }
        for client_type in [ClientType::AzureOpenAi, ClientType::AzureOpenAiRealtime] {
            let entry = self.entry(client_type);
            if let Some(key) = &azure_key {
                entry.api_key = Some(key.clone());
            }
            if let Some(endpoint) = &azure_endpoint {
                entry.base_url = Some(endpoint.clone());
            }
            if let Some(version) = &azure_version {
                entry.api_version = Some(version.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_client_type_serializes_to_section_key() {
        let json = serde_json::to_string(&ClientType::AzureOpenAiRealtime).unwrap();
        assert_eq!(json, "\"AZURE_OPEN_AI_REALTIME\"");
        for client_type in ClientType::ALL {
            let json = serde_json::to_string(&client_type).unwrap();
            assert_eq!(json.trim_matches('"'), client_type.key());
        }
    }

    #[test]
    fn test_parse_accepts_key_and_display_name() {
        assert_eq!(ClientType::parse("open_ai"), Some(ClientType::OpenAi));
        assert_eq!(ClientType::parse("Azure OpenAI"), Some(ClientType::AzureOpenAi));
        assert_eq!(ClientType::parse("nope"), None);
    }

    #[test]
    fn test_azure_requires_endpoint() {
        let config = ProviderConfig::new(ClientType::AzureOpenAi).with_api_key("k".into());
        assert!(!config.is_complete());
        let config = config.with_base_url("https://example.openai.azure.com".into());
        assert!(config.is_complete());
    }

    #[test]
    fn test_openai_key_is_enough() {
        let config = ProviderConfig::new(ClientType::OpenAi).with_api_key("sk".into());
        assert!(config.is_complete());
        assert!(!ProviderConfig::new(ClientType::OpenAi).is_complete());
    }

    #[test]
    fn test_env_overrides_create_entries() {
        let mut store = ProvidersStore::default();
        store.apply_env_overrides(env(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("AZURE_OPENAI_ENDPOINT", "https://res.openai.azure.com"),
        ]));

        assert_eq!(
            store.get(ClientType::OpenAi).unwrap().api_key.as_deref(),
            Some("sk-test")
        );
        assert_eq!(
            store.get(ClientType::OpenAiRealtime).unwrap().api_key.as_deref(),
            Some("sk-test")
        );
        let azure = store.get(ClientType::AzureOpenAi).unwrap();
        assert_eq!(azure.base_url.as_deref(), Some("https://res.openai.azure.com"));
        assert!(azure.api_key.is_none());
    }

    #[test]
    fn test_env_overrides_keep_existing_fields() {
        let mut store = ProvidersStore::new(vec![
            ProviderConfig::new(ClientType::AzureOpenAi)
                .with_api_key("stored".into())
                .with_api_version("2024-05-01-preview".into()),
        ]);
        store.apply_env_overrides(env(&[("AZURE_OPENAI_ENDPOINT", "https://x")]));

        let azure = store.get(ClientType::AzureOpenAi).unwrap();
        assert_eq!(azure.api_key.as_deref(), Some("stored"));
        assert_eq!(azure.api_version.as_deref(), Some("2024-05-01-preview"));
        assert_eq!(azure.base_url.as_deref(), Some("https://x"));
    }

    #[test]
    fn test_no_env_leaves_store_untouched() {
        let mut store = ProvidersStore::default();
        store.apply_env_overrides(env(&[]));
        assert!(store.all().is_empty());
    }
}
