use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{ParleyError, ParleyResult};
use crate::providers::{OpenAiClient, OpenAiRealtimeConnector, ProviderClient, RealtimeConnector};
use crate::settings::models::{ClientType, ProviderConfig, ProvidersStore};

/// Provider clients per backend, built once at start-up from the stored
/// credentials. A client type without a usable configuration has no entry,
/// which the orchestrator reports as `NotConfigured`.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientType, Arc<dyn ProviderClient>>>,
    realtime: RwLock<HashMap<ClientType, Arc<dyn RealtimeConnector>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Realtime client types share credentials with their non-realtime
    /// counterpart when they have none of their own.
    pub fn from_providers(providers: &ProvidersStore, timeout: Duration) -> Self {
        let registry = Self::new();

        for client_type in ClientType::ALL {
            let Some(config) = credentials_for(providers, client_type) else {
                continue;
            };

            if client_type.is_realtime() {
                registry.register_realtime(
                    client_type,
                    Arc::new(OpenAiRealtimeConnector::from_config(&config, client_type, timeout)),
                );
            }

            match OpenAiClient::from_config(&config, client_type, timeout) {
                Ok(client) => {
                    registry.register(client_type, Arc::new(client));
                    info!(client_type = %client_type, "Provider client initialized");
                }
                Err(e) => warn!(client_type = %client_type, error = %e, "Skipping provider client"),
            }
        }

        registry
    }

    pub fn register(&self, client_type: ClientType, client: Arc<dyn ProviderClient>) {
        self.clients.write().insert(client_type, client);
    }

    pub fn register_realtime(&self, client_type: ClientType, connector: Arc<dyn RealtimeConnector>) {
        self.realtime.write().insert(client_type, connector);
    }

    pub fn get(&self, client_type: ClientType) -> ParleyResult<Arc<dyn ProviderClient>> {
        self.clients
            .read()
            .get(&client_type)
            .cloned()
            .ok_or(ParleyError::NotConfigured { client_type })
    }

    pub fn is_configured(&self, client_type: ClientType) -> bool {
        self.clients.read().contains_key(&client_type)
    }

    pub fn realtime_connector(
        &self,
        client_type: ClientType,
    ) -> ParleyResult<Arc<dyn RealtimeConnector>> {
        self.realtime
            .read()
            .get(&client_type)
            .cloned()
            .ok_or(ParleyError::NotConfigured { client_type })
    }
}

fn credentials_for(providers: &ProvidersStore, client_type: ClientType) -> Option<ProviderConfig> {
    let own = providers.get(client_type).filter(|c| c.is_complete());
    let fallback = || {
        let base = match client_type {
            ClientType::OpenAiRealtime => ClientType::OpenAi,
            ClientType::AzureOpenAiRealtime => ClientType::AzureOpenAi,
            _ => return None,
        };
        providers.get(base).filter(|c| c.is_complete())
    };

    own.or_else(fallback).map(|config| ProviderConfig {
        client_type,
        ..config.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_complete_configs_get_clients() {
        let providers = ProvidersStore::new(vec![
            ProviderConfig::new(ClientType::OpenAi).with_api_key("sk".into()),
            ProviderConfig::new(ClientType::AzureOpenAi).with_api_key("az".into()),
        ]);
        let registry = ClientRegistry::from_providers(&providers, Duration::from_secs(5));

        assert!(registry.is_configured(ClientType::OpenAi));
        assert!(!registry.is_configured(ClientType::AzureOpenAi));
        assert!(matches!(
            registry.get(ClientType::AzureOpenAi),
            Err(ParleyError::NotConfigured {
                client_type: ClientType::AzureOpenAi
            })
        ));
    }

    #[test]
    fn test_realtime_falls_back_to_base_credentials() {
        let providers = ProvidersStore::new(vec![
            ProviderConfig::new(ClientType::OpenAi).with_api_key("sk".into()),
        ]);
        let registry = ClientRegistry::from_providers(&providers, Duration::from_secs(5));

        assert!(registry.is_configured(ClientType::OpenAiRealtime));
        assert!(registry.realtime_connector(ClientType::OpenAiRealtime).is_ok());
        assert!(registry.realtime_connector(ClientType::OpenAi).is_err());
        assert_eq!(
            registry.get(ClientType::OpenAiRealtime).unwrap().client_type(),
            ClientType::OpenAiRealtime
        );
    }

    #[test]
    fn test_empty_registry() {
        let registry = ClientRegistry::new();
        assert!(!registry.is_configured(ClientType::OpenAi));
    }
}
