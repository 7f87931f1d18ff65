pub mod assistant_config;
pub mod general_settings;
pub mod providers_store;

pub use assistant_config::{AssistantConfig, AssistantKind};
pub use general_settings::GeneralSettings;
pub use providers_store::{ClientType, ProviderConfig, ProvidersStore};

use serde::{Deserialize, Serialize};

/// Everything persisted in the settings file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub providers: ProvidersStore,
    #[serde(default)]
    pub assistants: Vec<AssistantConfig>,
}

impl Settings {
    pub fn assistant(&self, name: &str) -> Option<&AssistantConfig> {
        self.assistants.iter().find(|a| a.name == name)
    }

    /// Replace the assistant with the same name, or append it.
    pub fn upsert_assistant(&mut self, config: AssistantConfig) {
        match self.assistants.iter_mut().find(|a| a.name == config.name) {
            Some(existing) => *existing = config,
            None => self.assistants.push(config),
        }
    }
}
