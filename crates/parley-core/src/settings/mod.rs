pub mod models;
pub mod repositories;

pub use models::{AssistantConfig, AssistantKind, ClientType, GeneralSettings, ProviderConfig, Settings};
pub use repositories::{SettingsJsonRepository, SettingsRepository};
