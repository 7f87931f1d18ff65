use crate::repositories::{BoxFuture, RepositoryResult};
use crate::settings::models::Settings;

pub trait SettingsRepository: Send + Sync + 'static {
    /// Load settings, returning defaults on first run.
    fn load(&self) -> BoxFuture<'static, RepositoryResult<Settings>>;

    fn save(&self, settings: Settings) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Get the storage path (for diagnostics)
    fn storage_path(&self) -> String;
}
