pub mod artifact_downloader;
pub mod error_collector_layer;
pub mod event_bus;
pub mod event_translator;
pub mod thread_store;
pub mod title_generator;
pub mod tool_coordinator;

pub use artifact_downloader::download_artifacts;
pub use error_collector_layer::ErrorCollectorLayer;
pub use event_bus::{EventBus, SubscriptionId};
pub use event_translator::{RunEventTranslator, TranslatorStep};
pub use thread_store::{CHAT_ASSISTANT_METADATA, ConversationThreadStore, DEFAULT_THREAD_NAME};
pub use title_generator::{SCHEDULED_PREFIX, generate_title};
pub use tool_coordinator::{ToolCallResult, ToolInvocationCoordinator};
