use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::providers_store::ClientType;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantKind {
    /// Server-side assistant driven through threads and runs.
    #[default]
    Assistant,
    /// Answers through a one-shot completion; replies are stored in the
    /// thread as messages tagged with the assistant's name.
    Chat,
    /// Duplex session answering through `generate_response`.
    Realtime,
}

/// A configured assistant persona.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub name: String,
    /// Remote assistant id; created on first use when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub client_type: ClientType,
    pub model: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub selected_functions: Vec<String>,
    #[serde(default)]
    pub code_interpreter: bool,
    #[serde(default)]
    pub file_search: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_folder_path: Option<PathBuf>,
    #[serde(default)]
    pub kind: AssistantKind,
}

impl AssistantConfig {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assistant_id: None,
            client_type: ClientType::default(),
            model: model.into(),
            instructions: String::new(),
            selected_functions: Vec::new(),
            code_interpreter: false,
            file_search: false,
            output_folder_path: None,
            kind: AssistantKind::default(),
        }
    }

    pub fn with_assistant_id(mut self, id: impl Into<String>) -> Self {
        self.assistant_id = Some(id.into());
        self
    }

    pub fn with_client_type(mut self, client_type: ClientType) -> Self {
        self.client_type = client_type;
        self
    }

    pub fn with_functions(mut self, functions: &[&str]) -> Self {
        self.selected_functions = functions.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_output_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_folder_path = Some(path.into());
        self
    }

    pub fn with_kind(mut self, kind: AssistantKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_realtime(&self) -> bool {
        self.kind == AssistantKind::Realtime
    }

    pub fn is_chat(&self) -> bool {
        self.kind == AssistantKind::Chat
    }
}
