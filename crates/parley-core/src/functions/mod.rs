//! Local functions the assistants may call during a run.

pub mod registry;
pub mod system_functions;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

pub use registry::FunctionRegistry;

/// Name, description and JSON schema of a callable function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("Function '{0}' is not available")]
    Unknown(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),

    #[error("Function panicked: {0}")]
    Panicked(String),
}

impl FunctionError {
    /// Structured output handed back to the model in place of a result.
    pub fn to_output(&self, function_name: &str) -> String {
        json!({
            "function_error": function_name,
            "error": self.to_string(),
        })
        .to_string()
    }
}

impl From<std::io::Error> for FunctionError {
    fn from(error: std::io::Error) -> Self {
        Self::Execution(error.to_string())
    }
}

#[async_trait]
pub trait Function: Send + Sync {
    fn definition(&self) -> FunctionDefinition;

    /// `arguments` is always a JSON object.
    async fn call(&self, arguments: Value) -> Result<String, FunctionError>;
}

/// Deserialize a call's arguments into the function's argument struct.
pub fn parse_arguments<T: DeserializeOwned>(arguments: Value) -> Result<T, FunctionError> {
    serde_json::from_value(arguments).map_err(|e| FunctionError::InvalidArguments(e.to_string()))
}

/// Point sandbox paths (`/mnt/data/...`) in string arguments at the local
/// output folder.
pub fn rewrite_data_paths(arguments: &mut Value, output_folder: &Path) {
    const SANDBOX_DIR: &str = "/mnt/data/";

    match arguments {
        Value::String(s) if s.contains(SANDBOX_DIR) => {
            let folder = output_folder.to_string_lossy();
            let replacement = format!("{}/", folder.trim_end_matches('/'));
            *s = s.replace(SANDBOX_DIR, &replacement);
        }
        Value::Array(items) => {
            for item in items {
                rewrite_data_paths(item, output_folder);
            }
        }
        Value::Object(map) => {
            for value in map.values_mut() {
                rewrite_data_paths(value, output_folder);
            }
        }
        _ => {}
    }
}
