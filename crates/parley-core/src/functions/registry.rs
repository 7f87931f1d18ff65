use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

use super::system_functions;
use super::{Function, FunctionDefinition, FunctionError};

/// Name -> callable. Unknown names only fail when they are invoked.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, Arc<dyn Function>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_functions() -> Self {
        let registry = Self::new();
        for function in system_functions::all() {
            registry.register(function);
        }
        registry
    }

    pub fn register(&self, function: Arc<dyn Function>) {
        let name = function.definition().name;
        self.functions.write().insert(name, function);
    }

    /// Register a synchronous closure as a function.
    pub fn register_fn<F>(&self, definition: FunctionDefinition, f: F)
    where
        F: Fn(Value) -> Result<String, FunctionError> + Send + Sync + 'static,
    {
        self.register(Arc::new(ClosureFunction {
            definition,
            call: Box::new(f),
        }));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.functions.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for an assistant's selected functions, in selection order.
    pub fn definitions(&self, names: &[String]) -> Vec<FunctionDefinition> {
        let functions = self.functions.read();
        names
            .iter()
            .filter_map(|name| match functions.get(name) {
                Some(function) => Some(function.definition()),
                None => {
                    warn!(function = %name, "Selected function is not registered");
                    None
                }
            })
            .collect()
    }
}

type SyncCall = Box<dyn Fn(Value) -> Result<String, FunctionError> + Send + Sync>;

struct ClosureFunction {
    definition: FunctionDefinition,
    call: SyncCall,
}

#[async_trait]
impl Function for ClosureFunction {
    fn definition(&self) -> FunctionDefinition {
        self.definition.clone()
    }

    async fn call(&self, arguments: Value) -> Result<String, FunctionError> {
        (self.call)(arguments)
    }
}
