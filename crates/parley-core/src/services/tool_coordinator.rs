use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::functions::{FunctionError, FunctionRegistry, rewrite_data_paths};
use crate::providers::{ToolCall, ToolOutput};

/// Result of one call of a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallResult {
    pub call: ToolCall,
    pub output: String,
    /// The function exists locally, whether or not it succeeded.
    pub resolved: bool,
}

/// Executes a tool call batch with per-call fault isolation.
pub struct ToolInvocationCoordinator {
    registry: Arc<FunctionRegistry>,
    output_folder: Option<PathBuf>,
}

impl ToolInvocationCoordinator {
    pub fn new(registry: Arc<FunctionRegistry>, output_folder: Option<PathBuf>) -> Self {
        Self {
            registry,
            output_folder,
        }
    }

    /// Run every call concurrently; results keep batch order and every call
    /// gets exactly one output.
    pub async fn execute_batch(&self, calls: &[ToolCall]) -> Vec<ToolCallResult> {
        join_all(calls.iter().map(|call| self.execute(call))).await
    }

    async fn execute(&self, call: &ToolCall) -> ToolCallResult {
        let Some(function) = self.registry.get(&call.name) else {
            warn!(function = %call.name, call_id = %call.call_id, "Unknown function requested");
            return ToolCallResult {
                call: call.clone(),
                output: FunctionError::Unknown(call.name.clone()).to_output(&call.name),
                resolved: false,
            };
        };

        let arguments = match self.parse_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                return ToolCallResult {
                    call: call.clone(),
                    output: e.to_output(&call.name),
                    resolved: true,
                };
            }
        };

        debug!(function = %call.name, call_id = %call.call_id, "Invoking function");
        let outcome = AssertUnwindSafe(function.call(arguments))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(FunctionError::Panicked(panic_message(panic))));

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                warn!(function = %call.name, error = %e, "Function call failed");
                e.to_output(&call.name)
            }
        };

        ToolCallResult {
            call: call.clone(),
            output,
            resolved: true,
        }
    }

    fn parse_arguments(&self, raw: &str) -> Result<Value, FunctionError> {
        let mut arguments = if raw.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str::<Value>(raw)
                .map_err(|e| FunctionError::InvalidArguments(e.to_string()))?
        };
        if !arguments.is_object() {
            return Err(FunctionError::InvalidArguments(
                "arguments must be a JSON object".to_string(),
            ));
        }

        if let Some(folder) = &self.output_folder {
            rewrite_data_paths(&mut arguments, folder);
        }
        Ok(arguments)
    }

    pub fn outputs(results: &[ToolCallResult]) -> Vec<ToolOutput> {
        results
            .iter()
            .map(|r| ToolOutput {
                call_id: r.call.call_id.clone(),
                output: r.output.clone(),
            })
            .collect()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionDefinition;
    use serde_json::json;

    fn definition(name: &str) -> FunctionDefinition {
        FunctionDefinition {
            name: name.to_string(),
            description: String::new(),
            parameters: json!({"type": "object"}),
        }
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            call_id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    fn registry() -> Arc<FunctionRegistry> {
        let registry = FunctionRegistry::new();
        registry.register_fn(definition("echo"), |args| Ok(args.to_string()));
        registry.register_fn(definition("fail"), |_| {
            Err(FunctionError::Execution("nope".to_string()))
        });
        registry.register_fn(definition("explode"), |_| panic!("kaboom"));
        Arc::new(registry)
    }

    fn error_of(output: &str) -> Value {
        serde_json::from_str(output).unwrap()
    }

    #[tokio::test]
    async fn test_every_call_gets_one_output_in_order() {
        let coordinator = ToolInvocationCoordinator::new(registry(), None);
        let calls = vec![
            call("c1", "echo", r#"{"a":1}"#),
            call("c2", "missing", "{}"),
            call("c3", "fail", "{}"),
            call("c4", "explode", "{}"),
            call("c5", "echo", "[1,2]"),
        ];

        let results = coordinator.execute_batch(&calls).await;
        let outputs = ToolInvocationCoordinator::outputs(&results);
        let ids: Vec<_> = outputs.iter().map(|o| o.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3", "c4", "c5"]);

        assert_eq!(outputs[0].output, r#"{"a":1}"#);
        assert_eq!(error_of(&outputs[1].output)["function_error"], "missing");
        assert!(!results[1].resolved);
        assert_eq!(error_of(&outputs[2].output)["error"], "nope");
        assert!(
            error_of(&outputs[3].output)["error"]
                .as_str()
                .unwrap()
                .contains("kaboom")
        );
        assert_eq!(error_of(&outputs[4].output)["function_error"], "echo");
    }

    #[tokio::test]
    async fn test_one_failing_call_does_not_affect_the_other() {
        let coordinator = ToolInvocationCoordinator::new(registry(), None);
        let results = coordinator
            .execute_batch(&[call("ok", "echo", r#"{"x":"y"}"#), call("bad", "fail", "{}")])
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].output, r#"{"x":"y"}"#);
        assert!(results[1].output.contains("function_error"));
        assert!(results.iter().all(|r| r.resolved));
    }

    #[tokio::test]
    async fn test_sandbox_paths_are_rewritten() {
        let coordinator =
            ToolInvocationCoordinator::new(registry(), Some(PathBuf::from("/tmp/out")));
        let results = coordinator
            .execute_batch(&[call("c1", "echo", r#"{"path":"/mnt/data/x.csv"}"#)])
            .await;
        assert_eq!(results[0].output, r#"{"path":"/tmp/out/x.csv"}"#);
    }

    #[tokio::test]
    async fn test_empty_arguments_are_an_empty_object() {
        let coordinator = ToolInvocationCoordinator::new(registry(), None);
        let results = coordinator.execute_batch(&[call("c1", "echo", "")]).await;
        assert_eq!(results[0].output, "{}");
    }
}
