//! Duplex realtime sessions (OpenAI Realtime API over websockets).
//!
//! A session stream carries consecutive responses. Each response starts with
//! `RunCreated` (the response id) and ends with a terminal event; the stream
//! itself ends when the socket closes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::{EventStream, ProviderError, ProviderEvent, ProviderResult, ToolCall, ToolOutput};
use crate::functions::FunctionDefinition;
use crate::settings::models::{ClientType, ProviderConfig};

const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
const DEFAULT_AZURE_REALTIME_API_VERSION: &str = "2024-10-01-preview";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// What a session is configured with when it is opened.
#[derive(Clone, Debug, PartialEq)]
pub struct RealtimeSessionConfig {
    pub model: String,
    pub instructions: String,
    pub functions: Vec<FunctionDefinition>,
}

#[async_trait]
pub trait RealtimeSession: Send + Sync {
    /// Append a user message and request a response.
    async fn send_text(&self, text: &str) -> ProviderResult<()>;

    async fn cancel_response(&self) -> ProviderResult<()>;

    /// Answer the function calls of the last response and request a new one.
    async fn submit_tool_outputs(&self, outputs: &[ToolOutput]) -> ProviderResult<()>;

    async fn close(&self) -> ProviderResult<()>;
}

#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(
        &self,
        config: &RealtimeSessionConfig,
    ) -> ProviderResult<(Arc<dyn RealtimeSession>, EventStream)>;
}

type SocketSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub struct OpenAiRealtimeConnector {
    client_type: ClientType,
    api_key: String,
    endpoint: Option<String>,
    api_version: String,
    timeout: Duration,
}

impl OpenAiRealtimeConnector {
    pub fn from_config(config: &ProviderConfig, client_type: ClientType, timeout: Duration) -> Self {
        Self {
            client_type,
            api_key: config.api_key.clone().unwrap_or_default(),
            endpoint: config
                .base_url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string()),
            api_version: config
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_AZURE_REALTIME_API_VERSION.to_string()),
            timeout,
        }
    }

    fn url(&self, model: &str) -> ProviderResult<String> {
        if !self.client_type.is_azure() {
            return Ok(format!("{OPENAI_REALTIME_URL}?model={model}"));
        }

        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| ProviderError::Unsupported("Azure realtime needs an endpoint".into()))?;
        let host = endpoint
            .strip_prefix("https://")
            .or_else(|| endpoint.strip_prefix("http://"))
            .unwrap_or(endpoint);
        Ok(format!(
            "wss://{host}/openai/realtime?api-version={}&deployment={model}",
            self.api_version
        ))
    }
}

#[async_trait]
impl RealtimeConnector for OpenAiRealtimeConnector {
    async fn connect(
        &self,
        config: &RealtimeSessionConfig,
    ) -> ProviderResult<(Arc<dyn RealtimeSession>, EventStream)> {
        let mut request = self
            .url(&config.model)?
            .into_client_request()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let headers = request.headers_mut();
        if self.client_type.is_azure() {
            headers.insert("api-key", header_value(&self.api_key)?);
        } else {
            headers.insert(
                "Authorization",
                header_value(&format!("Bearer {}", self.api_key))?,
            );
            headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
        }

        let (socket, _) = tokio::time::timeout(self.timeout, connect_async(request))
            .await
            .map_err(|_| ProviderError::Timeout)?
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        info!(model = %config.model, client_type = %self.client_type, "Realtime session connected");

        let (sink, mut source) = socket.split();
        let session = Arc::new(WebSocketSession {
            sink: Mutex::new(sink),
        });
        session.send(session_update(config)).await?;

        let events: EventStream = Box::pin(async_stream::stream! {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        for event in map_server_event(&text) {
                            yield event;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Realtime socket error");
                        yield ProviderEvent::Exception { message: e.to_string() };
                        break;
                    }
                }
            }
            debug!("Realtime event stream ended");
        });

        Ok((session, events))
    }
}

fn header_value(value: &str) -> ProviderResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ProviderError::Http(e.to_string()))
}

fn session_update(config: &RealtimeSessionConfig) -> Value {
    let tools: Vec<Value> = config
        .functions
        .iter()
        .map(|f| {
            json!({
                "type": "function",
                "name": f.name,
                "description": f.description,
                "parameters": f.parameters,
            })
        })
        .collect();

    json!({
        "type": "session.update",
        "session": {
            "modalities": ["text"],
            "instructions": config.instructions,
            "tools": tools,
            "tool_choice": "auto",
        }
    })
}

struct WebSocketSession {
    sink: Mutex<SocketSink>,
}

impl WebSocketSession {
    async fn send(&self, event: Value) -> ProviderResult<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(event.to_string()))
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))
    }
}

#[async_trait]
impl RealtimeSession for WebSocketSession {
    async fn send_text(&self, text: &str) -> ProviderResult<()> {
        self.send(json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "user",
                "content": [{"type": "input_text", "text": text}],
            }
        }))
        .await?;
        self.send(json!({"type": "response.create"})).await
    }

    async fn cancel_response(&self) -> ProviderResult<()> {
        self.send(json!({"type": "response.cancel"})).await
    }

    async fn submit_tool_outputs(&self, outputs: &[ToolOutput]) -> ProviderResult<()> {
        for output in outputs {
            self.send(json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "function_call_output",
                    "call_id": output.call_id,
                    "output": output.output,
                }
            }))
            .await?;
        }
        self.send(json!({"type": "response.create"})).await
    }

    async fn close(&self) -> ProviderResult<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(None))
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ServerEvent {
    #[serde(rename = "response.created")]
    ResponseCreated { response: ResponseBody },
    #[serde(rename = "response.text.delta")]
    TextDelta { delta: String },
    #[serde(rename = "response.text.done")]
    TextDone { text: String },
    #[serde(rename = "response.function_call_arguments.delta")]
    ArgumentsDelta {
        #[serde(default)]
        call_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "response.done")]
    ResponseDone { response: ResponseBody },
    #[serde(rename = "error")]
    Error { error: ErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ResponseBody {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_details: Option<Value>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Map one realtime server event to provider events.
pub(crate) fn map_server_event(text: &str) -> Vec<ProviderEvent> {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            return vec![ProviderEvent::Exception {
                message: format!("Malformed realtime event: {e}"),
            }];
        }
    };

    match event {
        ServerEvent::ResponseCreated { response } => {
            vec![ProviderEvent::RunCreated {
                run_id: response.id,
            }]
        }
        ServerEvent::TextDelta { delta } if !delta.is_empty() => {
            vec![ProviderEvent::TextDelta { text: delta }]
        }
        ServerEvent::TextDone { text } => vec![ProviderEvent::TextDone { text }],
        ServerEvent::ArgumentsDelta { call_id, delta } => vec![ProviderEvent::ToolCallDelta {
            call_id,
            name: None,
            arguments: delta,
        }],
        ServerEvent::ResponseDone { response } => response_done(response),
        ServerEvent::Error { error } => vec![ProviderEvent::Exception {
            message: error
                .message
                .unwrap_or_else(|| "Realtime session error".to_string()),
        }],
        ServerEvent::TextDelta { .. } | ServerEvent::Other => Vec::new(),
    }
}

fn response_done(response: ResponseBody) -> Vec<ProviderEvent> {
    let calls: Vec<ToolCall> = response
        .output
        .iter()
        .filter(|item| item.kind == "function_call")
        .filter_map(|item| {
            Some(ToolCall {
                call_id: item.call_id.clone()?,
                name: item.name.clone()?,
                arguments: item.arguments.clone().unwrap_or_default(),
            })
        })
        .collect();
    if !calls.is_empty() {
        return vec![ProviderEvent::RequiresToolOutput {
            run_id: response.id,
            calls,
        }];
    }

    match response.status.as_deref() {
        Some("cancelled") => vec![ProviderEvent::Cancelled],
        Some("failed") | Some("incomplete") => {
            let details = response.status_details.unwrap_or(Value::Null);
            let code = details["error"]["code"]
                .as_str()
                .or_else(|| details["reason"].as_str())
                .unwrap_or("response_failed")
                .to_string();
            let message = details["error"]["message"]
                .as_str()
                .unwrap_or("Realtime response failed")
                .to_string();
            vec![ProviderEvent::Failed { code, message }]
        }
        _ => vec![ProviderEvent::RunEnd],
    }
}
