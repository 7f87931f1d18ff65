//! HTTP client for the OpenAI Assistants API and its Azure OpenAI flavour.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::sse::{SseDecoder, SseMessage};
use super::{
    Annotation, AnnotationKind, AssistantDefinition, EventStream, FileInfo, NewMessage,
    ProviderClient, ProviderError, ProviderEvent, ProviderResult, RemoteContent, RemoteMessage,
    RunHandle, RunRequest, RunSnapshot, RunStatus, ToolCall, ToolOutput,
};
use crate::error::{ParleyError, ParleyResult};
use crate::models::{AttachmentKind, MessageRole};
use crate::settings::models::{ClientType, ProviderConfig};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_AZURE_API_VERSION: &str = "2024-05-01-preview";
const MESSAGE_PAGE_SIZE: &str = "100";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ApiFlavor {
    OpenAi,
    Azure,
}

pub struct OpenAiClient {
    http: reqwest::Client,
    client_type: ClientType,
    flavor: ApiFlavor,
    api_key: String,
    base_url: String,
    api_version: String,
    request_timeout: Duration,
}

impl OpenAiClient {
    /// Build a client for `client_type` from stored credentials.
    ///
    /// `timeout` bounds connection setup and every non-streaming request.
    /// Streamed bodies are not bounded here; the run controller applies its
    /// own per-event timeout.
    pub fn from_config(
        config: &ProviderConfig,
        client_type: ClientType,
        timeout: Duration,
    ) -> ParleyResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ParleyError::configuration(format!("API key not configured for {client_type}"))
            })?;

        let flavor = if client_type.is_azure() {
            ApiFlavor::Azure
        } else {
            ApiFlavor::OpenAi
        };

        let base_url = match flavor {
            ApiFlavor::OpenAi => config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            ApiFlavor::Azure => config.base_url.clone().ok_or_else(|| {
                ParleyError::configuration(format!("Endpoint not configured for {client_type}"))
            })?,
        };

        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ParleyError::configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            client_type,
            flavor,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: config
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            request_timeout: timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        match self.flavor {
            ApiFlavor::OpenAi => format!("{}{}", self.base_url, path),
            ApiFlavor::Azure => format!("{}/openai{}", self.base_url, path),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, self.url(path))
            .header("OpenAI-Beta", "assistants=v2");

        match self.flavor {
            ApiFlavor::OpenAi => builder.bearer_auth(&self.api_key),
            ApiFlavor::Azure => builder
                .header("api-key", &self.api_key)
                .query(&[("api-version", self.api_version.as_str())]),
        }
    }

    async fn send(&self, builder: RequestBuilder) -> ProviderResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(parse_api_error(status.as_u16(), &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ProviderResult<T> {
        let response = self.send(builder.timeout(self.request_timeout)).await?;
        Ok(response.json::<T>().await?)
    }

    async fn open_stream(&self, builder: RequestBuilder) -> ProviderResult<EventStream> {
        let response = self.send(builder.header("Accept", "text/event-stream")).await?;
        Ok(event_stream(response))
    }

    fn run_body(request: &RunRequest, stream: bool) -> Value {
        let mut body = json!({
            "assistant_id": request.assistant_id,
            "stream": stream,
        });
        if let Some(instructions) = &request.additional_instructions {
            body["additional_instructions"] = json!(instructions);
        }
        body
    }

    fn tool_outputs_body(outputs: &[ToolOutput], stream: bool) -> Value {
        let outputs: Vec<Value> = outputs
            .iter()
            .map(|o| json!({"tool_call_id": o.call_id, "output": o.output}))
            .collect();
        json!({"tool_outputs": outputs, "stream": stream})
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn client_type(&self) -> ClientType {
        self.client_type
    }

    async fn create_assistant(&self, definition: &AssistantDefinition) -> ProviderResult<String> {
        let mut tools: Vec<Value> = definition
            .functions
            .iter()
            .map(|f| {
                json!({
                    "type": "function",
                    "function": {
                        "name": f.name,
                        "description": f.description,
                        "parameters": f.parameters,
                    }
                })
            })
            .collect();
        if definition.code_interpreter {
            tools.push(json!({"type": "code_interpreter"}));
        }
        if definition.file_search {
            tools.push(json!({"type": "file_search"}));
        }

        let body = json!({
            "name": definition.name,
            "model": definition.model,
            "instructions": definition.instructions,
            "tools": tools,
        });
        let created: IdObject = self
            .send_json(self.request(Method::POST, "/assistants").json(&body))
            .await?;
        debug!(assistant_id = %created.id, name = %definition.name, "Created remote assistant");
        Ok(created.id)
    }

    async fn create_thread(&self) -> ProviderResult<String> {
        let created: IdObject = self
            .send_json(self.request(Method::POST, "/threads").json(&json!({})))
            .await?;
        Ok(created.id)
    }

    async fn delete_thread(&self, thread_id: &str) -> ProviderResult<()> {
        let _: Value = self
            .send_json(self.request(Method::DELETE, &format!("/threads/{thread_id}")))
            .await?;
        Ok(())
    }

    async fn create_message(&self, thread_id: &str, message: &NewMessage) -> ProviderResult<()> {
        let body = message_body(message);
        let _: Value = self
            .send_json(
                self.request(Method::POST, &format!("/threads/{thread_id}/messages"))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        run_id: Option<&str>,
    ) -> ProviderResult<Vec<RemoteMessage>> {
        let path = format!("/threads/{thread_id}/messages");
        let mut messages = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = vec![("order", "asc"), ("limit", MESSAGE_PAGE_SIZE)];
            if let Some(run_id) = run_id {
                query.push(("run_id", run_id));
            }
            if let Some(cursor) = after.as_deref() {
                query.push(("after", cursor));
            }

            let page: WireList<WireMessage> = self
                .send_json(self.request(Method::GET, &path).query(&query))
                .await?;
            let has_more = page.has_more;
            let last_id = page.last_id.clone();
            messages.extend(page.data.into_iter().map(WireMessage::into_remote));

            match (has_more, last_id) {
                (true, Some(last_id)) => after = Some(last_id),
                _ => break,
            }
        }

        Ok(messages)
    }

    async fn upload_file(&self, path: &Path) -> ProviderResult<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ProviderError::File(format!("{}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());

        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));

        let created: IdObject = self
            .send_json(self.request(Method::POST, "/files").multipart(form))
            .await?;
        debug!(file_id = %created.id, path = %path.display(), "Uploaded file");
        Ok(created.id)
    }

    async fn delete_file(&self, file_id: &str) -> ProviderResult<()> {
        let _: Value = self
            .send_json(self.request(Method::DELETE, &format!("/files/{file_id}")))
            .await?;
        Ok(())
    }

    async fn file_info(&self, file_id: &str) -> ProviderResult<FileInfo> {
        let info: WireFile = self
            .send_json(self.request(Method::GET, &format!("/files/{file_id}")))
            .await?;
        Ok(FileInfo {
            id: info.id,
            filename: info.filename,
        })
    }

    async fn download_file(&self, file_id: &str) -> ProviderResult<Vec<u8>> {
        let response = self
            .send(
                self.request(Method::GET, &format!("/files/{file_id}/content"))
                    .timeout(self.request_timeout),
            )
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn submit_run(&self, request: &RunRequest) -> ProviderResult<RunHandle> {
        let path = format!("/threads/{}/runs", request.thread_id);
        let run: WireRun = self
            .send_json(
                self.request(Method::POST, &path)
                    .json(&Self::run_body(request, false)),
            )
            .await?;
        Ok(RunHandle {
            thread_id: request.thread_id.clone(),
            run_id: run.id,
        })
    }

    async fn stream_run(&self, request: &RunRequest) -> ProviderResult<EventStream> {
        let path = format!("/threads/{}/runs", request.thread_id);
        self.open_stream(
            self.request(Method::POST, &path)
                .json(&Self::run_body(request, true)),
        )
        .await
    }

    async fn retrieve_run(&self, handle: &RunHandle) -> ProviderResult<RunSnapshot> {
        let path = format!("/threads/{}/runs/{}", handle.thread_id, handle.run_id);
        let run: WireRun = self.send_json(self.request(Method::GET, &path)).await?;
        run.into_snapshot()
    }

    async fn submit_tool_outputs(
        &self,
        handle: &RunHandle,
        outputs: &[ToolOutput],
    ) -> ProviderResult<()> {
        let path = format!(
            "/threads/{}/runs/{}/submit_tool_outputs",
            handle.thread_id, handle.run_id
        );
        let _: Value = self
            .send_json(
                self.request(Method::POST, &path)
                    .json(&Self::tool_outputs_body(outputs, false)),
            )
            .await?;
        Ok(())
    }

    async fn stream_tool_outputs(
        &self,
        handle: &RunHandle,
        outputs: &[ToolOutput],
    ) -> ProviderResult<EventStream> {
        let path = format!(
            "/threads/{}/runs/{}/submit_tool_outputs",
            handle.thread_id, handle.run_id
        );
        self.open_stream(
            self.request(Method::POST, &path)
                .json(&Self::tool_outputs_body(outputs, true)),
        )
        .await
    }

    async fn cancel_run(&self, handle: &RunHandle) -> ProviderResult<()> {
        let path = format!("/threads/{}/runs/{}/cancel", handle.thread_id, handle.run_id);
        let _: Value = self.send_json(self.request(Method::POST, &path)).await?;
        Ok(())
    }

    async fn complete(&self, model: &str, system: &str, prompt: &str) -> ProviderResult<String> {
        let path = match self.flavor {
            ApiFlavor::OpenAi => "/chat/completions".to_string(),
            ApiFlavor::Azure => format!("/deployments/{model}/chat/completions"),
        };
        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let completion: WireCompletion = self
            .send_json(self.request(Method::POST, &path).json(&body))
            .await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("completion without content".to_string()))
    }
}

fn message_body(message: &NewMessage) -> Value {
    let mut content = vec![json!({"type": "text", "text": message.content})];
    for file_id in &message.image_file_ids {
        content.push(json!({"type": "image_file", "image_file": {"file_id": file_id}}));
    }

    let mut body = json!({"role": "user", "content": content});

    let attachments: Vec<Value> = message
        .attachments
        .iter()
        .filter_map(|a| {
            let tool = match a.kind {
                AttachmentKind::CodeInterpreter => "code_interpreter",
                AttachmentKind::FileSearch => "file_search",
                AttachmentKind::Image => return None,
            };
            Some(json!({"file_id": a.file_id, "tools": [{"type": tool}]}))
        })
        .collect();
    if !attachments.is_empty() {
        body["attachments"] = json!(attachments);
    }
    if !message.metadata.is_empty() {
        body["metadata"] = json!(message.metadata);
    }
    body
}

fn parse_api_error(status: u16, body: &str) -> ProviderError {
    #[derive(Deserialize)]
    struct Envelope {
        error: WireError,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => ProviderError::Api {
            status,
            code: envelope
                .error
                .code
                .or(envelope.error.kind)
                .unwrap_or_else(|| format!("http_{status}")),
            message: envelope
                .error
                .message
                .unwrap_or_else(|| body.to_string()),
        },
        Err(_) => ProviderError::Api {
            status,
            code: format!("http_{status}"),
            message: body.chars().take(500).collect(),
        },
    }
}

fn event_stream(response: Response) -> EventStream {
    let mut bytes = Box::pin(response.bytes_stream());

    Box::pin(async_stream::stream! {
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for message in decoder.feed(&chunk) {
                        for event in map_sse_message(&message) {
                            let terminal = event.is_terminal();
                            yield event;
                            if terminal {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = ?e, "Run event stream interrupted");
                    yield if e.is_timeout() {
                        ProviderEvent::Timeout
                    } else {
                        ProviderEvent::Exception { message: e.to_string() }
                    };
                    return;
                }
            }
        }

        if let Some(message) = decoder.flush() {
            for event in map_sse_message(&message) {
                yield event;
            }
        }
    })
}

fn map_sse_message(message: &SseMessage) -> Vec<ProviderEvent> {
    if message.data.trim() == "[DONE]" {
        return Vec::new();
    }
    map_stream_event(message.event.as_deref().unwrap_or("message"), &message.data)
}

fn parse_event<T: DeserializeOwned>(event: &str, data: &str) -> Result<T, ProviderEvent> {
    serde_json::from_str(data).map_err(|e| {
        warn!(event = %event, error = %e, "Malformed run event");
        ProviderEvent::Exception {
            message: format!("Malformed '{event}' event: {e}"),
        }
    })
}

/// Map one assistants-stream event to provider events.
pub(crate) fn map_stream_event(event: &str, data: &str) -> Vec<ProviderEvent> {
    let mapped = match event {
        "thread.run.created" => {
            parse_event::<IdObject>(event, data).map(|r| vec![ProviderEvent::RunCreated { run_id: r.id }])
        }
        "thread.message.created" => parse_event::<IdObject>(event, data)
            .map(|m| vec![ProviderEvent::MessageCreated { message_id: m.id }]),
        "thread.message.delta" => parse_event::<WireMessageDelta>(event, data).map(|delta| {
            delta
                .delta
                .content
                .into_iter()
                .filter_map(|c| match c {
                    WireDeltaContent::Text { text } => text.value,
                    WireDeltaContent::Other => None,
                })
                .filter(|text| !text.is_empty())
                .map(|text| ProviderEvent::TextDelta { text })
                .collect()
        }),
        "thread.message.completed" => parse_event::<WireMessage>(event, data).map(|message| {
            let text = message
                .content
                .into_iter()
                .filter_map(|c| match c {
                    WireContent::Text { text } => Some(text.value),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            vec![ProviderEvent::TextDone { text }]
        }),
        "thread.run.step.delta" => parse_event::<WireStepDelta>(event, data).map(|delta| {
            delta
                .delta
                .step_details
                .map(|d| d.tool_calls)
                .unwrap_or_default()
                .into_iter()
                .filter(|c| c.kind.as_deref().is_none_or(|k| k == "function"))
                .map(|c| {
                    let (name, arguments) = match c.function {
                        Some(f) => (f.name, f.arguments.unwrap_or_default()),
                        None => (None, String::new()),
                    };
                    ProviderEvent::ToolCallDelta {
                        call_id: c.id,
                        name,
                        arguments,
                    }
                })
                .collect()
        }),
        "thread.run.step.completed" => parse_event::<WireRunStep>(event, data).map(|step| {
            step.step_details
                .tool_calls
                .into_iter()
                .filter_map(|c| {
                    let name = c.function?.name?;
                    Some(ProviderEvent::ToolCallDone {
                        call_id: c.id?,
                        name,
                    })
                })
                .collect()
        }),
        "thread.run.requires_action" => parse_event::<WireRun>(event, data).map(|run| {
            let calls = run.tool_calls();
            vec![ProviderEvent::RequiresToolOutput {
                run_id: run.id,
                calls,
            }]
        }),
        "thread.run.completed" => Ok(vec![ProviderEvent::RunEnd]),
        "thread.run.failed" => parse_event::<WireRun>(event, data).map(|run| {
            let (code, message) = run.error_parts();
            vec![ProviderEvent::Failed { code, message }]
        }),
        "thread.run.incomplete" => Ok(vec![ProviderEvent::Failed {
            code: "incomplete".to_string(),
            message: "Run ended before completion".to_string(),
        }]),
        "thread.run.cancelled" | "thread.run.expired" => Ok(vec![ProviderEvent::Cancelled]),
        "error" => {
            let message = serde_json::from_str::<WireError>(data)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| data.to_string());
            Ok(vec![ProviderEvent::Exception { message }])
        }
        _ => Ok(Vec::new()),
    };

    mapped.unwrap_or_else(|exception| vec![exception])
}

// ─── wire types ───

#[derive(Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Deserialize)]
struct WireList<T> {
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    last_id: Option<String>,
}

#[derive(Deserialize)]
struct WireFile {
    id: String,
    #[serde(default)]
    filename: String,
}

#[derive(Deserialize)]
struct WireMessage {
    id: String,
    role: String,
    #[serde(default)]
    assistant_id: Option<String>,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    content: Vec<WireContent>,
}

impl WireMessage {
    fn into_remote(self) -> RemoteMessage {
        let role = if self.role == "assistant" {
            MessageRole::Assistant
        } else {
            MessageRole::User
        };
        let content = self
            .content
            .into_iter()
            .filter_map(|c| match c {
                WireContent::Text { text } => Some(RemoteContent::Text {
                    value: text.value,
                    annotations: text
                        .annotations
                        .into_iter()
                        .filter_map(WireAnnotation::into_annotation)
                        .collect(),
                }),
                WireContent::ImageFile { image_file } => Some(RemoteContent::ImageFile {
                    file_id: image_file.file_id,
                }),
                WireContent::Other => None,
            })
            .collect();

        RemoteMessage {
            id: self.id,
            role,
            assistant_id: self.assistant_id,
            run_id: self.run_id,
            metadata: self.metadata.unwrap_or_default(),
            content,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContent {
    Text {
        text: WireText,
    },
    ImageFile {
        image_file: WireFileRef,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireText {
    value: String,
    #[serde(default)]
    annotations: Vec<WireAnnotation>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireAnnotation {
    FileCitation {
        text: String,
        file_citation: WireFileRef,
    },
    FilePath {
        text: String,
        file_path: WireFileRef,
    },
    #[serde(other)]
    Other,
}

impl WireAnnotation {
    fn into_annotation(self) -> Option<Annotation> {
        match self {
            WireAnnotation::FileCitation {
                text,
                file_citation,
            } => Some(Annotation {
                text,
                kind: AnnotationKind::FileCitation {
                    file_id: file_citation.file_id,
                },
            }),
            WireAnnotation::FilePath { text, file_path } => Some(Annotation {
                text,
                kind: AnnotationKind::FilePath {
                    file_id: file_path.file_id,
                },
            }),
            WireAnnotation::Other => None,
        }
    }
}

#[derive(Deserialize)]
struct WireFileRef {
    file_id: String,
}

#[derive(Deserialize)]
struct WireRun {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    required_action: Option<WireRequiredAction>,
    #[serde(default)]
    last_error: Option<WireError>,
}

impl WireRun {
    fn tool_calls(&self) -> Vec<ToolCall> {
        self.required_action
            .as_ref()
            .and_then(|a| a.submit_tool_outputs.as_ref())
            .map(|s| {
                s.tool_calls
                    .iter()
                    .map(|c| {
                        let (name, arguments) = match &c.function {
                            Some(f) => (
                                f.name.clone().unwrap_or_default(),
                                f.arguments.clone().unwrap_or_default(),
                            ),
                            None => (String::new(), String::new()),
                        };
                        ToolCall {
                            call_id: c.id.clone(),
                            name,
                            arguments,
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn error_parts(&self) -> (String, String) {
        let code = self
            .last_error
            .as_ref()
            .and_then(|e| e.code.clone())
            .unwrap_or_else(|| "run_failed".to_string());
        let message = self
            .last_error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| "Run failed".to_string());
        (code, message)
    }

    fn into_snapshot(self) -> ProviderResult<RunSnapshot> {
        let status = RunStatus::parse(&self.status).ok_or_else(|| {
            ProviderError::InvalidResponse(format!("unknown run status '{}'", self.status))
        })?;
        let required_tool_calls = self.tool_calls();
        let last_error = match status {
            RunStatus::Failed => Some(self.error_parts()),
            _ => None,
        };
        Ok(RunSnapshot {
            run_id: self.id,
            status,
            required_tool_calls,
            last_error,
        })
    }
}

#[derive(Deserialize)]
struct WireRequiredAction {
    #[serde(default)]
    submit_tool_outputs: Option<WireSubmitToolOutputs>,
}

#[derive(Deserialize)]
struct WireSubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(default)]
    function: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct WireMessageDelta {
    delta: WireDeltaBody,
}

#[derive(Deserialize)]
struct WireDeltaBody {
    #[serde(default)]
    content: Vec<WireDeltaContent>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDeltaContent {
    Text {
        text: WireDeltaText,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireDeltaText {
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct WireStepDelta {
    delta: WireStepDeltaBody,
}

#[derive(Deserialize)]
struct WireStepDeltaBody {
    #[serde(default)]
    step_details: Option<WireStepDetails>,
}

#[derive(Deserialize)]
struct WireRunStep {
    step_details: WireStepDetails,
}

#[derive(Deserialize)]
struct WireStepDetails {
    #[serde(default)]
    tool_calls: Vec<WireStepToolCall>,
}

#[derive(Deserialize)]
struct WireStepToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    function: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireCompletion {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
