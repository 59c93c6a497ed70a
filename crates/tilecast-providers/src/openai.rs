use std::collections::BTreeMap;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use tilecast_types::{ConversationItem, ProviderInfo, ToolCallRequest};

use crate::sse::SseFrameBuffer;
use crate::{
    extract_error_message, truncate_for_error, Chunk, ChunkStream, CompletionProvider,
    CompletionRequest, ProviderError,
};

/// Any `/chat/completions` endpoint speaking the OpenAI streaming format.
pub struct OpenAiCompatibleProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client: Client::builder().build()?,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        for item in request.history.items() {
            match item {
                ConversationItem::User { text } => {
                    messages.push(json!({"role": "user", "content": text}));
                }
                ConversationItem::Assistant { text } => {
                    messages.push(json!({"role": "assistant", "content": text}));
                }
                ConversationItem::ToolCalls { calls } => {
                    let tool_calls = calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": Value::Object(call.arguments.clone()).to_string(),
                                }
                            })
                        })
                        .collect::<Vec<_>>();
                    messages.push(json!({
                        "role": "assistant",
                        "content": Value::Null,
                        "tool_calls": tool_calls,
                    }));
                }
                ConversationItem::ToolResults { results } => {
                    for result in results {
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": result.call_id,
                            "content": result.payload_value().to_string(),
                        }));
                    }
                }
            }
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        let tools = request
            .declarations
            .iter()
            .map(|decl| {
                json!({
                    "type": "function",
                    "function": {
                        "name": decl.name,
                        "description": decl.description,
                        "parameters": decl.parameters_schema(),
                    }
                })
            })
            .collect::<Vec<_>>();
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args: String,
}

/// Tool-call deltas arrive in fragments keyed by index; they become whole
/// requests only once the turn finishes.
#[derive(Default)]
struct ToolCallAccumulator {
    pending: BTreeMap<u64, PendingToolCall>,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, delta: &Value) {
        let index = delta.get("index").and_then(Value::as_u64).unwrap_or(0);
        let entry = self.pending.entry(index).or_default();
        if let Some(id) = delta.get("id").and_then(Value::as_str) {
            if !id.is_empty() {
                entry.id = id.to_string();
            }
        }
        if let Some(function) = delta.get("function") {
            if let Some(name) = function.get("name").and_then(Value::as_str) {
                entry.name.push_str(name);
            }
            if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                entry.args.push_str(args);
            }
        }
    }

    fn drain(&mut self) -> Result<Vec<ToolCallRequest>, ProviderError> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .map(|(index, call)| {
                if call.name.trim().is_empty() {
                    return Err(ProviderError::MalformedChunk(format!(
                        "tool call at index {index} has no function name"
                    )));
                }
                let arguments = parse_arguments(&call.name, &call.args)?;
                let id = if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                };
                Ok(ToolCallRequest::new(id, call.name, arguments))
            })
            .collect()
    }
}

fn parse_arguments(name: &str, raw: &str) -> Result<Map<String, Value>, ProviderError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProviderError::MalformedChunk(format!(
            "arguments for `{name}` are not an object: {}",
            truncate_for_error(&other.to_string(), 200)
        ))),
        Err(err) => Err(ProviderError::MalformedChunk(format!(
            "arguments for `{name}` are not valid JSON: {err}"
        ))),
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "openai".to_string(),
            name: "OpenAI-Compatible".to_string(),
            model: self.model.clone(),
        }
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request);
        let mut req = self.client.post(url).json(&body);
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate_for_error(&text, 500),
            });
        }

        let mut bytes = resp.bytes_stream();
        let stream = try_stream! {
            let mut frames = SseFrameBuffer::default();
            let mut calls = ToolCallAccumulator::default();
            let mut finished = false;
            'read: while let Some(chunk) = bytes.next().await {
                if cancel.is_cancelled() {
                    break;
                }
                let chunk = chunk?;
                for payload in frames.push(&chunk) {
                    if payload.trim() == "[DONE]" {
                        finished = true;
                        break 'read;
                    }
                    let value = serde_json::from_str::<Value>(&payload).map_err(|err| {
                        ProviderError::MalformedChunk(format!(
                            "{err}: {}",
                            truncate_for_error(&payload, 200)
                        ))
                    })?;
                    if let Some(detail) = extract_error_message(&value) {
                        Err::<(), _>(ProviderError::Transport(detail))?;
                    }
                    let choices = value
                        .get("choices")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    for choice in choices {
                        let delta = choice.get("delta").cloned().unwrap_or_default();
                        if let Some(text) = delta.get("content").and_then(Value::as_str) {
                            if !text.is_empty() {
                                yield Chunk::Text(text.to_string());
                            }
                        }
                        if let Some(deltas) = delta.get("tool_calls").and_then(Value::as_array) {
                            for call in deltas {
                                calls.absorb(call);
                            }
                        }
                        let reason = choice
                            .get("finish_reason")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        if !reason.is_empty() {
                            for call in calls.drain()? {
                                yield Chunk::ToolCall(call);
                            }
                        }
                    }
                }
            }
            if !finished && !cancel.is_cancelled() {
                if let Some(payload) = frames.finish() {
                    tracing::debug!(payload = %truncate_for_error(&payload, 200), "dropping unterminated provider frame");
                }
            }
            for call in calls.drain()? {
                yield Chunk::ToolCall(call);
            }
        };

        Ok(Box::pin(stream))
    }
}
