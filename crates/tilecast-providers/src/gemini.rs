use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use tilecast_types::{ConversationItem, ProviderInfo, ToolCallRequest, ToolDeclaration};

use crate::sse::SseFrameBuffer;
use crate::{
    extract_error_message, truncate_for_error, Chunk, ChunkStream, CompletionProvider,
    CompletionRequest, ProviderError,
};

/// Google Generative Language API, streamed over `alt=sse`.
pub struct GeminiProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl GeminiProvider {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client: Client::builder().build()?,
        })
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut contents = Vec::new();
        for item in request.history.items() {
            match item {
                ConversationItem::User { text } => {
                    contents.push(json!({"role": "user", "parts": [{"text": text}]}));
                }
                ConversationItem::Assistant { text } => {
                    contents.push(json!({"role": "model", "parts": [{"text": text}]}));
                }
                ConversationItem::ToolCalls { calls } => {
                    let parts = calls
                        .iter()
                        .map(|call| {
                            json!({"functionCall": {"name": call.name, "args": call.arguments}})
                        })
                        .collect::<Vec<_>>();
                    contents.push(json!({"role": "model", "parts": parts}));
                }
                ConversationItem::ToolResults { results } => {
                    let parts = results
                        .iter()
                        .map(|result| {
                            json!({
                                "functionResponse": {
                                    "name": result.name,
                                    "response": result.payload,
                                }
                            })
                        })
                        .collect::<Vec<_>>();
                    contents.push(json!({"role": "user", "parts": parts}));
                }
            }
        }

        let mut body = json!({ "contents": contents });
        if let Some(system) = &request.system_prompt {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !request.declarations.is_empty() {
            let declarations = request
                .declarations
                .iter()
                .map(function_declaration)
                .collect::<Vec<_>>();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        body
    }
}

fn function_declaration(decl: &ToolDeclaration) -> Value {
    let mut properties = Map::new();
    for (field, ty) in &decl.parameters {
        properties.insert(
            field.clone(),
            json!({ "type": ty.as_str().to_uppercase() }),
        );
    }
    let required = decl
        .parameters
        .iter()
        .map(|(field, _)| field.clone())
        .collect::<Vec<_>>();
    json!({
        "name": decl.name,
        "description": decl.description,
        "parameters": {
            "type": "OBJECT",
            "properties": properties,
            "required": required,
        }
    })
}

/// Splits one streamed candidate into ordered chunks. Gemini does not assign
/// call ids, so they are numbered per stream.
fn candidate_chunks(value: &Value, next_call: &mut usize) -> Result<Vec<Chunk>, ProviderError> {
    let mut chunks = Vec::new();
    let parts = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array);
    let Some(parts) = parts else {
        return Ok(chunks);
    };
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                chunks.push(Chunk::Text(text.to_string()));
            }
        }
        if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| {
                    ProviderError::MalformedChunk("functionCall part has no name".to_string())
                })?;
            let arguments = match call.get("args") {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(other) => {
                    return Err(ProviderError::MalformedChunk(format!(
                        "functionCall args for `{name}` are not an object: {}",
                        truncate_for_error(&other.to_string(), 200)
                    )))
                }
            };
            chunks.push(Chunk::ToolCall(ToolCallRequest::new(
                format!("call_{next_call}"),
                name,
                arguments,
            )));
            *next_call += 1;
        }
    }
    Ok(chunks)
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "gemini".to_string(),
            name: "Google Gemini".to_string(),
            model: self.model.clone(),
        }
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::Configuration("GOOGLE_API_KEY is not set".to_string())
        })?;
        let body = self.request_body(&request);
        let resp = self
            .client
            .post(self.stream_url())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| extract_error_message(&v))
                .unwrap_or(text);
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: truncate_for_error(&detail, 500),
            });
        }

        let mut bytes = resp.bytes_stream();
        let stream = try_stream! {
            let mut frames = SseFrameBuffer::default();
            let mut next_call = 0usize;
            while let Some(chunk) = bytes.next().await {
                if cancel.is_cancelled() {
                    break;
                }
                let chunk = chunk?;
                for payload in frames.push(&chunk) {
                    let value = serde_json::from_str::<Value>(&payload).map_err(|err| {
                        ProviderError::MalformedChunk(format!(
                            "{err}: {}",
                            truncate_for_error(&payload, 200)
                        ))
                    })?;
                    if let Some(detail) = extract_error_message(&value) {
                        Err::<(), _>(ProviderError::Transport(detail))?;
                    }
                    for item in candidate_chunks(&value, &mut next_call)? {
                        yield item;
                    }
                }
            }
            if !cancel.is_cancelled() {
                if let Some(payload) = frames.finish() {
                    if let Ok(value) = serde_json::from_str::<Value>(&payload) {
                        for item in candidate_chunks(&value, &mut next_call)? {
                            yield item;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_stub;
    use axum::extract::Query;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tilecast_types::{History, ParamType, ToolResult};
    use tokio::sync::Mutex;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: Some("You update widgets.".to_string()),
            declarations: vec![ToolDeclaration::new(
                "get_stock_price",
                "Get the current stock price for a given ticker.",
                &[("ticker", ParamType::String)],
            )],
            history: History::starting_with("price for AAPL"),
        }
    }

    #[test]
    fn request_body_maps_roles_and_function_parts() {
        let provider = GeminiProvider::new("http://localhost", "gemini-test", None).expect("provider");
        let mut req = request();
        let mut args = Map::new();
        args.insert("ticker".to_string(), json!("AAPL"));
        req.history.push(ConversationItem::ToolCalls {
            calls: vec![ToolCallRequest::new("call_0", "get_stock_price", args)],
        });
        req.history.push(ConversationItem::ToolResults {
            results: vec![ToolResult::ok(
                "call_0",
                "get_stock_price",
                json!({"ticker": "AAPL", "price": 175.24}),
            )],
        });
        let body = provider.request_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You update widgets.");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(
            body["contents"][1]["parts"][0]["functionCall"]["args"]["ticker"],
            "AAPL"
        );
        assert_eq!(
            body["contents"][2]["parts"][0]["functionResponse"]["response"]["price"],
            175.24
        );
        let decl = &body["tools"][0]["functionDeclarations"][0];
        assert_eq!(decl["parameters"]["properties"]["ticker"]["type"], "STRING");
        assert_eq!(decl["parameters"]["required"][0], "ticker");
    }

    #[test]
    fn candidate_chunks_number_calls_sequentially() {
        let mut next = 0;
        let value = json!({
            "candidates": [{"content": {"parts": [
                {"text": "Checking. "},
                {"functionCall": {"name": "get_stock_price", "args": {"ticker": "AAPL"}}},
                {"functionCall": {"name": "get_current_weather", "args": {"city": "Atlanta"}}}
            ]}}]
        });
        let chunks = candidate_chunks(&value, &mut next).expect("chunks");
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], Chunk::Text("Checking. ".to_string()));
        match &chunks[2] {
            Chunk::ToolCall(call) => {
                assert_eq!(call.id, "call_1");
                assert_eq!(call.argument_str("city"), Some("Atlanta"));
            }
            other => panic!("unexpected chunk: {other:?}"),
        }
        assert_eq!(next, 2);
    }

    #[test]
    fn function_call_without_name_is_malformed() {
        let mut next = 0;
        let value = json!({"candidates": [{"content": {"parts": [{"functionCall": {"args": {}}}]}}]});
        assert!(matches!(
            candidate_chunks(&value, &mut next),
            Err(ProviderError::MalformedChunk(_))
        ));
    }

    #[tokio::test]
    async fn missing_api_key_is_a_configuration_error() {
        let provider = GeminiProvider::new("http://127.0.0.1:1", "gemini-test", None).expect("provider");
        let err = match provider.stream(request(), CancellationToken::new()).await {
            Ok(_) => panic!("expected configuration error"),
            Err(err) => err,
        };
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn streams_text_and_calls_from_sse_frames() {
        let seen = Arc::new(Mutex::new((String::new(), String::new())));
        let sink = seen.clone();
        let router = Router::new().route(
            "/v1beta/models/{action}",
            post(
                move |axum::extract::Path(action): axum::extract::Path<String>,
                      Query(query): Query<HashMap<String, String>>,
                      headers: HeaderMap| {
                    let sink = sink.clone();
                    async move {
                        let key = headers
                            .get("x-goog-api-key")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        *sink.lock().await = (action, key);
                        assert_eq!(query.get("alt").map(String::as_str), Some("sse"));
                        let body = concat!(
                            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Looking up \"}]}}]}\r\n\r\n",
                            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"functionCall\":{\"name\":\"get_stock_price\",\"args\":{\"ticker\":\"AAPL\"}}}]}}]}\r\n\r\n",
                        );
                        ([(header::CONTENT_TYPE, "text/event-stream")], body)
                    }
                },
            ),
        );
        let base = serve_stub(router).await;
        let provider =
            GeminiProvider::new(&base, "gemini-test", Some("g-key".to_string())).expect("provider");
        let chunks = provider
            .stream(request(), CancellationToken::new())
            .await
            .expect("stream")
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|c| c.expect("chunk"))
            .collect::<Vec<_>>();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], Chunk::Text("Looking up ".to_string()));
        assert!(matches!(&chunks[1], Chunk::ToolCall(call) if call.name == "get_stock_price"));
        let (action, key) = seen.lock().await.clone();
        assert_eq!(action, "gemini-test:streamGenerateContent");
        assert_eq!(key, "g-key");
    }

    #[tokio::test]
    async fn error_status_surfaces_api_message() {
        let router = Router::new().route(
            "/v1beta/models/{action}",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": {"message": "API key not valid"}})),
                )
            }),
        );
        let base = serve_stub(router).await;
        let provider =
            GeminiProvider::new(&base, "gemini-test", Some("bad".to_string())).expect("provider");
        match provider.stream(request(), CancellationToken::new()).await {
            Err(ProviderError::Status { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "API key not valid");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected status error"),
        }
    }
}
