use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use tilecast_types::{ProviderInfo, ToolCallRequest};

use crate::{Chunk, ChunkStream, CompletionProvider, CompletionRequest, ProviderError};

/// One step of a scripted turn.
#[derive(Debug, Clone)]
pub enum ScriptedChunk {
    Text(String),
    ToolCall { name: String, arguments: Map<String, Value> },
    /// Mid-stream transport failure.
    Fail(String),
    Malformed(String),
    /// Wait this long before the next step.
    Pause(Duration),
    /// Never yields again until cancelled.
    Stall,
    /// Reject the stream before any chunk is produced. Only meaningful first.
    Refuse(String),
}

impl ScriptedChunk {
    pub fn text(text: &str) -> Self {
        ScriptedChunk::Text(text.to_string())
    }

    pub fn call(name: &str, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ScriptedChunk::ToolCall {
            name: name.to_string(),
            arguments,
        }
    }
}

/// Replays a fixed sequence of turns, one per `stream` call, and records
/// every request it receives. Once the script runs out, streams are empty.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<ScriptedChunk>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    opened: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Vec<ScriptedChunk>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            opened: AtomicUsize::new(0),
        }
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    pub fn streams_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "scripted".to_string(),
            name: "Scripted".to_string(),
            model: "script".to_string(),
        }
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        self.requests.lock().await.push(request);
        let turn = self.opened.fetch_add(1, Ordering::SeqCst);
        let chunks = self.turns.lock().await.pop_front().unwrap_or_default();
        if let Some(ScriptedChunk::Refuse(reason)) = chunks.first() {
            return Err(ProviderError::Transport(reason.clone()));
        }

        let stream = stream! {
            let mut next_call = 0usize;
            for chunk in chunks {
                if cancel.is_cancelled() {
                    break;
                }
                match chunk {
                    ScriptedChunk::Text(text) => yield Ok(Chunk::Text(text)),
                    ScriptedChunk::ToolCall { name, arguments } => {
                        let id = format!("call_{turn}_{next_call}");
                        next_call += 1;
                        yield Ok(Chunk::ToolCall(ToolCallRequest::new(id, name, arguments)));
                    }
                    ScriptedChunk::Fail(reason) => {
                        yield Err(ProviderError::Transport(reason));
                        break;
                    }
                    ScriptedChunk::Malformed(detail) => {
                        yield Err(ProviderError::MalformedChunk(detail));
                        break;
                    }
                    ScriptedChunk::Pause(delay) => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    ScriptedChunk::Stall => {
                        cancel.cancelled().await;
                        break;
                    }
                    ScriptedChunk::Refuse(_) => {}
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
