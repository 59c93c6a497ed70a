use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::Level;

use tilecast_observability::{emit_event, ObservabilityEvent, ProcessKind};
use tilecast_providers::{Chunk, CompletionProvider, CompletionSession};
use tilecast_tools::{ToolKind, ToolRegistry};
use tilecast_types::{StreamEvent, ToolCallRequest, ToolResult};

use crate::context::{dispatch_unless_cancelled, ChunkReader, EventSink, Outcome, RequestContext};
use crate::RelayError;

pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that will update widget data using answer natural language queries.";

/// Where a streaming turn currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    StreamingInitial,
    StreamingText,
    ToolDispatch,
    StreamingFinal,
    Done,
}

impl TurnState {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnState::StreamingInitial => "streaming_initial",
            TurnState::StreamingText => "streaming_text",
            TurnState::ToolDispatch => "tool_dispatch",
            TurnState::StreamingFinal => "streaming_final",
            TurnState::Done => "done",
        }
    }
}

/// Drives one chat turn: stream the model, dispatch any tool calls it makes,
/// then stream its continuation.
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn CompletionProvider>,
    registry: ToolRegistry,
    reader: ChunkReader,
    process: ProcessKind,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        registry: ToolRegistry,
        idle_timeout: Duration,
        process: ProcessKind,
    ) -> Self {
        Self {
            provider,
            registry,
            reader: ChunkReader::new(idle_timeout),
            process,
        }
    }

    /// Never returns an error: a failure becomes one final `Error:` text event.
    pub async fn run(&self, ctx: &RequestContext, message: &str, sink: &EventSink) -> Outcome {
        let provider_id = self.provider.info().id;
        match self.drive(ctx, message, sink).await {
            Ok(outcome) => {
                emit_event(
                    Level::INFO,
                    self.process,
                    ObservabilityEvent {
                        request_id: Some(&ctx.request_id),
                        provider_id: Some(&provider_id),
                        status: Some(match outcome {
                            Outcome::Completed => "completed",
                            Outcome::Abandoned => "abandoned",
                        }),
                        ..ObservabilityEvent::new("turn.finish", "orchestrator")
                    },
                );
                outcome
            }
            Err(err) => {
                let detail = err.to_string();
                emit_event(
                    Level::ERROR,
                    self.process,
                    ObservabilityEvent {
                        request_id: Some(&ctx.request_id),
                        provider_id: Some(&provider_id),
                        status: Some("failed"),
                        error_code: Some(err.code()),
                        detail: Some(&detail),
                        ..ObservabilityEvent::new("turn.error", "orchestrator")
                    },
                );
                match sink.emit(StreamEvent::error(&err)).await {
                    Ok(()) => Outcome::Completed,
                    Err(_) => Outcome::Abandoned,
                }
            }
        }
    }

    async fn drive(
        &self,
        ctx: &RequestContext,
        message: &str,
        sink: &EventSink,
    ) -> Result<Outcome, RelayError> {
        let cancel = &ctx.cancel;
        let mut session = CompletionSession::open(
            self.provider.clone(),
            Some(SYSTEM_PROMPT.to_string()),
            self.registry.declarations(),
            message,
        );
        let mut state = TurnState::StreamingInitial;
        let Some(mut stream) = self.reader.open(&session, cancel).await? else {
            return Ok(Outcome::Abandoned);
        };

        let mut streamed_text = String::new();
        let mut calls: Vec<ToolCallRequest> = Vec::new();
        while let Some(chunk) = self.reader.next(&mut stream, cancel).await? {
            match chunk {
                Chunk::Text(text) => {
                    if state == TurnState::ToolDispatch {
                        tracing::debug!(request_id = %ctx.request_id, "ignoring text after tool call");
                        continue;
                    }
                    state = TurnState::StreamingText;
                    streamed_text.push_str(&text);
                    if sink.emit(StreamEvent::text(text)).await.is_err() {
                        return Ok(Outcome::Abandoned);
                    }
                }
                Chunk::ToolCall(call) => {
                    state = TurnState::ToolDispatch;
                    calls.push(call);
                }
            }
        }
        drop(stream);
        if cancel.is_cancelled() {
            return Ok(Outcome::Abandoned);
        }
        if state != TurnState::ToolDispatch {
            tracing::debug!(request_id = %ctx.request_id, state = TurnState::Done.as_str(), "turn finished without tools");
            return Ok(Outcome::Completed);
        }

        // Resolve every name first so an unknown tool produces no widget events.
        let kinds = calls
            .iter()
            .map(|call| self.registry.lookup(&call.name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut results = Vec::with_capacity(calls.len());
        for (kind, call) in kinds.iter().copied().zip(&calls) {
            let Some(result) = dispatch_unless_cancelled(&self.registry, kind, call, cancel).await
            else {
                return Ok(Outcome::Abandoned);
            };
            self.log_dispatch(ctx, kind, &result);
            let update = StreamEvent::WidgetUpdate {
                widget: kind.widget(),
                data: widget_data(kind, call, &result),
            };
            if sink.emit(update).await.is_err() {
                return Ok(Outcome::Abandoned);
            }
            results.push(result);
        }

        session.record_assistant_text(streamed_text);
        session.record_tool_round(calls, results);
        state = TurnState::StreamingFinal;
        tracing::debug!(request_id = %ctx.request_id, state = state.as_str(), "continuing after tool round");

        let Some(mut stream) = self.reader.open(&session, cancel).await? else {
            return Ok(Outcome::Abandoned);
        };
        while let Some(chunk) = self.reader.next(&mut stream, cancel).await? {
            match chunk {
                Chunk::Text(text) => {
                    if sink.emit(StreamEvent::text(text)).await.is_err() {
                        return Ok(Outcome::Abandoned);
                    }
                }
                Chunk::ToolCall(call) => {
                    return Err(RelayError::UnexpectedProviderState(format!(
                        "tool call `{}` after tool results",
                        call.name
                    )));
                }
            }
        }
        if cancel.is_cancelled() {
            return Ok(Outcome::Abandoned);
        }
        Ok(Outcome::Completed)
    }

    fn log_dispatch(&self, ctx: &RequestContext, kind: ToolKind, result: &ToolResult) {
        let (level, status) = if result.is_error {
            (Level::WARN, "error")
        } else {
            (Level::INFO, "ok")
        };
        emit_event(
            level,
            self.process,
            ObservabilityEvent {
                request_id: Some(&ctx.request_id),
                tool: Some(kind.name()),
                status: Some(status),
                detail: result.error_reason(),
                ..ObservabilityEvent::new("tool.dispatch", "orchestrator")
            },
        );
    }
}

/// `{<argument key>: <argument value>, "info": <payload>}`.
pub fn widget_data(kind: ToolKind, call: &ToolCallRequest, result: &ToolResult) -> Value {
    let key = kind.argument_key();
    let mut data = Map::new();
    data.insert(
        key.to_string(),
        call.arguments.get(key).cloned().unwrap_or(Value::Null),
    );
    data.insert("info".to_string(), result.payload_value());
    Value::Object(data)
}
