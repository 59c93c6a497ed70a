use std::sync::Arc;
use std::time::Duration;

use tracing::Level;

use tilecast_observability::{emit_event, ObservabilityEvent, ProcessKind};
use tilecast_providers::{Chunk, CompletionProvider, CompletionSession};
use tilecast_tools::ToolRegistry;
use tilecast_types::{AgentId, StreamEvent, ToolResult};

use crate::context::{dispatch_unless_cancelled, ChunkReader, EventSink, Outcome, RequestContext};
use crate::orchestrator::SYSTEM_PROMPT;
use crate::RelayError;

pub const BOARD_QUERY: &str = "What's the stock price for GOOG and the weather in New York?";

pub const ANALYST_PROMPT: &str = "You are a factual data analyst. Describe the provided data in a clear, concise, and professional manner. Do not add creative flair.";

pub const COMMENTATOR_PROMPT: &str = "You are a witty, speculative, and humorous commentator. Take the factual analysis and add wildly imaginative commentary. Be entertaining.";

/// Summarises the dashboard in two voices. Tool results feed the analyst,
/// whose answer feeds the commentator; only the two persona answers are sent.
#[derive(Clone)]
pub struct BoardPipeline {
    provider: Arc<dyn CompletionProvider>,
    registry: ToolRegistry,
    reader: ChunkReader,
    process: ProcessKind,
}

impl BoardPipeline {
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

    pub async fn run(&self, ctx: &RequestContext, sink: &EventSink) -> Outcome {
        match self.drive(ctx, sink).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let detail = err.to_string();
                emit_event(
                    Level::ERROR,
                    self.process,
                    ObservabilityEvent {
                        request_id: Some(&ctx.request_id),
                        status: Some("failed"),
                        error_code: Some(err.code()),
                        detail: Some(&detail),
                        ..ObservabilityEvent::new("board.error", "pipeline")
                    },
                );
                match sink.emit(StreamEvent::error(&err)).await {
                    Ok(()) => Outcome::Completed,
                    Err(_) => Outcome::Abandoned,
                }
            }
        }
    }

    async fn drive(&self, ctx: &RequestContext, sink: &EventSink) -> Result<Outcome, RelayError> {
        let cancel = &ctx.cancel;
        let Some(data) = self.gather(ctx).await? else {
            return Ok(Outcome::Abandoned);
        };

        let analyst = CompletionSession::open(
            self.provider.clone(),
            Some(ANALYST_PROMPT.to_string()),
            Vec::new(),
            format!("Data: {data}"),
        );
        let Some(analysis) = self.reader.complete(&analyst, cancel).await? else {
            return Ok(Outcome::Abandoned);
        };
        let analyst_event = StreamEvent::UiUpdate {
            agent: AgentId::A,
            content: analysis.clone(),
        };
        if sink.emit(analyst_event).await.is_err() {
            return Ok(Outcome::Abandoned);
        }

        let commentator = CompletionSession::open(
            self.provider.clone(),
            Some(COMMENTATOR_PROMPT.to_string()),
            Vec::new(),
            format!("Factual analysis: {analysis}"),
        );
        let Some(commentary) = self.reader.complete(&commentator, cancel).await? else {
            return Ok(Outcome::Abandoned);
        };
        let commentator_event = StreamEvent::UiUpdate {
            agent: AgentId::B,
            content: commentary,
        };
        if sink.emit(commentator_event).await.is_err() {
            return Ok(Outcome::Abandoned);
        }
        Ok(Outcome::Completed)
    }

    /// Run the board query's tool calls and describe each result on one line.
    async fn gather(&self, ctx: &RequestContext) -> Result<Option<String>, RelayError> {
        let cancel = &ctx.cancel;
        let session = CompletionSession::open(
            self.provider.clone(),
            Some(SYSTEM_PROMPT.to_string()),
            self.registry.declarations(),
            BOARD_QUERY,
        );
        let Some(mut stream) = self.reader.open(&session, cancel).await? else {
            return Ok(None);
        };
        let mut calls = Vec::new();
        while let Some(chunk) = self.reader.next(&mut stream, cancel).await? {
            if let Chunk::ToolCall(call) = chunk {
                calls.push(call);
            }
        }
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let kinds = calls
            .iter()
            .map(|call| self.registry.lookup(&call.name))
            .collect::<Result<Vec<_>, _>>()?;
        let mut lines = Vec::with_capacity(calls.len());
        for (kind, call) in kinds.into_iter().zip(&calls) {
            let Some(result) = dispatch_unless_cancelled(&self.registry, kind, call, cancel).await
            else {
                return Ok(None);
            };
            tracing::debug!(request_id = %ctx.request_id, tool = kind.name(), is_error = result.is_error, "board tool dispatched");
            lines.push(describe(&result));
        }
        Ok(Some(lines.join("\n")))
    }
}

fn describe(result: &ToolResult) -> String {
    format!("Tool: {} -> Output: {}", result.name, result.payload_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tilecast_providers::{ScriptedChunk, ScriptedProvider};
    use tilecast_types::ConversationItem;

    fn pipeline(provider: Arc<ScriptedProvider>) -> BoardPipeline {
        BoardPipeline::new(
            provider,
            ToolRegistry::mock(),
            Duration::from_secs(5),
            ProcessKind::Server,
        )
    }

    async fn run(provider: Arc<ScriptedProvider>) -> Vec<StreamEvent> {
        let (sink, mut rx) = EventSink::channel();
        pipeline(provider).run(&RequestContext::new(), &sink).await;
        drop(sink);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn user_text(provider_request: &tilecast_providers::CompletionRequest) -> String {
        match provider_request.history.items().first() {
            Some(ConversationItem::User { text }) => text.clone(),
            other => panic!("expected user item, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn emits_analyst_then_commentator_only() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![
                ScriptedChunk::text("Let me check."),
                ScriptedChunk::call("get_stock_price", json!({"ticker": "GOOG"})),
                ScriptedChunk::call("get_current_weather", json!({"city": "New York"})),
            ],
            vec![ScriptedChunk::text("GOOG is down; New York is sunny.")],
            vec![ScriptedChunk::text("Sunny skies, "), ScriptedChunk::text("gloomy ticker!")],
        ]));
        let events = run(provider.clone()).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::UiUpdate {
                    agent: AgentId::A,
                    content: "GOOG is down; New York is sunny.".to_string(),
                },
                StreamEvent::UiUpdate {
                    agent: AgentId::B,
                    content: "Sunny skies, gloomy ticker!".to_string(),
                },
            ]
        );

        let requests = provider.requests().await;
        assert_eq!(requests.len(), 3);
        assert_eq!(user_text(&requests[0]), BOARD_QUERY);
        assert_eq!(requests[0].declarations.len(), 3);

        let analyst_input = user_text(&requests[1]);
        assert_eq!(requests[1].system_prompt.as_deref(), Some(ANALYST_PROMPT));
        assert!(requests[1].declarations.is_empty());
        let lines = analyst_input
            .strip_prefix("Data: ")
            .expect("data prefix")
            .lines()
            .collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Tool: get_stock_price -> Output: {"));
        assert!(lines[0].contains("135.89"));
        assert!(lines[1].starts_with("Tool: get_current_weather -> Output: {"));

        assert_eq!(requests[2].system_prompt.as_deref(), Some(COMMENTATOR_PROMPT));
        assert_eq!(
            user_text(&requests[2]),
            "Factual analysis: GOOG is down; New York is sunny."
        );
    }

    #[tokio::test]
    async fn fetch_errors_are_described_not_fatal() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![ScriptedChunk::call("get_stock_price", json!({"ticker": "MSFT"}))],
            vec![ScriptedChunk::text("No data.")],
            vec![ScriptedChunk::text("Mystery!")],
        ]));
        let events = run(provider.clone()).await;
        assert_eq!(events.len(), 2);
        let requests = provider.requests().await;
        assert_eq!(
            user_text(&requests[1]),
            r#"Data: Tool: get_stock_price -> Output: {"error":"Ticker not found"}"#
        );
    }

    #[tokio::test]
    async fn unknown_tool_yields_single_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![ScriptedChunk::call(
            "get_horoscope",
            json!({}),
        )]]));
        let events = run(provider.clone()).await;
        assert_eq!(
            events,
            vec![StreamEvent::text("Error: unknown tool: get_horoscope")]
        );
        assert_eq!(provider.streams_opened(), 1);
    }

    #[tokio::test]
    async fn commentator_failure_keeps_analyst_update() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![ScriptedChunk::call("get_stock_price", json!({"ticker": "GOOG"}))],
            vec![ScriptedChunk::text("Analysis.")],
            vec![ScriptedChunk::Refuse("quota exceeded".to_string())],
        ]));
        let events = run(provider).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "ui_update");
        assert_eq!(
            events[1],
            StreamEvent::text("Error: provider transport failed: quota exceeded")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_persona_answers_are_not_cut_off() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            vec![ScriptedChunk::call("get_stock_price", json!({"ticker": "GOOG"}))],
            vec![
                ScriptedChunk::Pause(Duration::from_secs(3)),
                ScriptedChunk::text("GOOG "),
                ScriptedChunk::Pause(Duration::from_secs(3)),
                ScriptedChunk::text("is "),
                ScriptedChunk::Pause(Duration::from_secs(3)),
                ScriptedChunk::text("down."),
            ],
            vec![ScriptedChunk::text("Sell the umbrellas!")],
        ]));
        let events = run(provider).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::UiUpdate {
                    agent: AgentId::A,
                    content: "GOOG is down.".to_string(),
                },
                StreamEvent::UiUpdate {
                    agent: AgentId::B,
                    content: "Sell the umbrellas!".to_string(),
                },
            ]
        );
    }
}
