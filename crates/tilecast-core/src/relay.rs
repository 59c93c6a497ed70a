use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::Level;

use tilecast_observability::{emit_event, ObservabilityEvent, ProcessKind};
use tilecast_providers::{build_provider, CompletionProvider};
use tilecast_tools::ToolRegistry;
use tilecast_types::{ProviderInfo, StreamEvent};

use crate::context::{EventSink, Outcome, RequestContext};
use crate::orchestrator::Orchestrator;
use crate::pipeline::BoardPipeline;
use crate::routing::RequestIntent;
use crate::RelayConfig;

/// Entry point for chat messages: routes each one to the tool-streaming
/// turn or the board pipeline.
#[derive(Clone)]
pub struct Relay {
    provider: Arc<dyn CompletionProvider>,
    registry: ToolRegistry,
    orchestrator: Orchestrator,
    pipeline: BoardPipeline,
    process: ProcessKind,
}

impl Relay {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        registry: ToolRegistry,
        idle_timeout: Duration,
        process: ProcessKind,
    ) -> Self {
        Self {
            orchestrator: Orchestrator::new(
                provider.clone(),
                registry.clone(),
                idle_timeout,
                process,
            ),
            pipeline: BoardPipeline::new(provider.clone(), registry.clone(), idle_timeout, process),
            provider,
            registry,
            process,
        }
    }

    pub fn from_config(config: &RelayConfig, process: ProcessKind) -> anyhow::Result<Self> {
        let provider = build_provider(&config.model)?;
        let registry = ToolRegistry::from_settings(&config.fetcher_settings())?;
        Ok(Self::new(
            provider,
            registry,
            config.stream_idle_timeout(),
            process,
        ))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn provider_info(&self) -> ProviderInfo {
        self.provider.info()
    }

    pub async fn handle(&self, ctx: &RequestContext, message: &str, sink: &EventSink) -> Outcome {
        let intent = RequestIntent::classify(message);
        emit_event(
            Level::INFO,
            self.process,
            ObservabilityEvent {
                request_id: Some(&ctx.request_id),
                status: Some("start"),
                detail: Some(intent.as_str()),
                ..ObservabilityEvent::new("request.start", "relay")
            },
        );
        match intent {
            RequestIntent::ToolStreaming => self.orchestrator.run(ctx, message, sink).await,
            RequestIntent::BoardSummary => self.pipeline.run(ctx, sink).await,
        }
    }

    /// Run `message` on its own task. The receiver yields events in emission
    /// order and closes when the request is done.
    pub fn spawn(&self, ctx: RequestContext, message: String) -> mpsc::Receiver<StreamEvent> {
        let (sink, rx) = EventSink::channel();
        let relay = self.clone();
        tokio::spawn(async move {
            let outcome = relay.handle(&ctx, &message, &sink).await;
            tracing::debug!(request_id = %ctx.request_id, ?outcome, "request task finished");
        });
        rx
    }
}
