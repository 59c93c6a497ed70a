use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tilecast_providers::{Chunk, ChunkStream, CompletionSession};
use tilecast_tools::{ToolKind, ToolRegistry};
use tilecast_types::{StreamEvent, ToolCallRequest, ToolResult};

use crate::RelayError;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Per-request identity and cancellation. Dropping every clone of the
/// token's guard (held by the response body) cancels the request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The receiving side of the event stream went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Ordered, bounded outbound event channel for one request.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    pub async fn emit(&self, event: StreamEvent) -> Result<(), SinkClosed> {
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// How a request ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Cancelled or the client disconnected; nothing more is sent.
    Abandoned,
}

/// Bounds every provider wait by the idle timeout and the request token.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkReader {
    idle_timeout: Duration,
}

impl ChunkReader {
    pub(crate) fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }

    pub(crate) async fn open(
        &self,
        session: &CompletionSession,
        cancel: &CancellationToken,
    ) -> Result<Option<ChunkStream>, RelayError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            opened = tokio::time::timeout(self.idle_timeout, session.stream(cancel.clone())) => {
                match opened {
                    Err(_) => Err(self.stalled()),
                    Ok(result) => Ok(Some(result?)),
                }
            }
        }
    }

    /// `Ok(None)` means the stream ended or the request was cancelled.
    pub(crate) async fn next(
        &self,
        stream: &mut ChunkStream,
        cancel: &CancellationToken,
    ) -> Result<Option<Chunk>, RelayError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            next = tokio::time::timeout(self.idle_timeout, stream.next()) => match next {
                Err(_) => Err(self.stalled()),
                Ok(None) => Ok(None),
                Ok(Some(chunk)) => Ok(Some(chunk.map_err(RelayError::from)?)),
            }
        }
    }

    /// Concatenated text of one completion. Each chunk wait is bounded on its
    /// own, so a slow but steady stream is never cut off.
    pub(crate) async fn complete(
        &self,
        session: &CompletionSession,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, RelayError> {
        let Some(mut stream) = self.open(session, cancel).await? else {
            return Ok(None);
        };
        let mut text = String::new();
        while let Some(chunk) = self.next(&mut stream, cancel).await? {
            if let Chunk::Text(piece) = chunk {
                text.push_str(&piece);
            }
        }
        if cancel.is_cancelled() {
            return Ok(None);
        }
        Ok(Some(text))
    }

    fn stalled(&self) -> RelayError {
        RelayError::ProviderTransport(format!(
            "no response from model within {}s",
            self.idle_timeout.as_secs()
        ))
    }
}

/// Run one tool unless the request is cancelled first. `None` means cancelled.
pub(crate) async fn dispatch_unless_cancelled(
    registry: &ToolRegistry,
    kind: ToolKind,
    call: &ToolCallRequest,
    cancel: &CancellationToken,
) -> Option<ToolResult> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = registry.dispatch(kind, call) => Some(result),
    }
}
