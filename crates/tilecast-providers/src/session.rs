use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tilecast_types::{
    ConversationItem, History, ProviderInfo, ToolCallRequest, ToolDeclaration, ToolResult,
};

use crate::{ChunkStream, CompletionProvider, CompletionRequest, ProviderError};

/// One multi-round conversation with a provider. Each round re-sends the
/// whole history; the session owns that history for the life of a request.
pub struct CompletionSession {
    provider: Arc<dyn CompletionProvider>,
    system_prompt: Option<String>,
    declarations: Vec<ToolDeclaration>,
    history: History,
}

impl CompletionSession {
    pub fn open(
        provider: Arc<dyn CompletionProvider>,
        system_prompt: Option<String>,
        declarations: Vec<ToolDeclaration>,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            system_prompt,
            declarations,
            history: History::starting_with(user_message),
        }
    }

    pub fn provider_info(&self) -> ProviderInfo {
        self.provider.info()
    }

    fn request(&self) -> CompletionRequest {
        CompletionRequest {
            system_prompt: self.system_prompt.clone(),
            declarations: self.declarations.clone(),
            history: self.history.clone(),
        }
    }

    /// Stream the next round over a snapshot of the current history.
    pub async fn stream(&self, cancel: CancellationToken) -> Result<ChunkStream, ProviderError> {
        self.provider.stream(self.request(), cancel).await
    }

    pub async fn complete(&self) -> Result<String, ProviderError> {
        self.provider.complete(self.request()).await
    }

    /// Append the model's calls followed by their results, in call order.
    pub fn record_tool_round(&mut self, calls: Vec<ToolCallRequest>, results: Vec<ToolResult>) {
        self.history.push(ConversationItem::ToolCalls { calls });
        self.history.push(ConversationItem::ToolResults { results });
    }

    pub fn record_assistant_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.history.push(ConversationItem::Assistant { text });
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }
}
