use serde::{Deserialize, Serialize};

use crate::{ToolCallRequest, ToolResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationItem {
    User { text: String },
    Assistant { text: String },
    ToolCalls { calls: Vec<ToolCallRequest> },
    ToolResults { results: Vec<ToolResult> },
}

/// Append-only message history carried across completion rounds of one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct History {
    items: Vec<ConversationItem>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_with(user_text: impl Into<String>) -> Self {
        let mut history = Self::new();
        history.push(ConversationItem::User {
            text: user_text.into(),
        });
        history
    }

    pub fn push(&mut self, item: ConversationItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn history_preserves_append_order() {
        let mut history = History::starting_with("weather in Atlanta");
        let call = ToolCallRequest::new("call_0", "get_current_weather", Map::new());
        history.push(ConversationItem::ToolCalls {
            calls: vec![call.clone()],
        });
        history.push(ConversationItem::ToolResults {
            results: vec![ToolResult::error("call_0", "get_current_weather", "City not found")],
        });
        let kinds = history
            .items()
            .iter()
            .map(|item| match item {
                ConversationItem::User { .. } => "user",
                ConversationItem::Assistant { .. } => "assistant",
                ConversationItem::ToolCalls { .. } => "tool_calls",
                ConversationItem::ToolResults { .. } => "tool_results",
            })
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec!["user", "tool_calls", "tool_results"]);
    }
}
