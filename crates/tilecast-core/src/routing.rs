/// Which flow serves an incoming chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestIntent {
    /// Tool calls refresh widgets and the answer streams as text.
    ToolStreaming,
    /// Fixed board query, then analyst and commentator personas.
    BoardSummary,
}

const BOARD_TRIGGERS: [&str; 2] = ["explain this", "summarize the board"];

impl RequestIntent {
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if BOARD_TRIGGERS.iter().any(|trigger| lower.contains(trigger)) {
            RequestIntent::BoardSummary
        } else {
            RequestIntent::ToolStreaming
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestIntent::ToolStreaming => "tool_streaming",
            RequestIntent::BoardSummary => "board_summary",
        }
    }
}
