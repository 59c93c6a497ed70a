use serde::{Deserialize, Serialize};
use serde_json::Value;

/// UI panel refreshed by a widget update.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    Weather,
    Stock,
    Pokemon,
}

impl WidgetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WidgetKind::Weather => "weather",
            WidgetKind::Stock => "stock",
            WidgetKind::Pokemon => "pokemon",
        }
    }
}

impl std::fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persona slot in the dual-agent pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AgentId {
    A,
    B,
}

impl AgentId {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentId::A => "A",
            AgentId::B => "B",
        }
    }
}

/// One event on the outbound stream. Events are emitted once and never revised.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    WidgetUpdate { widget: WidgetKind, data: Value },
    Text { content: String },
    UiUpdate { agent: AgentId, content: String },
}

impl StreamEvent {
    pub fn text(content: impl Into<String>) -> Self {
        StreamEvent::Text {
            content: content.into(),
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        StreamEvent::Text {
            content: format!("Error: {message}"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::WidgetUpdate { .. } => "widget_update",
            StreamEvent::Text { .. } => "text",
            StreamEvent::UiUpdate { .. } => "ui_update",
        }
    }
}
