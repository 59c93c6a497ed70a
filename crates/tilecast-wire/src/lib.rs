//! Line-delimited push protocol spoken on `/stream_chat`.
//!
//! Every event is one `data: ` line carrying a single-line JSON object,
//! terminated by a blank line.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tilecast_types::{AgentId, StreamEvent, WidgetKind};

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";
const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    WidgetUpdate { widget: WidgetKind, data: Value },
    Text { text: String },
    UiUpdate { agent: AgentId, content: String },
}

impl From<&StreamEvent> for WireEvent {
    fn from(event: &StreamEvent) -> Self {
        match event {
            StreamEvent::WidgetUpdate { widget, data } => WireEvent::WidgetUpdate {
                widget: *widget,
                data: data.clone(),
            },
            StreamEvent::Text { content } => WireEvent::Text {
                text: content.clone(),
            },
            StreamEvent::UiUpdate { agent, content } => WireEvent::UiUpdate {
                agent: *agent,
                content: content.clone(),
            },
        }
    }
}

impl From<WireEvent> for StreamEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::WidgetUpdate { widget, data } => StreamEvent::WidgetUpdate { widget, data },
            WireEvent::Text { text } => StreamEvent::Text { content: text },
            WireEvent::UiUpdate { agent, content } => StreamEvent::UiUpdate { agent, content },
        }
    }
}

/// JSON body of one event. `serde_json` escapes embedded newlines, so the result is single-line.
pub fn event_json(event: &StreamEvent) -> String {
    serde_json::to_string(&WireEvent::from(event)).unwrap_or_else(|_| "{}".to_string())
}

pub fn encode_frame(event: &StreamEvent) -> String {
    format!("{DATA_PREFIX}{}\n\n", event_json(event))
}

/// Parse a captured event-stream body back into events. Non-data lines and
/// frames that are not valid events are skipped.
pub fn decode_frames(body: &str) -> Vec<WireEvent> {
    let normalized = body.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .flat_map(|frame| frame.lines())
        .filter_map(|line| line.strip_prefix(DATA_PREFIX).or_else(|| line.strip_prefix("data:")))
        .filter_map(|payload| serde_json::from_str::<WireEvent>(payload.trim()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn widget_update_frame_matches_protocol_shape() {
        let event = StreamEvent::WidgetUpdate {
            widget: WidgetKind::Weather,
            data: json!({"city": "Atlanta", "info": {"temperature": 25.0}}),
        };
        let frame = encode_frame(&event);
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("}\n\n"));
        let payload: Value =
            serde_json::from_str(frame.trim_start_matches("data: ").trim()).expect("json");
        assert_eq!(payload["type"], "widget_update");
        assert_eq!(payload["widget"], "weather");
        assert_eq!(payload["data"]["city"], "Atlanta");
    }

    #[test]
    fn text_with_newlines_stays_on_one_line() {
        let frame = encode_frame(&StreamEvent::text("line one\nline two"));
        assert_eq!(frame.matches('\n').count(), 2);
        assert!(frame.contains(r#""type":"text""#));
        assert!(frame.contains(r#""text":"line one\nline two""#));
    }

    #[test]
    fn ui_update_uses_agent_letter() {
        let frame = encode_frame(&StreamEvent::UiUpdate {
            agent: AgentId::B,
            content: "wild take".to_string(),
        });
        assert!(frame.contains(r#""agent":"B""#));
        assert!(frame.contains(r#""type":"ui_update""#));
    }

    #[test]
    fn decode_frames_skips_keepalive_comments() {
        let body = format!(
            ":\n\n{}{}",
            encode_frame(&StreamEvent::text("hello")),
            encode_frame(&StreamEvent::UiUpdate {
                agent: AgentId::A,
                content: "facts".to_string(),
            })
        );
        let events = decode_frames(&body);
        assert_eq!(
            events,
            vec![
                WireEvent::Text {
                    text: "hello".to_string()
                },
                WireEvent::UiUpdate {
                    agent: AgentId::A,
                    content: "facts".to_string()
                },
            ]
        );
    }
}
