pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod relay;
pub mod routing;

pub use config::*;
pub use context::{EventSink, Outcome, RequestContext, SinkClosed, EVENT_CHANNEL_CAPACITY};
pub use error::RelayError;
pub use orchestrator::{widget_data, Orchestrator, TurnState, SYSTEM_PROMPT};
pub use pipeline::{BoardPipeline, ANALYST_PROMPT, BOARD_QUERY, COMMENTATOR_PROMPT};
pub use relay::Relay;
pub use routing::RequestIntent;
