use tilecast_providers::ProviderError;
use tilecast_tools::UnknownTool;

/// Failures that end a request. Each one is reported to the client as a
/// single `Error: ...` text event; fetch failures never reach this type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unexpected provider state: {0}")]
    UnexpectedProviderState(String),

    #[error("provider transport failed: {0}")]
    ProviderTransport(String),
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::UnknownTool(_) => "UNKNOWN_TOOL",
            RelayError::UnexpectedProviderState(_) => "UNEXPECTED_PROVIDER_STATE",
            RelayError::ProviderTransport(_) => "PROVIDER_TRANSPORT",
        }
    }
}

impl From<UnknownTool> for RelayError {
    fn from(err: UnknownTool) -> Self {
        RelayError::UnknownTool(err.0)
    }
}

impl From<ProviderError> for RelayError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::MalformedChunk(detail) => RelayError::UnexpectedProviderState(detail),
            ProviderError::Transport(detail) => RelayError::ProviderTransport(detail),
            other => RelayError::ProviderTransport(other.to_string()),
        }
    }
}
