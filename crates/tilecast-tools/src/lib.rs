use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod live;
pub mod mock;
pub mod registry;

pub use live::{SpeciesFetcher, StockFetcher, WeatherFetcher};
pub use mock::MockFetcher;
pub use registry::{ToolKind, ToolRegistry, UnknownTool};

pub const DEFAULT_WEATHER_BASE_URL: &str = "https://api.openweathermap.org";
pub const DEFAULT_STOCK_BASE_URL: &str = "https://www.alphavantage.co";
pub const DEFAULT_SPECIES_BASE_URL: &str = "https://pokeapi.co";

/// Looks up one record from a data source by its key (city, ticker or species name).
///
/// Implementations report failures through [`FetchError`]; the registry turns
/// those into error payloads so nothing escapes as a fault.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Value, FetchError>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("missing required argument `{0}`")]
    MissingArgument(&'static str),

    /// Non-success status from the upstream provider.
    #[error("{0}")]
    UpstreamStatus(String),

    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    Malformed(String),

    #[error("{0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    #[default]
    Live,
    Mock,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DataSource::Live => "live",
            DataSource::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    pub base_url: String,
}

impl EndpointConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            api_key: None,
            base_url: base_url.to_string(),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }

    fn normalized_base(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }
}

#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub data_source: DataSource,
    pub weather: EndpointConfig,
    pub stock: EndpointConfig,
    pub species: EndpointConfig,
    pub timeout: Duration,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            data_source: DataSource::Live,
            weather: EndpointConfig::new(DEFAULT_WEATHER_BASE_URL),
            stock: EndpointConfig::new(DEFAULT_STOCK_BASE_URL),
            species: EndpointConfig::new(DEFAULT_SPECIES_BASE_URL),
            timeout: Duration::from_secs(10),
        }
    }
}

pub(crate) fn capitalize(input: &str) -> String {
    let lower = input.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
