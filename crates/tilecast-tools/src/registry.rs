use std::sync::Arc;

use reqwest::Client;
use serde_json::{json, Value};
use tilecast_types::{ParamType, ToolCallRequest, ToolDeclaration, ToolResult, WidgetKind};

use crate::{
    DataSource, FetchError, Fetcher, FetcherSettings, MockFetcher, SpeciesFetcher, StockFetcher,
    WeatherFetcher,
};

/// The closed set of tools the model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    CurrentWeather,
    StockPrice,
    PokemonInfo,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [
        ToolKind::CurrentWeather,
        ToolKind::StockPrice,
        ToolKind::PokemonInfo,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "get_current_weather" => Some(ToolKind::CurrentWeather),
            "get_stock_price" => Some(ToolKind::StockPrice),
            "get_pokemon_info" => Some(ToolKind::PokemonInfo),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::CurrentWeather => "get_current_weather",
            ToolKind::StockPrice => "get_stock_price",
            ToolKind::PokemonInfo => "get_pokemon_info",
        }
    }

    pub fn widget(self) -> WidgetKind {
        match self {
            ToolKind::CurrentWeather => WidgetKind::Weather,
            ToolKind::StockPrice => WidgetKind::Stock,
            ToolKind::PokemonInfo => WidgetKind::Pokemon,
        }
    }

    /// The single argument each tool takes; also the key echoed in widget data.
    pub fn argument_key(self) -> &'static str {
        match self {
            ToolKind::CurrentWeather => "city",
            ToolKind::StockPrice => "ticker",
            ToolKind::PokemonInfo => "name",
        }
    }

    pub fn declaration(self) -> ToolDeclaration {
        let description = match self {
            ToolKind::CurrentWeather => "Get the current weather for a specific city.",
            ToolKind::StockPrice => "Get the current stock price for a given ticker.",
            ToolKind::PokemonInfo => "Get information about a Pokémon character.",
        };
        ToolDeclaration::new(
            self.name(),
            description,
            &[(self.argument_key(), ParamType::String)],
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tool `{0}`")]
pub struct UnknownTool(pub String);

/// Read-only after construction. Each [`ToolKind`] is bound to exactly one fetcher.
#[derive(Clone)]
pub struct ToolRegistry {
    weather: Arc<dyn Fetcher>,
    stock: Arc<dyn Fetcher>,
    species: Arc<dyn Fetcher>,
}

impl ToolRegistry {
    pub fn new(
        weather: Arc<dyn Fetcher>,
        stock: Arc<dyn Fetcher>,
        species: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            weather,
            stock,
            species,
        }
    }

    pub fn from_settings(settings: &FetcherSettings) -> anyhow::Result<Self> {
        match settings.data_source {
            DataSource::Mock => Ok(Self::mock()),
            DataSource::Live => Self::live(settings),
        }
    }

    pub fn live(settings: &FetcherSettings) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        if !settings.weather.has_api_key() {
            tracing::warn!("weather fetcher has no API key; upstream calls will be rejected");
        }
        if !settings.stock.has_api_key() {
            tracing::warn!("stock fetcher has no API key; upstream calls will be rejected");
        }
        Ok(Self::new(
            Arc::new(WeatherFetcher::new(client.clone(), &settings.weather)),
            Arc::new(StockFetcher::new(client.clone(), &settings.stock)),
            Arc::new(SpeciesFetcher::new(client, &settings.species)),
        ))
    }

    pub fn mock() -> Self {
        Self::new(
            Arc::new(MockFetcher::new(ToolKind::CurrentWeather)),
            Arc::new(MockFetcher::new(ToolKind::StockPrice)),
            Arc::new(MockFetcher::new(ToolKind::PokemonInfo)),
        )
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        ToolKind::ALL.iter().map(|kind| kind.declaration()).collect()
    }

    pub fn lookup(&self, name: &str) -> Result<ToolKind, UnknownTool> {
        ToolKind::from_name(name).ok_or_else(|| UnknownTool(name.to_string()))
    }

    fn fetcher(&self, kind: ToolKind) -> &dyn Fetcher {
        match kind {
            ToolKind::CurrentWeather => self.weather.as_ref(),
            ToolKind::StockPrice => self.stock.as_ref(),
            ToolKind::PokemonInfo => self.species.as_ref(),
        }
    }

    async fn run(&self, kind: ToolKind, key: Option<&str>) -> Result<Value, FetchError> {
        let key = key.ok_or(FetchError::MissingArgument(kind.argument_key()))?;
        self.fetcher(kind).lookup(key).await
    }

    /// Invoke the fetcher bound to `kind`. Never fails: fetch errors become an
    /// error payload on the returned result.
    pub async fn dispatch(&self, kind: ToolKind, call: &ToolCallRequest) -> ToolResult {
        let key = call.argument_str(kind.argument_key());
        match self.run(kind, key).await {
            Ok(payload) => {
                tracing::debug!(tool = kind.name(), call_id = %call.id, "tool fetch succeeded");
                ToolResult::ok(call.id.clone(), kind.name(), payload)
            }
            Err(err) => {
                tracing::warn!(tool = kind.name(), call_id = %call.id, error = %err, "tool fetch failed");
                ToolResult::error(call.id.clone(), kind.name(), err.to_string())
            }
        }
    }

    /// Payload for the non-streaming tile endpoints; same shape as widget `info`.
    pub async fn fetch_direct(&self, kind: ToolKind, key: &str) -> Value {
        let key = Some(key.trim()).filter(|k| !k.is_empty());
        match self.run(kind, key).await {
            Ok(payload) => payload,
            Err(err) => json!({ "error": err.to_string() }),
        }
    }
}
