use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{capitalize, FetchError, Fetcher, ToolKind};

const PIKACHU_SPRITE: &str =
    "https://raw.githubusercontent.com/PokeAPI/sprites/master/sprites/pokemon/25.png";

/// Fixed in-memory data, shaped exactly like the live fetchers' payloads.
/// Used for offline runs and tests.
pub struct MockFetcher {
    kind: ToolKind,
}

impl MockFetcher {
    pub fn new(kind: ToolKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn lookup(&self, key: &str) -> Result<Value, FetchError> {
        match self.kind {
            ToolKind::CurrentWeather => mock_weather(key),
            ToolKind::StockPrice => mock_stock(key),
            ToolKind::PokemonInfo => mock_species(key),
        }
    }
}

fn mock_weather(city: &str) -> Result<Value, FetchError> {
    let (temperature, description) = match city {
        "San Francisco" => (15.0, "Cloudy"),
        "New York" => (22.0, "Sunny"),
        "Atlanta" => (25.0, "Partly cloudy"),
        _ => return Err(FetchError::NotFound("City not found".to_string())),
    };
    Ok(json!({
        "city": city,
        "temperature": temperature,
        "unit": "Celsius",
        "description": description,
    }))
}

fn mock_stock(ticker: &str) -> Result<Value, FetchError> {
    let ticker = ticker.to_uppercase();
    let (price, change) = match ticker.as_str() {
        "AAPL" => (175.24, "+1.2%"),
        "GOOG" => (135.89, "-0.5%"),
        _ => return Err(FetchError::NotFound("Ticker not found".to_string())),
    };
    Ok(json!({
        "ticker": ticker,
        "price": price,
        "change": change,
    }))
}

fn mock_species(name: &str) -> Result<Value, FetchError> {
    let name = capitalize(name);
    match name.as_str() {
        "Pikachu" => Ok(json!({
            "name": name,
            "type": "Electric",
            "abilities": ["Static"],
            "image": PIKACHU_SPRITE,
        })),
        _ => Err(FetchError::NotFound("Pokémon not found".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atlanta_is_partly_cloudy() {
        let payload = MockFetcher::new(ToolKind::CurrentWeather)
            .lookup("Atlanta")
            .await
            .expect("payload");
        assert_eq!(payload["temperature"], 25.0);
        assert_eq!(payload["description"], "Partly cloudy");
    }

    #[tokio::test]
    async fn tickers_are_case_insensitive() {
        let payload = MockFetcher::new(ToolKind::StockPrice)
            .lookup("aapl")
            .await
            .expect("payload");
        assert_eq!(payload["ticker"], "AAPL");
        assert_eq!(payload["price"], 175.24);
    }

    #[tokio::test]
    async fn unknown_species_is_not_found() {
        let err = MockFetcher::new(ToolKind::PokemonInfo)
            .lookup("agumon")
            .await
            .expect_err("error");
        assert_eq!(err.to_string(), "Pokémon not found");
    }
}
