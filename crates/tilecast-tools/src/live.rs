use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::{capitalize, EndpointConfig, FetchError, Fetcher};

fn transport_error(what: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Transport(format!("{what} request timed out"));
    }
    FetchError::Transport(format!("{what} request failed: {err}"))
}

/// OpenWeatherMap current conditions, metric units.
pub struct WeatherFetcher {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl WeatherFetcher {
    pub fn new(client: Client, endpoint: &EndpointConfig) -> Self {
        Self {
            client,
            base_url: endpoint.normalized_base(),
            api_key: endpoint.api_key.clone(),
        }
    }
}

#[async_trait]
impl Fetcher for WeatherFetcher {
    async fn lookup(&self, city: &str) -> Result<Value, FetchError> {
        let url = format!("{}/data/2.5/weather", self.base_url);
        let mut req = self
            .client
            .get(url)
            .query(&[("q", city), ("units", "metric")]);
        if let Some(key) = &self.api_key {
            req = req.query(&[("appid", key.as_str())]);
        }
        let response = req
            .send()
            .await
            .map_err(|e| transport_error(&format!("weather for {city}"), e))?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(city, status = status.as_u16(), "weather upstream rejected request");
            return Err(FetchError::UpstreamStatus(format!(
                "Failed to get weather for {city}. Status code: {}",
                status.as_u16()
            )));
        }
        let body: Value = response.json().await.map_err(|e| {
            FetchError::Malformed(format!("Malformed weather response for {city}: {e}"))
        })?;
        let temperature = body
            .pointer("/main/temp")
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                FetchError::Malformed(format!("Malformed weather response for {city}: missing main.temp"))
            })?;
        let description = body
            .pointer("/weather/0/description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(json!({
            "city": city,
            "temperature": temperature,
            "unit": "Celsius",
            "description": description,
        }))
    }
}

/// Alpha Vantage `GLOBAL_QUOTE`.
pub struct StockFetcher {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl StockFetcher {
    pub fn new(client: Client, endpoint: &EndpointConfig) -> Self {
        Self {
            client,
            base_url: endpoint.normalized_base(),
            api_key: endpoint.api_key.clone(),
        }
    }
}

#[async_trait]
impl Fetcher for StockFetcher {
    async fn lookup(&self, ticker: &str) -> Result<Value, FetchError> {
        let url = format!("{}/query", self.base_url);
        let mut req = self
            .client
            .get(url)
            .query(&[("function", "GLOBAL_QUOTE"), ("symbol", ticker)]);
        if let Some(key) = &self.api_key {
            req = req.query(&[("apikey", key.as_str())]);
        }
        let response = req
            .send()
            .await
            .map_err(|e| transport_error(&format!("stock price for {ticker}"), e))?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(ticker, status = status.as_u16(), "stock upstream rejected request");
            return Err(FetchError::UpstreamStatus(format!(
                "Failed to get stock price for {ticker}. Status code: {}",
                status.as_u16()
            )));
        }
        let body: Value = response.json().await.map_err(|e| {
            FetchError::Malformed(format!("Malformed stock response for {ticker}: {e}"))
        })?;

        // Rate-limited responses come back 200 with a `Note`/`Information` body
        // and no quote, as do unknown symbols (empty quote object).
        let quote = body
            .get("Global Quote")
            .and_then(Value::as_object)
            .filter(|quote| quote.contains_key("05. price"))
            .ok_or_else(|| FetchError::NotFound("Invalid ticker or API limit reached.".to_string()))?;

        let symbol = quote
            .get("01. symbol")
            .and_then(Value::as_str)
            .unwrap_or(ticker);
        let raw_price = quote
            .get("05. price")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let price = raw_price.trim().parse::<f64>().map_err(|_| {
            FetchError::Malformed(format!("Malformed stock price for {ticker}: `{raw_price}`"))
        })?;
        let change = quote
            .get("09. change")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(json!({
            "ticker": symbol,
            "price": price,
            "change": change,
        }))
    }
}

/// PokeAPI species lookup by lowercased name.
pub struct SpeciesFetcher {
    client: Client,
    base_url: String,
}

impl SpeciesFetcher {
    pub fn new(client: Client, endpoint: &EndpointConfig) -> Self {
        Self {
            client,
            base_url: endpoint.normalized_base(),
        }
    }
}

#[async_trait]
impl Fetcher for SpeciesFetcher {
    async fn lookup(&self, name: &str) -> Result<Value, FetchError> {
        let url = format!("{}/api/v2/pokemon/{}", self.base_url, name.to_lowercase());
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(&format!("info for {name}"), e))?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(name, status = status.as_u16(), "species upstream rejected request");
            return Err(FetchError::UpstreamStatus(format!(
                "Failed to get info for {name}. Status code: {}",
                status.as_u16()
            )));
        }
        let body: Value = response.json().await.map_err(|e| {
            FetchError::Malformed(format!("Malformed species response for {name}: {e}"))
        })?;

        let types = body
            .get("types")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|t| t.pointer("/type/name").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        let abilities = body
            .get("abilities")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|a| a.pointer("/ability/name").and_then(Value::as_str))
                    .map(|a| Value::String(a.to_string()))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let image = body
            .pointer("/sprites/front_default")
            .and_then(Value::as_str)
            .map(|url| Value::String(url.to_string()))
            .unwrap_or(Value::Null);
        let display_name = body
            .get("name")
            .and_then(Value::as_str)
            .map(capitalize)
            .unwrap_or_else(|| capitalize(name));

        Ok(json!({
            "name": display_name,
            "type": types,
            "abilities": abilities,
            "image": image,
        }))
    }
}
