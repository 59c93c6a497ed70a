use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::fs;

use tilecast_providers::{is_placeholder_api_key, ModelConfig, ProviderKind};
use tilecast_tools::{
    DataSource, EndpointConfig, FetcherSettings, DEFAULT_SPECIES_BASE_URL, DEFAULT_STOCK_BASE_URL,
    DEFAULT_WEATHER_BASE_URL,
};

pub const DEFAULT_HOSTNAME: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Everything the relay needs, resolved once at startup and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub model: ModelConfig,
    pub weather: EndpointConfig,
    pub stock: EndpointConfig,
    pub species: EndpointConfig,
    pub data_source: DataSource,
    pub fetch_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
    pub server: ServerConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            weather: EndpointConfig::new(DEFAULT_WEATHER_BASE_URL),
            stock: EndpointConfig::new(DEFAULT_STOCK_BASE_URL),
            species: EndpointConfig::new(DEFAULT_SPECIES_BASE_URL),
            data_source: DataSource::Live,
            fetch_timeout_secs: 10,
            stream_idle_timeout_secs: 60,
            server: ServerConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Layers, lowest precedence first: defaults, config file, environment,
    /// CLI overrides.
    pub async fn load(path: Option<&Path>, cli_overrides: Option<Value>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => read_json_file(path).await?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_json_file(&path).await?,
                _ => empty_object(),
            },
        };
        Self::from_layers(
            file,
            |name| std::env::var(name).ok(),
            cli_overrides.unwrap_or_else(empty_object),
        )
    }

    pub fn from_layers<F>(file: Value, lookup: F, cli: Value) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = serde_json::to_value(RelayConfig::default())?;
        let mut env = env_layer(&lookup);

        // The model key variable depends on which provider wins the merge.
        let provisional = merged(&[&defaults, &file, &env, &cli]);
        let provider = provisional
            .pointer("/model/provider")
            .and_then(Value::as_str)
            .and_then(ProviderKind::parse)
            .unwrap_or_default();
        if let Some(key) = provider_key_env(provider).and_then(|name| non_empty(&lookup, name)) {
            deep_merge(&mut env, &json!({ "model": { "api_key": key } }));
        }

        let effective = merged(&[&defaults, &file, &env, &cli]);
        let mut config: RelayConfig =
            serde_json::from_value(effective).context("invalid relay configuration")?;
        config.scrub_placeholder_keys();
        config.validate()?;
        Ok(config)
    }

    fn scrub_placeholder_keys(&mut self) {
        for key in [
            &mut self.model.api_key,
            &mut self.weather.api_key,
            &mut self.stock.api_key,
            &mut self.species.api_key,
        ] {
            if key.as_deref().map(is_placeholder_api_key).unwrap_or(false) {
                *key = None;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be at least 1");
        }
        if self.stream_idle_timeout_secs == 0 {
            anyhow::bail!("stream_idle_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn fetcher_settings(&self) -> FetcherSettings {
        FetcherSettings {
            data_source: self.data_source,
            weather: self.weather.clone(),
            stock: self.stock.clone(),
            species: self.species.clone(),
            timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    /// Live lookups that will be rejected upstream for lack of a key.
    pub fn missing_fetcher_keys(&self) -> Vec<&'static str> {
        if self.data_source == DataSource::Mock {
            return Vec::new();
        }
        let mut missing = Vec::new();
        if !self.weather.has_api_key() {
            missing.push("OPENWEATHERMAP_API_KEY");
        }
        if !self.stock.has_api_key() {
            missing.push("ALPHAVANTAGE_API_KEY");
        }
        missing
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tilecast").join("config.json"))
}

fn provider_key_env(provider: ProviderKind) -> Option<&'static str> {
    match provider {
        ProviderKind::Gemini => Some("GOOGLE_API_KEY"),
        ProviderKind::Openai => Some("OPENAI_API_KEY"),
        ProviderKind::Local => None,
    }
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|v| !v.trim().is_empty())
}

fn env_layer<F>(lookup: &F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    let mut root = empty_object();
    if let Some(provider) = non_empty(lookup, "TILECAST_PROVIDER") {
        deep_merge(
            &mut root,
            &json!({ "model": { "provider": provider.trim().to_lowercase() } }),
        );
    }
    if let Some(model) = non_empty(lookup, "TILECAST_MODEL") {
        deep_merge(&mut root, &json!({ "model": { "model": model.trim() } }));
    }
    if let Some(source) = non_empty(lookup, "TILECAST_DATA_SOURCE") {
        deep_merge(
            &mut root,
            &json!({ "data_source": source.trim().to_lowercase() }),
        );
    }
    if let Some(key) = non_empty(lookup, "OPENWEATHERMAP_API_KEY") {
        deep_merge(&mut root, &json!({ "weather": { "api_key": key } }));
    }
    if let Some(key) = non_empty(lookup, "ALPHAVANTAGE_API_KEY") {
        deep_merge(&mut root, &json!({ "stock": { "api_key": key } }));
    }
    root
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(empty_object());
    }
    serde_json::from_str::<Value>(&raw)
        .with_context(|| format!("config file {} is not valid JSON", path.display()))
}

fn merged(layers: &[&Value]) -> Value {
    let mut out = empty_object();
    for layer in layers {
        deep_merge(&mut out, layer);
    }
    out
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_layers() {
        let config = RelayConfig::from_layers(empty_object(), env(&[]), empty_object())
            .expect("config");
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.stream_idle_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn env_overrides_file_and_cli_overrides_env() {
        let file = json!({
            "data_source": "live",
            "model": { "provider": "openai", "model": "from-file" },
            "fetch_timeout_secs": 4
        });
        let cli = json!({ "model": { "model": "from-cli" } });
        let config = RelayConfig::from_layers(
            file,
            env(&[("TILECAST_MODEL", "from-env"), ("TILECAST_DATA_SOURCE", "MOCK")]),
            cli,
        )
        .expect("config");
        assert_eq!(config.model.provider, ProviderKind::Openai);
        assert_eq!(config.model.model.as_deref(), Some("from-cli"));
        assert_eq!(config.data_source, DataSource::Mock);
        assert_eq!(config.fetch_timeout_secs, 4);
    }

    #[test]
    fn model_key_follows_the_resolved_provider() {
        let lookup = env(&[("GOOGLE_API_KEY", "g-key"), ("OPENAI_API_KEY", "o-key")]);
        let gemini =
            RelayConfig::from_layers(empty_object(), &lookup, empty_object()).expect("gemini");
        assert_eq!(gemini.model.api_key.as_deref(), Some("g-key"));

        let openai = RelayConfig::from_layers(
            empty_object(),
            &lookup,
            json!({ "model": { "provider": "openai" } }),
        )
        .expect("openai");
        assert_eq!(openai.model.api_key.as_deref(), Some("o-key"));
    }

    #[test]
    fn placeholder_keys_count_as_absent() {
        let config = RelayConfig::from_layers(
            json!({ "weather": { "api_key": "placeholder" } }),
            env(&[("GOOGLE_API_KEY", "x")]),
            empty_object(),
        )
        .expect("config");
        assert!(config.model.api_key.is_none());
        assert!(config.weather.api_key.is_none());
        assert_eq!(
            config.missing_fetcher_keys(),
            vec!["OPENWEATHERMAP_API_KEY", "ALPHAVANTAGE_API_KEY"]
        );
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = RelayConfig::from_layers(
            empty_object(),
            env(&[("TILECAST_PROVIDER", "anthropic")]),
            empty_object(),
        )
        .expect_err("invalid");
        assert!(err.to_string().contains("invalid relay configuration"));
    }

    #[test]
    fn zero_idle_timeout_is_rejected() {
        let err = RelayConfig::from_layers(
            json!({ "stream_idle_timeout_secs": 0 }),
            env(&[]),
            empty_object(),
        )
        .expect_err("invalid");
        assert!(err.to_string().contains("stream_idle_timeout_secs"));
    }

    #[tokio::test]
    async fn load_reads_explicit_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tilecast.json");
        std::fs::write(
            &path,
            r#"{"data_source":"mock","server":{"hostname":"0.0.0.0","port":9100}}"#,
        )
        .expect("write");
        let config = RelayConfig::load(Some(&path), None).await.expect("config");
        assert_eq!(config.server.hostname, "0.0.0.0");
        assert_eq!(config.server.port, 9100);
    }

    #[tokio::test]
    async fn load_reports_invalid_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ nope").expect("write");
        let err = RelayConfig::load(Some(&path), None).await.expect_err("invalid");
        assert!(err.to_string().contains("not valid JSON"));
    }
}
