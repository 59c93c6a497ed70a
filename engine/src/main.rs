use std::net::SocketAddr;
use std::path::PathBuf;
use std::{fs, io::Read};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::info;

use tilecast_core::{Relay, RelayConfig, RequestContext};
use tilecast_observability::{
    default_logs_dir, emit_event, init_console_logging, init_process_logging, ObservabilityEvent,
    ProcessKind,
};
use tilecast_providers::ProviderKind;
use tilecast_server::{serve, AppState};
use tilecast_tools::ToolRegistry;
use tilecast_types::ToolCallRequest;
use tilecast_wire::encode_frame;

#[derive(Parser, Debug)]
#[command(name = "tilecast-engine")]
#[command(about = "Streams model answers and live widget updates to a dashboard")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Settings shared by every command that talks to the model or the fetchers.
#[derive(Args, Debug, Clone, Default)]
struct RelayArgs {
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    /// Serve fixed in-memory data instead of calling the weather, stock and species APIs.
    #[arg(long, default_value_t = false)]
    mock_data: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    Serve {
        #[arg(long, alias = "host")]
        hostname: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        logs_dir: Option<String>,
        #[command(flatten)]
        relay: RelayArgs,
    },
    /// Run one chat message and print the event stream.
    Run {
        message: String,
        #[command(flatten)]
        relay: RelayArgs,
    },
    /// Dispatch a single tool call and print its payload.
    Tool {
        #[arg(long)]
        json: String,
        #[command(flatten)]
        relay: RelayArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            logs_dir,
            relay,
        } => {
            let logs_dir = logs_dir.map(PathBuf::from).unwrap_or_else(default_logs_dir);
            let (_log_guard, log_info) = init_process_logging(ProcessKind::Server, &logs_dir, 14)?;
            emit_event(
                tracing::Level::INFO,
                ProcessKind::Server,
                ObservabilityEvent {
                    status: Some("ok"),
                    detail: Some("server jsonl logging initialized"),
                    ..ObservabilityEvent::new("logging.initialized", "engine.main")
                },
            );
            info!("logging initialized: {:?}", log_info);

            let config = load_config(&relay, hostname, port).await?;
            let addr: SocketAddr = format!("{}:{}", config.server.hostname, config.server.port)
                .parse()
                .context("invalid hostname or port")?;
            let state = AppState::from_config(config)?;
            info!("starting tilecast-engine on http://{addr}");
            serve(addr, state).await?;
        }
        Command::Run { message, relay } => {
            init_console_logging("warn");
            let config = load_config(&relay, None, None).await?;
            let relay = Relay::from_config(&config, ProcessKind::Cli)?;
            let mut rx = relay.spawn(RequestContext::new(), message);
            while let Some(event) = rx.recv().await {
                print!("{}", encode_frame(&event));
            }
        }
        Command::Tool { json, relay } => {
            init_console_logging("warn");
            let config = load_config(&relay, None, None).await?;
            let registry = ToolRegistry::from_settings(&config.fetcher_settings())?;
            let payload = read_tool_json(&json)?;
            let (tool, args) = parse_tool_input(&payload)?;
            let kind = registry.lookup(&tool)?;
            let call = ToolCallRequest::new("cli", kind.name(), args);
            let result = registry.dispatch(kind, &call).await;
            let output = json!({
                "tool": result.name,
                "is_error": result.is_error,
                "payload": result.payload_value(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

async fn load_config(
    args: &RelayArgs,
    hostname: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<RelayConfig> {
    let overrides = build_cli_overrides(args, hostname, port)?;
    let path = args.config.as_deref().map(PathBuf::from);
    RelayConfig::load(path.as_deref(), overrides).await
}

fn build_cli_overrides(
    args: &RelayArgs,
    hostname: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<Option<Value>> {
    let provider = normalize_and_validate_provider(args.provider.clone())?;
    let mut root = Map::new();

    let mut model = Map::new();
    if let Some(p) = provider {
        model.insert("provider".to_string(), Value::String(p));
    }
    if let Some(m) = args.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        model.insert("model".to_string(), Value::String(m.to_string()));
    }
    if let Some(k) = &args.api_key {
        model.insert("api_key".to_string(), Value::String(k.clone()));
    }
    if !model.is_empty() {
        root.insert("model".to_string(), Value::Object(model));
    }
    if args.mock_data {
        root.insert("data_source".to_string(), json!("mock"));
    }

    let mut server = Map::new();
    if let Some(h) = hostname {
        server.insert("hostname".to_string(), Value::String(h));
    }
    if let Some(p) = port {
        server.insert("port".to_string(), json!(p));
    }
    if !server.is_empty() {
        root.insert("server".to_string(), Value::Object(server));
    }

    if root.is_empty() {
        return Ok(None);
    }
    Ok(Some(Value::Object(root)))
}

fn normalize_and_validate_provider(provider: Option<String>) -> anyhow::Result<Option<String>> {
    let Some(provider) = provider else {
        return Ok(None);
    };
    let normalized = provider.trim().to_lowercase();
    if normalized.is_empty() {
        anyhow::bail!(
            "provider cannot be empty. supported providers: {}",
            ProviderKind::SUPPORTED.join(", ")
        );
    }
    if ProviderKind::SUPPORTED.contains(&normalized.as_str()) {
        return Ok(Some(normalized));
    }
    anyhow::bail!(
        "unsupported provider `{}`. supported providers: {}",
        provider,
        ProviderKind::SUPPORTED.join(", ")
    );
}

fn read_tool_json(input: &str) -> anyhow::Result<Value> {
    if input.trim() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return serde_json::from_str(&buf).context("stdin is not valid JSON");
    }
    if let Some(path) = input.strip_prefix('@') {
        let raw = fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
        return serde_json::from_str(&raw).with_context(|| format!("{path} is not valid JSON"));
    }
    serde_json::from_str(input).context("--json is not valid JSON")
}

fn parse_tool_input(payload: &Value) -> anyhow::Result<(String, Map<String, Value>)> {
    let tool = payload
        .get("tool")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    if tool.is_empty() {
        anyhow::bail!("tool is required in input json");
    }
    let args = match payload.get("args") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => anyhow::bail!("args must be a JSON object"),
    };
    Ok((tool, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(provider: Option<&str>, model: Option<&str>, mock_data: bool) -> RelayArgs {
        RelayArgs {
            provider: provider.map(str::to_string),
            model: model.map(str::to_string),
            mock_data,
            ..RelayArgs::default()
        }
    }

    #[test]
    fn build_cli_overrides_sets_model_and_data_source() {
        let overrides = build_cli_overrides(
            &args(Some(" OpenAI "), Some("gpt-4o-mini"), true),
            Some("0.0.0.0".to_string()),
            Some(9000),
        )
        .expect("overrides")
        .expect("some");

        assert_eq!(overrides["model"]["provider"], "openai");
        assert_eq!(overrides["model"]["model"], "gpt-4o-mini");
        assert_eq!(overrides["data_source"], "mock");
        assert_eq!(overrides["server"]["hostname"], "0.0.0.0");
        assert_eq!(overrides["server"]["port"], 9000);
    }

    #[test]
    fn build_cli_overrides_is_none_without_flags() {
        let overrides = build_cli_overrides(&RelayArgs::default(), None, None).expect("overrides");
        assert!(overrides.is_none());
    }

    #[test]
    fn normalize_and_validate_provider_accepts_known_values_case_insensitive() {
        let provider =
            normalize_and_validate_provider(Some(" Gemini ".to_string())).expect("provider");
        assert_eq!(provider.as_deref(), Some("gemini"));
    }

    #[test]
    fn normalize_and_validate_provider_rejects_unknown_value() {
        let err = normalize_and_validate_provider(Some("anthropic".to_string())).unwrap_err();
        assert!(err.to_string().contains("unsupported provider `anthropic`"));
        assert!(err.to_string().contains("gemini, openai, local"));
    }

    #[test]
    fn build_cli_overrides_rejects_unknown_provider() {
        let err = build_cli_overrides(&args(Some("gemnii"), None, false), None, None).unwrap_err();
        assert!(err.to_string().contains("unsupported provider `gemnii`"));
    }

    #[test]
    fn parse_tool_input_requires_tool_and_object_args() {
        let (tool, args) =
            parse_tool_input(&json!({"tool": "get_current_weather", "args": {"city": "Atlanta"}}))
                .expect("input");
        assert_eq!(tool, "get_current_weather");
        assert_eq!(args["city"], "Atlanta");

        assert!(parse_tool_input(&json!({"args": {}})).is_err());
        assert!(parse_tool_input(&json!({"tool": "x", "args": [1]})).is_err());
    }

    #[test]
    fn read_tool_json_supports_file_references() {
        let dir = std::env::temp_dir().join(format!("tilecast-cli-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("dir");
        let path = dir.join("tool.json");
        fs::write(&path, r#"{"tool":"get_stock_price","args":{"ticker":"AAPL"}}"#).expect("write");
        let value = read_tool_json(&format!("@{}", path.display())).expect("json");
        assert_eq!(value["args"]["ticker"], "AAPL");
        let _ = fs::remove_dir_all(&dir);
    }
}
