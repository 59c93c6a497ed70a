use async_trait::async_trait;
use futures::stream;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use tilecast_types::{ConversationItem, ProviderInfo, ToolCallRequest, ToolResult};

use crate::{Chunk, ChunkStream, CompletionProvider, CompletionRequest, ProviderError};

/// Offline provider that recognises a few phrasings and answers from tool
/// results. Lets the relay run end to end without any API key.
pub struct LocalProvider;

#[async_trait]
impl CompletionProvider for LocalProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "local".to_string(),
            name: "Local Rules".to_string(),
            model: "rules-1".to_string(),
        }
    }

    async fn stream(
        &self,
        request: CompletionRequest,
        _cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        let chunks = respond(&request);
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }
}

fn respond(request: &CompletionRequest) -> Vec<Chunk> {
    match request.history.items().last() {
        Some(ConversationItem::ToolResults { results }) => results
            .iter()
            .map(|result| Chunk::Text(describe_result(result)))
            .collect(),
        Some(ConversationItem::User { text }) => {
            let declared = |name: &str| request.declarations.iter().any(|d| d.name == name);
            if request.declarations.is_empty() {
                return vec![Chunk::Text(format!("Echo: {text}"))];
            }
            let calls = extract_calls(text)
                .into_iter()
                .filter(|(name, _)| declared(*name))
                .enumerate()
                .map(|(i, (name, arguments))| {
                    Chunk::ToolCall(ToolCallRequest::new(format!("call_{i}"), name, arguments))
                })
                .collect::<Vec<_>>();
            if calls.is_empty() {
                vec![Chunk::Text(
                    "I can look up the weather, stock prices, and Pokémon.".to_string(),
                )]
            } else {
                calls
            }
        }
        Some(ConversationItem::Assistant { .. })
        | Some(ConversationItem::ToolCalls { .. })
        | None => Vec::new(),
    }
}

/// Tool calls found in `text`, ordered by where they appear.
fn extract_calls(text: &str) -> Vec<(&'static str, Map<String, Value>)> {
    let lower = text.to_ascii_lowercase();
    let mut found: Vec<(usize, &'static str, Map<String, Value>)> = Vec::new();

    if let Some(pos) = lower.find("weather in ") {
        let rest = &text[pos + "weather in ".len()..];
        let city = title_case(until_clause_end(rest));
        if !city.is_empty() {
            found.push((pos, "get_current_weather", single_arg("city", city)));
        }
    }

    let ticker_at = ["price for ", "price of ", "stock "]
        .iter()
        .filter_map(|marker| {
            let pos = lower.find(marker)?;
            let word = first_word(&text[pos + marker.len()..]);
            if word.is_empty() || word.eq_ignore_ascii_case("price") {
                return None;
            }
            Some((pos, word.to_ascii_uppercase()))
        })
        .next();
    if let Some((pos, ticker)) = ticker_at {
        found.push((pos, "get_stock_price", single_arg("ticker", ticker)));
    }

    let species_at = ["pokemon ", "pokémon "]
        .iter()
        .filter_map(|marker| {
            let pos = text.to_lowercase().find(marker)?;
            Some((pos, marker.len()))
        })
        .next();
    if let Some((pos, len)) = species_at {
        if let Some(rest) = text.get(pos + len..) {
            let name = first_word(rest).to_lowercase();
            if !name.is_empty() {
                found.push((pos, "get_pokemon_info", single_arg("name", name)));
            }
        }
    }

    found.sort_by_key(|(pos, _, _)| *pos);
    found
        .into_iter()
        .map(|(_, name, args)| (name, args))
        .collect()
}

fn single_arg(key: &str, value: String) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), Value::String(value));
    map
}

fn until_clause_end(rest: &str) -> &str {
    let mut end = rest.len();
    for stop in ["?", ".", ",", "!", " and "] {
        if let Some(idx) = rest.find(stop) {
            end = end.min(idx);
        }
    }
    rest[..end].trim()
}

fn first_word(rest: &str) -> &str {
    rest.trim_start()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .next()
        .unwrap_or_default()
}

fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn describe_result(result: &ToolResult) -> String {
    if let Some(reason) = result.error_reason() {
        return format!("I couldn't fetch that: {reason}");
    }
    let p = result.payload_value();
    let field = |key: &str| match p.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    match result.name.as_str() {
        "get_current_weather" => format!(
            "It is {}°C and {} in {}. ",
            field("temperature"),
            field("description").to_lowercase(),
            field("city")
        ),
        "get_stock_price" => format!(
            "{} is trading at ${} ({}). ",
            field("ticker"),
            field("price"),
            field("change")
        ),
        "get_pokemon_info" => format!("{} is a Pokémon of type {}. ", field("name"), field("type")),
        other => format!("{other} returned {p}. "),
    }
}
