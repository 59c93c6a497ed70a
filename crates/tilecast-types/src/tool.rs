use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Primitive type of a single tool parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
        }
    }
}

/// Declared shape of a tool as advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// Field name to primitive type, in declaration order. Every field is required.
    pub parameters: Vec<(String, ParamType)>,
}

impl ToolDeclaration {
    pub fn new(name: &str, description: &str, parameters: &[(&str, ParamType)]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: parameters
                .iter()
                .map(|(field, ty)| (field.to_string(), *ty))
                .collect(),
        }
    }

    /// JSON-schema object used by the provider wire formats.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for (field, ty) in &self.parameters {
            properties.insert(field.clone(), json!({ "type": ty.as_str() }));
        }
        let required = self
            .parameters
            .iter()
            .map(|(field, _)| Value::String(field.clone()))
            .collect::<Vec<_>>();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A model-issued request to invoke a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn argument_str(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Outcome of one fetcher invocation. Failures are carried as an `error` payload field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub payload: Map<String, Value>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            call_id: call_id.into(),
            name: name.into(),
            payload,
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, name: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("error".to_string(), Value::String(reason.into()));
        Self {
            call_id: call_id.into(),
            name: name.into(),
            payload,
            is_error: true,
        }
    }

    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }

    pub fn error_reason(&self) -> Option<&str> {
        if !self.is_error {
            return None;
        }
        self.payload.get("error").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_schema_lists_every_field_as_required() {
        let decl = ToolDeclaration::new(
            "get_current_weather",
            "Get the current weather for a specific city.",
            &[("city", ParamType::String)],
        );
        let schema = decl.parameters_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["city"]["type"], "string");
        assert_eq!(schema["required"], json!(["city"]));
    }

    #[test]
    fn error_result_carries_reason_in_payload() {
        let result = ToolResult::error("call_0", "get_stock_price", "Ticker not found");
        assert!(result.is_error);
        assert_eq!(result.error_reason(), Some("Ticker not found"));
        assert_eq!(result.payload_value(), json!({"error": "Ticker not found"}));
    }

    #[test]
    fn argument_str_ignores_blank_values() {
        let mut args = Map::new();
        args.insert("city".to_string(), json!("  "));
        let call = ToolCallRequest::new("call_0", "get_current_weather", args);
        assert_eq!(call.argument_str("city"), None);
    }
}
