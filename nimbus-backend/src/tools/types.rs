use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool definition as advertised by a provider's `tools/list`, tagged with
/// the provider that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's arguments, kept as raw JSON — providers
    /// ship arbitrary schemas and the pipeline only forwards them to models.
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
    #[serde(default)]
    pub provider_id: String,
}

/// One step of an executable plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub order: u32,
    pub tool: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, Value>,
}

/// Ordered tool invocations for one conversational turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Normalize step ordering: ascending by `order`.
    pub fn sorted(mut self) -> Self {
        self.steps.sort_by_key(|s| s.order);
        self
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.tool.as_str()).collect()
    }
}

/// Outcome of one executed plan step, order-preserving across the plan.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExecutionResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolExecutionResult {
    pub fn success(tool_name: impl Into<String>, result: Value) -> Self {
        ToolExecutionResult {
            tool_name: tool_name.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        ToolExecutionResult {
            tool_name: tool_name.into(),
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// Renderable view over duck-typed tool result content.
///
/// Providers return anything from bare strings to tagged content lists;
/// every place that turns results into prompt or user-facing text matches
/// exhaustively over this union.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    Image { source: String },
    Json(Value),
    Unknown(Value),
}

impl ToolOutput {
    /// Break a raw result value into renderable blocks. A tagged `content`
    /// array is unpacked item by item; anything else renders whole.
    pub fn from_result(value: &Value) -> Vec<ToolOutput> {
        if let Some(items) = value.get("content").and_then(|c| c.as_array()) {
            return items.iter().map(Self::from_content_item).collect();
        }
        vec![Self::from_content_item(value)]
    }

    fn from_content_item(item: &Value) -> ToolOutput {
        match item {
            Value::String(s) => ToolOutput::Text(s.clone()),
            Value::Object(map) => {
                let tag = map.get("type").and_then(|t| t.as_str());
                match tag {
                    Some("text") => {
                        if let Some(text) = map.get("text").and_then(|t| t.as_str()) {
                            return ToolOutput::Text(text.to_string());
                        }
                        ToolOutput::Json(item.clone())
                    }
                    Some("image") => {
                        let source = map
                            .get("url")
                            .or_else(|| map.get("data"))
                            .or_else(|| map.get("source"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default();
                        ToolOutput::Image { source: source.to_string() }
                    }
                    _ => ToolOutput::Json(item.clone()),
                }
            }
            other => ToolOutput::Unknown(other.clone()),
        }
    }

    /// Flatten to text for inclusion in a prompt.
    pub fn render(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Image { source } => format!("[image: {}]", source),
            ToolOutput::Json(value) => value.to_string(),
            ToolOutput::Unknown(value) => value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_sorted_orders_steps() {
        let plan = Plan {
            steps: vec![
                PlanStep { order: 2, tool: "b".to_string(), arguments: Default::default() },
                PlanStep { order: 1, tool: "a".to_string(), arguments: Default::default() },
            ],
        }
        .sorted();
        assert_eq!(plan.tool_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_tool_definition_parses_wire_shape() {
        let def: ToolDefinition = serde_json::from_value(json!({
            "name": "get_current_time",
            "description": "Current UTC time",
            "inputSchema": {"type": "object", "properties": {}}
        }))
        .unwrap();
        assert_eq!(def.name, "get_current_time");
        assert!(def.provider_id.is_empty());
    }

    #[test]
    fn test_output_unpacks_tagged_content_list() {
        let result = json!({
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "image", "url": "https://example.com/x.png"},
                {"type": "chart", "points": [1, 2]}
            ]
        });
        let outputs = ToolOutput::from_result(&result);
        assert_eq!(outputs[0], ToolOutput::Text("hello".to_string()));
        assert_eq!(
            outputs[1],
            ToolOutput::Image { source: "https://example.com/x.png".to_string() }
        );
        assert!(matches!(outputs[2], ToolOutput::Json(_)));
    }

    #[test]
    fn test_output_falls_back_to_whole_value() {
        let outputs = ToolOutput::from_result(&json!("14:32 UTC"));
        assert_eq!(outputs, vec![ToolOutput::Text("14:32 UTC".to_string())]);

        let outputs = ToolOutput::from_result(&json!(42));
        assert!(matches!(outputs[0], ToolOutput::Unknown(_)));
    }
}
