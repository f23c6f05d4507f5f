//! Intent tool schema offered to the model, and the tool calls it returns.

use crate::query::Intent;
use serde::{Deserialize, Serialize};

/// Tool definitions for the LLM
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

/// A tool call from the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String, // JSON string
}

impl ToolCall {
    pub fn new(name: &str, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }
}

/// Arguments every intent accepts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntentArgs {
    pub application_name: String,
    #[serde(default)]
    pub time_range: Option<String>,
}

impl IntentArgs {
    /// Decode the model's JSON argument string. The application name must be
    /// present and non-blank; the router never guesses it.
    pub fn parse(arguments: &str) -> Result<Self, String> {
        let args: IntentArgs = serde_json::from_str(arguments)
            .map_err(|e| format!("invalid tool arguments ({})", e))?;
        if args.application_name.trim().is_empty() {
            return Err("tool call is missing `application_name`".to_string());
        }
        Ok(IntentArgs {
            application_name: args.application_name.trim().to_string(),
            time_range: args.time_range,
        })
    }
}

fn intent_parameters() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "application_name": {"type": "string"},
            "time_range": {
                "type": "string",
                "description": "A time range like 'last 24 hours', 'past 7 days', 'today', etc."
            }
        },
        "required": ["application_name"]
    })
}

/// One tool per [`Intent`], with the shared argument schema.
pub fn intent_tool_definitions() -> Vec<ToolDefinition> {
    Intent::ALL
        .into_iter()
        .map(|intent| ToolDefinition {
            tool_type: "function",
            function: FunctionDefinition {
                name: intent.name(),
                description: intent.description(),
                parameters: intent_parameters(),
            },
        })
        .collect()
}
