use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArgType {
    String,
    Integer,
    Boolean,
}

impl ArgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Integer => "integer",
            ArgType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub arg_type: ArgType,
    pub description: String,
    pub required: bool,
}

impl ToolParam {
    pub fn required(name: &str, arg_type: ArgType, description: &str) -> Self {
        Self {
            name: name.into(),
            arg_type,
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: &str, arg_type: ArgType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, arg_type, description)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
}

impl ToolSchema {
    pub fn new(name: &str, description: &str, params: Vec<ToolParam>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params,
        }
    }

    pub fn param(&self, name: &str) -> Option<&ToolParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// One line per tool for the agent prompt, e.g.
    /// `send_message(recipient: string, body: string, subject?: string) - Send a message`.
    pub fn describe(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let marker = if p.required { "" } else { "?" };
                format!("{}{}: {}", p.name, marker, p.arg_type.as_str())
            })
            .collect();
        format!("{}({}) - {}", self.name, params.join(", "), self.description)
    }
}

pub type ToolArguments = serde_json::Map<String, serde_json::Value>;

/// Who a tool call is made on behalf of. Tools reaching per-user data scope
/// every operation by `user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub user_id: String,
}

impl ToolContext {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// A named operation the action agent may invoke. Arguments reaching
/// `invoke` have already been validated against `schema()`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> &ToolSchema;

    fn name(&self) -> &str {
        &self.schema().name
    }

    async fn invoke(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<String>;
}

/// Reads a string argument. Validation has already run, so a missing
/// required argument is reported as an internal inconsistency.
pub fn string_arg<'a>(tool: &str, args: &'a ToolArguments, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| crate::error::HopperError::tool(tool, format!("missing argument '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_marks_optional_params() {
        let schema = ToolSchema::new(
            "send_message",
            "Send a message",
            vec![
                ToolParam::required("recipient", ArgType::String, "who"),
                ToolParam::optional("subject", ArgType::String, "subject line"),
            ],
        );
        assert_eq!(
            schema.describe(),
            "send_message(recipient: string, subject?: string) - Send a message"
        );
    }
}
