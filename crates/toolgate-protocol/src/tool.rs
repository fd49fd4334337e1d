//! Tool types: calls, groups, risk levels, and gateway contexts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A tool invocation proposed by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            call_id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            input,
        }
    }

    /// The `command` field of the input, if it is a string.
    pub fn command(&self) -> Option<&str> {
        self.input.get("command").and_then(serde_json::Value::as_str)
    }
}

/// Static tool grouping used by permission and context rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToolGroup {
    #[serde(rename = "group:read")]
    Read,
    #[serde(rename = "group:write")]
    Write,
    #[serde(rename = "group:destructive")]
    Destructive,
    #[serde(rename = "group:system")]
    System,
    #[serde(rename = "group:network")]
    Network,
    #[serde(rename = "group:memory")]
    Memory,
    #[serde(rename = "group:image")]
    Image,
    #[serde(rename = "group:meta")]
    Meta,
}

impl ToolGroup {
    pub const ALL: [ToolGroup; 8] = [
        ToolGroup::Read,
        ToolGroup::Write,
        ToolGroup::Destructive,
        ToolGroup::System,
        ToolGroup::Network,
        ToolGroup::Memory,
        ToolGroup::Image,
        ToolGroup::Meta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "group:read",
            Self::Write => "group:write",
            Self::Destructive => "group:destructive",
            Self::System => "group:system",
            Self::Network => "group:network",
            Self::Memory => "group:memory",
            Self::Image => "group:image",
            Self::Meta => "group:meta",
        }
    }
}

impl fmt::Display for ToolGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolGroup {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|group| group.as_str() == value)
            .ok_or_else(|| format!("unknown tool group: {value}"))
    }
}

/// Static risk classification of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRiskLevel {
    Read,
    Write,
    Destructive,
    System,
    Network,
}

/// Trust tier of the channel a request arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayContext {
    /// Direct message with the workspace owner.
    Private,
    /// Shared chat with several known members.
    Group,
    /// Open channel; anyone may write.
    Public,
}

impl GatewayContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Public => "public",
        }
    }
}

impl fmt::Display for GatewayContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayContext {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "private" => Ok(Self::Private),
            "group" => Ok(Self::Group),
            "public" => Ok(Self::Public),
            other => Err(format!("unknown gateway context: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_new() {
        let call = ToolCall::new("run_command", serde_json::json!({"command": "ls -la"}));
        assert_eq!(call.tool_name, "run_command");
        assert_eq!(call.command(), Some("ls -la"));
        assert!(!call.call_id.is_empty());

        let no_command = ToolCall::new("run_command", serde_json::json!({"command": 42}));
        assert_eq!(no_command.command(), None);
    }

    #[test]
    fn tool_group_wire_names() {
        let json = serde_json::to_string(&ToolGroup::Memory).unwrap();
        assert_eq!(json, "\"group:memory\"");
        assert_eq!("group:network".parse::<ToolGroup>(), Ok(ToolGroup::Network));
        assert!("network".parse::<ToolGroup>().is_err());
    }

    #[test]
    fn gateway_context_parse() {
        assert_eq!("public".parse::<GatewayContext>(), Ok(GatewayContext::Public));
        assert!("channel".parse::<GatewayContext>().is_err());
        assert_eq!(GatewayContext::Group.to_string(), "group");
    }
}
