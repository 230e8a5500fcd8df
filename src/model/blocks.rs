use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unified conversation element rendered by clients.
///
/// The JSON shape is a stable wire contract: camelCase field names and
/// snake_case `type` tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub content: BlockContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockContent {
    UserMessage {
        content: String,
    },
    AssistantText {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolUse {
        tool_name: String,
        tool_use_id: String,
        input: Value,
        status: ToolStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_use_id: String,
        output: Value,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    Thinking {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    System {
        subtype: SystemSubtype,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Subagent {
        subagent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        input: Value,
        status: ToolStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolStatus::Success | ToolStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemSubtype {
    SessionStart,
    SessionEnd,
    Error,
    Status,
    HookResponse,
    AuthStatus,
}

impl Block {
    /// Runtime-synthesized block with a fresh id and the current time.
    pub fn new(content: BlockContent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            content,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(BlockContent::UserMessage {
            content: text.into(),
        })
    }

    /// The completion status carried by tool_use and subagent blocks.
    pub fn status(&self) -> Option<ToolStatus> {
        match &self.content {
            BlockContent::ToolUse { status, .. } | BlockContent::Subagent { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// The toolUseId this block spends or answers, if any.
    pub fn tool_use_id(&self) -> Option<&str> {
        match &self.content {
            BlockContent::ToolUse { tool_use_id, .. }
            | BlockContent::ToolResult { tool_use_id, .. } => Some(tool_use_id),
            BlockContent::Subagent { tool_use_id, .. } => tool_use_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_message_wire_shape() {
        let block = Block {
            id: "b1".into(),
            timestamp: DateTime::UNIX_EPOCH,
            content: BlockContent::UserMessage {
                content: "hello".into(),
            },
        };
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "user_message");
        assert_eq!(v["id"], "b1");
        assert_eq!(v["content"], "hello");
    }

    #[test]
    fn tool_use_wire_shape_uses_camel_case() {
        let block = Block {
            id: "toolu_1".into(),
            timestamp: DateTime::UNIX_EPOCH,
            content: BlockContent::ToolUse {
                tool_name: "Bash".into(),
                tool_use_id: "toolu_1".into(),
                input: json!({"command": "ls"}),
                status: ToolStatus::Running,
                display_name: None,
                description: Some("List files".into()),
            },
        };
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "tool_use");
        assert_eq!(v["toolName"], "Bash");
        assert_eq!(v["toolUseId"], "toolu_1");
        assert_eq!(v["status"], "running");
        assert_eq!(v["description"], "List files");
        assert!(v.get("displayName").is_none());
    }

    #[test]
    fn tool_result_wire_shape() {
        let block = Block {
            id: "toolu_1:result".into(),
            timestamp: DateTime::UNIX_EPOCH,
            content: BlockContent::ToolResult {
                tool_use_id: "toolu_1".into(),
                output: json!("ok"),
                is_error: false,
                duration_ms: Some(42),
            },
        };
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "tool_result");
        assert_eq!(v["toolUseId"], "toolu_1");
        assert_eq!(v["isError"], false);
        assert_eq!(v["durationMs"], 42);
    }

    #[test]
    fn system_subtype_values() {
        for (subtype, expected) in [
            (SystemSubtype::SessionStart, "session_start"),
            (SystemSubtype::SessionEnd, "session_end"),
            (SystemSubtype::Error, "error"),
            (SystemSubtype::Status, "status"),
            (SystemSubtype::HookResponse, "hook_response"),
            (SystemSubtype::AuthStatus, "auth_status"),
        ] {
            let v = serde_json::to_value(subtype).unwrap();
            assert_eq!(v, expected);
        }
    }

    #[test]
    fn subagent_wire_shape() {
        let block = Block {
            id: "task_1".into(),
            timestamp: DateTime::UNIX_EPOCH,
            content: BlockContent::Subagent {
                subagent_id: "task_1".into(),
                name: Some("researcher".into()),
                input: json!({"prompt": "dig in"}),
                status: ToolStatus::Success,
                output: Some("done".into()),
                duration_ms: None,
                tool_use_id: Some("toolu_9".into()),
            },
        };
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "subagent");
        assert_eq!(v["subagentId"], "task_1");
        assert_eq!(v["toolUseId"], "toolu_9");
        assert_eq!(v["status"], "success");
    }

    #[test]
    fn roundtrip_through_json() {
        let block = Block::user("roundtrip me");
        let text = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&text).unwrap();
        assert_eq!(block, back);
    }

    #[test]
    fn status_accessor() {
        let tool = Block {
            id: "t".into(),
            timestamp: DateTime::UNIX_EPOCH,
            content: BlockContent::ToolUse {
                tool_name: "Read".into(),
                tool_use_id: "t".into(),
                input: json!({}),
                status: ToolStatus::Error,
                display_name: None,
                description: None,
            },
        };
        assert_eq!(tool.status(), Some(ToolStatus::Error));
        assert!(tool.status().unwrap().is_terminal());
        assert_eq!(Block::user("x").status(), None);
    }
}
