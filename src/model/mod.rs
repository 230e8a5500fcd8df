pub mod blocks;
pub mod profile;
pub mod stream;

pub use blocks::{Block, BlockContent, SystemSubtype, ToolStatus};
pub use profile::{AgentProfile, CommandSpec, SkillFile, SkillSpec, SubagentSpec};
pub use stream::{MAIN_CONVERSATION, StreamEvent};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Architecture ────────────────────────────────────────────────────

/// Agent family identifier; selects the architecture adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Claude,
    Opencode,
}

impl Architecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Architecture::Claude => "claude",
            Architecture::Opencode => "opencode",
        }
    }
}

impl std::str::FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude" => Ok(Architecture::Claude),
            "opencode" => Ok(Architecture::Opencode),
            other => Err(format!("unknown architecture: {other}")),
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Sandbox phase ───────────────────────────────────────────────────

/// Lifecycle phase of a session's sandbox as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxPhase {
    Starting,
    Ready,
    Terminated,
}

// ── Workspace files ─────────────────────────────────────────────────

/// A text file in the session's workspace, path relative to the workspace
/// root. Binary or oversized files never reach the stored model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFile {
    pub path: String,
    pub content: String,
}

// ── Session records ─────────────────────────────────────────────────

/// Persisted list-view record of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub architecture: Architecture,
    pub profile_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_options: Option<Value>,
}

/// Merge patch for a session record. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionRecordPatch {
    pub last_activity: Option<DateTime<Utc>>,
    pub session_options: Option<Value>,
}

/// A raw subagent transcript blob, keyed by subagent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubagentTranscript {
    pub id: String,
    pub content: String,
}

/// Everything persistence knows about one session.
#[derive(Debug, Clone)]
pub struct PersistedSession {
    pub record: SessionRecord,
    pub main_transcript: String,
    pub subagents: Vec<SubagentTranscript>,
    pub workspace_files: Vec<WorkspaceFile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn architecture_serde_values() {
        assert_eq!(
            serde_json::to_value(Architecture::Claude).unwrap(),
            "claude"
        );
        assert_eq!(
            serde_json::to_value(Architecture::Opencode).unwrap(),
            "opencode"
        );
        let parsed: Architecture = serde_json::from_str("\"opencode\"").unwrap();
        assert_eq!(parsed, Architecture::Opencode);
    }

    #[test]
    fn architecture_from_str() {
        assert_eq!("claude".parse::<Architecture>().unwrap(), Architecture::Claude);
        assert!("cursor".parse::<Architecture>().is_err());
    }

    #[test]
    fn session_record_wire_shape() {
        let record = SessionRecord {
            session_id: "s1".into(),
            architecture: Architecture::Claude,
            profile_id: "assistant-v1".into(),
            created_at: DateTime::UNIX_EPOCH,
            last_activity: DateTime::UNIX_EPOCH,
            session_options: Some(serde_json::json!({"model": "opus"})),
        };
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["sessionId"], "s1");
        assert_eq!(v["architecture"], "claude");
        assert_eq!(v["profileId"], "assistant-v1");
        assert_eq!(v["sessionOptions"]["model"], "opus");
        assert!(v.get("createdAt").is_some());
        assert!(v.get("lastActivity").is_some());
    }

    #[test]
    fn session_record_roundtrip_without_options() {
        let record = SessionRecord {
            session_id: "s2".into(),
            architecture: Architecture::Opencode,
            profile_id: "p".into(),
            created_at: Utc::now(),
            last_activity: Utc::now(),
            session_options: None,
        };
        let text = serde_json::to_string(&record).unwrap();
        assert!(!text.contains("sessionOptions"));
        let back: SessionRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(record, back);
    }
}
