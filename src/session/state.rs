use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::adapter::ParsedTranscripts;
use crate::model::{Block, SandboxPhase, SubagentTranscript, WorkspaceFile};

/// Per-session in-memory model. Mutated only under the session's state
/// lock, by the five serialized paths (send, two watchers, sync, health).
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub blocks: Vec<Block>,
    pub subagents: BTreeMap<String, SubagentState>,
    /// The native main transcript blob, kept verbatim for round-tripping.
    pub raw_transcript: String,
    /// Unique by path; insertion order is not meaningful.
    pub workspace_files: Vec<WorkspaceFile>,
    pub last_activity: DateTime<Utc>,
    pub sandbox: Option<SandboxState>,
    /// Subagent ids already announced via `session:subagent:discovered`.
    pub announced_subagents: BTreeSet<String>,
    /// Subagent ids already announced via `session:subagent:completed`.
    pub completed_subagents: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SubagentState {
    pub raw_transcript: String,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxState {
    /// Unknown until the provider has handed out a sandbox.
    pub sandbox_id: Option<String>,
    pub status: SandboxPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
}

impl SandboxState {
    pub fn starting() -> Self {
        Self {
            sandbox_id: None,
            status: SandboxPhase::Starting,
            status_message: None,
            restart_count: 0,
            last_health_check: None,
        }
    }
}

/// Subagent lifecycle transitions produced by one re-parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubagentDiff {
    pub discovered: Vec<String>,
    pub completed: Vec<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            last_activity: Utc::now(),
            ..Self::default()
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Returns true when the file was added or its content changed.
    pub fn upsert_workspace_file(&mut self, file: WorkspaceFile) -> bool {
        match self.workspace_files.iter_mut().find(|f| f.path == file.path) {
            Some(existing) => {
                if existing.content == file.content {
                    false
                } else {
                    existing.content = file.content;
                    true
                }
            }
            None => {
                self.workspace_files.push(file);
                true
            }
        }
    }

    pub fn remove_workspace_file(&mut self, path: &str) -> bool {
        let before = self.workspace_files.len();
        self.workspace_files.retain(|f| f.path != path);
        self.workspace_files.len() != before
    }

    pub fn subagent_transcripts(&self) -> Vec<SubagentTranscript> {
        self.subagents
            .iter()
            .map(|(id, sub)| SubagentTranscript {
                id: id.clone(),
                content: sub.raw_transcript.clone(),
            })
            .collect()
    }

    /// Replace parsed blocks from a re-parse, preserving raw subagent
    /// transcripts, and compute discovered/completed transitions. A
    /// subagent counts as completed once its final block reaches a
    /// terminal status.
    pub fn apply_parsed(&mut self, parsed: ParsedTranscripts) -> SubagentDiff {
        self.blocks = parsed.blocks;

        let mut diff = SubagentDiff::default();
        for sub in parsed.subagents {
            if self.announced_subagents.insert(sub.id.clone()) {
                diff.discovered.push(sub.id.clone());
            }
            let terminal = sub
                .blocks
                .last()
                .and_then(|b| b.status())
                .is_some_and(|s| s.is_terminal());
            if terminal && self.completed_subagents.insert(sub.id.clone()) {
                diff.completed.push(sub.id.clone());
            }
            self.subagents.entry(sub.id).or_default().blocks = sub.blocks;
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ParsedSubagent;
    use crate::model::blocks::{BlockContent, ToolStatus};
    use serde_json::json;

    fn text_block(id: &str) -> Block {
        Block {
            id: id.into(),
            timestamp: DateTime::UNIX_EPOCH,
            content: BlockContent::AssistantText {
                content: "x".into(),
                model: None,
            },
        }
    }

    fn subagent_block(id: &str, status: ToolStatus) -> Block {
        Block {
            id: id.into(),
            timestamp: DateTime::UNIX_EPOCH,
            content: BlockContent::Subagent {
                subagent_id: id.into(),
                name: None,
                input: json!({}),
                status,
                output: None,
                duration_ms: None,
                tool_use_id: None,
            },
        }
    }

    #[test]
    fn workspace_upsert_is_unique_by_path() {
        let mut state = SessionState::new();
        assert!(state.upsert_workspace_file(WorkspaceFile {
            path: "a.txt".into(),
            content: "1".into()
        }));
        assert!(state.upsert_workspace_file(WorkspaceFile {
            path: "a.txt".into(),
            content: "2".into()
        }));
        // Unchanged content is a no-op
        assert!(!state.upsert_workspace_file(WorkspaceFile {
            path: "a.txt".into(),
            content: "2".into()
        }));
        assert_eq!(state.workspace_files.len(), 1);
        assert_eq!(state.workspace_files[0].content, "2");

        assert!(state.remove_workspace_file("a.txt"));
        assert!(!state.remove_workspace_file("a.txt"));
        assert!(state.workspace_files.is_empty());
    }

    #[test]
    fn apply_parsed_discovers_new_subagents_once() {
        let mut state = SessionState::new();
        let parsed = ParsedTranscripts {
            blocks: vec![text_block("b1")],
            subagents: vec![ParsedSubagent {
                id: "sub-1".into(),
                blocks: vec![text_block("s1")],
            }],
        };

        let diff = state.apply_parsed(parsed.clone());
        assert_eq!(diff.discovered, vec!["sub-1".to_string()]);
        assert!(diff.completed.is_empty());

        // Re-parsing the same content discovers nothing new
        let diff = state.apply_parsed(parsed);
        assert_eq!(diff, SubagentDiff::default());
        assert_eq!(state.blocks.len(), 1);
        assert_eq!(state.subagents["sub-1"].blocks.len(), 1);
    }

    #[test]
    fn apply_parsed_reports_completion_on_terminal_status() {
        let mut state = SessionState::new();
        state.apply_parsed(ParsedTranscripts {
            blocks: vec![],
            subagents: vec![ParsedSubagent {
                id: "sub-1".into(),
                blocks: vec![subagent_block("t1", ToolStatus::Running)],
            }],
        });

        let diff = state.apply_parsed(ParsedTranscripts {
            blocks: vec![],
            subagents: vec![ParsedSubagent {
                id: "sub-1".into(),
                blocks: vec![subagent_block("t1", ToolStatus::Success)],
            }],
        });
        assert!(diff.discovered.is_empty());
        assert_eq!(diff.completed, vec!["sub-1".to_string()]);

        // Completion fires once
        let diff = state.apply_parsed(ParsedTranscripts {
            blocks: vec![],
            subagents: vec![ParsedSubagent {
                id: "sub-1".into(),
                blocks: vec![subagent_block("t1", ToolStatus::Success)],
            }],
        });
        assert!(diff.completed.is_empty());
    }

    #[test]
    fn apply_parsed_preserves_raw_transcripts() {
        let mut state = SessionState::new();
        state.subagents.insert(
            "sub-1".into(),
            SubagentState {
                raw_transcript: "raw lines".into(),
                blocks: vec![],
            },
        );

        state.apply_parsed(ParsedTranscripts {
            blocks: vec![],
            subagents: vec![ParsedSubagent {
                id: "sub-1".into(),
                blocks: vec![text_block("s1")],
            }],
        });
        assert_eq!(state.subagents["sub-1"].raw_transcript, "raw lines");
        assert_eq!(state.subagents["sub-1"].blocks.len(), 1);
    }

    #[test]
    fn touch_advances_last_activity() {
        let mut state = SessionState::new();
        let before = state.last_activity;
        std::thread::sleep(std::time::Duration::from_millis(2));
        state.touch();
        assert!(state.last_activity > before);
    }
}
