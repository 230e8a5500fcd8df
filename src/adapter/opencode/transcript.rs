//! Parser for the OpenCode family's exported session documents.
//!
//! The `export` command produces a single JSON document per session:
//! `{ id, parentID?, messages: [{ id, role, modelID?, time, parts: [...] }] }`.
//! Part types `text | reasoning | tool | agent | subtask | step-start |
//! step-finish | retry` are surfaced as blocks; `file | snapshot | patch |
//! compaction` are bookkeeping and stay invisible. Unknown part types and
//! fields are ignored.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::adapter::{ParsedSubagent, ParsedTranscripts};
use crate::model::SubagentTranscript;
use crate::model::blocks::{Block, BlockContent, SystemSubtype, ToolStatus};

pub fn parse(main: &str, subagents: &[SubagentTranscript]) -> ParsedTranscripts {
    ParsedTranscripts {
        blocks: parse_document(main),
        subagents: subagents
            .iter()
            .filter(|t| !is_placeholder(&t.content))
            .map(|t| ParsedSubagent {
                id: t.id.clone(),
                blocks: parse_document(&t.content),
            })
            .collect(),
    }
}

/// A document that yields no surfaced blocks is a placeholder (the CLI
/// creates child-session files before the subagent says anything).
pub fn is_placeholder(raw: &str) -> bool {
    parse_document(raw).is_empty()
}

pub fn parse_document(raw: &str) -> Vec<Block> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let doc: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed session document");
            return Vec::new();
        }
    };

    let Some(messages) = doc.get("messages").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut blocks = Vec::new();
    let mut resolved: HashSet<String> = HashSet::new();
    for (msg_idx, message) in messages.iter().enumerate() {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("");
        let model = message
            .get("modelID")
            .and_then(Value::as_str)
            .map(str::to_string);
        let timestamp = message_timestamp(message);
        let message_id = message
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("msg-{msg_idx}"));

        let Some(parts) = message.get("parts").and_then(Value::as_array) else {
            continue;
        };
        for (idx, part) in parts.iter().enumerate() {
            let part_id = part
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{message_id}-{idx}"));
            blocks.extend(blocks_for_part(
                part,
                &part_id,
                role,
                model.as_deref(),
                timestamp,
                &mut resolved,
            ));
        }
    }
    blocks
}

/// Map one part to zero, one, or two blocks (a completed tool part yields
/// both the tool_use and its tool_result).
pub fn blocks_for_part(
    part: &Value,
    part_id: &str,
    role: &str,
    model: Option<&str>,
    timestamp: DateTime<Utc>,
    resolved: &mut HashSet<String>,
) -> Vec<Block> {
    let block = |content| Block {
        id: part_id.to_string(),
        timestamp,
        content,
    };

    match part.get("type").and_then(Value::as_str) {
        Some("text") => {
            let text = part.get("text").and_then(Value::as_str).unwrap_or("");
            if text.is_empty() {
                return Vec::new();
            }
            if role == "user" {
                vec![block(BlockContent::UserMessage {
                    content: text.to_string(),
                })]
            } else {
                vec![block(BlockContent::AssistantText {
                    content: text.to_string(),
                    model: model.map(str::to_string),
                })]
            }
        }
        Some("reasoning") => {
            let text = part.get("text").and_then(Value::as_str).unwrap_or("");
            if text.is_empty() {
                return Vec::new();
            }
            vec![block(BlockContent::Thinking {
                content: text.to_string(),
                summary: None,
            })]
        }
        Some("tool") => tool_part_blocks(part, part_id, timestamp, resolved),
        Some("agent") => {
            let name = part.get("name").and_then(Value::as_str);
            vec![block(BlockContent::Subagent {
                subagent_id: part_id.to_string(),
                name: name.map(str::to_string),
                input: part.get("source").cloned().unwrap_or(Value::Null),
                status: ToolStatus::Running,
                output: None,
                duration_ms: None,
                tool_use_id: None,
            })]
        }
        Some("subtask") => {
            let subagent_id = part
                .get("sessionID")
                .and_then(Value::as_str)
                .unwrap_or(part_id)
                .to_string();
            let status = part
                .pointer("/state/status")
                .and_then(Value::as_str)
                .map(part_status)
                .unwrap_or(ToolStatus::Running);
            vec![block(BlockContent::Subagent {
                subagent_id,
                name: part
                    .get("agent")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                input: part.get("description").cloned().unwrap_or(Value::Null),
                status,
                output: None,
                duration_ms: None,
                tool_use_id: None,
            })]
        }
        Some("step-start") => vec![block(BlockContent::System {
            subtype: SystemSubtype::Status,
            message: "Step started".into(),
            metadata: None,
        })],
        Some("step-finish") => {
            let mut meta = serde_json::Map::new();
            if let Some(tokens) = part.get("tokens") {
                let input = tokens.get("input").and_then(Value::as_u64).unwrap_or(0);
                let output = tokens.get("output").and_then(Value::as_u64).unwrap_or(0);
                meta.insert(
                    "usage".into(),
                    serde_json::json!({
                        "inputTokens": input,
                        "outputTokens": output,
                        "totalTokens": input + output,
                    }),
                );
            }
            if let Some(cost) = part.get("cost").and_then(Value::as_f64) {
                meta.insert("costUsd".into(), cost.into());
            }
            vec![block(BlockContent::System {
                subtype: SystemSubtype::Status,
                message: "Step finished".into(),
                metadata: if meta.is_empty() {
                    None
                } else {
                    Some(Value::Object(meta))
                },
            })]
        }
        Some("retry") => vec![block(BlockContent::System {
            subtype: SystemSubtype::Error,
            message: part
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Retrying after provider error")
                .to_string(),
            metadata: None,
        })],
        // Bookkeeping parts are never surfaced
        Some("file") | Some("snapshot") | Some("patch") | Some("compaction") => Vec::new(),
        _ => Vec::new(),
    }
}

fn tool_part_blocks(
    part: &Value,
    part_id: &str,
    timestamp: DateTime<Utc>,
    resolved: &mut HashSet<String>,
) -> Vec<Block> {
    let tool_use_id = part
        .get("callID")
        .and_then(Value::as_str)
        .unwrap_or(part_id)
        .to_string();
    if !resolved.insert(tool_use_id.clone()) {
        return Vec::new();
    }

    let state = part.get("state").cloned().unwrap_or(Value::Null);
    let status = state
        .get("status")
        .and_then(Value::as_str)
        .map(part_status)
        .unwrap_or(ToolStatus::Pending);
    let input = state.get("input").cloned().unwrap_or(Value::Null);
    let tool_name = part
        .get("tool")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let mut blocks = vec![Block {
        id: tool_use_id.clone(),
        timestamp,
        content: BlockContent::ToolUse {
            tool_name,
            tool_use_id: tool_use_id.clone(),
            input,
            status,
            display_name: part
                .pointer("/state/title")
                .and_then(Value::as_str)
                .map(str::to_string),
            description: None,
        },
    }];

    if status.is_terminal() {
        let is_error = status == ToolStatus::Error;
        let output = if is_error {
            state
                .get("error")
                .cloned()
                .unwrap_or_else(|| state.get("output").cloned().unwrap_or(Value::Null))
        } else {
            state.get("output").cloned().unwrap_or(Value::Null)
        };
        let duration_ms = match (
            state.pointer("/time/start").and_then(Value::as_u64),
            state.pointer("/time/end").and_then(Value::as_u64),
        ) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        };
        blocks.push(Block {
            id: format!("{tool_use_id}:result"),
            timestamp,
            content: BlockContent::ToolResult {
                tool_use_id,
                output,
                is_error,
                duration_ms,
            },
        });
    }

    blocks
}

fn part_status(raw: &str) -> ToolStatus {
    match raw {
        "pending" => ToolStatus::Pending,
        "running" => ToolStatus::Running,
        "completed" => ToolStatus::Success,
        "error" => ToolStatus::Error,
        _ => ToolStatus::Running,
    }
}

fn message_timestamp(message: &Value) -> DateTime<Utc> {
    message
        .pointer("/time/created")
        .and_then(Value::as_i64)
        .and_then(|ms| DateTime::from_timestamp_millis(ms))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
