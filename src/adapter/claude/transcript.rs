//! Parser for the Claude family's line-delimited transcript format.
//!
//! Each line is one JSON message of type `user | assistant | system |
//! result | auth_status | stream_event | tool_progress`. Assistant content
//! is a sequence of text / tool_use / thinking parts; tool results arrive
//! inside synthetic user messages and are matched back to the spawning
//! tool_use by id. Unknown message types and fields are ignored, never
//! fatal.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::adapter::{ParsedSubagent, ParsedTranscripts};
use crate::model::blocks::{Block, BlockContent, SystemSubtype, ToolStatus};
use crate::model::SubagentTranscript;

/// Tool name the Claude family uses to spawn subagent conversations.
const SUBAGENT_TOOL: &str = "Task";

pub fn parse(main: &str, subagents: &[SubagentTranscript]) -> ParsedTranscripts {
    ParsedTranscripts {
        blocks: parse_lines(main),
        subagents: subagents
            .iter()
            .filter(|t| !is_placeholder(&t.content))
            .map(|t| ParsedSubagent {
                id: t.id.clone(),
                blocks: parse_lines(&t.content),
            })
            .collect(),
    }
}

/// A transcript with at most one line of content is an empty shell the CLI
/// creates eagerly; it stays out of the visible model.
pub fn is_placeholder(raw: &str) -> bool {
    raw.lines().filter(|l| !l.trim().is_empty()).count() <= 1
}

fn parse_lines(raw: &str) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    // toolUseId -> index of the spawning tool_use/subagent block
    let mut tool_blocks: HashMap<String, usize> = HashMap::new();
    // toolUseIds that already received a result
    let mut resolved: HashSet<String> = HashSet::new();

    for (line_no, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(line = line_no, error = %e, "skipping malformed transcript line");
                continue;
            }
        };

        let timestamp = record_timestamp(&record);
        let message_id = record
            .get("uuid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("line-{line_no}"));

        match record.get("type").and_then(Value::as_str) {
            Some("user") => parse_user(
                &record,
                timestamp,
                &message_id,
                &mut blocks,
                &mut tool_blocks,
                &mut resolved,
            ),
            Some("assistant") => {
                parse_assistant(&record, timestamp, &message_id, &mut blocks, &mut tool_blocks)
            }
            Some("system") => parse_system(&record, timestamp, &message_id, &mut blocks),
            Some("result") => parse_result(&record, timestamp, &message_id, &mut blocks),
            Some("auth_status") => blocks.push(Block {
                id: message_id,
                timestamp,
                content: BlockContent::System {
                    subtype: SystemSubtype::AuthStatus,
                    message: record
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("auth status changed")
                        .to_string(),
                    metadata: None,
                },
            }),
            // stream_event and tool_progress are transient; everything else
            // is an unknown type we tolerate
            _ => {}
        }
    }

    blocks
}

fn parse_user(
    record: &Value,
    timestamp: DateTime<Utc>,
    message_id: &str,
    blocks: &mut Vec<Block>,
    tool_blocks: &mut HashMap<String, usize>,
    resolved: &mut HashSet<String>,
) {
    let content = record.pointer("/message/content");
    match content {
        Some(Value::String(text)) => {
            if !text.is_empty() {
                blocks.push(Block {
                    id: format!("{message_id}-0"),
                    timestamp,
                    content: BlockContent::UserMessage {
                        content: text.clone(),
                    },
                });
            }
        }
        Some(Value::Array(parts)) => {
            for (idx, part) in parts.iter().enumerate() {
                match part.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        let text = part.get("text").and_then(Value::as_str).unwrap_or("");
                        if !text.is_empty() {
                            blocks.push(Block {
                                id: format!("{message_id}-{idx}"),
                                timestamp,
                                content: BlockContent::UserMessage {
                                    content: text.to_string(),
                                },
                            });
                        }
                    }
                    Some("tool_result") => {
                        apply_tool_result(part, timestamp, blocks, tool_blocks, resolved);
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn apply_tool_result(
    part: &Value,
    timestamp: DateTime<Utc>,
    blocks: &mut Vec<Block>,
    tool_blocks: &mut HashMap<String, usize>,
    resolved: &mut HashSet<String>,
) {
    let Some(tool_use_id) = part.get("tool_use_id").and_then(Value::as_str) else {
        return;
    };
    // At most one result per tool use; later duplicates are dropped.
    if !resolved.insert(tool_use_id.to_string()) {
        return;
    }
    let is_error = part
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let output = normalize_result_content(part.get("content"));
    let status = if is_error {
        ToolStatus::Error
    } else {
        ToolStatus::Success
    };

    let Some(&spawn_idx) = tool_blocks.get(tool_use_id) else {
        tracing::debug!(tool_use_id, "tool_result without a spawning tool_use");
        return;
    };

    let push_result_block = match &mut blocks[spawn_idx].content {
        BlockContent::ToolUse {
            status: tool_status,
            ..
        } => {
            *tool_status = status;
            true
        }
        BlockContent::Subagent {
            status: sub_status,
            output: sub_output,
            ..
        } => {
            *sub_status = status;
            *sub_output = match &output {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            };
            false
        }
        _ => false,
    };

    if push_result_block {
        blocks.push(Block {
            id: format!("{tool_use_id}:result"),
            timestamp,
            content: BlockContent::ToolResult {
                tool_use_id: tool_use_id.to_string(),
                output,
                is_error,
                duration_ms: None,
            },
        });
    }
}

fn parse_assistant(
    record: &Value,
    timestamp: DateTime<Utc>,
    message_id: &str,
    blocks: &mut Vec<Block>,
    tool_blocks: &mut HashMap<String, usize>,
) {
    let model = record
        .pointer("/message/model")
        .and_then(Value::as_str)
        .map(str::to_string);

    match record.pointer("/message/content") {
        Some(Value::String(text)) => {
            if !text.is_empty() {
                blocks.push(Block {
                    id: format!("{message_id}-0"),
                    timestamp,
                    content: BlockContent::AssistantText {
                        content: text.clone(),
                        model,
                    },
                });
            }
        }
        Some(Value::Array(parts)) => {
            for (idx, part) in parts.iter().enumerate() {
                let block_id = part
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{message_id}-{idx}"));
                match part.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        let text = part.get("text").and_then(Value::as_str).unwrap_or("");
                        if text.is_empty() {
                            continue;
                        }
                        blocks.push(Block {
                            id: block_id,
                            timestamp,
                            content: BlockContent::AssistantText {
                                content: text.to_string(),
                                model: model.clone(),
                            },
                        });
                    }
                    Some("thinking") => {
                        blocks.push(Block {
                            id: block_id,
                            timestamp,
                            content: BlockContent::Thinking {
                                content: part
                                    .get("thinking")
                                    .and_then(Value::as_str)
                                    .unwrap_or("")
                                    .to_string(),
                                summary: part
                                    .get("summary")
                                    .and_then(Value::as_str)
                                    .map(str::to_string),
                            },
                        });
                    }
                    Some("tool_use") => {
                        let content =
                            tool_use_content(part, &block_id).unwrap_or(BlockContent::ToolUse {
                                tool_name: "unknown".into(),
                                tool_use_id: block_id.clone(),
                                input: Value::Null,
                                status: ToolStatus::Running,
                                display_name: None,
                                description: None,
                            });
                        tool_blocks.insert(block_id.clone(), blocks.len());
                        blocks.push(Block {
                            id: block_id,
                            timestamp,
                            content,
                        });
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// Build the block content for a tool_use part. The `Task` tool spawns a
/// subagent conversation and is surfaced as a subagent block instead.
fn tool_use_content(part: &Value, block_id: &str) -> Option<BlockContent> {
    let name = part.get("name").and_then(Value::as_str)?;
    let input = part.get("input").cloned().unwrap_or(Value::Null);
    if name == SUBAGENT_TOOL {
        let subagent_name = input
            .get("subagent_type")
            .or_else(|| input.get("description"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(BlockContent::Subagent {
            subagent_id: block_id.to_string(),
            name: subagent_name,
            input,
            status: ToolStatus::Running,
            output: None,
            duration_ms: None,
            tool_use_id: Some(block_id.to_string()),
        })
    } else {
        let description = input
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(BlockContent::ToolUse {
            tool_name: name.to_string(),
            tool_use_id: block_id.to_string(),
            input,
            status: ToolStatus::Running,
            display_name: None,
            description,
        })
    }
}

fn parse_system(
    record: &Value,
    timestamp: DateTime<Utc>,
    message_id: &str,
    blocks: &mut Vec<Block>,
) {
    let subtype_str = record.get("subtype").and_then(Value::as_str).unwrap_or("");
    let (subtype, default_message) = match subtype_str {
        "init" => (SystemSubtype::SessionStart, "Session started"),
        "status" => (SystemSubtype::Status, "Status update"),
        "hook_response" => (SystemSubtype::HookResponse, "Hook response"),
        "compact_boundary" => (SystemSubtype::Status, "Context compacted"),
        _ => (SystemSubtype::Status, subtype_str),
    };
    let message = record
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(default_message)
        .to_string();
    blocks.push(Block {
        id: message_id.to_string(),
        timestamp,
        content: BlockContent::System {
            subtype,
            message,
            metadata: None,
        },
    });
}

fn parse_result(
    record: &Value,
    timestamp: DateTime<Utc>,
    message_id: &str,
    blocks: &mut Vec<Block>,
) {
    let subtype = record.get("subtype").and_then(Value::as_str).unwrap_or("");
    let metadata = result_metadata(record);
    let content = if subtype == "success" {
        BlockContent::System {
            subtype: SystemSubtype::SessionEnd,
            message: "Session completed".into(),
            metadata,
        }
    } else {
        BlockContent::System {
            subtype: SystemSubtype::Error,
            message: record
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or(subtype)
                .to_string(),
            metadata,
        }
    };
    blocks.push(Block {
        id: message_id.to_string(),
        timestamp,
        content,
    });
}

pub(super) fn result_metadata(record: &Value) -> Option<Value> {
    let mut meta = serde_json::Map::new();
    if let Some(cost) = record.get("total_cost_usd").and_then(Value::as_f64) {
        meta.insert("costUsd".into(), cost.into());
    }
    if let Some(turns) = record.get("num_turns").and_then(Value::as_u64) {
        meta.insert("numTurns".into(), turns.into());
    }
    if let Some(duration) = record.get("duration_ms").and_then(Value::as_u64) {
        meta.insert("durationMs".into(), duration.into());
    }
    if let Some(usage) = record.get("usage") {
        let input = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
        let output = usage
            .get("output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        meta.insert(
            "usage".into(),
            serde_json::json!({
                "inputTokens": input,
                "outputTokens": output,
                "totalTokens": input + output,
            }),
        );
    }
    if meta.is_empty() {
        None
    } else {
        Some(Value::Object(meta))
    }
}

/// Normalize the heterogeneous `content` of a tool_result part into one
/// value: plain string, joined text parts, or the raw JSON as a fallback.
fn normalize_result_content(content: Option<&Value>) -> Value {
    match content {
        None => Value::Null,
        Some(Value::String(s)) => Value::String(s.clone()),
        Some(Value::Array(parts)) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                Value::Array(parts.clone())
            } else {
                Value::String(texts.join("\n"))
            }
        }
        Some(other) => other.clone(),
    }
}

fn record_timestamp(record: &Value) -> DateTime<Utc> {
    record
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
