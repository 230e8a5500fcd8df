//! Translation of the Claude CLI's `stream-json` records into unified
//! stream events.
//!
//! The CLI emits whole messages (`assistant`, `user`, `system`, `result`)
//! and, when partial streaming is on, fine-grained `stream_event` records
//! mirroring the API's content-block events. Both paths are handled: when
//! content blocks were streamed, the subsequent whole `assistant` message is
//! treated as already-emitted; without stream events, whole messages are
//! expanded into start/delta/complete sequences.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::model::blocks::{Block, BlockContent, SystemSubtype, ToolStatus};
use crate::model::stream::{MAIN_CONVERSATION, StreamEvent};

use super::transcript::result_metadata;

const SUBAGENT_TOOL: &str = "Task";

#[derive(Default)]
pub struct StreamTranslator {
    /// Content blocks opened by `content_block_start`, keyed by index.
    open_by_index: HashMap<u64, OpenBlock>,
    /// Tool/subagent blocks awaiting their result, keyed by toolUseId.
    open_tools: HashMap<String, Block>,
    /// toolUseIds that already received a result.
    resolved: std::collections::HashSet<String>,
    model: Option<String>,
    pending_usage: Option<Value>,
    /// Whether the current message arrived via stream events (so the whole
    /// `assistant` record that follows is a duplicate).
    streamed_message: bool,
}

struct OpenBlock {
    block: Block,
    partial_json: String,
}

impl StreamTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one native record into zero or more stream events.
    pub fn translate(&mut self, record: &Value) -> Vec<StreamEvent> {
        match record.get("type").and_then(Value::as_str) {
            Some("stream_event") => self.on_stream_event(record),
            Some("assistant") => self.on_assistant(record),
            Some("user") => self.on_user(record),
            Some("system") => self.on_system(record),
            Some("auth_status") => atomic_system_block(
                SystemSubtype::AuthStatus,
                record
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("auth status changed"),
                None,
            ),
            Some("result") => self.on_result(record),
            Some("tool_progress") => self.on_tool_progress(record),
            _ => Vec::new(),
        }
    }

    // ── stream_event ────────────────────────────────────────────

    fn on_stream_event(&mut self, record: &Value) -> Vec<StreamEvent> {
        let Some(event) = record.get("event") else {
            return Vec::new();
        };
        match event.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                if let Some(model) = event.pointer("/message/model").and_then(Value::as_str) {
                    self.model = Some(model.to_string());
                }
                Vec::new()
            }
            Some("content_block_start") => self.on_content_block_start(event),
            Some("content_block_delta") => self.on_content_block_delta(event),
            Some("content_block_stop") => self.on_content_block_stop(event),
            Some("message_delta") => {
                if let Some(usage) = event.get("usage") {
                    self.pending_usage = Some(usage.clone());
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_content_block_start(&mut self, event: &Value) -> Vec<StreamEvent> {
        let Some(index) = event.get("index").and_then(Value::as_u64) else {
            return Vec::new();
        };
        let Some(cb) = event.get("content_block") else {
            return Vec::new();
        };
        let content = match cb.get("type").and_then(Value::as_str) {
            Some("text") => BlockContent::AssistantText {
                content: String::new(),
                model: self.model.clone(),
            },
            Some("thinking") => BlockContent::Thinking {
                content: String::new(),
                summary: None,
            },
            Some("tool_use") => {
                let id = cb
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let name = cb
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                if name == SUBAGENT_TOOL {
                    BlockContent::Subagent {
                        subagent_id: id.clone(),
                        name: None,
                        input: json!({}),
                        status: ToolStatus::Pending,
                        output: None,
                        duration_ms: None,
                        tool_use_id: Some(id),
                    }
                } else {
                    BlockContent::ToolUse {
                        tool_name: name,
                        tool_use_id: id,
                        input: json!({}),
                        status: ToolStatus::Pending,
                        display_name: None,
                        description: None,
                    }
                }
            }
            _ => return Vec::new(),
        };

        let block_id = match &content {
            BlockContent::ToolUse { tool_use_id, .. } if !tool_use_id.is_empty() => {
                tool_use_id.clone()
            }
            BlockContent::Subagent { subagent_id, .. } if !subagent_id.is_empty() => {
                subagent_id.clone()
            }
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let block = Block {
            id: block_id,
            timestamp: chrono::Utc::now(),
            content,
        };
        self.streamed_message = true;
        self.open_by_index.insert(
            index,
            OpenBlock {
                block: block.clone(),
                partial_json: String::new(),
            },
        );
        vec![StreamEvent::BlockStart {
            conversation_id: MAIN_CONVERSATION.into(),
            block,
        }]
    }

    fn on_content_block_delta(&mut self, event: &Value) -> Vec<StreamEvent> {
        let Some(index) = event.get("index").and_then(Value::as_u64) else {
            return Vec::new();
        };
        let Some(open) = self.open_by_index.get_mut(&index) else {
            return Vec::new();
        };
        let Some(delta) = event.get("delta") else {
            return Vec::new();
        };
        match delta.get("type").and_then(Value::as_str) {
            Some("text_delta") => {
                let text = delta.get("text").and_then(Value::as_str).unwrap_or("");
                if let BlockContent::AssistantText { content, .. } = &mut open.block.content {
                    content.push_str(text);
                }
                vec![StreamEvent::TextDelta {
                    conversation_id: MAIN_CONVERSATION.into(),
                    block_id: open.block.id.clone(),
                    delta: text.to_string(),
                }]
            }
            Some("thinking_delta") => {
                let text = delta.get("thinking").and_then(Value::as_str).unwrap_or("");
                if let BlockContent::Thinking { content, .. } = &mut open.block.content {
                    content.push_str(text);
                }
                vec![StreamEvent::TextDelta {
                    conversation_id: MAIN_CONVERSATION.into(),
                    block_id: open.block.id.clone(),
                    delta: text.to_string(),
                }]
            }
            Some("input_json_delta") => {
                let partial = delta
                    .get("partial_json")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                open.partial_json.push_str(partial);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_content_block_stop(&mut self, event: &Value) -> Vec<StreamEvent> {
        let Some(index) = event.get("index").and_then(Value::as_u64) else {
            return Vec::new();
        };
        let Some(mut open) = self.open_by_index.remove(&index) else {
            return Vec::new();
        };

        let is_tool = matches!(
            open.block.content,
            BlockContent::ToolUse { .. } | BlockContent::Subagent { .. }
        );
        if !is_tool {
            let block = open.block;
            return vec![StreamEvent::BlockComplete {
                conversation_id: MAIN_CONVERSATION.into(),
                block_id: block.id.clone(),
                block,
            }];
        }

        let parsed = serde_json::from_str::<Value>(&open.partial_json).ok();
        match &mut open.block.content {
            BlockContent::ToolUse { input, status, .. } => {
                if let Some(p) = parsed {
                    *input = p;
                }
                *status = ToolStatus::Running;
            }
            BlockContent::Subagent {
                input,
                status,
                name,
                ..
            } => {
                if let Some(p) = parsed {
                    *name = p
                        .get("subagent_type")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    *input = p;
                }
                *status = ToolStatus::Running;
            }
            _ => {}
        }

        let block = open.block;
        let updates = json!({"status": "running", "input": tool_input(&block)});
        let block_id = block.id.clone();
        self.open_tools.insert(block_id.clone(), block);
        vec![StreamEvent::BlockUpdate {
            conversation_id: MAIN_CONVERSATION.into(),
            block_id,
            updates,
        }]
    }

    // ── whole messages ──────────────────────────────────────────

    fn on_assistant(&mut self, record: &Value) -> Vec<StreamEvent> {
        if let Some(model) = record.pointer("/message/model").and_then(Value::as_str) {
            self.model = Some(model.to_string());
        }

        let parts = match record.pointer("/message/content") {
            Some(Value::Array(parts)) => parts.clone(),
            Some(Value::String(text)) if !text.is_empty() => {
                vec![json!({"type": "text", "text": text})]
            }
            _ => return Vec::new(),
        };

        if self.streamed_message {
            // Already emitted via stream events; just make sure tool blocks
            // are registered for result matching.
            self.streamed_message = false;
            for part in &parts {
                if part.get("type").and_then(Value::as_str) == Some("tool_use") {
                    if let Some(id) = part.get("id").and_then(Value::as_str) {
                        if !self.open_tools.contains_key(id) && !self.resolved.contains(id) {
                            if let Some(block) = whole_tool_block(part, self.model.clone()) {
                                self.open_tools.insert(id.to_string(), block);
                            }
                        }
                    }
                }
            }
            return Vec::new();
        }

        let mut events = Vec::new();
        for part in &parts {
            match part.get("type").and_then(Value::as_str) {
                Some("text") => {
                    let text = part.get("text").and_then(Value::as_str).unwrap_or("");
                    if text.is_empty() {
                        continue;
                    }
                    let block = Block {
                        id: uuid::Uuid::new_v4().to_string(),
                        timestamp: chrono::Utc::now(),
                        content: BlockContent::AssistantText {
                            content: text.to_string(),
                            model: self.model.clone(),
                        },
                    };
                    events.push(StreamEvent::BlockStart {
                        conversation_id: MAIN_CONVERSATION.into(),
                        block: Block {
                            content: BlockContent::AssistantText {
                                content: String::new(),
                                model: self.model.clone(),
                            },
                            ..block.clone()
                        },
                    });
                    events.push(StreamEvent::TextDelta {
                        conversation_id: MAIN_CONVERSATION.into(),
                        block_id: block.id.clone(),
                        delta: text.to_string(),
                    });
                    events.push(StreamEvent::BlockComplete {
                        conversation_id: MAIN_CONVERSATION.into(),
                        block_id: block.id.clone(),
                        block,
                    });
                }
                Some("thinking") => {
                    let block = Block {
                        id: uuid::Uuid::new_v4().to_string(),
                        timestamp: chrono::Utc::now(),
                        content: BlockContent::Thinking {
                            content: part
                                .get("thinking")
                                .and_then(Value::as_str)
                                .unwrap_or("")
                                .to_string(),
                            summary: None,
                        },
                    };
                    events.push(StreamEvent::BlockStart {
                        conversation_id: MAIN_CONVERSATION.into(),
                        block: block.clone(),
                    });
                    events.push(StreamEvent::BlockComplete {
                        conversation_id: MAIN_CONVERSATION.into(),
                        block_id: block.id.clone(),
                        block,
                    });
                }
                Some("tool_use") => {
                    if let Some(block) = whole_tool_block(part, self.model.clone()) {
                        self.open_tools.insert(block.id.clone(), block.clone());
                        events.push(StreamEvent::BlockStart {
                            conversation_id: MAIN_CONVERSATION.into(),
                            block,
                        });
                    }
                }
                _ => {}
            }
        }
        events
    }

    fn on_user(&mut self, record: &Value) -> Vec<StreamEvent> {
        let Some(Value::Array(parts)) = record.pointer("/message/content") else {
            return Vec::new();
        };
        let mut events = Vec::new();
        for part in parts {
            if part.get("type").and_then(Value::as_str) != Some("tool_result") {
                continue;
            }
            let Some(tool_use_id) = part.get("tool_use_id").and_then(Value::as_str) else {
                continue;
            };
            if !self.resolved.insert(tool_use_id.to_string()) {
                continue;
            }
            let is_error = part
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let status = if is_error {
                ToolStatus::Error
            } else {
                ToolStatus::Success
            };
            let output = part.get("content").cloned().unwrap_or(Value::Null);

            let Some(mut block) = self.open_tools.remove(tool_use_id) else {
                continue;
            };
            match &mut block.content {
                BlockContent::ToolUse {
                    status: tool_status,
                    ..
                } => {
                    *tool_status = status;
                    events.push(StreamEvent::BlockUpdate {
                        conversation_id: MAIN_CONVERSATION.into(),
                        block_id: block.id.clone(),
                        updates: json!({"status": status}),
                    });
                    events.push(StreamEvent::BlockComplete {
                        conversation_id: MAIN_CONVERSATION.into(),
                        block_id: block.id.clone(),
                        block: block.clone(),
                    });
                    let result_block = Block {
                        id: format!("{tool_use_id}:result"),
                        timestamp: chrono::Utc::now(),
                        content: BlockContent::ToolResult {
                            tool_use_id: tool_use_id.to_string(),
                            output,
                            is_error,
                            duration_ms: None,
                        },
                    };
                    events.push(StreamEvent::BlockStart {
                        conversation_id: MAIN_CONVERSATION.into(),
                        block: result_block.clone(),
                    });
                    events.push(StreamEvent::BlockComplete {
                        conversation_id: MAIN_CONVERSATION.into(),
                        block_id: result_block.id.clone(),
                        block: result_block,
                    });
                }
                BlockContent::Subagent {
                    status: sub_status,
                    output: sub_output,
                    ..
                } => {
                    *sub_status = status;
                    *sub_output = match output {
                        Value::String(s) => Some(s),
                        Value::Null => None,
                        other => Some(other.to_string()),
                    };
                    events.push(StreamEvent::BlockUpdate {
                        conversation_id: MAIN_CONVERSATION.into(),
                        block_id: block.id.clone(),
                        updates: json!({"status": status}),
                    });
                    events.push(StreamEvent::BlockComplete {
                        conversation_id: MAIN_CONVERSATION.into(),
                        block_id: block.id.clone(),
                        block: block.clone(),
                    });
                }
                _ => {}
            }
        }
        events
    }

    fn on_system(&mut self, record: &Value) -> Vec<StreamEvent> {
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
            .unwrap_or(default_message);
        atomic_system_block(subtype, message, None)
    }

    fn on_tool_progress(&mut self, record: &Value) -> Vec<StreamEvent> {
        let Some(tool_use_id) = record.get("tool_use_id").and_then(Value::as_str) else {
            return Vec::new();
        };
        if !self.open_tools.contains_key(tool_use_id) {
            return Vec::new();
        }
        vec![StreamEvent::BlockUpdate {
            conversation_id: MAIN_CONVERSATION.into(),
            block_id: tool_use_id.to_string(),
            updates: json!({"status": "running"}),
        }]
    }

    fn on_result(&mut self, record: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        // Close anything still open so block_complete stays the final event
        // for every id.
        for (_, open) in std::mem::take(&mut self.open_by_index) {
            events.push(StreamEvent::BlockComplete {
                conversation_id: MAIN_CONVERSATION.into(),
                block_id: open.block.id.clone(),
                block: open.block,
            });
        }
        for (_, block) in std::mem::take(&mut self.open_tools) {
            events.push(StreamEvent::BlockComplete {
                conversation_id: MAIN_CONVERSATION.into(),
                block_id: block.id.clone(),
                block,
            });
        }

        let subtype = record.get("subtype").and_then(Value::as_str).unwrap_or("");
        if subtype == "success" {
            events.extend(atomic_system_block(
                SystemSubtype::SessionEnd,
                "Session completed",
                None,
            ));
        } else {
            events.extend(atomic_system_block(
                SystemSubtype::Error,
                record
                    .get("result")
                    .and_then(Value::as_str)
                    .unwrap_or(subtype),
                None,
            ));
        }

        let mut metadata = result_metadata(record).unwrap_or_else(|| json!({}));
        if metadata.get("usage").is_none() {
            if let Some(usage) = self.pending_usage.take() {
                let input = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
                let output = usage
                    .get("output_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                metadata["usage"] = json!({
                    "inputTokens": input,
                    "outputTokens": output,
                    "totalTokens": input + output,
                });
            }
        }
        events.push(StreamEvent::MetadataUpdate {
            conversation_id: MAIN_CONVERSATION.into(),
            metadata,
        });
        events
    }
}

fn tool_input(block: &Block) -> Value {
    match &block.content {
        BlockContent::ToolUse { input, .. } | BlockContent::Subagent { input, .. } => {
            input.clone()
        }
        _ => Value::Null,
    }
}

fn whole_tool_block(part: &Value, _model: Option<String>) -> Option<Block> {
    let id = part.get("id").and_then(Value::as_str)?.to_string();
    let name = part.get("name").and_then(Value::as_str)?.to_string();
    let input = part.get("input").cloned().unwrap_or(json!({}));
    let content = if name == SUBAGENT_TOOL {
        BlockContent::Subagent {
            subagent_id: id.clone(),
            name: input
                .get("subagent_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            input,
            status: ToolStatus::Running,
            output: None,
            duration_ms: None,
            tool_use_id: Some(id.clone()),
        }
    } else {
        let description = input
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        BlockContent::ToolUse {
            tool_name: name,
            tool_use_id: id.clone(),
            input,
            status: ToolStatus::Running,
            display_name: None,
            description,
        }
    };
    Some(Block {
        id,
        timestamp: chrono::Utc::now(),
        content,
    })
}

fn atomic_system_block(
    subtype: SystemSubtype,
    message: &str,
    metadata: Option<Value>,
) -> Vec<StreamEvent> {
    let block = Block {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: chrono::Utc::now(),
        content: BlockContent::System {
            subtype,
            message: message.to_string(),
            metadata,
        },
    };
    vec![
        StreamEvent::BlockStart {
            conversation_id: MAIN_CONVERSATION.into(),
            block: block.clone(),
        },
        StreamEvent::BlockComplete {
            conversation_id: MAIN_CONVERSATION.into(),
            block_id: block.id.clone(),
            block,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn translate_all(lines: &[&str]) -> Vec<StreamEvent> {
        let mut translator = StreamTranslator::new();
        lines
            .iter()
            .map(|l| serde_json::from_str::<Value>(l).unwrap())
            .flat_map(|r| translator.translate(&r))
            .collect()
    }

    /// Every id must see block_start before any other event, and nothing
    /// after block_complete.
    fn assert_block_ordering(events: &[StreamEvent]) {
        let mut started: HashSet<String> = HashSet::new();
        let mut completed: HashSet<String> = HashSet::new();
        for ev in events {
            match ev {
                StreamEvent::BlockStart { block, .. } => {
                    assert!(!completed.contains(&block.id), "start after complete");
                    started.insert(block.id.clone());
                }
                StreamEvent::TextDelta { block_id, .. }
                | StreamEvent::BlockUpdate { block_id, .. } => {
                    assert!(started.contains(block_id), "event before start");
                    assert!(!completed.contains(block_id), "event after complete");
                }
                StreamEvent::BlockComplete { block_id, .. } => {
                    assert!(started.contains(block_id), "complete before start");
                    assert!(completed.insert(block_id.clone()), "double complete");
                }
                StreamEvent::MetadataUpdate { .. } => {}
            }
        }
    }

    #[test]
    fn whole_assistant_message_expands_to_start_delta_complete() {
        let events = translate_all(&[
            r#"{"type":"system","subtype":"init"}"#,
            r#"{"type":"assistant","message":{"model":"claude-opus-4","content":[{"type":"text","text":"Hello!"}]}}"#,
            r#"{"type":"result","subtype":"success","usage":{"input_tokens":10,"output_tokens":5}}"#,
        ]);
        assert_block_ordering(&events);

        let text_delta = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::TextDelta { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(text_delta, "Hello!");

        match events.last().unwrap() {
            StreamEvent::MetadataUpdate { metadata, .. } => {
                assert_eq!(metadata["usage"]["totalTokens"], 15);
            }
            other => panic!("expected metadata_update last, got {other:?}"),
        }
    }

    #[test]
    fn stream_events_produce_incremental_deltas() {
        let events = translate_all(&[
            r#"{"type":"stream_event","event":{"type":"message_start","message":{"model":"claude-opus-4"}}}"#,
            r#"{"type":"stream_event","event":{"type":"content_block_start","index":0,"content_block":{"type":"text"}}}"#,
            r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}}"#,
            r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}}"#,
            r#"{"type":"stream_event","event":{"type":"content_block_stop","index":0}}"#,
            r#"{"type":"assistant","message":{"model":"claude-opus-4","content":[{"type":"text","text":"Hello"}]}}"#,
            r#"{"type":"result","subtype":"success"}"#,
        ]);
        assert_block_ordering(&events);

        let deltas: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["Hel", "lo"]);

        // The whole assistant message after streaming must not duplicate
        let completes = events
            .iter()
            .filter(|e| {
                matches!(e, StreamEvent::BlockComplete { block, .. }
                    if matches!(block.content, BlockContent::AssistantText { .. }))
            })
            .count();
        assert_eq!(completes, 1);

        match events
            .iter()
            .find(|e| {
                matches!(e, StreamEvent::BlockComplete { block, .. }
                    if matches!(block.content, BlockContent::AssistantText { .. }))
            })
            .unwrap()
        {
            StreamEvent::BlockComplete { block, .. } => match &block.content {
                BlockContent::AssistantText { content, model } => {
                    assert_eq!(content, "Hello");
                    assert_eq!(model.as_deref(), Some("claude-opus-4"));
                }
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn tool_use_lifecycle_via_stream_events() {
        let events = translate_all(&[
            r#"{"type":"stream_event","event":{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"Bash"}}}"#,
            r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"command\":"}}}"#,
            r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"ls\"}"}}}"#,
            r#"{"type":"stream_event","event":{"type":"content_block_stop","index":0}}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"ls"}}]}}"#,
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"a.txt","is_error":false}]}}"#,
            r#"{"type":"result","subtype":"success"}"#,
        ]);
        assert_block_ordering(&events);

        // Input assembled from partial json
        let update = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::BlockUpdate {
                    block_id, updates, ..
                } if block_id == "toolu_1" && updates["input"].is_object() => Some(updates.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(update["input"]["command"], "ls");

        // Tool completes with success and a tool_result block follows
        let complete = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::BlockComplete { block, .. } if block.id == "toolu_1" => {
                    Some(block.clone())
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(complete.status(), Some(ToolStatus::Success));
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::BlockStart { block, .. }
                if matches!(block.content, BlockContent::ToolResult { .. })
        )));
    }

    #[test]
    fn failed_result_emits_error_system_block() {
        let events = translate_all(&[
            r#"{"type":"result","subtype":"error_during_execution","result":"boom"}"#,
        ]);
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::BlockStart { block, .. }
                if matches!(&block.content, BlockContent::System { subtype: SystemSubtype::Error, message, .. } if message == "boom")
        )));
    }

    #[test]
    fn unknown_records_are_ignored() {
        let events = translate_all(&[
            r#"{"type":"telemetry","payload":{}}"#,
            r#"{"no_type_at_all":true}"#,
        ]);
        assert!(events.is_empty());
    }

    #[test]
    fn result_closes_dangling_tool_blocks() {
        let events = translate_all(&[
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_9","name":"Bash","input":{}}]}}"#,
            r#"{"type":"result","subtype":"success"}"#,
        ]);
        assert_block_ordering(&events);
        assert!(events.iter().any(
            |e| matches!(e, StreamEvent::BlockComplete { block_id, .. } if block_id == "toolu_9")
        ));
    }
}
