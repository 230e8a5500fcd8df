use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::blocks::Block;

/// Conversation id of the top-level conversation; subagent conversations use
/// their subagent id instead.
pub const MAIN_CONVERSATION: &str = "main";

/// Adapter-neutral event emitted while an agent is producing output.
///
/// Within one query, `block_start` for a given block id strictly precedes
/// any `text_delta`/`block_update`/`block_complete` for that id, and
/// `block_complete` is the last event for the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    BlockStart {
        conversation_id: String,
        block: Block,
    },
    #[serde(rename_all = "camelCase")]
    TextDelta {
        conversation_id: String,
        block_id: String,
        delta: String,
    },
    #[serde(rename_all = "camelCase")]
    BlockUpdate {
        conversation_id: String,
        block_id: String,
        updates: Value,
    },
    #[serde(rename_all = "camelCase")]
    BlockComplete {
        conversation_id: String,
        block_id: String,
        block: Block,
    },
    #[serde(rename_all = "camelCase")]
    MetadataUpdate {
        conversation_id: String,
        metadata: Value,
    },
}

impl StreamEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            StreamEvent::BlockStart {
                conversation_id, ..
            }
            | StreamEvent::TextDelta {
                conversation_id, ..
            }
            | StreamEvent::BlockUpdate {
                conversation_id, ..
            }
            | StreamEvent::BlockComplete {
                conversation_id, ..
            }
            | StreamEvent::MetadataUpdate {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::blocks::{Block, BlockContent};
    use chrono::DateTime;
    use serde_json::json;

    #[test]
    fn block_start_wire_shape() {
        let ev = StreamEvent::BlockStart {
            conversation_id: MAIN_CONVERSATION.into(),
            block: Block {
                id: "b1".into(),
                timestamp: DateTime::UNIX_EPOCH,
                content: BlockContent::AssistantText {
                    content: String::new(),
                    model: Some("opus".into()),
                },
            },
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "block_start");
        assert_eq!(v["conversationId"], "main");
        assert_eq!(v["block"]["type"], "assistant_text");
        assert_eq!(v["block"]["model"], "opus");
    }

    #[test]
    fn text_delta_wire_shape() {
        let ev = StreamEvent::TextDelta {
            conversation_id: "sub-1".into(),
            block_id: "b1".into(),
            delta: "Hel".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "text_delta");
        assert_eq!(v["conversationId"], "sub-1");
        assert_eq!(v["blockId"], "b1");
        assert_eq!(v["delta"], "Hel");
    }

    #[test]
    fn metadata_update_wire_shape() {
        let ev = StreamEvent::MetadataUpdate {
            conversation_id: MAIN_CONVERSATION.into(),
            metadata: json!({"usage": {"totalTokens": 123}}),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "metadata_update");
        assert_eq!(v["metadata"]["usage"]["totalTokens"], 123);
    }

    #[test]
    fn conversation_id_accessor() {
        let ev = StreamEvent::BlockUpdate {
            conversation_id: "sub-9".into(),
            block_id: "b".into(),
            updates: json!({"status": "success"}),
        };
        assert_eq!(ev.conversation_id(), "sub-9");
    }
}
