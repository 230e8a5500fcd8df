pub mod transcript;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;

use crate::adapter::{
    AdapterPaths, ArchitectureAdapter, EventStream, ParsedTranscripts, SessionTranscripts,
    TranscriptKind,
};
use crate::decode;
use crate::error::SessionError;
use crate::model::blocks::{Block, BlockContent, ToolStatus};
use crate::model::stream::{MAIN_CONVERSATION, StreamEvent};
use crate::model::{AgentProfile, Architecture, SubagentTranscript};
use crate::sandbox::{FileWrite, Sandbox};

/// Adapter for the OpenCode-family CLI (`opencode`).
///
/// Sessions are stored as single JSON documents (the `export` shape); child
/// sessions sit alongside the main document and carry a `parentID`.
pub struct OpencodeAdapter {
    session_id: String,
    sandbox: Arc<dyn Sandbox>,
    paths: AdapterPaths,
}

impl OpencodeAdapter {
    pub fn new(session_id: &str, sandbox: Arc<dyn Sandbox>) -> Self {
        let base = sandbox.base_paths().clone();
        let paths = AdapterPaths {
            agent_storage_dir: format!("{}/.local/share/opencode/sessions", base.home_dir),
            workspace_dir: base.workspace_dir.clone(),
            profile_dir: format!("{}/.opencode", base.workspace_dir),
            instructions_file: format!("{}/AGENTS.md", base.workspace_dir),
        };
        Self {
            session_id: session_id.to_string(),
            sandbox,
            paths,
        }
    }

    fn main_transcript_path(&self) -> String {
        format!("{}/{}.json", self.paths.agent_storage_dir, self.session_id)
    }

    fn subagent_transcript_path(&self, subagent_id: &str) -> String {
        format!("{}/{subagent_id}.json", self.paths.agent_storage_dir)
    }

    fn build_args(&self, query: &str, options: Option<&Value>) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "opencode".into(),
            "run".into(),
            "--session".into(),
            self.session_id.clone(),
            "--print-logs".into(),
            "--format".into(),
            "json".into(),
        ];
        if let Some(model) = options.and_then(|o| o.get("model")).and_then(Value::as_str) {
            args.push("--model".into());
            args.push(model.into());
        }
        args.push(query.into());
        args
    }
}

#[async_trait]
impl ArchitectureAdapter for OpencodeAdapter {
    fn architecture(&self) -> Architecture {
        Architecture::Opencode
    }

    fn paths(&self) -> &AdapterPaths {
        &self.paths
    }

    fn identify_transcript_file(&self, file_name: &str, content: &str) -> Option<TranscriptKind> {
        let stem = file_name.strip_suffix(".json")?;
        if stem == self.session_id {
            return Some(TranscriptKind::Main);
        }
        // Child-session documents reference their parent.
        let doc: Value = serde_json::from_str(content).ok()?;
        match doc.get("parentID") {
            Some(parent) if !parent.is_null() => Some(TranscriptKind::Subagent(stem.to_string())),
            _ => None,
        }
    }

    fn is_placeholder_transcript(&self, raw: &str) -> bool {
        transcript::is_placeholder(raw)
    }

    async fn setup_agent_profile(&self, profile: &AgentProfile) -> Result<(), SessionError> {
        let dir = &self.paths.profile_dir;
        let mut files: Vec<FileWrite> = Vec::new();

        if let Some(instructions) = &profile.instructions {
            files.push(FileWrite::new(&self.paths.instructions_file, instructions));
        }
        for subagent in &profile.subagents {
            files.push(FileWrite::new(
                format!("{dir}/agent/{}.md", subagent.name),
                format!(
                    "---\ndescription: {}\nmode: subagent\n---\n\n{}",
                    subagent.description, subagent.prompt
                ),
            ));
        }
        for command in &profile.commands {
            files.push(FileWrite::new(
                format!("{dir}/command/{}.md", command.name),
                command.prompt.clone(),
            ));
        }
        for skill in &profile.skills {
            files.push(FileWrite::new(
                format!("{dir}/skill/{}/SKILL.md", skill.name),
                format!(
                    "---\nname: {}\ndescription: {}\n---\n\n{}",
                    skill.name, skill.description, skill.body
                ),
            ));
            for file in &skill.files {
                files.push(FileWrite::new(
                    format!("{dir}/skill/{}/{}", skill.name, file.path),
                    file.content.clone(),
                ));
            }
        }
        files.push(FileWrite::new(
            format!("{}/opencode.json", self.paths.workspace_dir),
            serde_json::to_string_pretty(&json!({
                "$schema": "https://opencode.ai/config.json"
            }))
            .unwrap_or_default(),
        ));

        let report = self.sandbox.write_files(files).await?;
        for failed in &report.failed {
            tracing::warn!(
                session_id = %self.session_id,
                path = %failed.path,
                error = %failed.error,
                "profile file write failed"
            );
        }
        Ok(())
    }

    async fn setup_session_transcripts(
        &self,
        transcripts: &SessionTranscripts,
    ) -> Result<(), SessionError> {
        self.sandbox
            .create_directory(&self.paths.agent_storage_dir)
            .await?;

        let mut files: Vec<FileWrite> = Vec::new();
        if !transcripts.main.is_empty() {
            files.push(FileWrite::new(self.main_transcript_path(), &transcripts.main));
        }
        for subagent in &transcripts.subagents {
            files.push(FileWrite::new(
                self.subagent_transcript_path(&subagent.id),
                &subagent.content,
            ));
        }
        if files.is_empty() {
            return Ok(());
        }

        let report = self.sandbox.write_files(files).await?;
        for failed in &report.failed {
            tracing::warn!(
                session_id = %self.session_id,
                path = %failed.path,
                error = %failed.error,
                "transcript write failed"
            );
        }
        Ok(())
    }

    async fn read_session_transcripts(&self) -> Result<SessionTranscripts, SessionError> {
        let main = self
            .sandbox
            .read_file(&self.main_transcript_path())
            .await?
            .unwrap_or_default();

        let mut subagents = Vec::new();
        let paths = self
            .sandbox
            .list_files(&self.paths.agent_storage_dir, Some("*.json"))
            .await?;
        for path in paths {
            let file_name = path.rsplit('/').next().unwrap_or(&path);
            let Some(content) = self.sandbox.read_file(&path).await? else {
                continue;
            };
            let Some(TranscriptKind::Subagent(id)) =
                self.identify_transcript_file(file_name, &content)
            else {
                continue;
            };
            if transcript::is_placeholder(&content) {
                continue;
            }
            subagents.push(SubagentTranscript { id, content });
        }

        Ok(SessionTranscripts { main, subagents })
    }

    async fn execute_query(
        &self,
        query: &str,
        options: Option<&Value>,
    ) -> Result<EventStream, SessionError> {
        let args = self.build_args(query, options);
        let session_id = self.session_id.clone();
        let handle = self.sandbox.exec(args).await?;

        let mut stderr = handle.stderr;
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        let stdout = handle.stdout;
        let wait = handle.wait;
        let stream = async_stream::stream! {
            let mut translator = RunTranslator::default();
            let mut saw_stdout = false;

            let mut records = Box::pin(decode::json_lines(stdout, "opencode-stdout"));
            while let Some(record) = records.next().await {
                saw_stdout = true;
                for event in translator.translate(&record) {
                    yield Ok(event);
                }
            }
            drop(records);

            let stderr_text = stderr_task.await.unwrap_or_default();
            let exit_code = match wait.await {
                Ok(code) => code,
                Err(e) => {
                    yield Err(SessionError::from(e));
                    return;
                }
            };

            if !stderr_text.trim().is_empty() {
                tracing::debug!(session_id = %session_id, stderr = %stderr_text.trim(), "agent stderr");
            }
            if !saw_stdout && exit_code != 0 && !stderr_text.trim().is_empty() {
                yield Err(SessionError::AgentExecution(format!(
                    "exit {exit_code}: {}",
                    stderr_text.trim()
                )));
                return;
            }

            yield Ok(translator.final_metadata());
        };

        Ok(Box::pin(stream))
    }

    fn parse_transcripts(
        &self,
        main: &str,
        subagents: &[SubagentTranscript],
    ) -> ParsedTranscripts {
        transcript::parse(main, subagents)
    }
}

/// Translates `opencode run --format json` output into stream events.
///
/// Each record carries one message part, either bare or wrapped in an
/// event envelope (`{"part": ...}` / `{"properties": {"part": ...}}`).
/// Parts arrive whole, so every surfaced block is emitted as a
/// start(+delta)+complete burst; repeats of the same part id in the same
/// state are dropped. Token counts from `step-finish` parts accumulate
/// into the terminal metadata_update.
#[derive(Default)]
struct RunTranslator {
    emitted: HashMap<String, Option<ToolStatus>>,
    resolved: HashSet<String>,
    input_tokens: u64,
    output_tokens: u64,
    cost_usd: f64,
}

impl RunTranslator {
    fn translate(&mut self, record: &Value) -> Vec<StreamEvent> {
        let part = record
            .get("part")
            .or_else(|| record.pointer("/properties/part"))
            .unwrap_or(record);
        if part.get("type").and_then(Value::as_str).is_none() {
            return Vec::new();
        }

        let part_id = part
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("part")
            .to_string();
        let status = part
            .pointer("/state/status")
            .and_then(Value::as_str)
            .map(|s| match s {
                "completed" => ToolStatus::Success,
                "error" => ToolStatus::Error,
                "pending" => ToolStatus::Pending,
                _ => ToolStatus::Running,
            });
        if self.emitted.get(&part_id) == Some(&status) {
            return Vec::new();
        }
        self.emitted.insert(part_id.clone(), status);

        // Tool parts stream state updates; hold off until the terminal state
        // so the tool_use and its result are emitted together.
        if part.get("type").and_then(Value::as_str) == Some("tool")
            && !status.is_some_and(|s| s.is_terminal())
        {
            return Vec::new();
        }

        if part.get("type").and_then(Value::as_str) == Some("step-finish") {
            if let Some(tokens) = part.get("tokens") {
                self.input_tokens += tokens.get("input").and_then(Value::as_u64).unwrap_or(0);
                self.output_tokens += tokens.get("output").and_then(Value::as_u64).unwrap_or(0);
            }
            if let Some(cost) = part.get("cost").and_then(Value::as_f64) {
                self.cost_usd += cost;
            }
        }

        let role = record
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("assistant");
        let model = record.get("modelID").and_then(Value::as_str);
        let blocks = transcript::blocks_for_part(
            part,
            &part_id,
            role,
            model,
            chrono::Utc::now(),
            &mut self.resolved,
        );

        let mut events = Vec::new();
        for block in blocks {
            events.extend(emit_whole_block(block));
        }
        events
    }

    fn final_metadata(&self) -> StreamEvent {
        StreamEvent::MetadataUpdate {
            conversation_id: MAIN_CONVERSATION.into(),
            metadata: json!({
                "usage": {
                    "inputTokens": self.input_tokens,
                    "outputTokens": self.output_tokens,
                    "totalTokens": self.input_tokens + self.output_tokens,
                },
                "costUsd": self.cost_usd,
            }),
        }
    }
}

fn emit_whole_block(block: Block) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    match &block.content {
        BlockContent::AssistantText { content, model } => {
            let start = Block {
                id: block.id.clone(),
                timestamp: block.timestamp,
                content: BlockContent::AssistantText {
                    content: String::new(),
                    model: model.clone(),
                },
            };
            events.push(StreamEvent::BlockStart {
                conversation_id: MAIN_CONVERSATION.into(),
                block: start,
            });
            events.push(StreamEvent::TextDelta {
                conversation_id: MAIN_CONVERSATION.into(),
                block_id: block.id.clone(),
                delta: content.clone(),
            });
        }
        _ => {
            events.push(StreamEvent::BlockStart {
                conversation_id: MAIN_CONVERSATION.into(),
                block: block.clone(),
            });
        }
    }
    events.push(StreamEvent::BlockComplete {
        conversation_id: MAIN_CONVERSATION.into(),
        block_id: block.id.clone(),
        block,
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSandbox;

    fn adapter() -> (Arc<MockSandbox>, OpencodeAdapter) {
        let sandbox = Arc::new(MockSandbox::new("sbx-1"));
        let adapter = OpencodeAdapter::new("ses_main", sandbox.clone());
        (sandbox, adapter)
    }

    #[test]
    fn paths_follow_family_layout() {
        let (_sandbox, adapter) = adapter();
        assert_eq!(
            adapter.paths().agent_storage_dir,
            "/root/.local/share/opencode/sessions"
        );
        assert_eq!(adapter.paths().instructions_file, "/workspace/AGENTS.md");
        assert_eq!(adapter.paths().profile_dir, "/workspace/.opencode");
    }

    #[test]
    fn identifies_main_and_child_documents() {
        let (_sandbox, adapter) = adapter();
        assert_eq!(
            adapter.identify_transcript_file("ses_main.json", "{}"),
            Some(TranscriptKind::Main)
        );
        let child = serde_json::json!({"id": "ses_child", "parentID": "ses_main"}).to_string();
        assert_eq!(
            adapter.identify_transcript_file("ses_child.json", &child),
            Some(TranscriptKind::Subagent("ses_child".into()))
        );
        let orphan = serde_json::json!({"id": "ses_other", "parentID": null}).to_string();
        assert_eq!(adapter.identify_transcript_file("ses_other.json", &orphan), None);
        assert_eq!(adapter.identify_transcript_file("notes.txt", "{}"), None);
    }

    #[test]
    fn build_args_include_session_and_format() {
        let (_sandbox, adapter) = adapter();
        let args = adapter.build_args("do things", Some(&json!({"model": "sonnet"})));
        assert_eq!(args[0], "opencode");
        assert_eq!(args[1], "run");
        assert!(args.contains(&"--session".to_string()));
        assert!(args.contains(&"ses_main".to_string()));
        assert!(args.contains(&"--format".to_string()));
        assert!(args.contains(&"json".to_string()));
        let model_idx = args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(args[model_idx + 1], "sonnet");
        assert_eq!(args.last().unwrap(), "do things");
    }

    #[tokio::test]
    async fn setup_profile_materializes_family_files() {
        let (sandbox, adapter) = adapter();
        let profile: AgentProfile = serde_yaml::from_str(
            "id: p1\ninstructions: Stay focused.\nsubagents:\n  - name: helper\n    description: Helps\n    prompt: Help out.\n",
        )
        .unwrap();
        adapter.setup_agent_profile(&profile).await.unwrap();

        let files = sandbox.files.lock().unwrap();
        assert_eq!(files.get("/workspace/AGENTS.md").unwrap(), "Stay focused.");
        assert!(
            files
                .get("/workspace/.opencode/agent/helper.md")
                .unwrap()
                .contains("mode: subagent")
        );
        assert!(files.contains_key("/workspace/opencode.json"));
    }

    #[tokio::test]
    async fn transcripts_roundtrip_and_filter_placeholders() {
        let (_sandbox, adapter) = adapter();
        let main = serde_json::json!({
            "id": "ses_main",
            "messages": [{
                "id": "m1",
                "role": "user",
                "parts": [{"id": "p1", "type": "text", "text": "hi"}]
            }]
        })
        .to_string();
        let child_real = serde_json::json!({
            "id": "ses_child",
            "parentID": "ses_main",
            "messages": [{
                "id": "m1",
                "role": "assistant",
                "parts": [{"id": "p1", "type": "text", "text": "working"}]
            }]
        })
        .to_string();
        let child_placeholder = serde_json::json!({
            "id": "ses_empty",
            "parentID": "ses_main",
            "messages": []
        })
        .to_string();

        adapter
            .setup_session_transcripts(&SessionTranscripts {
                main: main.clone(),
                subagents: vec![
                    SubagentTranscript {
                        id: "ses_child".into(),
                        content: child_real.clone(),
                    },
                    SubagentTranscript {
                        id: "ses_empty".into(),
                        content: child_placeholder,
                    },
                ],
            })
            .await
            .unwrap();

        let read_back = adapter.read_session_transcripts().await.unwrap();
        assert_eq!(read_back.main, main);
        assert_eq!(read_back.subagents.len(), 1);
        assert_eq!(read_back.subagents[0].id, "ses_child");
        assert_eq!(read_back.subagents[0].content, child_real);
    }

    #[tokio::test]
    async fn execute_query_emits_blocks_and_terminal_metadata() {
        let (sandbox, adapter) = adapter();
        sandbox.script_exec(
            [
                serde_json::json!({"part": {"id": "p1", "type": "text", "text": "All done."}}).to_string(),
                serde_json::json!({"part": {"id": "p2", "type": "step-finish", "tokens": {"input": 50, "output": 25}, "cost": 0.01}}).to_string(),
            ]
            .join("\n")
            .as_str(),
            "",
            0,
        );

        let stream = adapter.execute_query("go", None).await.unwrap();
        let events: Vec<_> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(matches!(events[0], StreamEvent::BlockStart { .. }));
        match events.last().unwrap() {
            StreamEvent::MetadataUpdate { metadata, .. } => {
                assert_eq!(metadata["usage"]["totalTokens"], 75);
                assert_eq!(metadata["costUsd"], 0.01);
            }
            other => panic!("expected metadata_update last, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_part_events_are_dropped() {
        let (sandbox, adapter) = adapter();
        let part = serde_json::json!({"part": {"id": "p1", "type": "text", "text": "once"}}).to_string();
        sandbox.script_exec(format!("{part}\n{part}").as_str(), "", 0);

        let stream = adapter.execute_query("go", None).await.unwrap();
        let events: Vec<_> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        let text_blocks = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::BlockComplete { block, .. }
                if matches!(block.content, BlockContent::AssistantText { .. })))
            .count();
        assert_eq!(text_blocks, 1);
    }
}
