pub mod transcript;
pub mod translate;

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
use crate::model::{AgentProfile, Architecture, SubagentTranscript};
use crate::sandbox::{FileWrite, Sandbox};

use translate::StreamTranslator;

/// Adapter for the Claude-family CLI (`claude`).
///
/// Transcripts are line-delimited JSON files the CLI writes under its
/// project storage directory: the main conversation as
/// `<sessionId>.jsonl`, subagent conversations as `agent-<uuid>.jsonl`.
pub struct ClaudeAdapter {
    session_id: String,
    sandbox: Arc<dyn Sandbox>,
    paths: AdapterPaths,
}

impl ClaudeAdapter {
    pub fn new(session_id: &str, sandbox: Arc<dyn Sandbox>) -> Self {
        let base = sandbox.base_paths().clone();
        // The CLI keys project storage off the munged workspace path
        // ("/workspace" -> "-workspace").
        let project_key = base.workspace_dir.replace('/', "-");
        let paths = AdapterPaths {
            agent_storage_dir: format!("{}/.claude/projects/{project_key}", base.home_dir),
            workspace_dir: base.workspace_dir.clone(),
            profile_dir: format!("{}/.claude", base.workspace_dir),
            instructions_file: format!("{}/CLAUDE.md", base.workspace_dir),
        };
        Self {
            session_id: session_id.to_string(),
            sandbox,
            paths,
        }
    }

    fn main_transcript_path(&self) -> String {
        format!("{}/{}.jsonl", self.paths.agent_storage_dir, self.session_id)
    }

    fn subagent_transcript_path(&self, subagent_id: &str) -> String {
        format!("{}/agent-{subagent_id}.jsonl", self.paths.agent_storage_dir)
    }

    fn build_args(&self, query: &str, options: Option<&Value>) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "claude".into(),
            "--print".into(),
            "--verbose".into(),
            "--output-format".into(),
            "stream-json".into(),
            "--session-id".into(),
            self.session_id.clone(),
        ];

        if let Some(model) = options.and_then(|o| o.get("model")).and_then(Value::as_str) {
            args.push("--model".into());
            args.push(model.into());
        }

        let allowed: Vec<String> = options
            .and_then(|o| o.get("allowedTools"))
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if allowed.is_empty() {
            args.push("--dangerously-skip-permissions".into());
        } else {
            args.push("--allowedTools".into());
            args.push(allowed.join(","));
        }

        args.push(query.into());
        args
    }
}

#[async_trait]
impl ArchitectureAdapter for ClaudeAdapter {
    fn architecture(&self) -> Architecture {
        Architecture::Claude
    }

    fn paths(&self) -> &AdapterPaths {
        &self.paths
    }

    fn identify_transcript_file(&self, file_name: &str, _content: &str) -> Option<TranscriptKind> {
        if file_name == format!("{}.jsonl", self.session_id) {
            return Some(TranscriptKind::Main);
        }
        file_name
            .strip_prefix("agent-")
            .and_then(|rest| rest.strip_suffix(".jsonl"))
            .filter(|id| !id.is_empty())
            .map(|id| TranscriptKind::Subagent(id.to_string()))
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
                format!("{dir}/agents/{}.md", subagent.name),
                format!(
                    "---\nname: {}\ndescription: {}\n---\n\n{}",
                    subagent.name, subagent.description, subagent.prompt
                ),
            ));
        }
        for command in &profile.commands {
            files.push(FileWrite::new(
                format!("{dir}/commands/{}.md", command.name),
                command.prompt.clone(),
            ));
        }
        for skill in &profile.skills {
            files.push(FileWrite::new(
                format!("{dir}/skills/{}/SKILL.md", skill.name),
                format!(
                    "---\nname: {}\ndescription: {}\n---\n\n{}",
                    skill.name, skill.description, skill.body
                ),
            ));
            for file in &skill.files {
                files.push(FileWrite::new(
                    format!("{dir}/skills/{}/{}", skill.name, file.path),
                    file.content.clone(),
                ));
            }
        }
        files.push(FileWrite::new(
            format!("{}/.mcp.json", self.paths.workspace_dir),
            serde_json::to_string_pretty(&json!({"mcpServers": {}})).unwrap_or_default(),
        ));
        files.push(FileWrite::new(
            format!("{dir}/settings.json"),
            serde_json::to_string_pretty(&json!({
                "permissions": {"defaultMode": "bypassPermissions"}
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
            .list_files(&self.paths.agent_storage_dir, Some("agent-*.jsonl"))
            .await?;
        for path in paths {
            let file_name = path.rsplit('/').next().unwrap_or(&path);
            let Some(TranscriptKind::Subagent(id)) =
                self.identify_transcript_file(file_name, "")
            else {
                continue;
            };
            let Some(content) = self.sandbox.read_file(&path).await? else {
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
            let mut translator = StreamTranslator::new();
            let mut saw_stdout = false;

            let mut records = Box::pin(decode::json_lines(stdout, "claude-stdout"));
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
            }
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
