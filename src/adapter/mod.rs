pub mod claude;
pub mod opencode;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::SessionError;
use crate::model::{AgentProfile, Architecture, Block, StreamEvent, SubagentTranscript};
use crate::sandbox::Sandbox;

/// Fixed directories an agent family uses inside the sandbox,
/// guest-absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterPaths {
    /// Where the agent binary writes its session transcript files.
    pub agent_storage_dir: String,
    pub workspace_dir: String,
    /// Where profile assets (subagents, commands, skills) are materialized.
    pub profile_dir: String,
    /// The "main instructions" file.
    pub instructions_file: String,
}

/// Classification of a file seen by the transcript watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptKind {
    Main,
    Subagent(String),
}

/// Raw transcripts for one session, as stored/restored verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTranscripts {
    pub main: String,
    pub subagents: Vec<SubagentTranscript>,
}

/// Output of the pure transcript parser.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTranscripts {
    pub blocks: Vec<Block>,
    pub subagents: Vec<ParsedSubagent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSubagent {
    pub id: String,
    pub blocks: Vec<Block>,
}

pub type EventStream = BoxStream<'static, Result<StreamEvent, SessionError>>;

/// Family-specific plug-in: file layout, profile materialization,
/// transcript round-tripping, query execution, and transcript parsing.
///
/// Adapters share only this contract — no inheritance, one implementation
/// per `Architecture` tag.
#[async_trait]
pub trait ArchitectureAdapter: Send + Sync {
    fn architecture(&self) -> Architecture;

    fn paths(&self) -> &AdapterPaths;

    /// Classify a file from the agent storage directory, or `None` for
    /// files that are not transcripts of this session.
    fn identify_transcript_file(&self, file_name: &str, content: &str) -> Option<TranscriptKind>;

    /// True when `raw` is a placeholder transcript that must stay hidden
    /// from the visible model.
    fn is_placeholder_transcript(&self, raw: &str) -> bool;

    /// Materialize profile assets into the sandbox with one bulk write.
    /// Per-file failures are logged, not fatal.
    async fn setup_agent_profile(&self, profile: &AgentProfile) -> Result<(), SessionError>;

    /// Recreate raw transcripts on a fresh sandbox so the agent can resume.
    async fn setup_session_transcripts(
        &self,
        transcripts: &SessionTranscripts,
    ) -> Result<(), SessionError>;

    /// Read transcripts back verbatim, filtering placeholders.
    async fn read_session_transcripts(&self) -> Result<SessionTranscripts, SessionError>;

    /// Spawn the agent process for one query and stream unified events.
    /// The stream is lazy; dropping it cancels the underlying process wait.
    async fn execute_query(
        &self,
        query: &str,
        options: Option<&Value>,
    ) -> Result<EventStream, SessionError>;

    /// Pure parse of raw transcripts into the unified block model. Also
    /// available without a sandbox via [`parse_transcripts`].
    fn parse_transcripts(
        &self,
        main: &str,
        subagents: &[SubagentTranscript],
    ) -> ParsedTranscripts;
}

/// Build the adapter for an agent family. Adapters are keyed off the
/// architecture tag — adding a family means adding an arm here.
pub fn build(
    architecture: Architecture,
    session_id: &str,
    sandbox: Arc<dyn Sandbox>,
) -> Arc<dyn ArchitectureAdapter> {
    match architecture {
        Architecture::Claude => Arc::new(claude::ClaudeAdapter::new(session_id, sandbox)),
        Architecture::Opencode => Arc::new(opencode::OpencodeAdapter::new(session_id, sandbox)),
    }
}

/// Offline transcript parse, usable before any sandbox exists (session
/// load path).
pub fn parse_transcripts(
    architecture: Architecture,
    main: &str,
    subagents: &[SubagentTranscript],
) -> ParsedTranscripts {
    match architecture {
        Architecture::Claude => claude::transcript::parse(main, subagents),
        Architecture::Opencode => opencode::transcript::parse(main, subagents),
    }
}
