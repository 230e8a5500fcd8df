pub mod file;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{
    AgentProfile, PersistedSession, SessionRecord, SessionRecordPatch, WorkspaceFile,
};

pub use file::FilePersistence;

/// Pluggable durable store for session records, transcripts, workspace
/// files, and agent profiles.
///
/// Implementations must be safe for concurrent invocations on distinct
/// keys; per-(session, resource) serialization comes for free because all
/// mutations for a session are issued by that session's actor.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert a new record. Idempotent on `session_id`.
    async fn create_session_record(&self, record: SessionRecord) -> Result<()>;

    /// Merge a patch into an existing record.
    async fn update_session_record(
        &self,
        session_id: &str,
        patch: SessionRecordPatch,
    ) -> Result<()>;

    /// Full persisted session, or `None` if unknown.
    async fn load_session(&self, session_id: &str) -> Result<Option<PersistedSession>>;

    async fn load_agent_profile(&self, profile_id: &str) -> Result<Option<AgentProfile>>;

    /// List-view records for every known session, active or not.
    async fn list_all_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Overwrite the named transcript blob (main when `subagent_id` is
    /// `None`).
    async fn save_transcript(
        &self,
        session_id: &str,
        content: &str,
        subagent_id: Option<&str>,
    ) -> Result<()>;

    /// Upsert one workspace file by `(session_id, path)`.
    async fn save_workspace_file(&self, session_id: &str, file: &WorkspaceFile) -> Result<()>;

    /// Remove everything stored for a session.
    async fn destroy_session_record(&self, session_id: &str) -> Result<()>;
}
