use std::time::Duration;

use crate::sandbox::SandboxError;

/// Session-level errors.
///
/// The rule: recover locally everything that does not corrupt in-memory
/// state, surface everything that does. A single session's failure never
/// takes the process down.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// Session or profile unknown. Surfaced to callers as 404-equivalent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A query is already in flight for this session. Non-fatal.
    #[error("session is busy with another query")]
    Busy,

    /// Sandbox creation failed; the session stays Initialized. Retryable.
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(#[source] SandboxError),

    /// A sandbox file/exec operation failed. The triggering op fails, the
    /// session survives.
    #[error("sandbox io: {0}")]
    SandboxIo(#[from] SandboxError),

    /// Watchers did not come up in time; activation fails and the
    /// half-built sandbox is destroyed.
    #[error("file watchers did not become ready within {0:?}")]
    WatcherStartTimeout(Duration),

    /// Agent subprocess exited non-zero with no stdout but stderr output.
    #[error("agent execution failed: {0}")]
    AgentExecution(String),

    /// Malformed native transcript or stream record. The record is dropped.
    #[error("parse error: {0}")]
    Parse(String),

    /// A persistence call failed; in-memory state is authoritative and the
    /// next periodic sync retries.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Caller-initiated cancellation. Not an error to log.
    #[error("interrupted")]
    Interrupted,
}

impl SessionError {
    pub fn persistence(err: anyhow::Error) -> Self {
        SessionError::Persistence(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            SessionError::NotFound("session abc".into()).to_string(),
            "not found: session abc"
        );
        assert_eq!(
            SessionError::Busy.to_string(),
            "session is busy with another query"
        );
        assert_eq!(
            SessionError::AgentExecution("exit 1: boom".into()).to_string(),
            "agent execution failed: exit 1: boom"
        );
        assert_eq!(SessionError::Interrupted.to_string(), "interrupted");
    }

    #[test]
    fn sandbox_error_converts_to_sandbox_io() {
        let err: SessionError = SandboxError::Exec("spawn failed".into()).into();
        assert!(matches!(err, SessionError::SandboxIo(_)));
        assert!(err.to_string().contains("spawn failed"));
    }

    #[test]
    fn watcher_timeout_includes_duration() {
        let err = SessionError::WatcherStartTimeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn persistence_helper_flattens_context() {
        let inner = anyhow::anyhow!("disk full").context("writing record");
        let err = SessionError::persistence(inner);
        let text = err.to_string();
        assert!(text.contains("writing record"));
        assert!(text.contains("disk full"));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SessionError>();
    }
}
