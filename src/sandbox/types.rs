use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::AsyncRead;

use super::error::SandboxError;

pub type SandboxId = String;

// ── Base paths ──────────────────────────────────────────────────────

/// Well-known directories inside a sandbox, as guest-absolute paths.
///
/// `app_dir` holds control-plane helpers baked into the image,
/// `workspace_dir` is the agent's working tree, `home_dir` is where agent
/// CLIs keep their own state (transcripts, credentials).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasePaths {
    pub app_dir: String,
    pub workspace_dir: String,
    pub home_dir: String,
}

impl Default for BasePaths {
    fn default() -> Self {
        Self {
            app_dir: "/app".into(),
            workspace_dir: "/workspace".into(),
            home_dir: "/root".into(),
        }
    }
}

// ── Exec model ──────────────────────────────────────────────────────

pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// A process spawned inside a sandbox. Stdout/stderr are raw byte streams
/// suitable for line-delimited reading; `wait` resolves with the exit code.
pub struct ExecHandle {
    pub stdout: ByteReader,
    pub stderr: ByteReader,
    pub wait: BoxFuture<'static, Result<i32, SandboxError>>,
}

// ── Bulk file writes ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

impl FileWrite {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedWrite {
    pub path: String,
    pub error: String,
}

/// Outcome of a bulk write. Partial failure is reported, not fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteReport {
    pub written: Vec<String>,
    pub failed: Vec<FailedWrite>,
}

impl BulkWriteReport {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

// ── Directory watching ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Add,
    Change,
    Unlink,
}

/// A change under a watched directory. `path` is relative to the watched
/// root. `content` is present for add/change of text files small enough to
/// deliver; binary or oversized files come through with `content: None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchKind,
    pub path: String,
    pub content: Option<String>,
}

pub type WatchCallback = Arc<dyn Fn(WatchEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_paths_default() {
        let paths = BasePaths::default();
        assert_eq!(paths.app_dir, "/app");
        assert_eq!(paths.workspace_dir, "/workspace");
        assert_eq!(paths.home_dir, "/root");
    }

    #[test]
    fn bulk_report_all_ok() {
        let ok = BulkWriteReport {
            written: vec!["a.txt".into()],
            failed: vec![],
        };
        assert!(ok.all_ok());

        let partial = BulkWriteReport {
            written: vec!["a.txt".into()],
            failed: vec![FailedWrite {
                path: "b.txt".into(),
                error: "disk full".into(),
            }],
        };
        assert!(!partial.all_ok());
    }

    #[test]
    fn watch_event_construction() {
        let ev = WatchEvent {
            kind: WatchKind::Change,
            path: "src/main.rs".into(),
            content: Some("fn main() {}".into()),
        };
        assert_eq!(ev.kind, WatchKind::Change);
        assert_eq!(ev.path, "src/main.rs");
        assert!(ev.content.is_some());
    }

    #[test]
    fn types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BasePaths>();
        assert_send_sync::<WatchEvent>();
        assert_send_sync::<BulkWriteReport>();
    }
}
