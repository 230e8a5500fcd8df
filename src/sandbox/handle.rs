use async_trait::async_trait;

use super::error::SandboxError;
use super::types::*;

/// Handle to a running sandbox. Everything the session runtime needs.
///
/// Providers implement this trait. All paths are guest-absolute (the
/// provider owns the mapping to whatever the backend actually uses).
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;
    fn base_paths(&self) -> &BasePaths;

    // ── Exec ────────────────────────────────────────────────────

    /// Spawn a process inside the sandbox, returning its output streams.
    async fn exec(&self, argv: Vec<String>) -> Result<ExecHandle, SandboxError>;

    // ── Files ───────────────────────────────────────────────────

    /// Read a file as text. Returns `None` when the file does not exist.
    async fn read_file(&self, path: &str) -> Result<Option<String>, SandboxError>;

    /// Write a file, creating missing parent directories.
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    /// Bulk write in one round-trip. Per-file failures are reported in the
    /// returned report rather than failing the call.
    async fn write_files(&self, files: Vec<FileWrite>) -> Result<BulkWriteReport, SandboxError>;

    /// `mkdir -p` semantics.
    async fn create_directory(&self, path: &str) -> Result<(), SandboxError>;

    /// List files under `dir`, recursively. Without a pattern, paths are
    /// relative to `dir`; with a file-name glob pattern, matching paths are
    /// returned guest-absolute. A missing directory yields an empty list.
    async fn list_files(
        &self,
        dir: &str,
        pattern: Option<&str>,
    ) -> Result<Vec<String>, SandboxError>;

    // ── Watching ────────────────────────────────────────────────

    /// Start a recursive watcher on `path`. Resolves once the watcher is
    /// known to be running; the callback may fire before resolution.
    /// Watchers are cleaned up by `terminate`.
    async fn watch(&self, path: &str, callback: WatchCallback) -> Result<(), SandboxError>;

    // ── Lifecycle ───────────────────────────────────────────────

    /// Liveness probe. `None` means the sandbox is still running; an exit
    /// code means it is gone.
    async fn poll(&self) -> Result<Option<i32>, SandboxError>;

    /// Best-effort teardown. Idempotent.
    async fn terminate(&self) -> Result<(), SandboxError>;
}
