use std::sync::Arc;

use async_trait::async_trait;

use super::error::SandboxError;
use super::handle::Sandbox;

/// Factory for sandboxes.
///
/// One provider instance per backend lives at runtime init. Each call to
/// `provision` creates a new isolated sandbox for one session.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn provision(&self, session_id: &str) -> Result<Arc<dyn Sandbox>, SandboxError>;
}
