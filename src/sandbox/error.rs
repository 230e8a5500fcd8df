use std::io;

/// Errors from sandbox operations.
///
/// Providers map their internal failures into these variants. `Unsupported`
/// is the expected return for operations a particular backend cannot
/// implement (e.g. native watch on a provider without an agent helper).
#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("sandbox not found: {0}")]
    NotFound(String),

    #[error("provision failed: {0}")]
    Provision(String),

    #[error("exec failed: {0}")]
    Exec(String),

    #[error("watch failed: {0}")]
    Watch(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_display_their_message() {
        assert_eq!(
            SandboxError::Unsupported("watch").to_string(),
            "unsupported operation: watch"
        );
        assert_eq!(
            SandboxError::NotFound("sbx-123".into()).to_string(),
            "sandbox not found: sbx-123"
        );
        assert_eq!(
            SandboxError::Provision("no kernel image".into()).to_string(),
            "provision failed: no kernel image"
        );
        assert_eq!(
            SandboxError::Exec("spawn failed".into()).to_string(),
            "exec failed: spawn failed"
        );
        assert_eq!(
            SandboxError::Watch("root missing".into()).to_string(),
            "watch failed: root missing"
        );
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err: SandboxError = io_err.into();
        assert!(err.to_string().contains("file missing"));
        assert!(matches!(err, SandboxError::Io(_)));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SandboxError>();
    }
}
