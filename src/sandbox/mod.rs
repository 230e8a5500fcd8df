pub mod error;
pub mod handle;
pub mod local;
pub mod provider;
pub mod types;

pub use error::SandboxError;
pub use handle::Sandbox;
pub use provider::SandboxProvider;
pub use types::*;
