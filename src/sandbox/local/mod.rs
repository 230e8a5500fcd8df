mod jail;
mod watch;

pub(crate) use jail::glob_match;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::RuntimeConfig;

use super::error::SandboxError;
use super::handle::Sandbox;
use super::provider::SandboxProvider;
use super::types::*;

use jail::Jail;
use watch::DirWatcher;

/// Local-process sandbox provider.
///
/// Each sandbox is a directory under `root_dir` holding the guest layout
/// (`workspace/`, `root/`, `app/`); agent processes run on the host with a
/// filtered env and `HOME` pointed into the sandbox. NOT a security
/// boundary — it exists so the runtime is fully exercisable without a
/// remote container backend.
pub struct LocalProvider {
    config: LocalProviderConfig,
    counter: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct LocalProviderConfig {
    pub root_dir: PathBuf,
    pub env_allowlist: Vec<String>,
    pub debounce: Duration,
    pub max_watched_file_bytes: u64,
    pub binary_extensions: BTreeSet<String>,
}

impl LocalProviderConfig {
    pub fn new(root_dir: PathBuf, runtime: &RuntimeConfig) -> Self {
        Self {
            root_dir,
            env_allowlist: vec!["PATH".into(), "LANG".into(), "TERM".into()],
            debounce: runtime.debounce,
            max_watched_file_bytes: runtime.max_watched_file_bytes,
            binary_extensions: runtime.binary_extensions.clone(),
        }
    }
}

impl LocalProvider {
    pub fn new(config: LocalProviderConfig) -> Result<Self, SandboxError> {
        std::fs::create_dir_all(&config.root_dir).map_err(|e| {
            SandboxError::Provision(format!(
                "failed to create sandboxes root {}: {e}",
                config.root_dir.display()
            ))
        })?;
        Ok(Self {
            config,
            counter: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl SandboxProvider for LocalProvider {
    async fn provision(&self, session_id: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        let sandbox_id = format!("local-{session_id}-{seq}");
        let dir = self.config.root_dir.join(session_id);

        tracing::info!(
            sandbox_id = %sandbox_id,
            dir = %dir.display(),
            "provisioning local sandbox"
        );

        let jail = Jail::create(dir)?;
        let paths = BasePaths::default();
        for guest_dir in [&paths.workspace_dir, &paths.home_dir, &paths.app_dir] {
            jail.create_directory(guest_dir)?;
        }

        Ok(Arc::new(LocalSandbox {
            id: sandbox_id,
            jail,
            paths,
            env_allowlist: self.config.env_allowlist.clone(),
            debounce: self.config.debounce,
            max_watched_file_bytes: self.config.max_watched_file_bytes,
            binary_extensions: self.config.binary_extensions.clone(),
            watchers: Mutex::new(Vec::new()),
            child_pids: Mutex::new(Vec::new()),
            exited: Mutex::new(None),
        }))
    }
}

pub struct LocalSandbox {
    id: String,
    jail: Jail,
    paths: BasePaths,
    env_allowlist: Vec<String>,
    debounce: Duration,
    max_watched_file_bytes: u64,
    binary_extensions: BTreeSet<String>,
    watchers: Mutex<Vec<DirWatcher>>,
    child_pids: Mutex<Vec<u32>>,
    exited: Mutex<Option<i32>>,
}

impl LocalSandbox {
    /// Record an exit code as if the backing container died. Used by
    /// operator tooling and tests to exercise the health-loop teardown path.
    pub fn mark_exited(&self, code: i32) {
        let mut exited = self.exited.lock().unwrap();
        exited.get_or_insert(code);
    }

    fn build_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = Vec::new();
        for key in &self.env_allowlist {
            if let Ok(val) = std::env::var(key) {
                env.push((key.clone(), val));
            }
        }
        env
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn base_paths(&self) -> &BasePaths {
        &self.paths
    }

    async fn exec(&self, argv: Vec<String>) -> Result<ExecHandle, SandboxError> {
        if argv.is_empty() {
            return Err(SandboxError::Exec("empty command".into()));
        }
        if self.exited.lock().unwrap().is_some() {
            return Err(SandboxError::Exec("sandbox is terminated".into()));
        }

        let cwd = self.jail.resolve(&self.paths.workspace_dir)?;
        let home = self.jail.resolve(&self.paths.home_dir)?;

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.current_dir(&cwd);
        cmd.env_clear();
        for (k, v) in self.build_env() {
            cmd.env(k, v);
        }
        cmd.env("HOME", &home);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!(sandbox_id = %self.id, command = ?argv, "executing in local sandbox");

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Exec(format!("spawn failed: {e}")))?;

        if let Some(pid) = child.id() {
            self.child_pids.lock().unwrap().push(pid);
        }

        let stdout: ByteReader = Box::new(
            child
                .stdout
                .take()
                .ok_or_else(|| SandboxError::Exec("stdout not piped".into()))?,
        );
        let stderr: ByteReader = Box::new(
            child
                .stderr
                .take()
                .ok_or_else(|| SandboxError::Exec("stderr not piped".into()))?,
        );

        let wait = Box::pin(async move {
            let status = child
                .wait()
                .await
                .map_err(|e| SandboxError::Exec(format!("wait failed: {e}")))?;
            Ok(status.code().unwrap_or(-1))
        });

        Ok(ExecHandle {
            stdout,
            stderr,
            wait,
        })
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>, SandboxError> {
        self.jail.read_file(path)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.jail.write_file(path, content)
    }

    async fn write_files(&self, files: Vec<FileWrite>) -> Result<BulkWriteReport, SandboxError> {
        let mut report = BulkWriteReport::default();
        for file in files {
            match self.jail.write_file(&file.path, &file.content) {
                Ok(()) => report.written.push(file.path),
                Err(e) => report.failed.push(FailedWrite {
                    path: file.path,
                    error: e.to_string(),
                }),
            }
        }
        Ok(report)
    }

    async fn create_directory(&self, path: &str) -> Result<(), SandboxError> {
        self.jail.create_directory(path)
    }

    async fn list_files(
        &self,
        dir: &str,
        pattern: Option<&str>,
    ) -> Result<Vec<String>, SandboxError> {
        self.jail.list_files(dir, pattern)
    }

    async fn watch(&self, path: &str, callback: WatchCallback) -> Result<(), SandboxError> {
        let root = self.jail.resolve(path)?;
        let watcher = DirWatcher::start(
            root,
            self.debounce,
            self.max_watched_file_bytes,
            self.binary_extensions.clone(),
            callback,
        )?;
        self.watchers.lock().unwrap().push(watcher);
        Ok(())
    }

    async fn poll(&self) -> Result<Option<i32>, SandboxError> {
        Ok(*self.exited.lock().unwrap())
    }

    async fn terminate(&self) -> Result<(), SandboxError> {
        let pids: Vec<u32> = std::mem::take(&mut *self.child_pids.lock().unwrap());
        for pid in pids {
            kill_pid(pid);
        }
        self.watchers.lock().unwrap().clear();
        self.mark_exited(143);
        tracing::info!(sandbox_id = %self.id, "local sandbox terminated");
        Ok(())
    }
}

/// Best-effort process termination, platform-specific.
fn kill_pid(pid: u32) {
    #[cfg(unix)]
    {
        let _ = std::process::Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .spawn();
    }
    #[cfg(windows)]
    {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .spawn();
    }
}
