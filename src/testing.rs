//! In-memory sandbox doubles for exercising the session runtime without a
//! real provider. Test-only.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::sandbox::{
    BasePaths, BulkWriteReport, ByteReader, ExecHandle, FailedWrite, FileWrite, Sandbox,
    SandboxError, SandboxProvider, WatchCallback, WatchEvent,
};

/// One scripted `exec` outcome.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExec {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Scriptable in-memory sandbox: files live in a map, exec pops scripted
/// outcomes, watchers record their callbacks so tests can inject events.
pub struct MockSandbox {
    id: String,
    paths: BasePaths,
    pub files: Mutex<BTreeMap<String, String>>,
    pub exec_script: Mutex<VecDeque<ScriptedExec>>,
    pub exec_log: Mutex<Vec<Vec<String>>>,
    pub watchers: Mutex<Vec<(String, WatchCallback)>>,
    pub fail_watch: Mutex<bool>,
    exit: Mutex<Option<i32>>,
    pub terminate_count: AtomicUsize,
}

impl MockSandbox {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            paths: BasePaths::default(),
            files: Mutex::new(BTreeMap::new()),
            exec_script: Mutex::new(VecDeque::new()),
            exec_log: Mutex::new(Vec::new()),
            watchers: Mutex::new(Vec::new()),
            fail_watch: Mutex::new(false),
            exit: Mutex::new(None),
            terminate_count: AtomicUsize::new(0),
        }
    }

    /// Queue one exec outcome (consumed in FIFO order).
    pub fn script_exec(&self, stdout: &str, stderr: &str, exit_code: i32) {
        self.exec_script.lock().unwrap().push_back(ScriptedExec {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        });
    }

    /// Put a file directly into the sandbox filesystem.
    pub fn put_file(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    /// Deliver a watch event to every watcher whose root prefixes `dir`.
    pub fn push_watch_event(&self, dir: &str, event: WatchEvent) {
        let watchers = self.watchers.lock().unwrap();
        for (root, callback) in watchers.iter() {
            if root == dir {
                callback(event.clone());
            }
        }
    }

    /// Simulate the backing container dying with `code`.
    pub fn mark_exited(&self, code: i32) {
        self.exit.lock().unwrap().get_or_insert(code);
    }

    pub fn watched_roots(&self) -> Vec<String> {
        self.watchers
            .lock()
            .unwrap()
            .iter()
            .map(|(root, _)| root.clone())
            .collect()
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn base_paths(&self) -> &BasePaths {
        &self.paths
    }

    async fn exec(&self, argv: Vec<String>) -> Result<ExecHandle, SandboxError> {
        self.exec_log.lock().unwrap().push(argv);
        let scripted = self
            .exec_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        let stdout: ByteReader = Box::new(std::io::Cursor::new(scripted.stdout.into_bytes()));
        let stderr: ByteReader = Box::new(std::io::Cursor::new(scripted.stderr.into_bytes()));
        let exit_code = scripted.exit_code;
        Ok(ExecHandle {
            stdout,
            stderr,
            wait: Box::pin(async move { Ok::<i32, SandboxError>(exit_code) }),
        })
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>, SandboxError> {
        Ok(self.files.lock().unwrap().get(path).cloned())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.put_file(path, content);
        Ok(())
    }

    async fn write_files(&self, files: Vec<FileWrite>) -> Result<BulkWriteReport, SandboxError> {
        let mut report = BulkWriteReport::default();
        for file in files {
            if file.path.contains("..") {
                report.failed.push(FailedWrite {
                    path: file.path,
                    error: "path escapes sandbox".into(),
                });
            } else {
                self.put_file(&file.path, &file.content);
                report.written.push(file.path);
            }
        }
        Ok(report)
    }

    async fn create_directory(&self, _path: &str) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn list_files(
        &self,
        dir: &str,
        pattern: Option<&str>,
    ) -> Result<Vec<String>, SandboxError> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let files = self.files.lock().unwrap();
        let mut out = Vec::new();
        for path in files.keys() {
            let Some(rel) = path.strip_prefix(&prefix) else {
                continue;
            };
            match pattern {
                Some(pat) => {
                    let name = rel.rsplit('/').next().unwrap_or(rel);
                    if crate::sandbox::local::glob_match(pat, name) {
                        out.push(path.clone());
                    }
                }
                None => out.push(rel.to_string()),
            }
        }
        Ok(out)
    }

    async fn watch(&self, path: &str, callback: WatchCallback) -> Result<(), SandboxError> {
        if *self.fail_watch.lock().unwrap() {
            return Err(SandboxError::Watch("scripted watch failure".into()));
        }
        self.watchers
            .lock()
            .unwrap()
            .push((path.to_string(), callback));
        Ok(())
    }

    async fn poll(&self) -> Result<Option<i32>, SandboxError> {
        Ok(*self.exit.lock().unwrap())
    }

    async fn terminate(&self) -> Result<(), SandboxError> {
        self.terminate_count.fetch_add(1, Ordering::SeqCst);
        self.watchers.lock().unwrap().clear();
        self.mark_exited(143);
        Ok(())
    }
}

/// Provider handing out [`MockSandbox`]es, with optional scripted failure.
#[derive(Default)]
pub struct MockProvider {
    pub sandboxes: Mutex<Vec<Arc<MockSandbox>>>,
    /// Stdout script installed on every provisioned sandbox.
    pub default_script: Mutex<Option<ScriptedExec>>,
    pub provision_count: AtomicUsize,
    pub fail_provision: Mutex<bool>,
    /// When set, provisioned sandboxes refuse to start watchers.
    pub fail_watch: Mutex<bool>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_script(stdout: &str) -> Self {
        let provider = Self::new();
        *provider.default_script.lock().unwrap() = Some(ScriptedExec {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
        });
        provider
    }

    pub fn last_sandbox(&self) -> Option<Arc<MockSandbox>> {
        self.sandboxes.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SandboxProvider for MockProvider {
    async fn provision(&self, session_id: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        self.provision_count.fetch_add(1, Ordering::SeqCst);
        if *self.fail_provision.lock().unwrap() {
            return Err(SandboxError::Provision("scripted provision failure".into()));
        }
        let sandbox = Arc::new(MockSandbox::new(&format!("mock-{session_id}")));
        if let Some(script) = self.default_script.lock().unwrap().clone() {
            sandbox
                .exec_script
                .lock()
                .unwrap()
                .push_back(script);
        }
        *sandbox.fail_watch.lock().unwrap() = *self.fail_watch.lock().unwrap();
        self.sandboxes.lock().unwrap().push(sandbox.clone());
        Ok(sandbox)
    }
}
