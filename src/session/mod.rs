pub mod state;

use std::sync::{Arc, Mutex as StdMutex, Weak};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::adapter::{self, ArchitectureAdapter, SessionTranscripts, TranscriptKind};
use crate::config::RuntimeConfig;
use crate::error::SessionError;
use crate::events::{EventBus, SessionEvent};
use crate::model::{
    AgentProfile, Architecture, Block, PersistedSession, SandboxPhase, SessionRecordPatch,
    StreamEvent, WorkspaceFile,
};
use crate::model::stream::MAIN_CONVERSATION;
use crate::persistence::Persistence;
use crate::sandbox::{
    FileWrite, Sandbox, SandboxError, SandboxProvider, WatchCallback, WatchEvent, WatchKind,
};

use state::{SandboxState, SessionState, SubagentDiff, SubagentState};

/// Injected instead of a back-pointer to the manager, so sessions and the
/// registry stay acyclic.
pub type TerminationHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Shared collaborators handed to every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub cfg: RuntimeConfig,
    pub bus: EventBus,
    pub store: Arc<dyn Persistence>,
    pub provider: Arc<dyn SandboxProvider>,
    pub on_sandbox_terminated: TerminationHook,
}

/// Per-conversation actor owning one sandbox and one adapter.
///
/// Lifecycle: Initialized (no sandbox) → Activating (first send_message) →
/// Ready → Destroyed. The sandbox exists iff the watchers, periodic sync,
/// and health loop exist.
pub struct AgentSession {
    session_id: String,
    architecture: Architecture,
    profile: AgentProfile,
    deps: SessionDeps,
    state: Mutex<SessionState>,
    active: Mutex<Option<ActiveSandbox>>,
    /// At most one outbound query per session; try-locked, not queued.
    query_gate: Mutex<()>,
    options: StdMutex<Option<Value>>,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("session_id", &self.session_id)
            .field("architecture", &self.architecture)
            .finish_non_exhaustive()
    }
}

struct ActiveSandbox {
    sandbox: Arc<dyn Sandbox>,
    adapter: Arc<dyn ArchitectureAdapter>,
    workspace_consumer: JoinHandle<()>,
    transcript_consumer: JoinHandle<()>,
    sync_task: JoinHandle<()>,
    health_task: JoinHandle<()>,
}

impl ActiveSandbox {
    fn abort_all(&self) {
        self.workspace_consumer.abort();
        self.transcript_consumer.abort();
        self.sync_task.abort();
        self.health_task.abort();
    }
}

impl AgentSession {
    /// Fresh session: no sandbox, workspace seeded from the profile.
    pub fn new(
        session_id: &str,
        architecture: Architecture,
        profile: AgentProfile,
        options: Option<Value>,
        deps: SessionDeps,
    ) -> Arc<Self> {
        let mut state = SessionState::new();
        for file in &profile.workspace_files {
            state.upsert_workspace_file(file.clone());
        }
        Arc::new(Self {
            session_id: session_id.to_string(),
            architecture,
            profile,
            deps,
            state: Mutex::new(state),
            active: Mutex::new(None),
            query_gate: Mutex::new(()),
            options: StdMutex::new(options),
        })
    }

    /// Rehydrate a session from persistence; blocks come from the pure
    /// parser, no sandbox is touched.
    pub fn from_persisted(
        persisted: PersistedSession,
        profile: AgentProfile,
        deps: SessionDeps,
    ) -> Arc<Self> {
        let architecture = persisted.record.architecture;
        let mut state = SessionState::new();
        state.raw_transcript = persisted.main_transcript.clone();
        for sub in &persisted.subagents {
            state.subagents.insert(
                sub.id.clone(),
                SubagentState {
                    raw_transcript: sub.content.clone(),
                    blocks: Vec::new(),
                },
            );
        }
        for file in persisted.workspace_files {
            state.upsert_workspace_file(file);
        }
        state.last_activity = persisted.record.last_activity;

        let parsed = adapter::parse_transcripts(
            architecture,
            &persisted.main_transcript,
            &persisted.subagents,
        );
        // Pre-populates announced/completed so reload does not re-emit
        // lifecycle events for old subagents.
        state.apply_parsed(parsed);

        Arc::new(Self {
            session_id: persisted.record.session_id.clone(),
            architecture,
            profile,
            deps,
            state: Mutex::new(state),
            active: Mutex::new(None),
            query_gate: Mutex::new(()),
            options: StdMutex::new(persisted.record.session_options),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub async fn last_activity(&self) -> chrono::DateTime<chrono::Utc> {
        self.state.lock().await.last_activity
    }

    pub async fn state_snapshot(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Update free-form session options (model etc.), persist, announce.
    pub async fn set_options(&self, options: Value) {
        *self.options.lock().unwrap() = Some(options.clone());
        if let Err(e) = self
            .deps
            .store
            .update_session_record(
                &self.session_id,
                SessionRecordPatch {
                    session_options: Some(options.clone()),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::warn!(session_id = %self.session_id, error = %e, "options persist failed");
        }
        self.deps.bus.emit(SessionEvent::OptionsUpdate {
            session_id: self.session_id.clone(),
            options,
        });
    }

    // ── send_message ────────────────────────────────────────────

    /// Run one user query through the agent, activating the sandbox first
    /// if needed. At most one query per session is in flight; concurrent
    /// calls fail with `Busy`.
    pub async fn send_message(self: &Arc<Self>, text: &str) -> Result<(), SessionError> {
        let _gate = self
            .query_gate
            .try_lock()
            .map_err(|_| SessionError::Busy)?;

        self.ensure_active().await?;
        self.state.lock().await.touch();

        // The user block precedes any agent output of this call.
        let block = Block::user(text);
        self.deps.bus.emit(SessionEvent::BlockStart {
            session_id: self.session_id.clone(),
            conversation_id: MAIN_CONVERSATION.into(),
            block: block.clone(),
        });
        self.deps.bus.emit(SessionEvent::BlockComplete {
            session_id: self.session_id.clone(),
            conversation_id: MAIN_CONVERSATION.into(),
            block_id: block.id.clone(),
            block,
        });

        // The sandbox can die between activation and the query; the health
        // loop clears `active` when that happens.
        let adapter = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(active) => active.adapter.clone(),
                None => {
                    return Err(SessionError::SandboxIo(SandboxError::NotFound(
                        "sandbox terminated before query".into(),
                    )));
                }
            }
        };
        let options = self.options.lock().unwrap().clone();

        let result: Result<(), SessionError> = async {
            let mut events = adapter.execute_query(text, options.as_ref()).await?;
            while let Some(item) = events.next().await {
                self.forward_stream_event(item?);
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.state.lock().await.touch();
                Ok(())
            }
            Err(e) => {
                self.deps.bus.emit(SessionEvent::Error {
                    session_id: self.session_id.clone(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn forward_stream_event(&self, event: StreamEvent) {
        let session_id = self.session_id.clone();
        let ev = match event {
            StreamEvent::BlockStart {
                conversation_id,
                block,
            } => SessionEvent::BlockStart {
                session_id,
                conversation_id,
                block,
            },
            StreamEvent::TextDelta {
                conversation_id,
                block_id,
                delta,
            } => SessionEvent::BlockDelta {
                session_id,
                conversation_id,
                block_id,
                delta,
            },
            StreamEvent::BlockUpdate {
                conversation_id,
                block_id,
                updates,
            } => SessionEvent::BlockUpdate {
                session_id,
                conversation_id,
                block_id,
                updates,
            },
            StreamEvent::BlockComplete {
                conversation_id,
                block_id,
                block,
            } => SessionEvent::BlockComplete {
                session_id,
                conversation_id,
                block_id,
                block,
            },
            StreamEvent::MetadataUpdate {
                conversation_id,
                metadata,
            } => SessionEvent::MetadataUpdate {
                session_id,
                conversation_id,
                metadata,
            },
        };
        self.deps.bus.emit(ev);
    }

    // ── activation ──────────────────────────────────────────────

    async fn emit_status(&self, status: SandboxPhase, message: &str) {
        {
            let mut st = self.state.lock().await;
            if let Some(sandbox) = st.sandbox.as_mut() {
                sandbox.status = status;
                sandbox.status_message = Some(message.to_string());
            }
        }
        self.deps.bus.emit(SessionEvent::Status {
            session_id: self.session_id.clone(),
            sandbox_status: status,
            message: message.to_string(),
        });
    }

    async fn ensure_active(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Ok(());
        }

        self.state.lock().await.sandbox = Some(SandboxState::starting());
        self.deps.bus.emit(SessionEvent::SandboxStatus {
            session_id: self.session_id.clone(),
            sandbox_id: None,
            status: SandboxPhase::Starting,
        });
        self.emit_status(SandboxPhase::Starting, "Preparing…").await;

        self.emit_status(SandboxPhase::Starting, "Creating sandbox container…")
            .await;
        let sandbox = match self.deps.provider.provision(&self.session_id).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                self.state.lock().await.sandbox = None;
                return Err(SessionError::SandboxUnavailable(e));
            }
        };
        {
            let mut st = self.state.lock().await;
            if let Some(sb) = st.sandbox.as_mut() {
                sb.sandbox_id = Some(sandbox.id().to_string());
            }
        }

        let adapter = adapter::build(self.architecture, &self.session_id, sandbox.clone());

        self.emit_status(SandboxPhase::Starting, "Setting up session files…")
            .await;
        if let Err(e) = self.materialize(&sandbox, &adapter).await {
            let _ = sandbox.terminate().await;
            self.state.lock().await.sandbox = None;
            return Err(e);
        }

        self.emit_status(SandboxPhase::Starting, "Initializing file watchers…")
            .await;
        let (workspace_rx, transcript_rx) =
            match self.start_watchers(&sandbox, &adapter).await {
                Ok(channels) => channels,
                Err(e) => {
                    let _ = sandbox.terminate().await;
                    self.state.lock().await.sandbox = None;
                    return Err(e);
                }
            };

        let workspace_consumer = spawn_workspace_consumer(Arc::downgrade(self), workspace_rx);
        let transcript_consumer =
            spawn_transcript_consumer(Arc::downgrade(self), adapter.clone(), transcript_rx);
        let sync_task = spawn_sync_loop(
            Arc::downgrade(self),
            sandbox.clone(),
            adapter.clone(),
            self.deps.cfg.sync_interval,
        );
        let health_task = spawn_health_loop(
            Arc::downgrade(self),
            sandbox.clone(),
            self.deps.cfg.health_interval,
        );

        self.emit_status(SandboxPhase::Ready, "Ready").await;
        self.deps.bus.emit(SessionEvent::SandboxStatus {
            session_id: self.session_id.clone(),
            sandbox_id: Some(sandbox.id().to_string()),
            status: SandboxPhase::Ready,
        });

        *active = Some(ActiveSandbox {
            sandbox,
            adapter,
            workspace_consumer,
            transcript_consumer,
            sync_task,
            health_task,
        });
        Ok(())
    }

    /// Profile, transcripts, and workspace files go into the sandbox as a
    /// parallel fan-out.
    async fn materialize(
        &self,
        sandbox: &Arc<dyn Sandbox>,
        adapter: &Arc<dyn ArchitectureAdapter>,
    ) -> Result<(), SessionError> {
        let (transcripts, workspace_files) = {
            let st = self.state.lock().await;
            (
                SessionTranscripts {
                    main: st.raw_transcript.clone(),
                    subagents: st.subagent_transcripts(),
                },
                st.workspace_files.clone(),
            )
        };

        let workspace_dir = adapter.paths().workspace_dir.clone();
        let write_workspace = async {
            if workspace_files.is_empty() {
                return Ok(());
            }
            let files = workspace_files
                .iter()
                .map(|f| FileWrite::new(format!("{workspace_dir}/{}", f.path), &f.content))
                .collect();
            let report = sandbox.write_files(files).await?;
            for failed in &report.failed {
                tracing::warn!(
                    session_id = %self.session_id,
                    path = %failed.path,
                    error = %failed.error,
                    "workspace file write failed"
                );
            }
            Ok::<(), SessionError>(())
        };

        tokio::try_join!(
            adapter.setup_agent_profile(&self.profile),
            adapter.setup_session_transcripts(&transcripts),
            write_workspace,
        )?;
        Ok(())
    }

    /// Start both recursive watchers under one activation-wide deadline.
    async fn start_watchers(
        &self,
        sandbox: &Arc<dyn Sandbox>,
        adapter: &Arc<dyn ArchitectureAdapter>,
    ) -> Result<
        (
            UnboundedReceiver<WatchEvent>,
            UnboundedReceiver<WatchEvent>,
        ),
        SessionError,
    > {
        let (workspace_tx, workspace_rx) = unbounded_channel();
        let (transcript_tx, transcript_rx) = unbounded_channel();
        let workspace_cb: WatchCallback = Arc::new(move |ev| {
            let _ = workspace_tx.send(ev);
        });
        let transcript_cb: WatchCallback = Arc::new(move |ev| {
            let _ = transcript_tx.send(ev);
        });

        let workspace_dir = adapter.paths().workspace_dir.clone();
        let storage_dir = adapter.paths().agent_storage_dir.clone();
        sandbox.create_directory(&storage_dir).await?;

        let start = async {
            sandbox.watch(&workspace_dir, workspace_cb).await?;
            sandbox.watch(&storage_dir, transcript_cb).await?;
            Ok::<(), SandboxError>(())
        };
        match tokio::time::timeout(self.deps.cfg.watcher_ready_timeout, start).await {
            Ok(Ok(())) => Ok((workspace_rx, transcript_rx)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SessionError::WatcherStartTimeout(
                self.deps.cfg.watcher_ready_timeout,
            )),
        }
    }

    // ── watcher handlers ────────────────────────────────────────

    async fn handle_workspace_event(&self, event: WatchEvent) {
        match event.kind {
            WatchKind::Add | WatchKind::Change => {
                // Binary or oversized files come through without content and
                // never reach the model.
                let Some(content) = event.content else {
                    return;
                };
                let file = WorkspaceFile {
                    path: event.path,
                    content,
                };
                self.state.lock().await.upsert_workspace_file(file.clone());

                let store = self.deps.store.clone();
                let session_id = self.session_id.clone();
                let to_persist = file.clone();
                tokio::spawn(async move {
                    if let Err(e) = store.save_workspace_file(&session_id, &to_persist).await {
                        tracing::warn!(
                            session_id = %session_id,
                            path = %to_persist.path,
                            error = %e,
                            "workspace file persist failed; next sync retries"
                        );
                    }
                });

                self.deps.bus.emit(SessionEvent::FileModified {
                    session_id: self.session_id.clone(),
                    file,
                });
            }
            WatchKind::Unlink => {
                let removed = self
                    .state
                    .lock()
                    .await
                    .remove_workspace_file(&event.path);
                if removed {
                    self.deps.bus.emit(SessionEvent::FileDeleted {
                        session_id: self.session_id.clone(),
                        path: event.path,
                    });
                }
            }
        }
    }

    async fn handle_transcript_event(
        &self,
        adapter: &Arc<dyn ArchitectureAdapter>,
        event: WatchEvent,
    ) {
        if event.kind == WatchKind::Unlink {
            return;
        }
        let Some(content) = event.content else {
            return;
        };
        let file_name = event
            .path
            .rsplit('/')
            .next()
            .unwrap_or(event.path.as_str())
            .to_string();

        match adapter.identify_transcript_file(&file_name, &content) {
            Some(TranscriptKind::Main) => {
                let diff = {
                    let mut st = self.state.lock().await;
                    st.raw_transcript = content.clone();
                    let subs = st.subagent_transcripts();
                    let parsed = adapter.parse_transcripts(&content, &subs);
                    st.apply_parsed(parsed)
                };
                if let Err(e) = self
                    .deps
                    .store
                    .save_transcript(&self.session_id, &content, None)
                    .await
                {
                    tracing::warn!(
                        session_id = %self.session_id,
                        error = %e,
                        "transcript persist failed; next sync retries"
                    );
                }
                self.deps.bus.emit(SessionEvent::TranscriptChanged {
                    session_id: self.session_id.clone(),
                });
                self.emit_subagent_diff(diff);
            }
            Some(TranscriptKind::Subagent(subagent_id)) => {
                // Placeholder shells stay invisible until they have content.
                if adapter.is_placeholder_transcript(&content) {
                    return;
                }
                let diff = {
                    let mut st = self.state.lock().await;
                    st.subagents
                        .entry(subagent_id.clone())
                        .or_default()
                        .raw_transcript = content.clone();
                    let main = st.raw_transcript.clone();
                    let subs = st.subagent_transcripts();
                    let parsed = adapter.parse_transcripts(&main, &subs);
                    st.apply_parsed(parsed)
                };
                if let Err(e) = self
                    .deps
                    .store
                    .save_transcript(&self.session_id, &content, Some(&subagent_id))
                    .await
                {
                    tracing::warn!(
                        session_id = %self.session_id,
                        subagent_id = %subagent_id,
                        error = %e,
                        "subagent transcript persist failed; next sync retries"
                    );
                }
                self.deps.bus.emit(SessionEvent::SubagentChanged {
                    session_id: self.session_id.clone(),
                    subagent_id,
                });
                self.emit_subagent_diff(diff);
            }
            None => {}
        }
    }

    fn emit_subagent_diff(&self, diff: SubagentDiff) {
        for subagent_id in diff.discovered {
            self.deps.bus.emit(SessionEvent::SubagentDiscovered {
                session_id: self.session_id.clone(),
                subagent_id,
            });
        }
        for subagent_id in diff.completed {
            self.deps.bus.emit(SessionEvent::SubagentCompleted {
                session_id: self.session_id.clone(),
                subagent_id,
            });
        }
    }

    // ── periodic sync ───────────────────────────────────────────

    /// Read back transcripts and workspace files from the sandbox, refresh
    /// the model, and persist everything. At-least-once: failures are
    /// logged and retried next tick.
    async fn sync_once(
        &self,
        sandbox: &Arc<dyn Sandbox>,
        adapter: &Arc<dyn ArchitectureAdapter>,
    ) -> Result<(), SessionError> {
        let transcripts = adapter.read_session_transcripts().await?;

        let workspace_dir = adapter.paths().workspace_dir.clone();
        let rel_paths = sandbox.list_files(&workspace_dir, None).await?;
        let mut workspace_files = Vec::new();
        for rel in rel_paths {
            if self.deps.cfg.is_binary_extension(&rel) {
                continue;
            }
            match sandbox.read_file(&format!("{workspace_dir}/{rel}")).await {
                Ok(Some(content)) => {
                    if content.len() as u64 > self.deps.cfg.max_watched_file_bytes {
                        continue;
                    }
                    workspace_files.push(WorkspaceFile { path: rel, content });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(path = %rel, error = %e, "skipping unreadable workspace file");
                }
            }
        }

        let (diff, last_activity) = {
            let mut st = self.state.lock().await;
            st.raw_transcript = transcripts.main.clone();
            for sub in &transcripts.subagents {
                st.subagents
                    .entry(sub.id.clone())
                    .or_default()
                    .raw_transcript = sub.content.clone();
            }
            for file in &workspace_files {
                st.upsert_workspace_file(file.clone());
            }
            let subs = st.subagent_transcripts();
            let parsed = adapter.parse_transcripts(&transcripts.main, &subs);
            (st.apply_parsed(parsed), st.last_activity)
        };
        self.emit_subagent_diff(diff);

        let store = &self.deps.store;
        if let Err(e) = store
            .save_transcript(&self.session_id, &transcripts.main, None)
            .await
        {
            tracing::warn!(session_id = %self.session_id, error = %e, "sync: main transcript persist failed");
        }
        for sub in &transcripts.subagents {
            if let Err(e) = store
                .save_transcript(&self.session_id, &sub.content, Some(&sub.id))
                .await
            {
                tracing::warn!(session_id = %self.session_id, subagent_id = %sub.id, error = %e, "sync: subagent transcript persist failed");
            }
        }
        for file in &workspace_files {
            if let Err(e) = store.save_workspace_file(&self.session_id, file).await {
                tracing::warn!(session_id = %self.session_id, path = %file.path, error = %e, "sync: workspace file persist failed");
            }
        }
        if let Err(e) = store
            .update_session_record(
                &self.session_id,
                SessionRecordPatch {
                    last_activity: Some(last_activity),
                    ..Default::default()
                },
            )
            .await
        {
            tracing::warn!(session_id = %self.session_id, error = %e, "sync: record update failed");
        }
        Ok(())
    }

    // ── health ──────────────────────────────────────────────────

    async fn note_healthy(&self) {
        let became_ready = {
            let mut st = self.state.lock().await;
            match st.sandbox.as_mut() {
                Some(sandbox) => {
                    sandbox.last_health_check = Some(chrono::Utc::now());
                    if sandbox.status != SandboxPhase::Ready {
                        sandbox.status = SandboxPhase::Ready;
                        sandbox.status_message = Some("Ready".into());
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if became_ready {
            self.emit_status(SandboxPhase::Ready, "Ready").await;
        }
    }

    /// The sandbox died underneath us: stop the loops, mark terminated,
    /// and hand the session id to the manager for unloading.
    async fn on_sandbox_exit(&self, exit_code: i32) {
        tracing::warn!(
            session_id = %self.session_id,
            exit_code,
            "sandbox terminated"
        );
        let taken = self.active.lock().await.take();
        if let Some(active) = taken {
            active.workspace_consumer.abort();
            active.transcript_consumer.abort();
            active.sync_task.abort();
            // The health loop breaks on its own after calling us.
            let _ = active.sandbox.terminate().await;
        }

        let sandbox_id = {
            let mut st = self.state.lock().await;
            st.sandbox.as_mut().and_then(|sb| {
                sb.status = SandboxPhase::Terminated;
                sb.status_message = Some("Sandbox terminated".into());
                sb.sandbox_id.clone()
            })
        };
        self.deps.bus.emit(SessionEvent::Status {
            session_id: self.session_id.clone(),
            sandbox_status: SandboxPhase::Terminated,
            message: "Sandbox terminated".into(),
        });
        self.deps.bus.emit(SessionEvent::SandboxStatus {
            session_id: self.session_id.clone(),
            sandbox_id,
            status: SandboxPhase::Terminated,
        });

        (self.deps.on_sandbox_terminated)(&self.session_id);
    }

    // ── destruction ─────────────────────────────────────────────

    /// Stop loops, run one final sync, and terminate the sandbox. Sessions
    /// without a sandbox touch no provider resources. Best-effort: never
    /// blocks destruction on sandbox failures.
    pub async fn destroy(&self) {
        let taken = self.active.lock().await.take();
        if let Some(active) = taken {
            active.abort_all();

            let terminated = {
                let st = self.state.lock().await;
                matches!(
                    st.sandbox.as_ref().map(|s| s.status),
                    Some(SandboxPhase::Terminated)
                )
            };
            if !terminated {
                if let Err(e) = self.sync_once(&active.sandbox, &active.adapter).await {
                    tracing::warn!(session_id = %self.session_id, error = %e, "final sync failed");
                }
            }
            if let Err(e) = active.sandbox.terminate().await {
                tracing::warn!(session_id = %self.session_id, error = %e, "sandbox terminate failed");
            }
        }
        self.state.lock().await.sandbox = None;
        tracing::info!(session_id = %self.session_id, "session destroyed");
    }
}

// ── background tasks ────────────────────────────────────────────
//
// Tasks hold a Weak<AgentSession>; when the session is dropped or its
// tasks are aborted they stop on their own, so sessions own their loops
// without reference cycles.

fn spawn_workspace_consumer(
    weak: Weak<AgentSession>,
    mut rx: UnboundedReceiver<WatchEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Some(session) = weak.upgrade() else {
                break;
            };
            session.handle_workspace_event(event).await;
        }
    })
}

fn spawn_transcript_consumer(
    weak: Weak<AgentSession>,
    adapter: Arc<dyn ArchitectureAdapter>,
    mut rx: UnboundedReceiver<WatchEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Some(session) = weak.upgrade() else {
                break;
            };
            session.handle_transcript_event(&adapter, event).await;
        }
    })
}

fn spawn_sync_loop(
    weak: Weak<AgentSession>,
    sandbox: Arc<dyn Sandbox>,
    adapter: Arc<dyn ArchitectureAdapter>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tick.tick().await;
        loop {
            tick.tick().await;
            let Some(session) = weak.upgrade() else {
                break;
            };
            if let Err(e) = session.sync_once(&sandbox, &adapter).await {
                tracing::warn!(session_id = %session.session_id, error = %e, "periodic sync failed");
            }
        }
    })
}

fn spawn_health_loop(
    weak: Weak<AgentSession>,
    sandbox: Arc<dyn Sandbox>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tick.tick().await;
        loop {
            tick.tick().await;
            let Some(session) = weak.upgrade() else {
                break;
            };
            match sandbox.poll().await {
                Ok(Some(exit_code)) => {
                    session.on_sandbox_exit(exit_code).await;
                    break;
                }
                Ok(None) => session.note_healthy().await,
                Err(e) => {
                    tracing::warn!(session_id = %session.session_id, error = %e, "health poll failed");
                }
            }
        }
    })
}
