use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::SessionError;
use crate::events::{EventBus, SessionEvent};
use crate::model::{Architecture, SessionRecord};
use crate::persistence::Persistence;
use crate::sandbox::SandboxProvider;
use crate::session::{AgentSession, SessionDeps, TerminationHook};

/// Registry and lifecycle governor for live sessions.
///
/// Owns the `sessionId → AgentSession` map, the idle GC loop, and the
/// sandbox-termination unload path. Sessions hold no pointer back to the
/// manager; they get a termination hook instead.
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: RuntimeConfig,
    bus: EventBus,
    store: Arc<dyn Persistence>,
    provider: Arc<dyn SandboxProvider>,
    sessions: RwLock<HashMap<String, Arc<AgentSession>>>,
    gc_task: StdMutex<Option<JoinHandle<()>>>,
}

pub struct CreateSessionRequest {
    pub profile_id: String,
    pub architecture: Architecture,
    pub options: Option<Value>,
}

impl SessionManager {
    pub fn new(
        cfg: RuntimeConfig,
        bus: EventBus,
        store: Arc<dyn Persistence>,
        provider: Arc<dyn SandboxProvider>,
    ) -> Self {
        let inner = Arc::new(Inner {
            cfg,
            bus,
            store,
            provider,
            sessions: RwLock::new(HashMap::new()),
            gc_task: StdMutex::new(None),
        });
        let gc = spawn_gc_loop(Arc::downgrade(&inner));
        *inner.gc_task.lock().unwrap() = Some(gc);
        Self { inner }
    }

    fn deps(&self) -> SessionDeps {
        SessionDeps {
            cfg: self.inner.cfg.clone(),
            bus: self.inner.bus.clone(),
            store: self.inner.store.clone(),
            provider: self.inner.provider.clone(),
            on_sandbox_terminated: termination_hook(Arc::downgrade(&self.inner)),
        }
    }

    /// Mint a session id, load the profile, persist the record, and
    /// register the new (sandbox-less) session.
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<Arc<AgentSession>, SessionError> {
        let profile = self
            .inner
            .store
            .load_agent_profile(&request.profile_id)
            .await
            .map_err(SessionError::persistence)?
            .ok_or_else(|| {
                SessionError::NotFound(format!("profile {}", request.profile_id))
            })?;

        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = SessionRecord {
            session_id: session_id.clone(),
            architecture: request.architecture,
            profile_id: request.profile_id,
            created_at: now,
            last_activity: now,
            session_options: request.options.clone(),
        };
        self.inner
            .store
            .create_session_record(record)
            .await
            .map_err(SessionError::persistence)?;

        let session = AgentSession::new(
            &session_id,
            request.architecture,
            profile,
            request.options,
            self.deps(),
        );
        self.inner
            .sessions
            .write()
            .await
            .insert(session_id.clone(), session.clone());

        tracing::info!(session_id = %session_id, architecture = %request.architecture, "session created");
        self.inner.bus.emit(SessionEvent::Created { session_id });
        self.inner.bus.emit(SessionEvent::SessionsChanged);
        Ok(session)
    }

    /// Bring a persisted session back into the live map. No-op when it is
    /// already live.
    pub async fn load_session(&self, session_id: &str) -> Result<Arc<AgentSession>, SessionError> {
        if let Some(session) = self.inner.sessions.read().await.get(session_id) {
            return Ok(session.clone());
        }

        let persisted = self
            .inner
            .store
            .load_session(session_id)
            .await
            .map_err(SessionError::persistence)?
            .ok_or_else(|| SessionError::NotFound(format!("session {session_id}")))?;
        let profile = self
            .inner
            .store
            .load_agent_profile(&persisted.record.profile_id)
            .await
            .map_err(SessionError::persistence)?
            .ok_or_else(|| {
                SessionError::NotFound(format!("profile {}", persisted.record.profile_id))
            })?;

        let session = AgentSession::from_persisted(persisted, profile, self.deps());
        self.inner
            .sessions
            .write()
            .await
            .insert(session_id.to_string(), session.clone());

        tracing::info!(session_id = %session_id, "session loaded");
        self.inner.bus.emit(SessionEvent::Loaded {
            session_id: session_id.to_string(),
        });
        self.inner.bus.emit(SessionEvent::SessionsChanged);
        Ok(session)
    }

    /// Live handle, if any.
    pub async fn get_session(&self, session_id: &str) -> Option<Arc<AgentSession>> {
        self.inner.sessions.read().await.get(session_id).cloned()
    }

    pub async fn live_session_ids(&self) -> Vec<String> {
        self.inner.sessions.read().await.keys().cloned().collect()
    }

    /// Destroy a live session and drop it from the map. The persisted
    /// record survives for later reload.
    pub async fn destroy_session(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self
            .inner
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| SessionError::NotFound(format!("session {session_id}")))?;
        session.destroy().await;
        self.inner.bus.emit(SessionEvent::Destroyed {
            session_id: session_id.to_string(),
        });
        self.inner.bus.emit(SessionEvent::SessionsChanged);
        Ok(())
    }

    /// All known sessions, active and inactive.
    pub async fn list_all_sessions(&self) -> Result<Vec<SessionRecord>, SessionError> {
        self.inner
            .store
            .list_all_sessions()
            .await
            .map_err(SessionError::persistence)
    }

    /// Destroy every live session and stop the GC loop.
    pub async fn shutdown(&self) {
        if let Some(gc) = self.inner.gc_task.lock().unwrap().take() {
            gc.abort();
        }
        let sessions: Vec<_> = self
            .inner
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in sessions {
            session.destroy().await;
        }
        self.inner.bus.emit(SessionEvent::SessionsChanged);
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(gc) = self.inner.gc_task.lock().unwrap().take() {
            gc.abort();
        }
    }
}

impl Inner {
    /// Reap live sessions idle past the timeout. Failures are logged; the
    /// session leaves the map regardless.
    async fn gc_tick(&self) {
        let candidates: Vec<(String, Arc<AgentSession>)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(id, session)| (id.clone(), session.clone()))
                .collect()
        };

        let now = Utc::now();
        for (session_id, session) in candidates {
            let idle = now - session.last_activity().await;
            if idle.to_std().unwrap_or_default() < self.cfg.idle_timeout {
                continue;
            }
            tracing::info!(session_id = %session_id, idle_secs = idle.num_seconds(), "idle session reaped");
            self.sessions.write().await.remove(&session_id);
            session.destroy().await;
            self.bus.emit(SessionEvent::Destroyed {
                session_id: session_id.clone(),
            });
            self.bus.emit(SessionEvent::SessionsChanged);
        }
    }

    /// Unload a session whose sandbox died; persisted state stays for a
    /// later reload.
    async fn unload_terminated(&self, session_id: &str) {
        if self.sessions.write().await.remove(session_id).is_some() {
            tracing::info!(session_id = %session_id, "session unloaded after sandbox termination");
            self.bus.emit(SessionEvent::SessionsChanged);
        }
    }
}

fn termination_hook(weak: Weak<Inner>) -> TerminationHook {
    Arc::new(move |session_id: &str| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            inner.unload_terminated(&session_id).await;
        });
    })
}

fn spawn_gc_loop(weak: Weak<Inner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Tick fast enough that even sub-minute idle timeouts are enforced
        // within two ticks.
        let period = {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner
                .cfg
                .idle_timeout
                .min(std::time::Duration::from_secs(60))
                .max(std::time::Duration::from_millis(10))
        };
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tick.tick().await;
        loop {
            tick.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            inner.gc_tick().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::FilePersistence;
    use crate::testing::MockProvider;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn happy_script() -> String {
        [
            r#"{"type":"system","subtype":"init"}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hi!"}]}}"#,
            r#"{"type":"result","subtype":"success","usage":{"input_tokens":3,"output_tokens":2}}"#,
        ]
        .join("\n")
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        manager: SessionManager,
        bus: EventBus,
        store: Arc<FilePersistence>,
        provider: Arc<MockProvider>,
    }

    async fn fixture_with_cfg(cfg: RuntimeConfig) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let profiles_dir = tmp.path().join("profiles");
        std::fs::create_dir_all(&profiles_dir).unwrap();
        std::fs::write(
            profiles_dir.join("assistant.yaml"),
            "id: assistant\ninstructions: Be helpful.\n",
        )
        .unwrap();

        let store = Arc::new(FilePersistence::new(tmp.path().to_path_buf()));
        let provider = Arc::new(MockProvider::with_default_script(&happy_script()));
        let bus = EventBus::new(256);
        let manager = SessionManager::new(cfg, bus.clone(), store.clone(), provider.clone());
        Fixture {
            _tmp: tmp,
            manager,
            bus,
            store,
            provider,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with_cfg(RuntimeConfig::default()).await
    }

    fn request() -> CreateSessionRequest {
        CreateSessionRequest {
            profile_id: "assistant".into(),
            architecture: Architecture::Claude,
            options: None,
        }
    }

    #[tokio::test]
    async fn create_session_registers_and_persists() {
        let fixture = fixture().await;
        let mut rx = fixture.bus.subscribe();

        let session = fixture.manager.create_session(request()).await.unwrap();
        let session_id = session.session_id().to_string();

        assert!(fixture.manager.get_session(&session_id).await.is_some());
        let records = fixture.manager.list_all_sessions().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].session_id, session_id);

        assert_eq!(rx.recv().await.unwrap().name(), "session:created");
        assert_eq!(rx.recv().await.unwrap().name(), "sessions:changed");
    }

    #[tokio::test]
    async fn create_with_unknown_profile_fails() {
        let fixture = fixture().await;
        let err = fixture
            .manager
            .create_session(CreateSessionRequest {
                profile_id: "ghost".into(),
                architecture: Architecture::Claude,
                options: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn get_unknown_session_is_none() {
        let fixture = fixture().await;
        assert!(fixture.manager.get_session("ghost").await.is_none());
        assert!(matches!(
            fixture.manager.load_session("ghost").await.unwrap_err(),
            SessionError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn destroy_then_reload_resumes_parsed_blocks() {
        let fixture = fixture().await;
        let session = fixture.manager.create_session(request()).await.unwrap();
        let session_id = session.session_id().to_string();

        session.send_message("hello").await.unwrap();
        // Let the agent transcript reach persistence via the final sync on
        // destroy: put it in the sandbox first.
        let sandbox = fixture.provider.last_sandbox().unwrap();
        sandbox.put_file(
            &format!("/root/.claude/projects/-workspace/{session_id}.jsonl"),
            &[
                r#"{"type":"user","uuid":"u1","message":{"content":"hello"}}"#,
                r#"{"type":"assistant","uuid":"a1","message":{"content":[{"type":"text","text":"Hi!"}]}}"#,
            ]
            .join("\n"),
        );

        fixture.manager.destroy_session(&session_id).await.unwrap();
        assert!(fixture.manager.get_session(&session_id).await.is_none());

        let reloaded = fixture.manager.load_session(&session_id).await.unwrap();
        let snapshot = reloaded.state_snapshot().await;
        assert_eq!(snapshot.blocks.len(), 2);
        assert!(snapshot.raw_transcript.contains("Hi!"));
        // Still listed in persistence either way.
        assert_eq!(fixture.manager.list_all_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reload_yields_same_blocks_as_before_destruction() {
        let fixture = fixture().await;
        let session = fixture.manager.create_session(request()).await.unwrap();
        let session_id = session.session_id().to_string();
        session.send_message("hello").await.unwrap();

        let sandbox = fixture.provider.last_sandbox().unwrap();
        let transcript = [
            r#"{"type":"user","uuid":"u1","message":{"content":"hello"}}"#,
            r#"{"type":"assistant","uuid":"a1","message":{"content":[{"type":"text","text":"Hi!"}]}}"#,
            r#"{"type":"result","subtype":"success","uuid":"r1","num_turns":1}"#,
        ]
        .join("\n");
        sandbox.put_file(
            &format!("/root/.claude/projects/-workspace/{session_id}.jsonl"),
            &transcript,
        );

        // Feed the model the same transcript the sandbox holds, then
        // destroy (final sync persists it) and reload.
        fixture
            .store
            .save_transcript(&session_id, &transcript, None)
            .await
            .unwrap();
        let before = crate::adapter::parse_transcripts(Architecture::Claude, &transcript, &[]);

        fixture.manager.destroy_session(&session_id).await.unwrap();
        let reloaded = fixture.manager.load_session(&session_id).await.unwrap();
        let after = reloaded.state_snapshot().await;

        assert_eq!(after.blocks, before.blocks);
    }

    #[tokio::test]
    async fn idle_sessions_are_reaped() {
        let cfg = RuntimeConfig {
            idle_timeout: Duration::from_millis(50),
            ..RuntimeConfig::default()
        };
        let fixture = fixture_with_cfg(cfg).await;
        let session = fixture.manager.create_session(request()).await.unwrap();
        let session_id = session.session_id().to_string();
        drop(session);

        // Within two GC ticks the idle session is gone from the live set
        // but survives in persistence.
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if fixture.manager.get_session(&session_id).await.is_none() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("idle session was not reaped");

        assert_eq!(fixture.manager.list_all_sessions().await.unwrap().len(), 1);
        // No sandbox was ever created for it.
        assert_eq!(fixture.provider.provision_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dead_sandbox_unloads_session_but_keeps_record() {
        let cfg = RuntimeConfig {
            health_interval: Duration::from_millis(30),
            ..RuntimeConfig::default()
        };
        let fixture = fixture_with_cfg(cfg).await;
        let session = fixture.manager.create_session(request()).await.unwrap();
        let session_id = session.session_id().to_string();
        session.send_message("hello").await.unwrap();
        drop(session);

        fixture.provider.last_sandbox().unwrap().mark_exited(137);

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if fixture.manager.get_session(&session_id).await.is_none() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("terminated session was not unloaded");

        // listAllSessions still returns it; it can be reloaded later.
        assert_eq!(fixture.manager.list_all_sessions().await.unwrap().len(), 1);
        assert!(fixture.manager.load_session(&session_id).await.is_ok());
    }

    #[tokio::test]
    async fn load_is_noop_for_live_sessions() {
        let fixture = fixture().await;
        let session = fixture.manager.create_session(request()).await.unwrap();
        let session_id = session.session_id().to_string();

        let loaded = fixture.manager.load_session(&session_id).await.unwrap();
        assert!(Arc::ptr_eq(&session, &loaded));
    }

    #[tokio::test]
    async fn shutdown_destroys_all_live_sessions() {
        let fixture = fixture().await;
        fixture.manager.create_session(request()).await.unwrap();
        fixture.manager.create_session(request()).await.unwrap();
        assert_eq!(fixture.manager.live_session_ids().await.len(), 2);

        fixture.manager.shutdown().await;
        assert!(fixture.manager.live_session_ids().await.is_empty());
    }
}
