use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{
    AgentProfile, PersistedSession, SessionRecord, SessionRecordPatch, SubagentTranscript,
    WorkspaceFile,
};

use super::Persistence;

/// File-backed persistence under one data directory:
///
/// ```text
/// {base_dir}/
///   profiles/{id}.yaml
///   sessions/{id}/record.json
///   sessions/{id}/transcript
///   sessions/{id}/subagents/{subagentId}
///   sessions/{id}/workspace/{path...}
/// ```
///
/// Records are cached in memory; transcripts and workspace files go
/// straight to disk (they are re-read rarely and can be large).
pub struct FilePersistence {
    base_dir: PathBuf,
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl FilePersistence {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Populate the record cache from disk. Call once at startup.
    pub async fn load_all(&self) -> Result<()> {
        let sessions_dir = self.base_dir.join("sessions");
        if !sessions_dir.exists() {
            return Ok(());
        }
        let mut records = self.records.write().await;
        for entry in std::fs::read_dir(&sessions_dir)
            .with_context(|| format!("reading sessions dir {}", sessions_dir.display()))?
        {
            let entry = entry?;
            let record_path = entry.path().join("record.json");
            if !record_path.is_file() {
                continue;
            }
            let raw = std::fs::read_to_string(&record_path)
                .with_context(|| format!("reading {}", record_path.display()))?;
            match serde_json::from_str::<SessionRecord>(&raw) {
                Ok(record) => {
                    records.insert(record.session_id.clone(), record);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %record_path.display(),
                        error = %e,
                        "skipping unreadable session record"
                    );
                }
            }
        }
        tracing::info!(count = records.len(), "session records loaded");
        Ok(())
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_dir.join("sessions").join(session_id)
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("record.json")
    }

    fn transcript_path(&self, session_id: &str, subagent_id: Option<&str>) -> PathBuf {
        match subagent_id {
            None => self.session_dir(session_id).join("transcript"),
            Some(sub) => self
                .session_dir(session_id)
                .join("subagents")
                .join(sanitize_component(sub)),
        }
    }

    fn flush_record(&self, record: &SessionRecord) -> Result<()> {
        let path = self.record_path(&record.session_id);
        write_atomic(
            &path,
            &serde_json::to_string_pretty(record).context("serializing session record")?,
        )
    }
}

#[async_trait]
impl Persistence for FilePersistence {
    async fn create_session_record(&self, record: SessionRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.session_id) {
            return Ok(());
        }
        self.flush_record(&record)?;
        records.insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn update_session_record(
        &self,
        session_id: &str,
        patch: SessionRecordPatch,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(session_id) else {
            bail!("session record not found: {session_id}");
        };
        if let Some(last_activity) = patch.last_activity {
            record.last_activity = last_activity;
        }
        if let Some(options) = patch.session_options {
            record.session_options = Some(options);
        }
        let record = record.clone();
        drop(records);
        self.flush_record(&record)
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<PersistedSession>> {
        let record = match self.records.read().await.get(session_id) {
            Some(record) => record.clone(),
            None => return Ok(None),
        };

        let main_transcript = read_optional(&self.transcript_path(session_id, None))?
            .unwrap_or_default();

        let mut subagents = Vec::new();
        let subagents_dir = self.session_dir(session_id).join("subagents");
        if subagents_dir.is_dir() {
            for entry in std::fs::read_dir(&subagents_dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let id = entry.file_name().to_string_lossy().to_string();
                let content = std::fs::read_to_string(entry.path())
                    .with_context(|| format!("reading subagent transcript {id}"))?;
                subagents.push(SubagentTranscript { id, content });
            }
            subagents.sort_by(|a, b| a.id.cmp(&b.id));
        }

        let mut workspace_files = Vec::new();
        let workspace_dir = self.session_dir(session_id).join("workspace");
        if workspace_dir.is_dir() {
            collect_workspace_files(&workspace_dir, &workspace_dir, &mut workspace_files)?;
            workspace_files.sort_by(|a, b| a.path.cmp(&b.path));
        }

        Ok(Some(PersistedSession {
            record,
            main_transcript,
            subagents,
            workspace_files,
        }))
    }

    async fn load_agent_profile(&self, profile_id: &str) -> Result<Option<AgentProfile>> {
        let path = self
            .base_dir
            .join("profiles")
            .join(format!("{}.yaml", sanitize_component(profile_id)));
        let Some(raw) = read_optional(&path)? else {
            return Ok(None);
        };
        let profile: AgentProfile = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing profile {}", path.display()))?;
        Ok(Some(profile))
    }

    async fn list_all_sessions(&self) -> Result<Vec<SessionRecord>> {
        let records = self.records.read().await;
        let mut list: Vec<SessionRecord> = records.values().cloned().collect();
        list.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(list)
    }

    async fn save_transcript(
        &self,
        session_id: &str,
        content: &str,
        subagent_id: Option<&str>,
    ) -> Result<()> {
        write_atomic(&self.transcript_path(session_id, subagent_id), content)
    }

    async fn save_workspace_file(&self, session_id: &str, file: &WorkspaceFile) -> Result<()> {
        let workspace_dir = self.session_dir(session_id).join("workspace");
        let rel = safe_relative_path(&file.path)
            .with_context(|| format!("unsafe workspace path: {}", file.path))?;
        write_atomic(&workspace_dir.join(rel), &file.content)
    }

    async fn destroy_session_record(&self, session_id: &str) -> Result<()> {
        self.records.write().await.remove(session_id);
        let dir = self.session_dir(session_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("removing session dir {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Write via a temp file + rename so readers never see partial content.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("creating {}", parent.display()))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

/// Reject path components that would escape the per-session directory.
fn safe_relative_path(raw: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            std::path::Component::Normal(seg) => out.push(seg),
            std::path::Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn collect_workspace_files(
    base: &Path,
    dir: &Path,
    out: &mut Vec<WorkspaceFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_workspace_files(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading workspace file {}", path.display()))?;
            out.push(WorkspaceFile {
                path: rel.to_string_lossy().replace('\\', "/"),
                content,
            });
        }
    }
    Ok(())
}
