use std::path::{Path, PathBuf};

use crate::sandbox::error::SandboxError;

/// Path containment for the local provider: every guest-absolute path
/// (`/workspace/...`, `/root/...`) resolves under one host directory.
///
/// This is NOT a chroot — it is best-effort validation so a misbehaving
/// agent cannot address files outside its sandbox directory through the
/// control plane's own file operations.
pub struct Jail {
    root: PathBuf,
}

impl Jail {
    /// Create a jail rooted at `root`. Creates the directory if needed.
    pub fn create(root: PathBuf) -> Result<Self, SandboxError> {
        std::fs::create_dir_all(&root).map_err(|e| {
            SandboxError::Provision(format!(
                "failed to create sandbox dir {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a guest path to a host path, rejecting traversal out of the
    /// sandbox directory. Works for paths that do not exist yet.
    pub fn resolve(&self, guest_path: &str) -> Result<PathBuf, SandboxError> {
        let guest = Path::new(guest_path);
        let relative = if guest.is_absolute() {
            guest.strip_prefix("/").unwrap_or(guest)
        } else {
            guest
        };

        let mut normalized = PathBuf::new();
        for component in relative.components() {
            match component {
                std::path::Component::Normal(seg) => normalized.push(seg),
                std::path::Component::CurDir => {}
                std::path::Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(SandboxError::Exec(format!(
                            "path escapes sandbox: {guest_path}"
                        )));
                    }
                }
                // RootDir already stripped; Prefix is Windows-only
                _ => {}
            }
        }

        // Canonicalize the root so symlinked temp dirs resolve consistently
        // (e.g. /var vs /private/var on macOS).
        let root_canonical = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());

        Ok(root_canonical.join(normalized))
    }

    pub fn read_file(&self, guest_path: &str) -> Result<Option<String>, SandboxError> {
        let path = self.resolve(guest_path)?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_file(&self, guest_path: &str, content: &str) -> Result<(), SandboxError> {
        let path = self.resolve(guest_path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn create_directory(&self, guest_path: &str) -> Result<(), SandboxError> {
        let path = self.resolve(guest_path)?;
        std::fs::create_dir_all(&path)?;
        Ok(())
    }

    /// Recursively list files under `dir`. Without a pattern, paths are
    /// relative to `dir`; with a file-name glob, matches come back
    /// guest-absolute. A missing directory yields an empty list.
    pub fn list_files(
        &self,
        dir: &str,
        pattern: Option<&str>,
    ) -> Result<Vec<String>, SandboxError> {
        let host_dir = self.resolve(dir)?;
        if !host_dir.exists() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        collect_files(&host_dir, &host_dir, &mut found)?;
        found.sort();

        let guest_dir = dir.trim_end_matches('/');
        let paths = found
            .into_iter()
            .filter(|rel| match pattern {
                Some(pat) => {
                    let name = Path::new(rel)
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or(rel);
                    glob_match(pat, name)
                }
                None => true,
            })
            .map(|rel| match pattern {
                Some(_) => format!("{guest_dir}/{rel}"),
                None => rel,
            })
            .collect();
        Ok(paths)
    }

    /// Remove the entire sandbox directory.
    pub fn destroy(&self) -> Result<(), SandboxError> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), SandboxError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

/// Minimal `*`-only glob, enough for patterns like `agent-*.jsonl`.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let mut segments = pattern.split('*');
    let first = segments.next().unwrap_or("");
    if !name.starts_with(first) {
        return false;
    }
    let mut rest = &name[first.len()..];
    let mut last: Option<&str> = None;
    for seg in segments {
        last = Some(seg);
        if seg.is_empty() {
            continue;
        }
        match rest.find(seg) {
            Some(idx) => rest = &rest[idx + seg.len()..],
            None => return false,
        }
    }
    match last {
        // Pattern had no '*': exact match required
        None => first == name,
        Some(seg) if !seg.is_empty() => name.ends_with(seg),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jail() -> (tempfile::TempDir, Jail) {
        let tmp = tempfile::tempdir().unwrap();
        let jail = Jail::create(tmp.path().join("sbx")).unwrap();
        (tmp, jail)
    }

    #[test]
    fn write_then_read_roundtrip() {
        let (_tmp, jail) = jail();
        jail.write_file("/workspace/notes.md", "# hi").unwrap();
        assert_eq!(
            jail.read_file("/workspace/notes.md").unwrap().as_deref(),
            Some("# hi")
        );
    }

    #[test]
    fn read_missing_file_is_none() {
        let (_tmp, jail) = jail();
        assert!(jail.read_file("/workspace/nope.txt").unwrap().is_none());
    }

    #[test]
    fn write_creates_parents() {
        let (_tmp, jail) = jail();
        jail.write_file("/workspace/deep/nested/file.txt", "x").unwrap();
        assert!(jail.read_file("/workspace/deep/nested/file.txt").unwrap().is_some());
    }

    #[test]
    fn path_traversal_blocked() {
        let (tmp, jail) = jail();
        std::fs::write(tmp.path().join("secret.txt"), "secret").unwrap();
        assert!(jail.read_file("/../secret.txt").is_err());
        assert!(jail.write_file("/workspace/../../evil.txt", "x").is_err());
    }

    #[test]
    fn list_files_relative_without_pattern() {
        let (_tmp, jail) = jail();
        jail.write_file("/workspace/a.txt", "a").unwrap();
        jail.write_file("/workspace/sub/b.txt", "b").unwrap();
        let files = jail.list_files("/workspace", None).unwrap();
        assert_eq!(files, vec!["a.txt".to_string(), "sub/b.txt".to_string()]);
    }

    #[test]
    fn list_files_absolute_with_pattern() {
        let (_tmp, jail) = jail();
        jail.write_file("/root/.claude/sessions/agent-abc.jsonl", "{}").unwrap();
        jail.write_file("/root/.claude/sessions/main.jsonl", "{}").unwrap();
        let files = jail
            .list_files("/root/.claude/sessions", Some("agent-*.jsonl"))
            .unwrap();
        assert_eq!(files, vec!["/root/.claude/sessions/agent-abc.jsonl".to_string()]);
    }

    #[test]
    fn list_files_missing_dir_is_empty() {
        let (_tmp, jail) = jail();
        assert!(jail.list_files("/nothing/here", None).unwrap().is_empty());
    }

    #[test]
    fn destroy_removes_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("sbx");
        let jail = Jail::create(root.clone()).unwrap();
        jail.write_file("/workspace/file.txt", "data").unwrap();
        jail.destroy().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("agent-*.jsonl", "agent-abc.jsonl"));
        assert!(glob_match("*.json", "session.json"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("exact.txt", "exact.txt"));
        assert!(!glob_match("agent-*.jsonl", "session.jsonl"));
        assert!(!glob_match("exact.txt", "other.txt"));
        assert!(!glob_match("*.jsonl", "file.json"));
    }
}
