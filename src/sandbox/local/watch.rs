use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};

use crate::sandbox::error::SandboxError;
use crate::sandbox::types::{WatchCallback, WatchEvent, WatchKind};

/// Recursive, debounced directory watcher for the local provider.
///
/// File content is read after the debounce window settles, so callers see
/// whole writes rather than partial ones. Content is withheld for files over
/// `max_bytes`, files with a known binary extension, and non-UTF-8 files.
pub struct DirWatcher {
    /// Keep the debouncer alive — dropping it stops the watcher thread.
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

impl DirWatcher {
    pub fn start(
        root: PathBuf,
        debounce: Duration,
        max_bytes: u64,
        binary_extensions: BTreeSet<String>,
        callback: WatchCallback,
    ) -> Result<Self, SandboxError> {
        std::fs::create_dir_all(&root)
            .map_err(|e| SandboxError::Watch(format!("cannot create watch root: {e}")))?;

        // Track known files so later events can be classified add vs change.
        let seen: Mutex<HashSet<PathBuf>> = Mutex::new(existing_files(&root));

        let watch_root = root.clone();
        let mut debouncer = new_debouncer(
            debounce,
            move |events: Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "fs watcher error");
                        return;
                    }
                };

                for event in events {
                    if event.kind != DebouncedEventKind::Any {
                        continue;
                    }
                    let path = &event.path;
                    if path.is_dir() {
                        continue;
                    }

                    let rel = match path.strip_prefix(&watch_root) {
                        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                        Err(_) => continue,
                    };

                    let exists = path.exists();
                    let kind = {
                        let mut seen = seen.lock().unwrap();
                        if exists {
                            if seen.insert(path.clone()) {
                                WatchKind::Add
                            } else {
                                WatchKind::Change
                            }
                        } else {
                            if !seen.remove(path) {
                                // Never observed and already gone — skip
                                continue;
                            }
                            WatchKind::Unlink
                        }
                    };

                    let content = if exists {
                        read_text_content(path, &rel, max_bytes, &binary_extensions)
                    } else {
                        None
                    };

                    callback(WatchEvent {
                        kind,
                        path: rel,
                        content,
                    });
                }
            },
        )
        .map_err(|e| SandboxError::Watch(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&root, notify::RecursiveMode::Recursive)
            .map_err(|e| SandboxError::Watch(e.to_string()))?;

        tracing::debug!(root = %root.display(), "directory watcher started");

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

fn existing_files(root: &std::path::Path) -> HashSet<PathBuf> {
    let mut files = HashSet::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.insert(path);
            }
        }
    }
    files
}

fn read_text_content(
    path: &std::path::Path,
    rel: &str,
    max_bytes: u64,
    binary_extensions: &BTreeSet<String>,
) -> Option<String> {
    let ext = std::path::Path::new(rel)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if let Some(ext) = ext {
        if binary_extensions.contains(&ext) {
            return None;
        }
    }

    let size = std::fs::metadata(path).ok()?.len();
    if size > max_bytes {
        return None;
    }

    // Non-UTF-8 content is treated as binary regardless of extension.
    std::fs::read_to_string(path).ok()
}
