use std::collections::BTreeSet;
use std::time::Duration;

/// Runtime tuning knobs, loaded from environment variables.
///
/// Every knob has a production default; tests construct a config directly
/// with short intervals instead of mutating process-global env vars.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Live sessions idle longer than this are reaped by the GC loop.
    pub idle_timeout: Duration,
    /// Interval between durable syncs of transcripts + workspace files.
    pub sync_interval: Duration,
    /// Interval between sandbox liveness polls.
    pub health_interval: Duration,
    /// Budget for the whole watcher-startup phase during activation.
    pub watcher_ready_timeout: Duration,
    /// Watched files larger than this are surfaced without content.
    pub max_watched_file_bytes: u64,
    /// Quiet period before a watched file's content is read.
    pub debounce: Duration,
    /// File extensions never read as text by the watchers.
    pub binary_extensions: BTreeSet<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(15 * 60),
            sync_interval: Duration::from_secs(60),
            health_interval: Duration::from_secs(30),
            watcher_ready_timeout: Duration::from_secs(30),
            max_watched_file_bytes: 1024 * 1024,
            debounce: Duration::from_millis(500),
            binary_extensions: default_binary_extensions(),
        }
    }
}

fn default_binary_extensions() -> BTreeSet<String> {
    [
        "png", "jpg", "jpeg", "gif", "webp", "ico", "bmp", "pdf", "zip", "tar", "gz", "bz2",
        "xz", "zst", "7z", "exe", "dll", "so", "dylib", "a", "o", "bin", "dat", "db", "sqlite",
        "woff", "woff2", "ttf", "eot", "mp3", "mp4", "mov", "avi", "wasm", "class", "jar",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_raw_values(
            std::env::var("COVE_IDLE_TIMEOUT_MS").ok().as_deref(),
            std::env::var("COVE_SYNC_INTERVAL_MS").ok().as_deref(),
            std::env::var("COVE_HEALTH_INTERVAL_MS").ok().as_deref(),
            std::env::var("COVE_WATCHER_READY_TIMEOUT_MS").ok().as_deref(),
            std::env::var("COVE_MAX_WATCHED_FILE_BYTES").ok().as_deref(),
            std::env::var("COVE_DEBOUNCE_MS").ok().as_deref(),
        )
    }

    /// Build a config from raw string values (as they would come from env
    /// vars). Used directly in tests to avoid mutating process-global state.
    pub fn from_raw_values(
        idle_timeout_ms: Option<&str>,
        sync_interval_ms: Option<&str>,
        health_interval_ms: Option<&str>,
        watcher_ready_timeout_ms: Option<&str>,
        max_watched_file_bytes: Option<&str>,
        debounce_ms: Option<&str>,
    ) -> Self {
        let defaults = Self::default();

        fn millis(raw: Option<&str>, fallback: Duration) -> Duration {
            raw.and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        }

        Self {
            idle_timeout: millis(idle_timeout_ms, defaults.idle_timeout),
            sync_interval: millis(sync_interval_ms, defaults.sync_interval),
            health_interval: millis(health_interval_ms, defaults.health_interval),
            watcher_ready_timeout: millis(watcher_ready_timeout_ms, defaults.watcher_ready_timeout),
            max_watched_file_bytes: max_watched_file_bytes
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_watched_file_bytes),
            debounce: millis(debounce_ms, defaults.debounce),
            binary_extensions: defaults.binary_extensions,
        }
    }

    pub fn is_binary_extension(&self, path: &str) -> bool {
        std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| self.binary_extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}
