use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use cove::config::RuntimeConfig;
use cove::events::{EventBus, SessionEvent};
use cove::manager::{CreateSessionRequest, SessionManager};
use cove::model::Architecture;
use cove::persistence::{FilePersistence, Persistence};
use cove::sandbox::local::{LocalProvider, LocalProviderConfig};

#[derive(Parser)]
#[command(name = "cove", about = "Control plane for coding agents in ephemeral sandboxes")]
enum Cli {
    /// Start (or resume) a session and chat with it over stdin
    Chat {
        /// Agent family to run
        #[arg(long, default_value = "claude")]
        architecture: Architecture,
        /// Agent profile id (profiles/<id>.yaml in the data dir)
        #[arg(long, default_value = "assistant")]
        profile: String,
        /// Resume an existing session instead of creating one
        #[arg(long)]
        session: Option<String>,
        /// Data directory (default ~/.cove)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// List all known sessions
    Sessions {
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cove=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match Cli::parse() {
        Cli::Chat {
            architecture,
            profile,
            session,
            data_dir,
        } => chat(architecture, profile, session, data_dir).await,
        Cli::Sessions { data_dir } => list_sessions(data_dir).await,
    }
}

fn resolve_data_dir(data_dir: Option<PathBuf>) -> PathBuf {
    data_dir.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cove")
    })
}

/// Seed a starter profile on first run so `cove chat` works out of the box.
fn ensure_default_profile(base_dir: &std::path::Path, profile_id: &str) -> Result<()> {
    let path = base_dir.join("profiles").join(format!("{profile_id}.yaml"));
    if path.exists() {
        return Ok(());
    }
    let parent = path.parent().context("profile path has no parent")?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("creating {}", parent.display()))?;
    std::fs::write(
        &path,
        format!(
            "id: {profile_id}\ninstructions: |\n  You are a general-purpose coding assistant.\n"
        ),
    )
    .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote starter profile");
    Ok(())
}

async fn chat(
    architecture: Architecture,
    profile: String,
    session: Option<String>,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let base_dir = resolve_data_dir(data_dir);
    ensure_default_profile(&base_dir, &profile)?;

    let cfg = RuntimeConfig::from_env();
    let store = Arc::new(FilePersistence::new(base_dir.clone()));
    store.load_all().await.context("loading session records")?;
    let provider = Arc::new(
        LocalProvider::new(LocalProviderConfig::new(base_dir.join("sandboxes"), &cfg))
            .context("initializing local sandbox provider")?,
    );
    let bus = EventBus::new(256);
    let manager = SessionManager::new(cfg, bus.clone(), store, provider);

    let handle = match session {
        Some(id) => manager.load_session(&id).await?,
        None => {
            manager
                .create_session(CreateSessionRequest {
                    profile_id: profile,
                    architecture,
                    options: None,
                })
                .await?
        }
    };
    let session_id = handle.session_id().to_string();
    println!("session {session_id} — type a message, or \"exit\" to quit");

    // Print domain events as they arrive.
    let mut rx = bus.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "exit" {
            break;
        }
        if let Err(e) = handle.send_message(text).await {
            eprintln!("error: {e}");
        }
    }

    manager.shutdown().await;
    printer.abort();
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Status { message, .. } => println!("· {message}"),
        SessionEvent::BlockDelta { delta, .. } => {
            use std::io::Write;
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        SessionEvent::BlockComplete { block, .. } => {
            use cove::model::BlockContent;
            match &block.content {
                BlockContent::AssistantText { .. } => println!(),
                BlockContent::ToolUse { tool_name, .. } => println!("[tool: {tool_name}]"),
                BlockContent::System { message, .. } => println!("[{message}]"),
                _ => {}
            }
        }
        SessionEvent::FileModified { file, .. } => println!("[file changed: {}]", file.path),
        SessionEvent::FileDeleted { path, .. } => println!("[file deleted: {path}]"),
        SessionEvent::SubagentDiscovered { subagent_id, .. } => {
            println!("[subagent started: {subagent_id}]")
        }
        SessionEvent::SubagentCompleted { subagent_id, .. } => {
            println!("[subagent finished: {subagent_id}]")
        }
        SessionEvent::Error { message, .. } => eprintln!("[error: {message}]"),
        _ => {}
    }
}

async fn list_sessions(data_dir: Option<PathBuf>) -> Result<()> {
    let base_dir = resolve_data_dir(data_dir);
    let store = FilePersistence::new(base_dir);
    store.load_all().await?;
    let mut sessions = store.list_all_sessions().await?;
    sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));

    if sessions.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    for record in sessions {
        println!(
            "{}  {}  profile={}  last_activity={}",
            record.session_id,
            record.architecture,
            record.profile_id,
            record.last_activity.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
