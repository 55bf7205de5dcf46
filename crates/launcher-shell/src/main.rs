use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use launcher_proto::config::Config;
use launcher_shell::icons::FileIconStore;
use launcher_shell::upgrade::download::HttpFetcher;
use launcher_shell::upgrade::extract::CommandExtractor;
use launcher_shell::upgrade::InstallPrompter;
use launcher_shell::{
    handshake, AppContext, Shell, ShellCommand, ShellEvent, ShellHandle, ShellServices, Transport,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Prompter for the console front-end: offers a folder under the data dir
/// once, never blocks on alerts, and leaves restarts to the user.
struct ConsolePrompter {
    fallback: PathBuf,
    offered: AtomicBool,
}

#[async_trait]
impl InstallPrompter for ConsolePrompter {
    async fn choose_folder(&self, _suggested: Option<&Path>) -> Option<PathBuf> {
        if self.offered.swap(true, Ordering::SeqCst) {
            return None;
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.fallback).await {
            tracing::warn!("could not create {}: {}", self.fallback.display(), e);
        }
        eprintln!("installing into {}", self.fallback.display());
        Some(self.fallback.clone())
    }

    async fn alert(&self, message: &str) {
        eprintln!("{}", message);
    }

    async fn confirm_restart(&self) -> bool {
        eprintln!("upgrade installed; type `restart` to restart the launcher");
        false
    }
}

fn describe(event: &ShellEvent) -> Option<String> {
    Some(match event {
        ShellEvent::ViewUpdated { route, view } => format!(
            "[{}] {:?} total={:?} pages={}",
            route,
            view.keyset_state,
            view.total,
            view.pages.len()
        ),
        ShellEvent::RandomPicked(record) => format!("random: {} ({})", record.title, record.id),
        ShellEvent::PlaylistsUpdated { route, playlists } => {
            format!("[{}] {} playlist(s)", route, playlists.len())
        }
        ShellEvent::UpgradeUpdated(stage) if stage.phase.is_busy() => format!(
            "upgrade {}: {}",
            stage.id(),
            stage.state.install_progress_note
        ),
        ShellEvent::UpgradeUpdated(stage) => format!("upgrade {}: {:?}", stage.id(), stage.phase),
        ShellEvent::Log(entry) => entry.display(),
        ShellEvent::RequestFailed { what, message } => format!("{} failed: {}", what, message),
        ShellEvent::Disconnected => "disconnected from back".to_string(),
        ShellEvent::PlatformsUpdated(_) | ShellEvent::IconsUpdated(_) | ShellEvent::ContextChanged => {
            return None
        }
    })
}

/// Read commands from stdin until EOF or `quit`.
async fn console(handle: ShellHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = ShellCommand::parse(&line) else {
            eprintln!("unrecognised command: {}", line.trim());
            continue;
        };
        let quit = command == ShellCommand::Quit;
        if handle.send(command).await.is_err() || quit {
            break;
        }
    }
    let _ = handle.send(ShellCommand::Quit).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = launcher_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("launcher.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; keep HTTP client internals quiet by default.
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("launcher log: {}", log_path.display());
    tracing::info!("launcher shell starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let config_path = Config::config_path();
    let config = match Config::load_from(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("config unreadable ({}), using defaults", e);
            Config::default()
        }
    };

    // ── Connect to the back ──────────────────────────────────────────────────
    let transport = Transport::connect_with_retry(
        &config.back.address,
        config.back.connect_attempts,
        Duration::from_millis(config.back.connect_retry_ms),
    )
    .await?;

    let context = AppContext::new();
    context.attach(&transport);

    let services = ShellServices {
        prompter: Arc::new(ConsolePrompter {
            fallback: data_dir.join("content"),
            offered: AtomicBool::new(false),
        }),
        fetcher: Arc::new(HttpFetcher::new()),
        extractor: Arc::new(CommandExtractor::detect()),
        icon_store: Box::new(FileIconStore::new(config.paths.icon_cache_dir.clone())),
    };
    let default_route = config.views.default_library.clone();
    let (shell, handle) = Shell::new(
        config,
        Some(config_path),
        transport.clone(),
        Arc::clone(&context),
        services,
    );

    handshake(&transport, &context).await?;
    tracing::info!("handshake complete");

    // ── Print events ─────────────────────────────────────────────────────────
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = describe(&event) {
                        println!("{}", line);
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!("console missed {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let _ = handle.send(ShellCommand::OpenRoute(default_route)).await;
    tokio::spawn(console(handle.clone()));

    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_handle.send(ShellCommand::Quit).await;
        }
    });
    drop(handle);

    shell.run().await?;
    tracing::info!("launcher shell exiting");
    Ok(())
}
