//! Upgrade installer.
//!
//! ```text
//!  resolve folder ──▶ Downloading ──▶ Extracting ──▶ (next source…) ──▶ Installing ──▶ Complete
//!        │                 └──────────────┴──────── error ──▶ Failed(msg)
//!        └─ picker cancelled ──▶ nothing changes
//! ```
//!
//! The installer never touches `UpgradeStages` directly.  Every change is
//! sent as an `InstallerEvent` to whoever owns the stage list, so it can run
//! on its own task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use launcher_proto::model::UpgradeDescriptor;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::folder::validate_folder;
use super::progress::{describe_bytes, ProgressThrottle};
use super::{archive_name, marker_path, UpgradePhase, UpgradeStatePatch};

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },
    #[error("extracting {archive} failed: {message}")]
    Extract { archive: String, message: String },
    #[error("no archive extractor found (set LAUNCHER_EXTRACTOR or install 7z/tar)")]
    NoExtractor,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The folder picker was dismissed; nothing was installed.
    Cancelled,
    Installed { restart_requested: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstallerEvent {
    Stage {
        stage_id: String,
        patch: UpgradeStatePatch,
    },
    /// The user picked a new, valid install folder.
    FolderSelected(PathBuf),
}

/// User interaction the installer needs.  Implemented by the front-end.
#[async_trait]
pub trait InstallPrompter: Send + Sync {
    /// Ask for an install folder.  `None` means the user cancelled.
    async fn choose_folder(&self, suggested: Option<&Path>) -> Option<PathBuf>;
    /// Blocking alert; returns once dismissed.
    async fn alert(&self, message: &str);
    async fn confirm_restart(&self) -> bool;
}

#[async_trait]
pub trait PackageFetcher: Send + Sync {
    /// Download `url` to `dest`.  `progress` gets the bytes written so far
    /// and the total when known.
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> Result<(), UpgradeError>;
}

#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), UpgradeError>;
}

#[derive(Clone)]
pub struct Installer {
    download_dir: PathBuf,
    progress_interval: Duration,
    prompter: Arc<dyn InstallPrompter>,
    fetcher: Arc<dyn PackageFetcher>,
    extractor: Arc<dyn ArchiveExtractor>,
    events: mpsc::UnboundedSender<InstallerEvent>,
}

impl Installer {
    pub fn new(
        download_dir: PathBuf,
        progress_interval: Duration,
        prompter: Arc<dyn InstallPrompter>,
        fetcher: Arc<dyn PackageFetcher>,
        extractor: Arc<dyn ArchiveExtractor>,
        events: mpsc::UnboundedSender<InstallerEvent>,
    ) -> Self {
        Self {
            download_dir,
            progress_interval,
            prompter,
            fetcher,
            extractor,
            events,
        }
    }

    /// Install every source of `descriptor` into `folder` (or a folder the
    /// user picks if that one is unusable).
    pub async fn install(
        &self,
        descriptor: &UpgradeDescriptor,
        folder: Option<PathBuf>,
    ) -> Result<InstallOutcome, UpgradeError> {
        let Some(folder) = self.resolve_folder(folder).await else {
            info!("upgrade {}: folder selection cancelled", descriptor.id);
            return Ok(InstallOutcome::Cancelled);
        };

        info!(
            "upgrade {}: installing {} source(s) into {}",
            descriptor.id,
            descriptor.sources.len(),
            folder.display()
        );
        self.emit(
            &descriptor.id,
            UpgradeStatePatch {
                is_installing: Some(true),
                is_installation_complete: Some(false),
                ..UpgradeStatePatch::phase(UpgradePhase::Downloading)
            }
            .note("Starting download"),
        );

        if let Err(e) = self.run(descriptor, &folder).await {
            error!("upgrade {} failed: {}", descriptor.id, e);
            self.emit(
                &descriptor.id,
                UpgradeStatePatch {
                    is_installing: Some(false),
                    ..UpgradeStatePatch::phase(UpgradePhase::Failed(e.to_string()))
                }
                .note(format!("Failed: {}", e)),
            );
            return Err(e);
        }

        self.emit(
            &descriptor.id,
            UpgradeStatePatch {
                is_installing: Some(false),
                is_installation_complete: Some(true),
                already_installed: Some(true),
                up_to_date: Some(true),
                ..UpgradeStatePatch::phase(UpgradePhase::Complete)
            }
            .note("Installation complete"),
        );
        info!("upgrade {}: complete", descriptor.id);

        let restart_requested = self.prompter.confirm_restart().await;
        Ok(InstallOutcome::Installed { restart_requested })
    }

    /// A usable install folder, asking the user until they pick a valid one
    /// or cancel.
    async fn resolve_folder(&self, current: Option<PathBuf>) -> Option<PathBuf> {
        if let Some(path) = &current {
            match validate_folder(path) {
                Ok(()) => return current,
                Err(e) => warn!("configured install folder unusable: {}", e),
            }
        }

        let mut suggested = current;
        loop {
            let chosen = self.prompter.choose_folder(suggested.as_deref()).await?;
            match validate_folder(&chosen) {
                Ok(()) => {
                    let _ = self
                        .events
                        .send(InstallerEvent::FolderSelected(chosen.clone()));
                    return Some(chosen);
                }
                Err(e) => {
                    warn!("chosen install folder rejected: {}", e);
                    self.prompter
                        .alert(&format!("Cannot install here: {}. Please choose another folder.", e))
                        .await;
                    suggested = Some(chosen);
                }
            }
        }
    }

    async fn run(&self, descriptor: &UpgradeDescriptor, folder: &Path) -> Result<(), UpgradeError> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let mut throttle = ProgressThrottle::new(self.progress_interval);
        let count = descriptor.sources.len();
        let id = descriptor.id.as_str();

        for (i, source) in descriptor.sources.iter().enumerate() {
            let archive = self.download_dir.join(archive_name(id, source));
            let label = format!("{} ({}/{})", descriptor.title, i + 1, count);

            self.progress(&mut throttle, id, UpgradePhase::Downloading, format!("Downloading {}", label));
            let fetched = {
                let mut on_progress = |done: u64, total: Option<u64>| {
                    self.progress(
                        &mut throttle,
                        id,
                        UpgradePhase::Downloading,
                        format!("Downloading {}: {}", label, describe_bytes(done, total)),
                    );
                };
                self.fetcher.fetch(source, &archive, &mut on_progress).await
            };
            if let Err(e) = fetched {
                let _ = tokio::fs::remove_file(&archive).await;
                return Err(e);
            }

            self.progress(&mut throttle, id, UpgradePhase::Extracting, format!("Extracting {}", label));
            let extracted = self.extractor.extract(&archive, folder).await;
            if let Err(e) = tokio::fs::remove_file(&archive).await {
                warn!("could not remove {}: {}", archive.display(), e);
            }
            extracted?;
        }

        self.progress(&mut throttle, id, UpgradePhase::Installing, "Finishing up".to_string());
        let marker = marker_path(folder, id);
        if let Some(parent) = marker.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&marker, descriptor.version.as_deref().unwrap_or("")).await?;
        Ok(())
    }

    fn progress(&self, throttle: &mut ProgressThrottle, id: &str, phase: UpgradePhase, note: String) {
        if throttle.should_emit(&phase, Instant::now()) {
            self.emit(id, UpgradeStatePatch::phase(phase).note(note));
        }
    }

    fn emit(&self, id: &str, patch: UpgradeStatePatch) {
        let _ = self.events.send(InstallerEvent::Stage {
            stage_id: id.to_string(),
            patch,
        });
    }
}
