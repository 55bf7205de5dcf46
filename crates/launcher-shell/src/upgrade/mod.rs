//! Optional content packages ("upgrade stages") offered by the back.
//!
//! Each stage is checked against the install folder on startup, then
//! installed on demand by the `installer`.  Stage state is only ever changed
//! through `UpgradeStages::apply`, which merges a partial patch; the whole
//! list is replaced only by `load`.

use std::path::{Path, PathBuf};

use launcher_proto::model::UpgradeDescriptor;
use tracing::debug;

pub mod download;
pub mod extract;
pub mod folder;
pub mod installer;
pub mod progress;

#[cfg(test)]
mod tests;

pub use installer::{
    ArchiveExtractor, InstallOutcome, InstallPrompter, Installer, InstallerEvent, PackageFetcher,
    UpgradeError,
};

/// Folder (under the install folder) holding per-stage version markers.
pub const MARKER_DIR: &str = ".upgrades";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UpgradePhase {
    #[default]
    NotChecked,
    Checking,
    NotInstalled,
    Installed {
        up_to_date: bool,
    },
    Downloading,
    Extracting,
    Installing,
    Complete,
    /// A step failed; the install can be retried.
    Failed(String),
}

impl UpgradePhase {
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UpgradePhase::Downloading | UpgradePhase::Extracting | UpgradePhase::Installing
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpgradeStageState {
    pub checks_done: bool,
    pub already_installed: bool,
    pub up_to_date: bool,
    pub is_installing: bool,
    pub is_installation_complete: bool,
    pub install_progress_note: String,
}

/// Partial update of one stage.  `None` fields are left alone.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpgradeStatePatch {
    pub checks_done: Option<bool>,
    pub already_installed: Option<bool>,
    pub up_to_date: Option<bool>,
    pub is_installing: Option<bool>,
    pub is_installation_complete: Option<bool>,
    pub install_progress_note: Option<String>,
    pub phase: Option<UpgradePhase>,
}

impl UpgradeStatePatch {
    pub fn phase(phase: UpgradePhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.install_progress_note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeStage {
    pub descriptor: UpgradeDescriptor,
    pub state: UpgradeStageState,
    pub phase: UpgradePhase,
}

impl UpgradeStage {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpgradeStages {
    stages: Vec<UpgradeStage>,
}

impl UpgradeStages {
    /// Replace the whole list.  Every stage starts unchecked.
    pub fn load(&mut self, descriptors: Vec<UpgradeDescriptor>) {
        self.stages = descriptors
            .into_iter()
            .map(|descriptor| UpgradeStage {
                descriptor,
                state: UpgradeStageState::default(),
                phase: UpgradePhase::NotChecked,
            })
            .collect();
    }

    pub fn all(&self) -> &[UpgradeStage] {
        &self.stages
    }

    pub fn get(&self, id: &str) -> Option<&UpgradeStage> {
        self.stages.iter().find(|s| s.id() == id)
    }

    pub fn any_installing(&self) -> bool {
        self.stages.iter().any(|s| s.state.is_installing)
    }

    /// Merge `patch` into stage `id`.  Returns the updated stage, or `None`
    /// for an unknown id.
    pub fn apply(&mut self, id: &str, patch: UpgradeStatePatch) -> Option<&UpgradeStage> {
        let stage = self.stages.iter_mut().find(|s| s.descriptor.id == id)?;
        let s = &mut stage.state;
        if let Some(v) = patch.checks_done {
            s.checks_done = v;
        }
        if let Some(v) = patch.already_installed {
            s.already_installed = v;
        }
        if let Some(v) = patch.up_to_date {
            s.up_to_date = v;
        }
        if let Some(v) = patch.is_installing {
            s.is_installing = v;
        }
        if let Some(v) = patch.is_installation_complete {
            s.is_installation_complete = v;
        }
        if let Some(v) = patch.install_progress_note {
            s.install_progress_note = v;
        }
        if let Some(phase) = patch.phase {
            debug!("upgrade {}: {:?} -> {:?}", id, stage.phase, phase);
            stage.phase = phase;
        }
        Some(stage)
    }
}

pub fn marker_path(folder: &Path, stage_id: &str) -> PathBuf {
    folder.join(MARKER_DIR).join(format!("{}.version", stage_id))
}

/// Inspect the install folder and report whether the stage is present and
/// current.  Without a folder nothing can be installed yet.
pub fn check_stage(descriptor: &UpgradeDescriptor, folder: Option<&Path>) -> UpgradeStatePatch {
    let (installed, up_to_date) = match folder {
        None => (false, false),
        Some(folder) => {
            let files_present = descriptor
                .verify_files
                .iter()
                .all(|f| folder.join(f).exists());
            let marker = std::fs::read_to_string(marker_path(folder, &descriptor.id)).ok();
            let installed = files_present && (marker.is_some() || !descriptor.verify_files.is_empty());
            let up_to_date = installed
                && match &descriptor.version {
                    None => true,
                    Some(v) => marker.as_deref().map(str::trim) == Some(v.as_str()),
                };
            (installed, up_to_date)
        }
    };
    let phase = if installed {
        UpgradePhase::Installed { up_to_date }
    } else {
        UpgradePhase::NotInstalled
    };
    UpgradeStatePatch {
        checks_done: Some(true),
        already_installed: Some(installed),
        up_to_date: Some(up_to_date),
        phase: Some(phase),
        ..Default::default()
    }
}

/// Local file name for a downloaded source: `{stage}__{basename}`.
pub fn archive_name(stage_id: &str, source: &str) -> String {
    let trimmed = source.split(['?', '#']).next().unwrap_or(source);
    let base = trimmed
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or("package");
    format!("{}__{}", stage_id, base)
}
