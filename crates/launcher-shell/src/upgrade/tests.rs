use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use launcher_proto::model::UpgradeDescriptor;
use tokio::sync::mpsc;

use super::*;

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Choose,
    Alert(String),
    Restart,
}

/// Shared log of everything the installer did, in order.
#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

struct ScriptedPrompter {
    folders: Mutex<VecDeque<Option<PathBuf>>>,
    seen: Mutex<Vec<Seen>>,
    restart: bool,
}

impl ScriptedPrompter {
    fn new(folders: Vec<Option<PathBuf>>, restart: bool) -> Arc<Self> {
        Arc::new(Self {
            folders: Mutex::new(folders.into()),
            seen: Mutex::new(Vec::new()),
            restart,
        })
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl InstallPrompter for ScriptedPrompter {
    async fn choose_folder(&self, _suggested: Option<&Path>) -> Option<PathBuf> {
        self.seen.lock().unwrap().push(Seen::Choose);
        self.folders.lock().unwrap().pop_front().flatten()
    }

    async fn alert(&self, message: &str) {
        self.seen.lock().unwrap().push(Seen::Alert(message.to_string()));
    }

    async fn confirm_restart(&self) -> bool {
        self.seen.lock().unwrap().push(Seen::Restart);
        self.restart
    }
}

/// Writes the URL into the destination file.
struct FakeFetcher {
    journal: Arc<Journal>,
    fail_on: Option<String>,
}

#[async_trait]
impl PackageFetcher for FakeFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut (dyn FnMut(u64, Option<u64>) + Send),
    ) -> Result<(), UpgradeError> {
        self.journal.push(format!(
            "fetch {}",
            dest.file_name().unwrap().to_string_lossy()
        ));
        if self.fail_on.as_deref() == Some(url) {
            std::fs::write(dest, b"partial")?;
            return Err(UpgradeError::Download {
                url: url.to_string(),
                message: "connection reset".into(),
            });
        }
        std::fs::write(dest, url.as_bytes())?;
        for done in [10, 20, 30] {
            progress(done, Some(30));
        }
        Ok(())
    }
}

/// "Extracts" by copying the archive's content to `{dest}/{archive name}.txt`.
struct FakeExtractor {
    journal: Arc<Journal>,
}

#[async_trait]
impl ArchiveExtractor for FakeExtractor {
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), UpgradeError> {
        let name = archive.file_name().unwrap().to_string_lossy().to_string();
        self.journal.push(format!("extract {}", name));
        let body = std::fs::read(archive)?;
        std::fs::write(dest.join(format!("{}.txt", name)), body)?;
        Ok(())
    }
}

struct Rig {
    installer: Installer,
    events: mpsc::UnboundedReceiver<InstallerEvent>,
    journal: Arc<Journal>,
    download_dir: tempfile::TempDir,
}

fn rig(prompter: Arc<ScriptedPrompter>, fail_on: Option<&str>) -> Rig {
    let journal = Arc::new(Journal::default());
    let download_dir = tempfile::tempdir().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let installer = Installer::new(
        download_dir.path().to_path_buf(),
        Duration::from_millis(100),
        prompter,
        Arc::new(FakeFetcher {
            journal: Arc::clone(&journal),
            fail_on: fail_on.map(str::to_string),
        }),
        Arc::new(FakeExtractor {
            journal: Arc::clone(&journal),
        }),
        tx,
    );
    Rig {
        installer,
        events: rx,
        journal,
        download_dir,
    }
}

fn descriptor() -> UpgradeDescriptor {
    UpgradeDescriptor {
        id: "infinity".into(),
        title: "Infinity".into(),
        description: String::new(),
        sources: vec![
            "https://dl.example/packs/core.7z".into(),
            "https://dl.example/packs/extras.7z?token=abc".into(),
        ],
        verify_files: vec!["infinity__core.7z.txt".into()],
        version: Some("12.1".into()),
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<InstallerEvent>) -> Vec<InstallerEvent> {
    let mut out = Vec::new();
    while let Ok(e) = rx.try_recv() {
        out.push(e);
    }
    out
}

fn patches(events: &[InstallerEvent]) -> Vec<&UpgradeStatePatch> {
    events
        .iter()
        .filter_map(|e| match e {
            InstallerEvent::Stage { patch, .. } => Some(patch),
            _ => None,
        })
        .collect()
}

#[test]
fn test_archive_name() {
    assert_eq!(
        archive_name("infinity", "https://dl.example/packs/core.7z"),
        "infinity__core.7z"
    );
    assert_eq!(
        archive_name("infinity", "https://dl.example/packs/extras.7z?token=abc"),
        "infinity__extras.7z"
    );
    assert_eq!(archive_name("s", "https://dl.example/"), "s__dl.example");
}

#[test]
fn test_stage_setter_merges_patch() {
    let mut stages = UpgradeStages::default();
    stages.load(vec![descriptor()]);
    stages.apply(
        "infinity",
        UpgradeStatePatch {
            is_installing: Some(true),
            ..UpgradeStatePatch::phase(UpgradePhase::Downloading)
        }
        .note("halfway"),
    );
    stages.apply("infinity", UpgradeStatePatch::phase(UpgradePhase::Extracting));

    let stage = stages.get("infinity").unwrap();
    assert!(stage.state.is_installing);
    assert_eq!(stage.state.install_progress_note, "halfway");
    assert_eq!(stage.phase, UpgradePhase::Extracting);
    assert!(stages.any_installing());
    assert!(stages.apply("nope", UpgradeStatePatch::default()).is_none());

    // A reload replaces everything.
    stages.load(vec![descriptor()]);
    assert_eq!(stages.get("infinity").unwrap().phase, UpgradePhase::NotChecked);
    assert!(!stages.any_installing());
}

#[test]
fn test_check_stage() {
    let folder = tempfile::tempdir().unwrap();
    let d = descriptor();

    let fresh = check_stage(&d, Some(folder.path()));
    assert_eq!(fresh.already_installed, Some(false));
    assert_eq!(fresh.phase, Some(UpgradePhase::NotInstalled));
    assert_eq!(fresh.checks_done, Some(true));

    std::fs::write(folder.path().join("infinity__core.7z.txt"), "x").unwrap();
    let old = check_stage(&d, Some(folder.path()));
    assert_eq!(old.phase, Some(UpgradePhase::Installed { up_to_date: false }));

    let marker = marker_path(folder.path(), "infinity");
    std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
    std::fs::write(&marker, "12.1\n").unwrap();
    let current = check_stage(&d, Some(folder.path()));
    assert_eq!(current.phase, Some(UpgradePhase::Installed { up_to_date: true }));

    let none = check_stage(&d, None);
    assert_eq!(none.already_installed, Some(false));
}

#[tokio::test]
async fn test_bad_folders_loop_until_valid_then_install() {
    let root = tempfile::tempdir().unwrap();
    let missing = root.path().join("missing");
    let a_file = root.path().join("file");
    std::fs::write(&a_file, "x").unwrap();
    let good = root.path().join("games");
    std::fs::create_dir_all(&good).unwrap();

    let prompter = ScriptedPrompter::new(
        vec![Some(missing.clone()), Some(a_file.clone()), Some(good.clone())],
        true,
    );
    let mut rig = rig(Arc::clone(&prompter), None);

    let outcome = rig
        .installer
        .install(&descriptor(), Some(missing.clone()))
        .await
        .unwrap();
    assert_eq!(outcome, InstallOutcome::Installed { restart_requested: true });

    let seen = prompter.seen();
    assert_eq!(seen.len(), 6);
    assert_eq!(seen[0], Seen::Choose);
    assert!(matches!(&seen[1], Seen::Alert(m) if m.contains("does not exist")));
    assert_eq!(seen[2], Seen::Choose);
    assert!(matches!(&seen[3], Seen::Alert(m) if m.contains("not a folder")));
    assert_eq!(seen[4], Seen::Choose);
    assert_eq!(seen[5], Seen::Restart);

    let events = drain(&mut rig.events);
    // The folder is reported before anything starts installing.
    assert_eq!(events[0], InstallerEvent::FolderSelected(good.clone()));
    let first_installing = events
        .iter()
        .position(|e| matches!(e, InstallerEvent::Stage { patch, .. } if patch.is_installing == Some(true)))
        .unwrap();
    assert!(first_installing > 0);

    let ps = patches(&events);
    let last = ps.last().unwrap();
    assert_eq!(last.phase, Some(UpgradePhase::Complete));
    assert_eq!(last.is_installing, Some(false));
    assert_eq!(last.is_installation_complete, Some(true));

    assert_eq!(
        rig.journal.entries(),
        vec![
            "fetch infinity__core.7z",
            "extract infinity__core.7z",
            "fetch infinity__extras.7z",
            "extract infinity__extras.7z",
        ]
    );
    assert!(good.join("infinity__core.7z.txt").exists());
    assert!(good.join("infinity__extras.7z.txt").exists());
    // Archives are cleaned up after extraction.
    assert_eq!(std::fs::read_dir(rig.download_dir.path()).unwrap().count(), 0);

    // The marker makes the stage count as installed and current.
    let check = check_stage(&descriptor(), Some(&good));
    assert_eq!(check.phase, Some(UpgradePhase::Installed { up_to_date: true }));
}

#[tokio::test]
async fn test_cancelled_picker_installs_nothing() {
    let prompter = ScriptedPrompter::new(vec![None], true);
    let mut rig = rig(Arc::clone(&prompter), None);

    let outcome = rig.installer.install(&descriptor(), None).await.unwrap();
    assert_eq!(outcome, InstallOutcome::Cancelled);
    assert!(drain(&mut rig.events).is_empty());
    assert!(rig.journal.entries().is_empty());
    assert_eq!(prompter.seen(), vec![Seen::Choose]);
}

#[tokio::test]
async fn test_valid_configured_folder_skips_picker() {
    let folder = tempfile::tempdir().unwrap();
    let prompter = ScriptedPrompter::new(vec![], false);
    let mut rig = rig(Arc::clone(&prompter), None);

    let outcome = rig
        .installer
        .install(&descriptor(), Some(folder.path().to_path_buf()))
        .await
        .unwrap();
    assert_eq!(outcome, InstallOutcome::Installed { restart_requested: false });
    assert_eq!(prompter.seen(), vec![Seen::Restart]);
    assert!(!drain(&mut rig.events)
        .iter()
        .any(|e| matches!(e, InstallerEvent::FolderSelected(_))));
}

#[tokio::test]
async fn test_download_failure_marks_failed_and_can_retry() {
    let folder = tempfile::tempdir().unwrap();
    let prompter = ScriptedPrompter::new(vec![], false);
    let mut rig = rig(prompter, Some("https://dl.example/packs/extras.7z?token=abc"));

    let err = rig
        .installer
        .install(&descriptor(), Some(folder.path().to_path_buf()))
        .await
        .unwrap_err();
    assert!(matches!(err, UpgradeError::Download { .. }));

    let events = drain(&mut rig.events);
    let mut stages = UpgradeStages::default();
    stages.load(vec![descriptor()]);
    for e in events {
        if let InstallerEvent::Stage { stage_id, patch } = e {
            stages.apply(&stage_id, patch);
        }
    }
    let stage = stages.get("infinity").unwrap();
    assert!(!stage.state.is_installing);
    assert!(!stage.state.is_installation_complete);
    assert!(matches!(&stage.phase, UpgradePhase::Failed(m) if m.contains("connection reset")));
    // The partial archive is removed.
    assert_eq!(std::fs::read_dir(rig.download_dir.path()).unwrap().count(), 0);

    // Same installer, working fetcher: a retry succeeds.
    let retry = Installer::new(
        rig.download_dir.path().to_path_buf(),
        Duration::from_millis(100),
        ScriptedPrompter::new(vec![], false),
        Arc::new(FakeFetcher {
            journal: Arc::clone(&rig.journal),
            fail_on: None,
        }),
        Arc::new(FakeExtractor {
            journal: Arc::clone(&rig.journal),
        }),
        mpsc::unbounded_channel().0,
    );
    retry
        .install(&descriptor(), Some(folder.path().to_path_buf()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_progress_notes_are_throttled() {
    let folder = tempfile::tempdir().unwrap();
    let mut rig = rig(ScriptedPrompter::new(vec![], false), None);
    rig.installer
        .install(&descriptor(), Some(folder.path().to_path_buf()))
        .await
        .unwrap();

    let events = drain(&mut rig.events);
    let downloading_notes = patches(&events)
        .iter()
        .filter(|p| p.phase == Some(UpgradePhase::Downloading))
        .count();
    // Start + one per source on the phase change; the three chunk reports
    // per source land inside the 100 ms window.
    assert_eq!(downloading_notes, 3);
}
