//! Archive extraction through an external `7z`/`tar` binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::installer::{ArchiveExtractor, UpgradeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    SevenZip,
    Tar,
}

fn flavor_of(binary: &Path) -> Flavor {
    let full = binary.to_string_lossy();
    let name = full.rsplit(['/', '\\']).next().unwrap_or_default().to_lowercase();
    if name.starts_with("7z") {
        Flavor::SevenZip
    } else {
        Flavor::Tar
    }
}

pub struct CommandExtractor {
    binary: Option<PathBuf>,
}

impl CommandExtractor {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary: Some(binary),
        }
    }

    /// Locate an extractor the way other external tools are found.  If none
    /// is installed every extraction fails with `NoExtractor`.
    pub fn detect() -> Self {
        let binary = launcher_proto::platform::find_extractor_binary();
        match &binary {
            Some(p) => info!("archive extractor: {}", p.display()),
            None => warn!("no archive extractor found; upgrades cannot be installed"),
        }
        Self { binary }
    }

    fn command(binary: &Path, archive: &Path, dest: &Path) -> Command {
        let mut cmd = Command::new(binary);
        match flavor_of(binary) {
            Flavor::SevenZip => {
                let mut out = std::ffi::OsString::from("-o");
                out.push(dest.as_os_str());
                cmd.arg("x").arg("-y").arg(out).arg(archive);
            }
            Flavor::Tar => {
                cmd.arg("-xf").arg(archive).arg("-C").arg(dest);
            }
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl ArchiveExtractor for CommandExtractor {
    async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), UpgradeError> {
        let binary = self.binary.as_deref().ok_or(UpgradeError::NoExtractor)?;
        info!(
            "extracting {} into {} with {}",
            archive.display(),
            dest.display(),
            binary.display()
        );
        tokio::fs::create_dir_all(dest).await?;

        let mut child = Self::command(binary, archive, dest).spawn()?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("extractor: {}", line);
                }
            });
        }

        let mut stderr_tail = Vec::new();
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("extractor stderr: {}", line);
                stderr_tail.push(line);
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let message = match stderr_tail.last() {
                Some(line) => format!("exit status {:?}: {}", status.code(), line),
                None => format!("exit status {:?}", status.code()),
            };
            return Err(UpgradeError::Extract {
                archive: archive.display().to_string(),
                message,
            });
        }
        Ok(())
    }
}
