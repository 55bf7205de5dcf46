//! Install folder validation.

use std::path::Path;

use thiserror::Error;

const PROBE_FILE: &str = ".launcher-write-probe";

#[derive(Debug, Error)]
pub enum FolderError {
    #[error("{0} does not exist")]
    Missing(String),
    #[error("{0} is not a folder")]
    NotAFolder(String),
    #[error("cannot write to {path}: {source}")]
    NotWritable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The folder must exist and accept a new file.  The probe is removed again.
pub fn validate_folder(path: &Path) -> Result<(), FolderError> {
    let shown = path.display().to_string();
    if !path.exists() {
        return Err(FolderError::Missing(shown));
    }
    if !path.is_dir() {
        return Err(FolderError::NotAFolder(shown));
    }
    let probe = path.join(PROBE_FILE);
    std::fs::write(&probe, b"ok").map_err(|source| FolderError::NotWritable {
        path: shown.clone(),
        source,
    })?;
    std::fs::remove_file(&probe).map_err(|source| FolderError::NotWritable { path: shown, source })
}
