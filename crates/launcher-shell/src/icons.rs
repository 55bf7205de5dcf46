//! Playlist icon cache.
//!
//! Playlists carry their icon either as a `data:` URL or as a plain
//! reference (remote URL, relative path).  Data URLs are decoded once and
//! written to the icon cache directory so the UI can load them as files.
//! Every handle that is replaced or dropped is released, which for file
//! handles means deleting the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use launcher_proto::model::Playlist;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum IconError {
    #[error("not a base64 data URL")]
    NotDataUrl,
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconHandle {
    /// Decoded to a local file that this cache owns.
    File(PathBuf),
    /// Passed through untouched.
    Remote(String),
}

/// Where decoded icons live.  Abstracted so tests and alternative front-ends
/// can keep icons somewhere other than the cache directory.
pub trait IconStore: Send + Sync {
    fn store(&self, playlist_id: &str, icon: &str) -> Result<IconHandle, IconError>;
    fn release(&self, handle: &IconHandle);
}

/// Writes decoded icons to `{dir}/{playlist_id}.{ext}`.
pub struct FileIconStore {
    dir: PathBuf,
}

impl FileIconStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Split `data:image/png;base64,AAAA` into its mime type and decoded bytes.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>), IconError> {
    let rest = url.strip_prefix("data:").ok_or(IconError::NotDataUrl)?;
    let (meta, payload) = rest.split_once(',').ok_or(IconError::NotDataUrl)?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or(IconError::NotDataUrl)?;
    let bytes = STANDARD.decode(payload.trim())?;
    Ok((mime.to_string(), bytes))
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        _ => "bin",
    }
}

/// File name stem for a playlist id.  Lowercase letters, digits and `-` pass
/// through; every other byte becomes `_xx`, so distinct ids never share a
/// file, even on case-insensitive filesystems.
fn file_stem(playlist_id: &str) -> String {
    let mut stem = String::with_capacity(playlist_id.len());
    for b in playlist_id.bytes() {
        if b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' {
            stem.push(char::from(b));
        } else {
            stem.push_str(&format!("_{:02x}", b));
        }
    }
    stem
}

impl IconStore for FileIconStore {
    fn store(&self, playlist_id: &str, icon: &str) -> Result<IconHandle, IconError> {
        if !icon.starts_with("data:") {
            return Ok(IconHandle::Remote(icon.to_string()));
        }
        let (mime, bytes) = decode_data_url(icon)?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("{}.{}", file_stem(playlist_id), extension_for(&mime)));
        std::fs::write(&path, bytes)?;
        debug!("wrote icon for playlist {} to {}", playlist_id, path.display());
        Ok(IconHandle::File(path))
    }

    fn release(&self, handle: &IconHandle) {
        if let IconHandle::File(path) = handle {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove icon {}: {}", path.display(), e);
                }
            }
        }
    }
}

struct Entry {
    source: String,
    handle: IconHandle,
}

pub struct IconCache {
    store: Box<dyn IconStore>,
    entries: Arc<HashMap<String, Arc<Entry>>>,
}

impl IconCache {
    pub fn new(store: Box<dyn IconStore>) -> Self {
        Self {
            store,
            entries: Arc::new(HashMap::new()),
        }
    }

    pub fn get(&self, playlist_id: &str) -> Option<IconHandle> {
        self.entries.get(playlist_id).map(|e| e.handle.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current map of playlist id to handle.
    pub fn snapshot(&self) -> HashMap<String, IconHandle> {
        self.entries
            .iter()
            .map(|(id, e)| (id.clone(), e.handle.clone()))
            .collect()
    }

    /// Make the cache match `playlists` exactly.
    pub fn sync(&mut self, playlists: &[Playlist]) {
        let mut next = HashMap::with_capacity(playlists.len());
        let mut released = Vec::new();
        for playlist in playlists {
            if let Some(entry) = self.resolve(playlist, &mut released) {
                next.insert(playlist.id.clone(), entry);
            }
        }
        // Playlists still present already had their old handle dealt with
        // by `resolve`.
        for (id, entry) in self.entries.iter() {
            if !playlists.iter().any(|p| &p.id == id) {
                released.push(entry.handle.clone());
            }
        }
        self.entries = Arc::new(next);
        for handle in released {
            self.store.release(&handle);
        }
    }

    pub fn on_playlist_updated(&mut self, playlist: &Playlist) {
        let mut released = Vec::new();
        let entry = self.resolve(playlist, &mut released);
        let map = Arc::make_mut(&mut self.entries);
        match entry {
            Some(entry) => {
                map.insert(playlist.id.clone(), entry);
            }
            None => {
                if let Some(old) = map.remove(&playlist.id) {
                    released.push(old.handle.clone());
                }
            }
        }
        for handle in released {
            self.store.release(&handle);
        }
    }

    pub fn on_playlist_deleted(&mut self, playlist_id: &str) {
        if !self.entries.contains_key(playlist_id) {
            return;
        }
        let map = Arc::make_mut(&mut self.entries);
        if let Some(old) = map.remove(playlist_id) {
            self.store.release(&old.handle);
        }
    }

    /// Entry for `playlist`, reusing the cached one when the icon hasn't
    /// changed.  A replaced handle is pushed onto `released`.
    fn resolve(&self, playlist: &Playlist, released: &mut Vec<IconHandle>) -> Option<Arc<Entry>> {
        let existing = self.entries.get(&playlist.id);
        let Some(icon) = playlist.icon.as_deref().filter(|i| !i.is_empty()) else {
            if let Some(old) = existing {
                released.push(old.handle.clone());
            }
            return None;
        };
        if let Some(old) = existing {
            if old.source == icon {
                return Some(Arc::clone(old));
            }
        }
        let stored = self.store.store(&playlist.id, icon);
        let entry = match stored {
            Ok(handle) => Some(Arc::new(Entry {
                source: icon.to_string(),
                handle,
            })),
            Err(e) => {
                warn!("icon for playlist {} unusable: {}", playlist.id, e);
                None
            }
        };
        if let Some(old) = existing {
            // A rewritten file at the same path is not released.
            let reused = entry.as_ref().is_some_and(|e| e.handle == old.handle);
            if !reused {
                released.push(old.handle.clone());
            }
        }
        entry
    }
}
