//! Collections computed from the context, recomputed only when their inputs
//! change.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use launcher_proto::model::Playlist;

use crate::library::playlist_in_library;

/// Single-slot cache: holds the last key and the value computed for it.
pub struct Memo<K, V> {
    slot: Option<(K, Arc<V>)>,
}

impl<K: PartialEq, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<K: PartialEq, V> Memo<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, calling `compute` only if the key differs from the
    /// previous call.
    pub fn get_or_compute(&mut self, key: K, compute: impl FnOnce() -> V) -> Arc<V> {
        if let Some((cached, value)) = &self.slot {
            if *cached == key {
                return Arc::clone(value);
            }
        }
        let value = Arc::new(compute());
        self.slot = Some((key, Arc::clone(&value)));
        value
    }

    pub fn invalidate(&mut self) {
        self.slot = None;
    }
}

/// Every platform across all libraries, sorted and de-duplicated.
pub fn flatten_platforms(platforms: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    platforms
        .values()
        .flatten()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Playlists shown under `route`: matching library, extreme ones only when
/// allowed, sorted by title.
pub fn playlists_for_route(
    playlists: &[Playlist],
    route: &str,
    known: &[String],
    default_library: &str,
    show_extreme: bool,
) -> Vec<Playlist> {
    let mut out: Vec<Playlist> = playlists
        .iter()
        .filter(|p| show_extreme || !p.extreme)
        .filter(|p| playlist_in_library(p, route, known, default_library))
        .cloned()
        .collect();
    out.sort_by(|a, b| {
        a.title
            .to_lowercase()
            .cmp(&b.title.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistKey {
    pub revision: u64,
    pub library: String,
    pub show_extreme: bool,
}
