//! Library name matching for playlist filtering.
//!
//! Routes and playlist `library` tags are compared case-insensitively.  A name
//! that is empty or not one of the known libraries maps to the configured
//! default library.  This mapping is only used to decide which playlists show
//! up under which route; queries keep the route name as-is.

use launcher_proto::model::Playlist;

pub fn normalize_library(name: &str, known: &[String], default: &str) -> String {
    let lower = name.trim().to_lowercase();
    if !lower.is_empty() && known.iter().any(|k| k.trim().to_lowercase() == lower) {
        lower
    } else {
        default.trim().to_lowercase()
    }
}

pub fn playlist_in_library(playlist: &Playlist, route: &str, known: &[String], default: &str) -> bool {
    normalize_library(&playlist.library, known, default) == normalize_library(route, known, default)
}
