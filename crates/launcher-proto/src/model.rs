use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Records ───────────────────────────────────────────────────────────────────

/// The row shape the back returns for list views.  Full records are only
/// fetched when one is opened for editing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RecordSummary {
    pub id: String,
    pub title: String,
    pub library: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub developer: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub extreme: bool,
    #[serde(default)]
    pub broken: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Record {
    #[serde(flatten)]
    pub summary: RecordSummary,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub version: String,
}

// ── Queries ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum OrderBy {
    #[default]
    Title,
    DateAdded,
    DateModified,
    Developer,
    Publisher,
    Platform,
    Series,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Everything that decides which records a view shows and in what order.
/// Two queries select the same rows exactly when they compare equal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct ViewQuery {
    pub text: String,
    pub library: String,
    pub order_by: OrderBy,
    pub order_direction: SortDirection,
    pub extreme: bool,
    pub playlist_id: Option<String>,
}

/// Opaque page-boundary token produced by the back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Cursor(s.to_string())
    }
}

/// 1-based page index → cursor of the first record on that page.
pub type Keyset = BTreeMap<u32, Cursor>;

/// Wire form of a `Keyset`: a JSON object keyed by the page index as a
/// string.  Internally tagged enums buffer their content, which loses serde's
/// usual string-to-integer key coercion, so the keys are parsed here.
pub mod keyset_wire {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{Cursor, Keyset};

    pub fn serialize<S: Serializer>(keyset: &Keyset, serializer: S) -> Result<S::Ok, S::Error> {
        let wire: BTreeMap<String, &Cursor> =
            keyset.iter().map(|(i, c)| (i.to_string(), c)).collect();
        wire.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Keyset, D::Error> {
        BTreeMap::<String, Cursor>::deserialize(deserializer)?
            .into_iter()
            .map(|(key, cursor)| {
                key.parse::<u32>()
                    .map(|index| (index, cursor))
                    .map_err(|_| D::Error::custom(format!("bad page index {:?}", key)))
            })
            .collect()
    }
}

/// One page of a batched page request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageRange {
    pub index: u32,
    pub start: u64,
    pub length: u32,
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageResult {
    pub index: u32,
    pub records: Vec<RecordSummary>,
}

// ── Playlists ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Playlist {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Library tag; may be empty on playlists created by older versions.
    #[serde(default)]
    pub library: String,
    /// Either a `data:` URL or a reference the UI can load directly.
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub extreme: bool,
    #[serde(default)]
    pub entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlaylistEntry {
    pub playlist_id: String,
    pub record_id: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub notes: String,
}

// ── Back-owned state pushed to the shell ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Preferences {
    #[serde(default)]
    pub show_extreme: bool,
    #[serde(default)]
    pub show_broken: bool,
    #[serde(default)]
    pub excluded_random_libraries: Vec<String>,
    #[serde(default)]
    pub current_theme: Option<String>,
    #[serde(default)]
    pub current_language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LanguageInfo {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TagCategory {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub level: LogLevel,
    pub content: String,
}

impl LogEntry {
    /// Single-line rendering used by the log view and the shell's own log.
    pub fn display(&self) -> String {
        format!(
            "{} [{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            format!("{:?}", self.level).to_uppercase(),
            self.source,
            self.content
        )
    }
}

// ── Upgrades ──────────────────────────────────────────────────────────────────

/// Optional content package offered by the back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UpgradeDescriptor {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Archives installed in order.
    pub sources: Vec<String>,
    /// Paths, relative to the install folder, that must exist for the stage
    /// to count as installed.
    #[serde(default)]
    pub verify_files: Vec<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Handshake payload returned for `Request::Init`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InitData {
    pub protocol_version: u32,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub libraries: Vec<String>,
    /// Library → platform names.
    #[serde(default)]
    pub platforms: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub playlists: Vec<Playlist>,
    #[serde(default)]
    pub services: Vec<ServiceInfo>,
    #[serde(default)]
    pub languages: Vec<LanguageInfo>,
    #[serde(default)]
    pub tag_categories: Vec<TagCategory>,
    #[serde(default)]
    pub upgrades: Vec<UpgradeDescriptor>,
    #[serde(default)]
    pub locale: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_equality_is_field_by_field() {
        let a = ViewQuery {
            library: "arcade".into(),
            ..Default::default()
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.order_direction = SortDirection::Desc;
        assert_ne!(a, b);
        b = a.clone();
        b.playlist_id = Some("p1".into());
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_flattens_summary() {
        let json = r#"{"id":"g1","title":"Alpha","library":"arcade","notes":"n"}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.summary.id, "g1");
        assert_eq!(record.summary.library, "arcade");
        assert_eq!(record.notes, "n");
        assert!(!record.summary.extreme);
    }

    #[test]
    fn test_order_by_wire_names() {
        assert_eq!(serde_json::to_string(&OrderBy::DateAdded).unwrap(), "\"dateAdded\"");
        assert_eq!(serde_json::to_string(&SortDirection::Desc).unwrap(), "\"desc\"");
    }
}
