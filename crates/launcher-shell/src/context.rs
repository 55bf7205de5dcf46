//! Shared state owned by the back, mirrored in the shell.
//!
//! Constructed once at startup and passed around as `Arc<AppContext>`.  Most
//! fields are only meaningful after the `Init` handshake; callers that need
//! them await `ready()` first.
//!
//! Push events from the back are applied here synchronously (the context is
//! the first push handler registered on the transport), so every later handler
//! already sees the updated value.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use launcher_proto::model::{
    InitData, LanguageInfo, LogEntry, Playlist, Preferences, ServiceInfo, TagCategory,
    UpgradeDescriptor,
};
use launcher_proto::protocol::PushEvent;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::transport::Transport;

/// Log entries kept in memory; older ones fall off the front.
pub const LOG_CAPACITY: usize = 1000;

/// Revision counters, bumped whenever the matching collection is replaced.
/// Derived collections key their caches on these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Revisions {
    pub playlists: u64,
    pub platforms: u64,
    pub preferences: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SharedState {
    // ── Back-owned settings ────────────────────────────────────────────────
    pub preferences: Preferences,
    pub theme: Option<String>,
    pub locale: Option<String>,
    pub languages: Vec<LanguageInfo>,

    // ── Library ────────────────────────────────────────────────────────────
    pub libraries: Vec<String>,
    pub platforms: BTreeMap<String, Vec<String>>,
    /// Replaced, never mutated, so a cloned `Arc` is a stable snapshot.
    pub playlists: Arc<Vec<Playlist>>,
    pub tag_categories: Vec<TagCategory>,

    // ── Services / upgrades ────────────────────────────────────────────────
    pub services: Vec<ServiceInfo>,
    pub upgrades: Vec<UpgradeDescriptor>,

    // ── Log ────────────────────────────────────────────────────────────────
    pub log: Vec<LogEntry>,

    pub revisions: Revisions,
}

pub struct AppContext {
    state: RwLock<SharedState>,
    ready_tx: watch::Sender<bool>,
}

impl AppContext {
    pub fn new() -> Arc<Self> {
        let (ready_tx, _) = watch::channel(false);
        Arc::new(Self {
            state: RwLock::new(SharedState::default()),
            ready_tx,
        })
    }

    /// Register as a push handler.  Call before any other `on_push`.
    pub fn attach(self: &Arc<Self>, transport: &Transport) {
        let ctx = Arc::clone(self);
        transport.on_push(move |event| {
            ctx.apply_push(event);
        });
    }

    /// Populate from the handshake and release everyone waiting in `ready()`.
    pub fn initialize(&self, init: InitData) {
        {
            let mut s = self.write();
            s.theme = init.preferences.current_theme.clone();
            s.locale = init
                .locale
                .or_else(|| init.preferences.current_language.clone());
            s.preferences = init.preferences;
            s.languages = init.languages;
            s.libraries = init.libraries;
            s.platforms = init.platforms;
            s.playlists = Arc::new(init.playlists);
            s.tag_categories = init.tag_categories;
            s.services = init.services;
            s.upgrades = init.upgrades;
            s.revisions.playlists += 1;
            s.revisions.platforms += 1;
            s.revisions.preferences += 1;
            info!(
                "Context initialised: {} libraries, {} playlists, {} upgrade stage(s)",
                s.libraries.len(),
                s.playlists.len(),
                s.upgrades.len()
            );
        }
        self.ready_tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Resolves once `initialize` has run.  Returns immediately afterwards.
    pub async fn ready(&self) {
        let mut rx = self.ready_tx.subscribe();
        // The sender lives as long as `self`, so this can't fail.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Apply a push event to the mirrored state.  Returns `true` when the
    /// event touched something.
    pub fn apply_push(&self, event: &PushEvent) -> bool {
        let mut s = self.write();
        match event {
            PushEvent::LogEntryAdded { entry } => {
                s.log.push(entry.clone());
                if s.log.len() > LOG_CAPACITY {
                    let excess = s.log.len() - LOG_CAPACITY;
                    s.log.drain(..excess);
                }
            }
            PushEvent::LocaleChanged { locale } => {
                s.locale = Some(locale.clone());
            }
            PushEvent::ThemeChanged { theme } => {
                s.theme = Some(theme.clone());
            }
            PushEvent::LanguageListChanged { languages } => {
                s.languages = languages.clone();
            }
            PushEvent::PlaylistsChanged { playlists } => {
                s.playlists = Arc::new(playlists.clone());
                s.revisions.playlists += 1;
            }
            PushEvent::TagCategoriesChanged { categories } => {
                s.tag_categories = categories.clone();
            }
            PushEvent::ServiceChanged { service } => {
                match s.services.iter_mut().find(|x| x.id == service.id) {
                    Some(existing) => *existing = service.clone(),
                    None => s.services.push(service.clone()),
                }
            }
            PushEvent::ServiceRemoved { id } => {
                s.services.retain(|x| &x.id != id);
            }
            PushEvent::PreferencesChanged { preferences } => {
                s.preferences = preferences.clone();
                s.revisions.preferences += 1;
            }
            PushEvent::Unknown => return false,
        }
        debug!("Context applied push {:?}", std::mem::discriminant(event));
        true
    }

    /// Replace one playlist (or append it) after a local save.
    pub fn upsert_playlist(&self, playlist: Playlist) {
        let mut s = self.write();
        let mut next: Vec<Playlist> = s.playlists.as_ref().clone();
        match next.iter_mut().find(|p| p.id == playlist.id) {
            Some(existing) => *existing = playlist,
            None => next.push(playlist),
        }
        s.playlists = Arc::new(next);
        s.revisions.playlists += 1;
    }

    pub fn remove_playlist(&self, id: &str) -> Option<Playlist> {
        let mut s = self.write();
        let pos = s.playlists.iter().position(|p| p.id == id)?;
        let mut next: Vec<Playlist> = s.playlists.as_ref().clone();
        let removed = next.remove(pos);
        s.playlists = Arc::new(next);
        s.revisions.playlists += 1;
        Some(removed)
    }

    /// Read access to the whole mirrored state.  Keep the guard short-lived.
    pub fn read(&self) -> RwLockReadGuard<'_, SharedState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SharedState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Convenience snapshots ────────────────────────────────────────────────

    pub fn preferences(&self) -> Preferences {
        self.read().preferences.clone()
    }

    pub fn playlists(&self) -> Arc<Vec<Playlist>> {
        Arc::clone(&self.read().playlists)
    }

    pub fn playlist(&self, id: &str) -> Option<Playlist> {
        self.read().playlists.iter().find(|p| p.id == id).cloned()
    }

    pub fn libraries(&self) -> Vec<String> {
        self.read().libraries.clone()
    }

    pub fn upgrades(&self) -> Vec<UpgradeDescriptor> {
        self.read().upgrades.clone()
    }

    pub fn revisions(&self) -> Revisions {
        self.read().revisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use launcher_proto::model::LogLevel;

    fn playlist(id: &str) -> Playlist {
        Playlist {
            id: id.into(),
            title: id.to_uppercase(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ready_resolves_after_initialize() {
        let ctx = AppContext::new();
        assert!(!ctx.is_ready());

        let waiter = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                ctx.ready().await;
                ctx.libraries()
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        ctx.initialize(InitData {
            libraries: vec!["arcade".into(), "theatre".into()],
            ..Default::default()
        });
        let libraries = waiter.await.unwrap();
        assert_eq!(libraries, vec!["arcade", "theatre"]);
        assert!(ctx.is_ready());

        // Already ready: returns straight away.
        ctx.ready().await;
    }

    #[test]
    fn test_push_updates_services() {
        let ctx = AppContext::new();
        let svc = ServiceInfo {
            id: "server".into(),
            name: "Server".into(),
            running: false,
            pid: None,
        };
        ctx.apply_push(&PushEvent::ServiceChanged {
            service: svc.clone(),
        });
        ctx.apply_push(&PushEvent::ServiceChanged {
            service: ServiceInfo {
                running: true,
                pid: Some(42),
                ..svc
            },
        });
        {
            let s = ctx.read();
            assert_eq!(s.services.len(), 1);
            assert!(s.services[0].running);
        }
        ctx.apply_push(&PushEvent::ServiceRemoved {
            id: "server".into(),
        });
        assert!(ctx.read().services.is_empty());
    }

    #[test]
    fn test_playlists_push_bumps_revision_and_keeps_old_snapshot() {
        let ctx = AppContext::new();
        ctx.apply_push(&PushEvent::PlaylistsChanged {
            playlists: vec![playlist("p1")],
        });
        let before = ctx.playlists();
        let rev = ctx.revisions().playlists;

        ctx.apply_push(&PushEvent::PlaylistsChanged {
            playlists: vec![playlist("p1"), playlist("p2")],
        });
        assert_eq!(ctx.revisions().playlists, rev + 1);
        assert_eq!(before.len(), 1);
        assert_eq!(ctx.playlists().len(), 2);
    }

    #[test]
    fn test_unknown_push_is_ignored() {
        let ctx = AppContext::new();
        assert!(!ctx.apply_push(&PushEvent::Unknown));
    }

    #[test]
    fn test_log_is_capped() {
        let ctx = AppContext::new();
        for i in 0..(LOG_CAPACITY + 5) {
            ctx.apply_push(&PushEvent::LogEntryAdded {
                entry: LogEntry {
                    timestamp: Utc::now(),
                    source: "back".into(),
                    level: LogLevel::Info,
                    content: format!("line {}", i),
                },
            });
        }
        let s = ctx.read();
        assert_eq!(s.log.len(), LOG_CAPACITY);
        assert_eq!(s.log[0].content, "line 5");
    }

    #[test]
    fn test_upsert_and_remove_playlist() {
        let ctx = AppContext::new();
        ctx.upsert_playlist(playlist("p1"));
        ctx.upsert_playlist(Playlist {
            title: "Renamed".into(),
            ..playlist("p1")
        });
        assert_eq!(ctx.playlists().len(), 1);
        assert_eq!(ctx.playlist("p1").unwrap().title, "Renamed");
        assert!(ctx.remove_playlist("p1").is_some());
        assert!(ctx.remove_playlist("p1").is_none());
    }
}
