//! Keeps each view's query in step with the live inputs.
//!
//! Once per tick, for every open route:
//!   1. Build the live query from the route's search inputs and the global
//!      extreme flag.  If it differs from the view's query, re-query (new
//!      `QueryId`, cached data dropped).
//!   2. Keyset still `Waiting` → emit a keyset request.
//!   3. Keyset `Received` and gaps waiting → emit one batched page request.
//!
//! The controller never does I/O.  `tick` returns `ViewRequest`s; the shell
//! sends them and feeds the answers back through `on_keyset` / `on_pages`.

use std::collections::BTreeMap;
use std::sync::Arc;

use launcher_proto::config::ViewsConfig;
use launcher_proto::model::{Keyset, OrderBy, PageResult, Playlist, SortDirection, ViewQuery};
use tracing::{debug, info};

use crate::library::normalize_library;
use crate::view::{QueryId, View, ViewCache, ViewRequest};

/// How a command changes a route's playlist filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistChange {
    Keep,
    Clear,
    Select(String),
}

/// Per-route inputs the user edits directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchInputs {
    pub text: String,
    pub order_by: OrderBy,
    pub order_direction: SortDirection,
    pub playlist_id: Option<String>,
}

pub struct QueryController {
    cache: ViewCache,
    /// Open routes, sorted so ticks are deterministic.
    inputs: BTreeMap<String, SearchInputs>,
    show_extreme: bool,
    libraries: Vec<String>,
    default_library: String,
}

impl QueryController {
    pub fn new(config: &ViewsConfig) -> Self {
        Self {
            cache: ViewCache::new(config.page_size),
            inputs: BTreeMap::new(),
            show_extreme: false,
            libraries: Vec::new(),
            default_library: config.default_library.clone(),
        }
    }

    pub fn view(&self, route: &str) -> Option<Arc<View>> {
        self.cache.get(route)
    }

    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    pub fn inputs(&self, route: &str) -> Option<&SearchInputs> {
        self.inputs.get(route)
    }

    pub fn set_libraries(&mut self, libraries: Vec<String>) {
        self.libraries = libraries;
    }

    pub fn libraries(&self) -> &[String] {
        &self.libraries
    }

    pub fn default_library(&self) -> &str {
        &self.default_library
    }

    /// Library a route's playlists are filtered by.
    pub fn playlist_library(&self, route: &str) -> String {
        normalize_library(route, &self.libraries, &self.default_library)
    }

    pub fn set_show_extreme(&mut self, show: bool) {
        self.show_extreme = show;
    }

    /// Start tracking a route.  No-op if already open.
    pub fn open_route(&mut self, route: &str) {
        self.inputs.entry(route.to_string()).or_default();
    }

    pub fn set_text(&mut self, route: &str, text: &str) {
        self.inputs.entry(route.to_string()).or_default().text = text.to_string();
    }

    pub fn set_order(&mut self, route: &str, order_by: OrderBy, direction: SortDirection) {
        let inputs = self.inputs.entry(route.to_string()).or_default();
        inputs.order_by = order_by;
        inputs.order_direction = direction;
    }

    pub fn set_playlist(&mut self, route: &str, change: PlaylistChange) {
        let inputs = self.inputs.entry(route.to_string()).or_default();
        match change {
            PlaylistChange::Keep => {}
            PlaylistChange::Clear => inputs.playlist_id = None,
            PlaylistChange::Select(id) => inputs.playlist_id = Some(id),
        }
    }

    /// The query the route should be showing right now.
    pub fn live_query(&self, route: &str) -> ViewQuery {
        let inputs = self.inputs.get(route).cloned().unwrap_or_default();
        ViewQuery {
            text: inputs.text,
            library: route.to_string(),
            order_by: inputs.order_by,
            order_direction: inputs.order_direction,
            extreme: self.show_extreme,
            playlist_id: inputs.playlist_id,
        }
    }

    pub fn expose(&mut self, route: &str, first_row: u64, last_row: u64) -> usize {
        self.cache.expose(route, first_row, last_row)
    }

    pub fn select(&mut self, route: &str, id: Option<String>) {
        self.cache.select(route, id);
    }

    /// Reconcile every open route.
    pub fn tick(&mut self) -> Vec<ViewRequest> {
        let routes: Vec<String> = self.inputs.keys().cloned().collect();
        routes
            .iter()
            .flat_map(|route| self.tick_route(route))
            .collect()
    }

    pub fn tick_route(&mut self, route: &str) -> Vec<ViewRequest> {
        let live = self.live_query(route);
        let diverged = self.cache.get(route).map_or(true, |v| v.query != live);
        if diverged {
            let id = self.cache.set_query(route, live);
            debug!("route {}: inputs changed, now {:?}", route, id);
        }

        let mut out = Vec::new();
        if let Some(req) = self.cache.take_keyset_request(route) {
            out.push(req);
        }
        if let Some(req) = self.cache.take_page_request(route) {
            out.push(req);
        }
        out
    }

    /// Apply a keyset answer.  `None` (empty payload) leaves the view as is.
    pub fn on_keyset(
        &mut self,
        route: &str,
        query_id: QueryId,
        payload: Option<(Keyset, u64)>,
    ) -> bool {
        match payload {
            Some((keyset, total)) => self.cache.apply_keyset(route, query_id, keyset, total),
            None => {
                debug!("route {}: keyset response carried no data", route);
                false
            }
        }
    }

    pub fn on_pages(
        &mut self,
        route: &str,
        query_id: QueryId,
        payload: Option<Vec<PageResult>>,
    ) -> bool {
        self.cache
            .apply_pages(route, query_id, payload.unwrap_or_default())
    }

    /// The keyset request failed without the connection closing; ask again on
    /// the next tick unless the route has moved on.
    pub fn on_keyset_failed(&mut self, route: &str, query_id: QueryId) -> bool {
        self.cache.fail_keyset(route, query_id)
    }

    pub fn on_pages_failed(&mut self, route: &str, query_id: QueryId) -> bool {
        self.cache.fail_pages(route, query_id)
    }

    // ── External invalidation ─────────────────────────────────────────────────

    /// Force `route` back to a fresh keyset fetch for its live query.
    pub fn invalidate(&mut self, route: &str) -> QueryId {
        let live = self.live_query(route);
        self.cache.set_query(route, live)
    }

    pub fn invalidate_all(&mut self) {
        let routes: Vec<String> = self.inputs.keys().cloned().collect();
        for route in routes {
            self.invalidate(&route);
        }
    }

    fn routes_filtered_by(&self, playlist_id: &str) -> Vec<String> {
        self.inputs
            .iter()
            .filter(|(_, i)| i.playlist_id.as_deref() == Some(playlist_id))
            .map(|(r, _)| r.clone())
            .collect()
    }

    /// A playlist was created or updated.  Returns the routes invalidated.
    pub fn on_playlist_saved(&mut self, playlist_id: &str) -> Vec<String> {
        let routes = self.routes_filtered_by(playlist_id);
        for route in &routes {
            self.invalidate(route);
        }
        routes
    }

    /// A playlist was deleted.  Routes filtered by it drop the filter and
    /// their selection.
    pub fn on_playlist_deleted(&mut self, playlist_id: &str) -> Vec<String> {
        let routes = self.routes_filtered_by(playlist_id);
        for route in &routes {
            info!("route {}: filtered playlist {} deleted", route, playlist_id);
            self.set_playlist(route, PlaylistChange::Clear);
            self.invalidate(route);
            self.cache.select(route, None);
        }
        routes
    }

    /// The back replaced the playlist list.  Every playlist-filtered route is
    /// re-queried; routes whose playlist vanished are treated as deleted.
    pub fn on_playlists_changed(&mut self, playlists: &[Playlist]) -> Vec<String> {
        let filtered: Vec<(String, String)> = self
            .inputs
            .iter()
            .filter_map(|(r, i)| i.playlist_id.clone().map(|p| (r.clone(), p)))
            .collect();
        let mut touched = Vec::new();
        for (route, playlist_id) in filtered {
            if playlists.iter().any(|p| p.id == playlist_id) {
                self.invalidate(&route);
            } else {
                self.set_playlist(&route, PlaylistChange::Clear);
                self.invalidate(&route);
                self.cache.select(&route, None);
            }
            touched.push(route);
        }
        touched
    }

    /// A record was saved; its position in any view may have changed.
    pub fn on_record_saved(&mut self) {
        self.invalidate_all();
    }

    pub fn on_record_deleted(&mut self, record_id: &str) {
        self.cache.deselect_everywhere(record_id);
        self.invalidate_all();
    }
}
