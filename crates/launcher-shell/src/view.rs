//! View cache: one paginated result set per route.
//!
//! Every view is tagged with the `QueryId` of the query that produced its
//! keyset and pages.  Assigning a query always mints a fresh id and drops all
//! cached data, so any response still in flight for the old id is rejected on
//! arrival.
//!
//! # Request lifecycle
//! ```text
//!  keyset:  Waiting ──take_keyset_request──▶ Requested ──apply_keyset──▶ Received
//!  page i:  Waiting ──take_page_request───▶ Requested ──apply_pages───▶ Received
//! ```
//! A page is only requested once the keyset is `Received`, and at most one
//! batched page request is in flight per view.
//!
//! Views are stored as `Arc<View>` and mutated copy-on-write, so a snapshot
//! handed to the UI is never torn by a later update.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use launcher_proto::model::{Keyset, PageRange, PageResult, RecordSummary, ViewQuery};
use launcher_proto::protocol::Request;
use tracing::debug;

/// Pages one `expose` may mark while the total is still unknown.
pub const MAX_UNBOUNDED_EXPOSE: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Waiting,
    Requested,
    Received,
}

/// Identity of one logical query on one view.  Monotonic across the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryId(pub u64);

#[derive(Debug, Clone)]
pub struct View {
    pub route: String,
    pub query_id: QueryId,
    pub query: ViewQuery,
    pub keyset_state: RequestState,
    pub keyset: Keyset,
    /// Record count for the current query; `None` until the keyset lands.
    pub total: Option<u64>,
    pub page_state: BTreeMap<u32, RequestState>,
    pub pages: BTreeMap<u32, Arc<Vec<RecordSummary>>>,
    pub selected_id: Option<String>,
    /// True while a batched page request for `query_id` is outstanding.
    pub pages_in_flight: bool,
    page_size: u32,
}

impl View {
    fn new(route: &str, query: ViewQuery, query_id: QueryId, page_size: u32) -> Self {
        Self {
            route: route.to_string(),
            query_id,
            query,
            keyset_state: RequestState::Waiting,
            keyset: Keyset::new(),
            total: None,
            page_state: BTreeMap::new(),
            pages: BTreeMap::new(),
            selected_id: None,
            pages_in_flight: false,
            page_size: page_size.max(1),
        }
    }

    /// Drop everything derived from the previous query.
    fn reset(&mut self, query: ViewQuery, query_id: QueryId) {
        self.query = query;
        self.query_id = query_id;
        self.keyset_state = RequestState::Waiting;
        self.keyset.clear();
        self.total = None;
        self.page_state.clear();
        self.pages.clear();
        self.pages_in_flight = false;
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of pages for the current total, once known.
    pub fn page_count(&self) -> Option<u32> {
        self.total.map(|t| {
            u32::try_from(t.div_ceil(self.page_size as u64)).unwrap_or(u32::MAX)
        })
    }

    /// 1-based page holding the 0-based `row`.  Saturates at `u32::MAX`.
    pub fn page_of(&self, row: u64) -> u32 {
        u32::try_from(row / self.page_size as u64)
            .unwrap_or(u32::MAX)
            .saturating_add(1)
    }

    pub fn record_at(&self, row: u64) -> Option<&RecordSummary> {
        let page = self.pages.get(&self.page_of(row))?;
        page.get((row % self.page_size as u64) as usize)
    }

    pub fn selected(&self) -> Option<&RecordSummary> {
        let id = self.selected_id.as_deref()?;
        self.pages
            .values()
            .flat_map(|p| p.iter())
            .find(|r| r.id == id)
    }

    fn page_in_range(&self, index: u32) -> bool {
        index >= 1 && self.page_count().map_or(true, |n| index <= n)
    }

    fn range_for(&self, index: u32) -> PageRange {
        PageRange {
            index,
            start: (index as u64 - 1) * self.page_size as u64,
            length: self.page_size,
            cursor: self.keyset.get(&index).cloned(),
        }
    }
}

/// An outbound fetch produced by the cache, tagged with the query it serves.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewRequest {
    Keyset {
        route: String,
        query_id: QueryId,
        query: ViewQuery,
        page_size: u32,
    },
    Pages {
        route: String,
        query_id: QueryId,
        library: String,
        query: ViewQuery,
        ranges: Vec<PageRange>,
    },
}

impl ViewRequest {
    pub fn route(&self) -> &str {
        match self {
            ViewRequest::Keyset { route, .. } | ViewRequest::Pages { route, .. } => route,
        }
    }

    pub fn query_id(&self) -> QueryId {
        match self {
            ViewRequest::Keyset { query_id, .. } | ViewRequest::Pages { query_id, .. } => *query_id,
        }
    }

    pub fn to_request(&self) -> Request {
        match self {
            ViewRequest::Keyset {
                query, page_size, ..
            } => Request::GetKeyset {
                query: query.clone(),
                page_size: *page_size,
            },
            ViewRequest::Pages {
                library,
                query,
                ranges,
                ..
            } => Request::GetPages {
                library: library.clone(),
                query: query.clone(),
                ranges: ranges.clone(),
            },
        }
    }
}

pub struct ViewCache {
    views: HashMap<String, Arc<View>>,
    next_query_id: u64,
    page_size: u32,
}

impl ViewCache {
    pub fn new(page_size: u32) -> Self {
        Self {
            views: HashMap::new(),
            next_query_id: 0,
            page_size,
        }
    }

    /// Snapshot of one view.
    pub fn get(&self, route: &str) -> Option<Arc<View>> {
        self.views.get(route).cloned()
    }

    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.views.keys().map(String::as_str)
    }

    fn mint_id(&mut self) -> QueryId {
        self.next_query_id += 1;
        QueryId(self.next_query_id)
    }

    fn view_mut(&mut self, route: &str) -> Option<&mut View> {
        self.views.get_mut(route).map(Arc::make_mut)
    }

    /// Assign `query` to the route's view, creating it if needed.  Always
    /// mints a new id and clears cached data.
    pub fn set_query(&mut self, route: &str, query: ViewQuery) -> QueryId {
        let id = self.mint_id();
        match self.view_mut(route) {
            Some(view) => view.reset(query, id),
            None => {
                let view = View::new(route, query, id, self.page_size);
                self.views.insert(route.to_string(), Arc::new(view));
            }
        }
        debug!("view {}: new query {:?}", route, id);
        id
    }

    /// Mark pages covering rows `first..=last` as wanted.  Returns how many
    /// pages were newly marked.  Until the total is known at most
    /// `MAX_UNBOUNDED_EXPOSE` pages from the start of the window are marked.
    pub fn expose(&mut self, route: &str, first_row: u64, last_row: u64) -> usize {
        let Some(view) = self.view_mut(route) else {
            return 0;
        };
        let (lo, hi) = if first_row <= last_row {
            (first_row, last_row)
        } else {
            (last_row, first_row)
        };
        let first = view.page_of(lo);
        let mut last = view.page_of(hi);
        if view.total.is_none() {
            last = last.min(first.saturating_add(MAX_UNBOUNDED_EXPOSE - 1));
        }
        let mut marked = 0;
        for index in first..=last {
            if !view.page_in_range(index) {
                break;
            }
            if !view.page_state.contains_key(&index) {
                view.page_state.insert(index, RequestState::Waiting);
                marked += 1;
            }
        }
        marked
    }

    pub fn select(&mut self, route: &str, id: Option<String>) {
        if let Some(view) = self.view_mut(route) {
            view.selected_id = id;
        }
    }

    /// Clear the selection on every view that has `id` selected.
    pub fn deselect_everywhere(&mut self, id: &str) {
        let routes: Vec<String> = self
            .views
            .iter()
            .filter(|(_, v)| v.selected_id.as_deref() == Some(id))
            .map(|(r, _)| r.clone())
            .collect();
        for route in routes {
            self.select(&route, None);
        }
    }

    /// If the keyset is still `Waiting`, mark it `Requested` and hand back
    /// the request to send.
    pub fn take_keyset_request(&mut self, route: &str) -> Option<ViewRequest> {
        if self.views.get(route)?.keyset_state != RequestState::Waiting {
            return None;
        }
        let view = self.view_mut(route)?;
        view.keyset_state = RequestState::Requested;
        Some(ViewRequest::Keyset {
            route: view.route.clone(),
            query_id: view.query_id,
            query: view.query.clone(),
            page_size: view.page_size,
        })
    }

    /// Collect every `Waiting` page into one batched request, marking them
    /// `Requested`.  `None` when there's nothing to do or a batch is already
    /// out.
    pub fn take_page_request(&mut self, route: &str) -> Option<ViewRequest> {
        {
            let view = self.views.get(route)?;
            if view.keyset_state != RequestState::Received || view.pages_in_flight {
                return None;
            }
            if !view
                .page_state
                .values()
                .any(|s| *s == RequestState::Waiting)
            {
                return None;
            }
        }

        let view = self.view_mut(route)?;
        let page_count = view.page_count();
        // Gaps exposed before the total was known may lie past the end.
        if let Some(n) = page_count {
            view.page_state
                .retain(|index, state| *index <= n || *state != RequestState::Waiting);
        }

        let waiting: Vec<u32> = view
            .page_state
            .iter()
            .filter(|(_, s)| **s == RequestState::Waiting)
            .map(|(i, _)| *i)
            .collect();
        if waiting.is_empty() {
            return None;
        }

        let mut ranges = Vec::with_capacity(waiting.len());
        for index in waiting {
            view.page_state.insert(index, RequestState::Requested);
            ranges.push(view.range_for(index));
        }
        view.pages_in_flight = true;

        Some(ViewRequest::Pages {
            route: view.route.clone(),
            query_id: view.query_id,
            library: view.route.clone(),
            query: view.query.clone(),
            ranges,
        })
    }

    /// Store a keyset response.  Returns `false` (and changes nothing) when it
    /// answers a query the view has moved past.
    pub fn apply_keyset(
        &mut self,
        route: &str,
        query_id: QueryId,
        keyset: Keyset,
        total: u64,
    ) -> bool {
        match self.views.get(route) {
            Some(view) if view.query_id == query_id => {}
            Some(view) => {
                debug!(
                    "view {}: dropping stale keyset for {:?} (current {:?})",
                    route, query_id, view.query_id
                );
                return false;
            }
            None => return false,
        }
        let Some(view) = self.view_mut(route) else {
            return false;
        };
        view.keyset = keyset;
        view.total = Some(total);
        view.keyset_state = RequestState::Received;
        true
    }

    /// The keyset request for `query_id` failed; put it back to `Waiting` so
    /// the next tick asks again.  Returns `false` for a stale id.
    pub fn fail_keyset(&mut self, route: &str, query_id: QueryId) -> bool {
        match self.views.get(route) {
            Some(view)
                if view.query_id == query_id && view.keyset_state == RequestState::Requested => {}
            _ => return false,
        }
        let Some(view) = self.view_mut(route) else {
            return false;
        };
        view.keyset_state = RequestState::Waiting;
        true
    }

    /// The page batch for `query_id` failed.  Its pages go back to `Waiting`
    /// and the view may send another batch.  Returns `false` for a stale id.
    pub fn fail_pages(&mut self, route: &str, query_id: QueryId) -> bool {
        match self.views.get(route) {
            Some(view) if view.query_id == query_id => {}
            _ => return false,
        }
        let Some(view) = self.view_mut(route) else {
            return false;
        };
        view.pages_in_flight = false;
        for state in view.page_state.values_mut() {
            if *state == RequestState::Requested {
                *state = RequestState::Waiting;
            }
        }
        true
    }

    /// Store a page batch response.  Every returned index that was requested
    /// becomes `Received`; a stale batch is dropped untouched.
    pub fn apply_pages(&mut self, route: &str, query_id: QueryId, results: Vec<PageResult>) -> bool {
        match self.views.get(route) {
            Some(view) if view.query_id == query_id => {}
            Some(view) => {
                debug!(
                    "view {}: dropping stale pages for {:?} (current {:?})",
                    route, query_id, view.query_id
                );
                return false;
            }
            None => return false,
        }
        let Some(view) = self.view_mut(route) else {
            return false;
        };
        view.pages_in_flight = false;
        for result in results {
            if view.page_state.get(&result.index) != Some(&RequestState::Requested) {
                debug!("view {}: unsolicited page {}", route, result.index);
                continue;
            }
            view.page_state.insert(result.index, RequestState::Received);
            view.pages.insert(result.index, Arc::new(result.records));
        }
        true
    }
}
