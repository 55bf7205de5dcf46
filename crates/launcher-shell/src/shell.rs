//! The single-owner event loop tying everything together.
//!
//! ```text
//!  ShellHandle ──ShellCommand──┐
//!  Transport push ─────────────┼──▶ Shell::run (select!) ──▶ broadcast<ShellEvent>
//!  request tasks ──result──────┤         │
//!  Installer ──InstallerEvent──┘         └── tick: reconcile views, spawn requests
//! ```
//!
//! All state lives on the loop; requests to the back run on spawned tasks
//! and report back as `ShellMessage`s, so nothing here ever awaits the back.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use launcher_proto::config::Config;
use launcher_proto::model::{LogEntry, Playlist, RecordSummary};
use launcher_proto::protocol::{PushEvent, Request, Response, PROTOCOL_VERSION};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::action::ShellCommand;
use crate::context::AppContext;
use crate::derived::{flatten_platforms, playlists_for_route, Memo, PlaylistKey};
use crate::icons::{IconCache, IconHandle, IconStore};
use crate::query::QueryController;
use crate::random::{RandomFilter, RandomPickQueue};
use crate::transport::{Transport, TransportError};
use crate::upgrade::{
    check_stage, ArchiveExtractor, InstallOutcome, InstallPrompter, Installer, InstallerEvent,
    PackageFetcher, UpgradeError, UpgradePhase, UpgradeStage, UpgradeStatePatch, UpgradeStages,
};
use crate::view::{QueryId, View, ViewRequest};

const EVENT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 64;

/// State changes published to front-ends.
#[derive(Debug, Clone)]
pub enum ShellEvent {
    ViewUpdated { route: String, view: Arc<View> },
    RandomPicked(RecordSummary),
    PlaylistsUpdated { route: String, playlists: Arc<Vec<Playlist>> },
    PlatformsUpdated(Arc<Vec<String>>),
    IconsUpdated(Arc<HashMap<String, IconHandle>>),
    UpgradeUpdated(UpgradeStage),
    Log(LogEntry),
    /// Theme, locale, languages, services or tag categories changed; read
    /// them from the context.
    ContextChanged,
    RequestFailed { what: String, message: String },
    Disconnected,
}

/// Write operations whose completion invalidates views.
#[derive(Debug, Clone)]
enum Mutation {
    SaveRecord,
    DeleteRecord(String),
    SavePlaylistEntry(String),
    SavePlaylist(Playlist),
    DeletePlaylist(String),
}

impl Mutation {
    fn describe(&self) -> String {
        match self {
            Mutation::SaveRecord => "save record".to_string(),
            Mutation::DeleteRecord(id) => format!("delete record {}", id),
            Mutation::SavePlaylistEntry(id) => format!("save entry in playlist {}", id),
            Mutation::SavePlaylist(p) => format!("save playlist {}", p.id),
            Mutation::DeletePlaylist(id) => format!("delete playlist {}", id),
        }
    }
}

/// Everything that reaches the loop besides front-end commands.
enum ShellMessage {
    Push(PushEvent),
    Keyset {
        route: String,
        query_id: QueryId,
        result: Result<Response, TransportError>,
    },
    Pages {
        route: String,
        query_id: QueryId,
        result: Result<Response, TransportError>,
    },
    RandomBatch {
        epoch: u64,
        result: Result<Response, TransportError>,
    },
    Mutation {
        mutation: Mutation,
        result: Result<Response, TransportError>,
    },
    InstallFinished {
        stage_id: String,
        result: Result<InstallOutcome, UpgradeError>,
    },
}

/// Pluggable pieces the shell needs but doesn't construct itself.
pub struct ShellServices {
    pub prompter: Arc<dyn InstallPrompter>,
    pub fetcher: Arc<dyn PackageFetcher>,
    pub extractor: Arc<dyn ArchiveExtractor>,
    pub icon_store: Box<dyn IconStore>,
}

/// Front-end entry point.  Cheap to clone.
#[derive(Clone)]
pub struct ShellHandle {
    commands: mpsc::Sender<ShellCommand>,
    events: broadcast::Sender<ShellEvent>,
}

impl ShellHandle {
    pub async fn send(&self, command: ShellCommand) -> Result<(), mpsc::error::SendError<ShellCommand>> {
        self.commands.send(command).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShellEvent> {
        self.events.subscribe()
    }
}

/// Perform the `Init` handshake and populate `context`.
pub async fn handshake(transport: &Transport, context: &AppContext) -> anyhow::Result<()> {
    match transport.request(Request::Init).await? {
        Response::Init { data } => {
            if data.protocol_version != PROTOCOL_VERSION {
                anyhow::bail!(
                    "back speaks protocol {} but this shell needs {}",
                    data.protocol_version,
                    PROTOCOL_VERSION
                );
            }
            context.initialize(data);
            Ok(())
        }
        other => anyhow::bail!("unexpected handshake response: {:?}", other),
    }
}

pub struct Shell {
    config: Config,
    config_path: Option<PathBuf>,
    transport: Transport,
    context: Arc<AppContext>,

    queries: QueryController,
    random: RandomPickQueue,
    icons: IconCache,
    stages: UpgradeStages,
    installer: Installer,
    installing: Option<String>,

    platforms: Memo<u64, Vec<String>>,
    route_playlists: HashMap<String, Memo<PlaylistKey, Vec<Playlist>>>,

    tx: mpsc::UnboundedSender<ShellMessage>,
    rx: mpsc::UnboundedReceiver<ShellMessage>,
    installer_rx: mpsc::UnboundedReceiver<InstallerEvent>,
    commands: mpsc::Receiver<ShellCommand>,
    events: broadcast::Sender<ShellEvent>,
    disconnected: bool,
}

impl Shell {
    /// Build the shell and register its push handler.  `context` must already
    /// be attached to `transport` so it sees pushes first.  `config_path` is
    /// where a newly chosen install folder is saved (`None` to not persist).
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        transport: Transport,
        context: Arc<AppContext>,
        services: ShellServices,
    ) -> (Self, ShellHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (installer_tx, installer_rx) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let push_tx = tx.clone();
        transport.on_push(move |event| {
            let _ = push_tx.send(ShellMessage::Push(event.clone()));
        });

        let installer = Installer::new(
            config.paths.download_dir.clone(),
            Duration::from_millis(config.upgrade.progress_interval_ms),
            services.prompter,
            services.fetcher,
            services.extractor,
            installer_tx,
        );

        let shell = Self {
            queries: QueryController::new(&config.views),
            random: RandomPickQueue::new(&config.random),
            icons: IconCache::new(services.icon_store),
            stages: UpgradeStages::default(),
            installer,
            installing: None,
            platforms: Memo::new(),
            route_playlists: HashMap::new(),
            config,
            config_path,
            transport,
            context,
            tx,
            rx,
            installer_rx,
            commands,
            events: events.clone(),
            disconnected: false,
        };
        let handle = ShellHandle {
            commands: command_tx,
            events,
        };
        (shell, handle)
    }

    /// Run until `Quit` or every handle is dropped.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.context.ready().await;
        self.on_ready();

        let mut tick = tokio::time::interval(Duration::from_millis(self.config.views.tick_ms.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ShellCommand::Quit) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(message) = self.rx.recv() => self.handle_message(message),
                Some(event) = self.installer_rx.recv() => self.handle_installer_event(event),
                _ = tick.tick() => self.tick(),
            }
        }
        info!("shell loop finished");
        Ok(())
    }

    fn emit(&self, event: ShellEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn on_ready(&mut self) {
        let prefs = self.context.preferences();
        self.queries.set_libraries(self.context.libraries());
        self.queries.set_show_extreme(prefs.show_extreme);
        self.random.set_filter(RandomFilter::from_preferences(&prefs));

        self.icons.sync(&self.context.playlists());
        self.emit(ShellEvent::IconsUpdated(Arc::new(self.icons.snapshot())));

        self.stages.load(self.context.upgrades());
        let folder = self.config.upgrade.install_folder.clone();
        let descriptors: Vec<_> = self.stages.all().iter().map(|s| s.descriptor.clone()).collect();
        for descriptor in descriptors {
            self.stages
                .apply(&descriptor.id, UpgradeStatePatch::phase(UpgradePhase::Checking));
            let patch = check_stage(&descriptor, folder.as_deref());
            self.apply_stage_patch(&descriptor.id, patch);
        }

        self.publish_platforms();
        self.publish_playlists();
        self.roll(true);
        info!("shell ready");
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    fn handle_command(&mut self, command: ShellCommand) {
        debug!("command: {:?}", command);
        match command {
            ShellCommand::OpenRoute(route) => {
                self.queries.open_route(&route);
                self.publish_playlists_for(&route);
            }
            ShellCommand::Search { route, text } => self.queries.set_text(&route, &text),
            ShellCommand::Order {
                route,
                order_by,
                direction,
            } => self.queries.set_order(&route, order_by, direction),
            ShellCommand::FilterPlaylist { route, change } => {
                self.queries.set_playlist(&route, change)
            }
            ShellCommand::Expose {
                route,
                first_row,
                last_row,
            } => {
                if self.queries.expose(&route, first_row, last_row) > 0 {
                    self.publish_view(&route);
                }
            }
            ShellCommand::Select { route, id } => {
                self.queries.select(&route, id);
                self.publish_view(&route);
            }
            ShellCommand::Roll => self.roll(false),
            ShellCommand::SaveRecord(record) => {
                self.mutate(Mutation::SaveRecord, Request::SaveRecord { record })
            }
            ShellCommand::DeleteRecord(id) => self.mutate(
                Mutation::DeleteRecord(id.clone()),
                Request::DeleteRecord { id },
            ),
            ShellCommand::SavePlaylistEntry(entry) => self.mutate(
                Mutation::SavePlaylistEntry(entry.playlist_id.clone()),
                Request::SavePlaylistEntry { entry },
            ),
            ShellCommand::SavePlaylist(playlist) => self.mutate(
                Mutation::SavePlaylist(playlist.clone()),
                Request::SavePlaylist { playlist },
            ),
            ShellCommand::DeletePlaylist(id) => self.mutate(
                Mutation::DeletePlaylist(id.clone()),
                Request::DeletePlaylist { id },
            ),
            ShellCommand::InstallUpgrade(id) => self.start_install(&id),
            ShellCommand::Restart => {
                if self.stages.any_installing() {
                    warn!("restart ignored while an upgrade is installing");
                } else {
                    self.request_restart();
                }
            }
            ShellCommand::Quit => {}
        }
    }

    fn roll(&mut self, first_call: bool) {
        let outcome = self.random.roll(first_call);
        match outcome.picked {
            Some(record) => self.emit(ShellEvent::RandomPicked(record)),
            None if !first_call => debug!("random queue empty, nothing to pick"),
            None => {}
        }
        if let Some(batch) = outcome.request {
            let transport = self.transport.clone();
            let tx = self.tx.clone();
            let request = batch.to_request();
            tokio::spawn(async move {
                let result = transport.request(request).await;
                let _ = tx.send(ShellMessage::RandomBatch {
                    epoch: batch.epoch,
                    result,
                });
            });
        }
    }

    fn mutate(&mut self, mutation: Mutation, request: Request) {
        let transport = self.transport.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = transport.request(request).await;
            let _ = tx.send(ShellMessage::Mutation { mutation, result });
        });
    }

    fn start_install(&mut self, id: &str) {
        if let Some(current) = &self.installing {
            warn!("install of {} ignored: {} is still installing", id, current);
            return;
        }
        let Some(stage) = self.stages.get(id) else {
            warn!("install requested for unknown stage {}", id);
            return;
        };
        let descriptor = stage.descriptor.clone();
        let folder = self.config.upgrade.install_folder.clone();
        let installer = self.installer.clone();
        let tx = self.tx.clone();
        self.installing = Some(id.to_string());
        tokio::spawn(async move {
            let result = installer.install(&descriptor, folder).await;
            let _ = tx.send(ShellMessage::InstallFinished {
                stage_id: descriptor.id,
                result,
            });
        });
    }

    fn request_restart(&self) {
        info!("asking the back to restart");
        if let Err(e) = self.transport.send(Request::Restart) {
            warn!("restart request not sent: {}", e);
        }
    }

    // ── Tick ──────────────────────────────────────────────────────────────────

    fn tick(&mut self) {
        if self.transport.is_closed() {
            if !self.disconnected {
                self.disconnected = true;
                warn!("connection to the back lost; views will not update");
                self.emit(ShellEvent::Disconnected);
            }
            return;
        }

        let requests = self.queries.tick();
        let mut touched: Vec<String> = Vec::new();
        for request in requests {
            if !touched.iter().any(|r| r == request.route()) {
                touched.push(request.route().to_string());
            }
            self.spawn_view_request(request);
        }
        for route in touched {
            self.publish_view(&route);
        }
    }

    fn spawn_view_request(&self, request: ViewRequest) {
        let transport = self.transport.clone();
        let tx = self.tx.clone();
        let wire = request.to_request();
        tokio::spawn(async move {
            let result = transport.request(wire).await;
            let message = match request {
                ViewRequest::Keyset { route, query_id, .. } => ShellMessage::Keyset {
                    route,
                    query_id,
                    result,
                },
                ViewRequest::Pages { route, query_id, .. } => ShellMessage::Pages {
                    route,
                    query_id,
                    result,
                },
            };
            let _ = tx.send(message);
        });
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    fn handle_message(&mut self, message: ShellMessage) {
        match message {
            ShellMessage::Push(event) => self.handle_push(event),
            ShellMessage::Keyset {
                route,
                query_id,
                result,
            } => {
                let payload = match result {
                    Ok(Response::Keyset { keyset, total }) => Some((keyset, total)),
                    Ok(other) => {
                        debug!("route {}: keyset answered with {:?}", route, other);
                        None
                    }
                    Err(e) => {
                        warn!("route {}: keyset request failed: {}", route, e);
                        if !matches!(e, TransportError::Closed) {
                            self.queries.on_keyset_failed(&route, query_id);
                        }
                        return;
                    }
                };
                if self.queries.on_keyset(&route, query_id, payload) {
                    self.publish_view(&route);
                }
            }
            ShellMessage::Pages {
                route,
                query_id,
                result,
            } => {
                let payload = match result {
                    Ok(Response::Pages { ranges }) => Some(ranges),
                    Ok(other) => {
                        debug!("route {}: pages answered with {:?}", route, other);
                        None
                    }
                    Err(e) => {
                        warn!("route {}: page request failed: {}", route, e);
                        if !matches!(e, TransportError::Closed) {
                            self.queries.on_pages_failed(&route, query_id);
                        }
                        return;
                    }
                };
                if self.queries.on_pages(&route, query_id, payload) {
                    self.publish_view(&route);
                }
            }
            ShellMessage::RandomBatch { epoch, result } => match result {
                Ok(Response::RandomRecords { records }) => {
                    let queued = self.random.on_batch(epoch, records);
                    debug!("random queue +{} (now {})", queued, self.random.len());
                }
                Ok(other) => {
                    debug!("random batch answered with {:?}", other);
                    self.random.on_batch(epoch, Vec::new());
                }
                Err(e) => {
                    warn!("random batch failed: {}", e);
                    self.random.on_batch_failed(epoch);
                }
            },
            ShellMessage::Mutation { mutation, result } => self.finish_mutation(mutation, result),
            ShellMessage::InstallFinished { stage_id, result } => {
                self.installing = None;
                match result {
                    Ok(InstallOutcome::Installed { restart_requested }) => {
                        info!("upgrade {} installed", stage_id);
                        if restart_requested {
                            self.request_restart();
                        }
                    }
                    Ok(InstallOutcome::Cancelled) => info!("upgrade {} cancelled", stage_id),
                    Err(e) => self.emit(ShellEvent::RequestFailed {
                        what: format!("install {}", stage_id),
                        message: e.to_string(),
                    }),
                }
            }
        }
    }

    fn handle_push(&mut self, event: PushEvent) {
        // The context has already applied this event.
        match event {
            PushEvent::LogEntryAdded { entry } => self.emit(ShellEvent::Log(entry)),
            PushEvent::PlaylistsChanged { playlists } => {
                let touched = self.queries.on_playlists_changed(&playlists);
                self.icons.sync(&playlists);
                self.emit(ShellEvent::IconsUpdated(Arc::new(self.icons.snapshot())));
                self.publish_playlists();
                for route in touched {
                    self.publish_view(&route);
                }
            }
            PushEvent::PreferencesChanged { preferences } => {
                self.queries.set_show_extreme(preferences.show_extreme);
                self.random.set_filter(RandomFilter::from_preferences(&preferences));
                self.publish_playlists();
            }
            PushEvent::Unknown => {}
            _ => self.emit(ShellEvent::ContextChanged),
        }
    }

    fn finish_mutation(&mut self, mutation: Mutation, result: Result<Response, TransportError>) {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                error!("{} failed: {}", mutation.describe(), e);
                self.emit(ShellEvent::RequestFailed {
                    what: mutation.describe(),
                    message: e.to_string(),
                });
                return;
            }
        };
        debug!("{} done", mutation.describe());

        match mutation {
            Mutation::SaveRecord => self.queries.on_record_saved(),
            Mutation::DeleteRecord(id) => self.queries.on_record_deleted(&id),
            Mutation::SavePlaylistEntry(playlist_id) => {
                self.queries.on_playlist_saved(&playlist_id);
            }
            Mutation::SavePlaylist(sent) => {
                let saved = match response {
                    Response::Playlist {
                        playlist: Some(playlist),
                    } => playlist,
                    _ => sent,
                };
                self.context.upsert_playlist(saved.clone());
                self.icons.on_playlist_updated(&saved);
                self.queries.on_playlist_saved(&saved.id);
                self.emit(ShellEvent::IconsUpdated(Arc::new(self.icons.snapshot())));
                self.publish_playlists();
            }
            Mutation::DeletePlaylist(id) => {
                self.context.remove_playlist(&id);
                self.icons.on_playlist_deleted(&id);
                self.queries.on_playlist_deleted(&id);
                self.emit(ShellEvent::IconsUpdated(Arc::new(self.icons.snapshot())));
                self.publish_playlists();
            }
        }
        self.publish_all_views();
    }

    fn handle_installer_event(&mut self, event: InstallerEvent) {
        match event {
            InstallerEvent::Stage { stage_id, patch } => self.apply_stage_patch(&stage_id, patch),
            InstallerEvent::FolderSelected(folder) => {
                info!("install folder set to {}", folder.display());
                self.config.upgrade.install_folder = Some(folder);
                if let Some(path) = &self.config_path {
                    if let Err(e) = self.config.save_to(path) {
                        error!("could not save config: {}", e);
                    }
                }
            }
        }
    }

    fn apply_stage_patch(&mut self, id: &str, patch: UpgradeStatePatch) {
        if let Some(stage) = self.stages.apply(id, patch) {
            let stage = stage.clone();
            self.emit(ShellEvent::UpgradeUpdated(stage));
        }
    }

    // ── Publishing ────────────────────────────────────────────────────────────

    fn publish_view(&self, route: &str) {
        if let Some(view) = self.queries.view(route) {
            self.emit(ShellEvent::ViewUpdated {
                route: route.to_string(),
                view,
            });
        }
    }

    fn publish_all_views(&self) {
        for route in self.queries.routes() {
            self.publish_view(route);
        }
    }

    fn publish_platforms(&mut self) {
        let revision = self.context.revisions().platforms;
        let context = Arc::clone(&self.context);
        let platforms = self
            .platforms
            .get_or_compute(revision, || flatten_platforms(&context.read().platforms));
        self.emit(ShellEvent::PlatformsUpdated(platforms));
    }

    fn publish_playlists(&mut self) {
        let routes: Vec<String> = self.queries.routes().map(str::to_string).collect();
        for route in routes {
            self.publish_playlists_for(&route);
        }
    }

    fn publish_playlists_for(&mut self, route: &str) {
        let all = self.context.playlists();
        let show_extreme = self.context.read().preferences.show_extreme;
        let key = PlaylistKey {
            revision: self.context.revisions().playlists,
            library: self.queries.playlist_library(route),
            show_extreme,
        };
        let queries = &self.queries;
        let memo = self.route_playlists.entry(route.to_string()).or_default();
        let playlists = memo.get_or_compute(key, || {
            playlists_for_route(
                &all,
                route,
                queries.libraries(),
                queries.default_library(),
                show_extreme,
            )
        });
        let _ = self.events.send(ShellEvent::PlaylistsUpdated {
            route: route.to_string(),
            playlists,
        });
    }
}
