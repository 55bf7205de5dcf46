//! In-process stand-in for the back, speaking the real framing over a
//! `tokio::io::duplex` pipe.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use launcher_proto::model::{
    Cursor, InitData, Keyset, PageResult, Playlist, Preferences, RecordSummary, UpgradeDescriptor,
    ViewQuery,
};
use launcher_proto::protocol::{
    Envelope, PushEvent, Request, RequestId, Response, PROTOCOL_VERSION,
};
use launcher_shell::Transport;
use rand::seq::SliceRandom;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

/// Raw back side of a connection.
pub struct BackConn {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    buf: Vec<u8>,
}

pub fn pair() -> (Transport, BackConn) {
    let (shell_side, back_side) = tokio::io::duplex(256 * 1024);
    let (reader, writer) = tokio::io::split(back_side);
    (
        Transport::spawn(shell_side),
        BackConn {
            reader,
            writer,
            buf: Vec::new(),
        },
    )
}

impl BackConn {
    /// Next request from the shell, or `None` once it hangs up.
    pub async fn next(&mut self) -> Option<(Option<RequestId>, Request)> {
        loop {
            if let Some((envelope, len)) = Envelope::decode(&self.buf).ok()? {
                self.buf.drain(..len);
                if let Envelope::Request { id, request } = envelope {
                    return Some((id, request));
                }
                continue;
            }
            let mut tmp = [0u8; 8192];
            let n = self.reader.read(&mut tmp).await.ok()?;
            if n == 0 {
                return None;
            }
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }

    pub async fn write(&mut self, envelope: Envelope) {
        let bytes = envelope.encode().unwrap();
        self.writer.write_all(&bytes).await.unwrap();
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    pub async fn reply(&mut self, id: RequestId, response: Response) {
        self.write(Envelope::Response { id, response }).await;
    }

    pub async fn push(&mut self, event: PushEvent) {
        self.write(Envelope::Push { event }).await;
    }
}

pub fn record(n: usize, title: &str) -> RecordSummary {
    RecordSummary {
        id: format!("g{:03}", n),
        title: title.to_string(),
        library: "arcade".into(),
        platform: "Flash".into(),
        ..Default::default()
    }
}

/// `count` games titled "Game NNN", with every tenth one a Mario game.
pub fn catalogue(count: usize) -> Vec<RecordSummary> {
    (0..count)
        .map(|n| {
            if n % 10 == 0 {
                record(n, &format!("Super Mario {:03}", n))
            } else {
                record(n, &format!("Game {:03}", n))
            }
        })
        .collect()
}

pub struct LibraryState {
    pub records: Vec<RecordSummary>,
    pub playlists: Vec<Playlist>,
    pub upgrades: Vec<UpgradeDescriptor>,
    /// Every request seen, in arrival order.
    pub log: Vec<Request>,
}

impl LibraryState {
    pub fn new(records: Vec<RecordSummary>) -> Self {
        Self {
            records,
            playlists: Vec::new(),
            upgrades: Vec::new(),
            log: Vec::new(),
        }
    }

    fn matching(&self, query: &ViewQuery) -> Vec<RecordSummary> {
        let text = query.text.to_lowercase();
        let allowed: Option<Vec<String>> = query.playlist_id.as_ref().map(|pid| {
            self.playlists
                .iter()
                .find(|p| &p.id == pid)
                .map(|p| p.entries.iter().map(|e| e.record_id.clone()).collect())
                .unwrap_or_default()
        });
        self.records
            .iter()
            .filter(|r| text.is_empty() || r.title.to_lowercase().contains(&text))
            .filter(|r| query.extreme || !r.extreme)
            .filter(|r| allowed.as_ref().map_or(true, |ids| ids.contains(&r.id)))
            .cloned()
            .collect()
    }

    fn answer(&mut self, request: &Request) -> Response {
        match request {
            Request::Init => Response::Init {
                data: InitData {
                    protocol_version: PROTOCOL_VERSION,
                    preferences: Preferences::default(),
                    libraries: vec!["arcade".into(), "theatre".into()],
                    playlists: self.playlists.clone(),
                    upgrades: self.upgrades.clone(),
                    ..Default::default()
                },
            },
            Request::GetKeyset { query, page_size } => {
                let total = self.matching(query).len() as u64;
                let pages = total.div_ceil(*page_size as u64) as u32;
                let mut keyset = Keyset::new();
                for index in 1..=pages {
                    keyset.insert(index, Cursor(format!("c{}", index)));
                }
                Response::Keyset { keyset, total }
            }
            Request::GetPages { query, ranges, .. } => {
                let rows = self.matching(query);
                Response::Pages {
                    ranges: ranges
                        .iter()
                        .map(|range| PageResult {
                            index: range.index,
                            records: rows
                                .iter()
                                .skip(range.start as usize)
                                .take(range.length as usize)
                                .cloned()
                                .collect(),
                        })
                        .collect(),
                }
            }
            Request::GetRandomRecords { count, .. } => {
                let mut rng = rand::thread_rng();
                let records = self
                    .records
                    .choose_multiple(&mut rng, *count)
                    .cloned()
                    .collect();
                Response::RandomRecords { records }
            }
            Request::SavePlaylist { playlist } => {
                self.playlists.retain(|p| p.id != playlist.id);
                self.playlists.push(playlist.clone());
                Response::Playlist {
                    playlist: Some(playlist.clone()),
                }
            }
            Request::DeletePlaylist { id } => {
                self.playlists.retain(|p| &p.id != id);
                Response::Ack
            }
            Request::DeleteRecord { id } => {
                self.records.retain(|r| &r.id != id);
                Response::Ack
            }
            Request::SaveRecord { .. } | Request::SavePlaylistEntry { .. } => Response::Ack,
            Request::Restart => Response::Ack,
        }
    }
}

enum Control {
    Push(PushEvent),
    Shutdown,
}

/// A back that answers from `LibraryState` and forwards injected pushes.
pub struct FakeBack {
    pub state: Arc<Mutex<LibraryState>>,
    control: mpsc::UnboundedSender<Control>,
}

impl FakeBack {
    pub fn spawn(mut conn: BackConn, state: LibraryState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let (control, mut control_rx) = mpsc::unbounded_channel::<Control>();
        let served = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = conn.next() => {
                        let Some((id, request)) = next else { break };
                        let response = {
                            let mut s = served.lock().unwrap();
                            s.log.push(request.clone());
                            s.answer(&request)
                        };
                        if let Some(id) = id {
                            conn.reply(id, response).await;
                        }
                    }
                    Some(command) = control_rx.recv() => match command {
                        Control::Push(event) => conn.push(event).await,
                        Control::Shutdown => break,
                    },
                }
            }
        });
        Self { state, control }
    }

    pub fn push(&self, event: PushEvent) {
        let _ = self.control.send(Control::Push(event));
    }

    /// Hang up; the shell sees the connection close.
    pub fn shutdown(&self) {
        let _ = self.control.send(Control::Shutdown);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().log.clone()
    }
}
