//! Every intent a front-end can hand to the shell.

use launcher_proto::model::{OrderBy, Playlist, PlaylistEntry, Record, SortDirection};

use crate::query::PlaylistChange;

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    // ── Views ────────────────────────────────────────────────────────────────
    OpenRoute(String),
    Search {
        route: String,
        text: String,
    },
    Order {
        route: String,
        order_by: OrderBy,
        direction: SortDirection,
    },
    FilterPlaylist {
        route: String,
        change: PlaylistChange,
    },
    /// Rows currently visible in the route's list (inclusive, 0-based).
    Expose {
        route: String,
        first_row: u64,
        last_row: u64,
    },
    Select {
        route: String,
        id: Option<String>,
    },

    // ── Random ───────────────────────────────────────────────────────────────
    Roll,

    // ── Edits ────────────────────────────────────────────────────────────────
    SaveRecord(Record),
    DeleteRecord(String),
    SavePlaylistEntry(PlaylistEntry),
    SavePlaylist(Playlist),
    DeletePlaylist(String),

    // ── Upgrades ─────────────────────────────────────────────────────────────
    InstallUpgrade(String),

    // ── System ───────────────────────────────────────────────────────────────
    Restart,
    Quit,
}

fn parse_order_by(s: &str) -> Option<OrderBy> {
    Some(match s.to_lowercase().as_str() {
        "title" => OrderBy::Title,
        "dateadded" | "added" => OrderBy::DateAdded,
        "datemodified" | "modified" => OrderBy::DateModified,
        "developer" => OrderBy::Developer,
        "publisher" => OrderBy::Publisher,
        "platform" => OrderBy::Platform,
        "series" => OrderBy::Series,
        _ => return None,
    })
}

impl ShellCommand {
    /// Parse one line of the console front-end, e.g. `search arcade super mario`.
    /// Edits that need a full record are not available from the console.
    pub fn parse(line: &str) -> Option<ShellCommand> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let mut args = rest.split_whitespace();

        let cmd = match word {
            "open" => ShellCommand::OpenRoute(args.next()?.to_string()),
            "search" => {
                let route = args.next()?.to_string();
                let text = rest[route.len()..].trim().to_string();
                ShellCommand::Search { route, text }
            }
            "order" => {
                let route = args.next()?.to_string();
                let order_by = parse_order_by(args.next()?)?;
                let direction = match args.next() {
                    None | Some("asc") => SortDirection::Asc,
                    Some("desc") => SortDirection::Desc,
                    Some(_) => return None,
                };
                ShellCommand::Order {
                    route,
                    order_by,
                    direction,
                }
            }
            "playlist" => {
                let route = args.next()?.to_string();
                let change = match args.next() {
                    None | Some("-") => PlaylistChange::Clear,
                    Some(id) => PlaylistChange::Select(id.to_string()),
                };
                ShellCommand::FilterPlaylist { route, change }
            }
            "show" => {
                let route = args.next()?.to_string();
                let first_row = args.next()?.parse().ok()?;
                let last_row = args.next()?.parse().ok()?;
                ShellCommand::Expose {
                    route,
                    first_row,
                    last_row,
                }
            }
            "select" => ShellCommand::Select {
                route: args.next()?.to_string(),
                id: args.next().map(str::to_string),
            },
            "random" | "roll" => ShellCommand::Roll,
            "delete-record" => ShellCommand::DeleteRecord(args.next()?.to_string()),
            "delete-playlist" => ShellCommand::DeletePlaylist(args.next()?.to_string()),
            "install" => ShellCommand::InstallUpgrade(args.next()?.to_string()),
            "restart" => ShellCommand::Restart,
            "quit" | "exit" => ShellCommand::Quit,
            _ => return None,
        };
        Some(cmd)
    }
}
