//! Renderer-side shell of the launcher: keeps paginated library views,
//! playlists, random picks and upgrade stages in sync with the back process.

pub mod action;
pub mod context;
pub mod derived;
pub mod icons;
pub mod library;
pub mod query;
pub mod random;
pub mod shell;
pub mod transport;
pub mod upgrade;
pub mod view;

pub use action::ShellCommand;
pub use context::AppContext;
pub use shell::{handshake, Shell, ShellEvent, ShellHandle, ShellServices};
pub use transport::{Transport, TransportError};
