//! Types shared between the launcher shell and the back process: the wire
//! protocol, the library data model, configuration and platform paths.

pub mod config;
pub mod model;
pub mod platform;
pub mod protocol;
