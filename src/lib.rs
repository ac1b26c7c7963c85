//! # mpd-stats
//!
//! Listening statistics for MPD.
//!
//! This crate provides:
//! - An SQLite statistics database of songs, artists, albums and genres
//!   (play counts, love, kill, ratings, karma and free-form tags)
//! - A now-playing tracker that decides when a song counts as played
//! - An MPD-style line protocol server for querying and editing the
//!   statistics, gated by per-connection permissions
//! - A minimal MPD client and idle watcher feeding player events in

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod module;
pub mod mpd;
pub mod protocol;
pub mod server;
pub mod song;
pub mod track;
pub mod types;

pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "mpd-stats";

/// Stats protocol version sent in the greeting
pub const PROTOCOL_VERSION: &str = "0.1";

/// Server name sent in the greeting: `OK MPDCRON <version>`
pub const GREETING_NAME: &str = "MPDCRON";

/// Default stats server port
pub const DEFAULT_PORT: u16 = 6601;
