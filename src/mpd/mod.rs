//! Upstream MPD connection: commands, response parsing and the idle watcher

mod client;
mod metadata;
mod watcher;

pub use client::MpdClient;
pub use metadata::{parse_song, parse_songs, parse_status, parse_subsystems};
pub use watcher::Watcher;
