//! Minimal async MPD client

use tokio::io::{AsyncWriteExt, BufReader};
use tracing::debug;

use super::metadata::{parse_song, parse_songs, parse_status, parse_subsystems};
use crate::config::MpdConfig;
use crate::error::{Error, Result};
use crate::protocol::{self, quote, Pairs, Stream};
use crate::song::{PlayerStatus, Song};

/// Greeting name sent by MPD.
const MPD_GREETING: &str = "MPD";

/// One command connection to MPD.
pub struct MpdClient {
    stream: BufReader<Box<dyn Stream>>,
    version: String,
}

impl MpdClient {
    /// Connect using the `[mpd]` configuration.
    pub async fn connect(config: &MpdConfig) -> Result<Self> {
        Self::connect_to(&config.host, config.port, config.password.as_deref()).await
    }

    /// Connect and authenticate. An empty password is not sent.
    pub async fn connect_to(host: &str, port: u16, password: Option<&str>) -> Result<Self> {
        let mut stream = protocol::connect(host, port).await?;
        let greeting = protocol::read_line(&mut stream).await?;
        let version = protocol::parse_greeting(&greeting, MPD_GREETING)?;
        debug!("Connected to MPD {} at {}:{}", version, host, port);

        let mut client = Self { stream, version };
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            client.command("password", &[password]).await?;
        }
        Ok(client)
    }

    /// Server protocol version from the greeting.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Send a command and read its response. An `ACK` becomes [`Error::Mpd`].
    pub async fn command(&mut self, name: &str, args: &[&str]) -> Result<Pairs> {
        let mut line = name.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        line.push('\n');

        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;

        protocol::read_response(&mut self.stream)
            .await?
            .map_err(|ack| Error::Mpd(format!("{{{}}} {}", ack.command, ack.message)))
    }

    pub async fn status(&mut self) -> Result<PlayerStatus> {
        self.command("status", &[]).await.map(|pairs| parse_status(&pairs))
    }

    pub async fn current_song(&mut self) -> Result<Option<Song>> {
        self.command("currentsong", &[])
            .await
            .map(|pairs| parse_song(&pairs))
    }

    /// Every song below `path`, or the whole database.
    pub async fn list_all_info(&mut self, path: Option<&str>) -> Result<Vec<Song>> {
        let args: Vec<&str> = path.into_iter().collect();
        self.command("listallinfo", &args)
            .await
            .map(|pairs| parse_songs(&pairs))
    }

    /// Block until something changes; returns the subsystem names.
    pub async fn idle(&mut self) -> Result<Vec<String>> {
        self.command("idle", &[])
            .await
            .map(|pairs| parse_subsystems(&pairs))
    }
}
