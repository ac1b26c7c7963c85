//! Async client for the stats protocol

use tokio::io::{AsyncWriteExt, BufReader};
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{self, quote, Pairs, Stream};
use crate::song::Song;
use crate::types::EntityKind;
use crate::GREETING_NAME;

/// One connection to a stats server.
pub struct StatsClient {
    stream: BufReader<Box<dyn Stream>>,
    version: String,
}

impl StatsClient {
    /// Connect and check the greeting. `host` may be a unix socket path.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let mut stream = protocol::connect(host, port).await?;
        let greeting = protocol::read_line(&mut stream).await?;
        let version = protocol::parse_greeting(&greeting, GREETING_NAME)?;
        debug!("Connected to stats server {} (protocol {})", host, version);
        Ok(Self { stream, version })
    }

    /// Protocol version from the greeting.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn password(&mut self, password: &str) -> Result<()> {
        self.command("password", &[password]).await.map(drop)
    }

    /// Send a command and collect its result pairs. An `ACK` becomes
    /// [`Error::Server`].
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
            .map_err(|ack| Error::Server {
                code: ack.code,
                command: ack.command,
                message: ack.message,
            })
    }

    /// Run a mutation and return its `changes` count.
    pub async fn changes(&mut self, name: &str, args: &[&str]) -> Result<u64> {
        let pairs = self.command(name, args).await?;
        pairs
            .iter()
            .find(|(key, _)| key == "changes")
            .and_then(|(_, value)| value.parse().ok())
            .ok_or_else(|| Error::Protocol(format!("{name}: missing changes count")))
    }
}

/// Split a listing into one group per entity; each starts at an `id` line.
#[must_use]
pub fn group_entries(pairs: Pairs) -> Vec<Pairs> {
    let mut groups: Vec<Pairs> = Vec::new();
    for (key, value) in pairs {
        match groups.last_mut() {
            Some(group) if key != "id" => group.push((key, value)),
            _ => groups.push(vec![(key, value)]),
        }
    }
    groups
}

/// SQL string literal: single quotes, embedded quotes doubled.
#[must_use]
pub fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Expression selecting the row of `kind` that `song` belongs to.
///
/// Albums are narrowed by artist when the song has one. `None` when the
/// song lacks the tag that names the row.
#[must_use]
pub fn identity_expression(kind: EntityKind, song: &Song) -> Option<String> {
    let name = |tag: &Option<String>| tag.as_deref().map(|v| format!("name = {}", sql_quote(v)));
    match kind {
        EntityKind::Song => Some(format!("uri = {}", sql_quote(&song.uri))),
        EntityKind::Artist => name(&song.artist),
        EntityKind::Genre => name(&song.genre),
        EntityKind::Album => name(&song.album).map(|expr| match &song.artist {
            Some(artist) => format!("{expr} and artist = {}", sql_quote(artist)),
            None => expr,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(key: &str, value: &str) -> (String, String) {
        (key.to_string(), value.to_string())
    }

    #[test]
    fn test_group_entries() {
        let pairs = vec![
            p("id", "1"),
            p("file", "a.mp3"),
            p("Tag", "x"),
            p("id", "2"),
            p("file", "b.mp3"),
        ];
        let groups = group_entries(pairs);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 3);
        assert_eq!(groups[1][1], p("file", "b.mp3"));

        assert!(group_entries(Vec::new()).is_empty());
    }

    #[test]
    fn test_identity_expression() {
        let song = Song {
            artist: Some("Guns N' Roses".to_string()),
            album: Some("Lies".to_string()),
            ..Song::new("it's.mp3")
        };
        assert_eq!(
            identity_expression(EntityKind::Song, &song).unwrap(),
            "uri = 'it''s.mp3'"
        );
        assert_eq!(
            identity_expression(EntityKind::Artist, &song).unwrap(),
            "name = 'Guns N'' Roses'"
        );
        assert_eq!(
            identity_expression(EntityKind::Album, &song).unwrap(),
            "name = 'Lies' and artist = 'Guns N'' Roses'"
        );
        assert!(identity_expression(EntityKind::Genre, &song).is_none());
    }

    #[tokio::test]
    async fn test_identity_expression_matches_stored_row() {
        use crate::db::Database;
        use crate::types::Permission;

        let db = Database::open_in_memory().unwrap();
        let song = Song {
            artist: Some("O'Brien".to_string()),
            title: Some("T".to_string()),
            album: Some("A".to_string()),
            ..Song::new("o'brien/t.mp3")
        };
        db.process(&song, false).await.unwrap();

        for kind in [EntityKind::Song, EntityKind::Artist, EntityKind::Album] {
            let expr = identity_expression(kind, &song).unwrap();
            let rows = db.list(Permission::SELECT, kind, &expr).await.unwrap();
            assert_eq!(rows.len(), 1, "{kind}: {expr}");
        }
    }
}
