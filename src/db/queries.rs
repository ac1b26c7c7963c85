//! Update engine and per-kind query/mutation operations

use rusqlite::types::Value;
use rusqlite::{named_params, params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use super::filter::Expression;
use super::tags::{self, TagSet};
use super::DbResultExt;
use crate::error::{DbErrorKind, Error, Result};
use crate::song::Song;
use crate::types::EntityKind;

// ============================================================================
// Update engine
// ============================================================================

/// Upsert the song and its artist, album and genre rows.
///
/// `increment` adds one to every touched row's play count and stamps the
/// song's `last_played`. Album and genre rows are only touched when the song
/// carries those tags.
pub fn process(conn: &Connection, song: &Song, increment: bool) -> Result<()> {
    let Some(artist) = song.artist.as_deref().filter(|_| song.has_required_tags()) else {
        return Err(Error::NoTags(song.uri.clone()));
    };

    upsert_song(conn, song, increment)?;
    upsert_named(conn, EntityKind::Artist, artist, None, increment)?;
    if let Some(album) = song.album.as_deref() {
        upsert_named(conn, EntityKind::Album, album, Some(artist), increment)?;
    }
    if let Some(genre) = song.genre.as_deref() {
        upsert_named(conn, EntityKind::Genre, genre, None, increment)?;
    }
    Ok(())
}

fn find_id(conn: &Connection, kind: EntityKind, identity: &str) -> Result<Option<i64>> {
    let sql = format!(
        "SELECT id FROM {} WHERE {} = ?1",
        kind.table(),
        kind.identity_column()
    );
    let mut stmt = conn.prepare_cached(&sql).db(DbErrorKind::Prepare)?;
    stmt.query_row([identity], |row| row.get(0))
        .optional()
        .db(DbErrorKind::Step)
}

const INSERT_SONG: &str = "
    INSERT INTO song (
        play_count, last_played, uri, duration, last_modified,
        artist, album, title, track, name, genre, date, composer, performer, disc,
        mb_artistid, mb_albumid, mb_trackid
    ) VALUES (
        :increment, :last_played, :uri, :duration, :last_modified,
        :artist, :album, :title, :track, :name, :genre, :date, :composer, :performer, :disc,
        :mb_artistid, :mb_albumid, :mb_trackid
    )";

const UPDATE_SONG: &str = "
    UPDATE song SET
        play_count = play_count + :increment,
        last_played = COALESCE(:last_played, last_played),
        duration = :duration, last_modified = :last_modified,
        artist = :artist, album = :album, title = :title, track = :track,
        name = :name, genre = :genre, date = :date, composer = :composer,
        performer = :performer, disc = :disc,
        mb_artistid = :mb_artistid, mb_albumid = :mb_albumid, mb_trackid = :mb_trackid
    WHERE uri = :uri";

fn upsert_song(conn: &Connection, song: &Song, increment: bool) -> Result<()> {
    let existing = find_id(conn, EntityKind::Song, &song.uri)?;
    let sql = if existing.is_some() { UPDATE_SONG } else { INSERT_SONG };
    let last_played = increment.then(|| chrono::Utc::now().timestamp());

    let mut stmt = conn.prepare_cached(sql).db(DbErrorKind::Prepare)?;
    stmt.execute(named_params! {
        ":increment": i64::from(increment),
        ":last_played": last_played,
        ":uri": song.uri,
        ":duration": song.duration,
        ":last_modified": song.last_modified,
        ":artist": song.artist,
        ":album": song.album,
        ":title": song.title,
        ":track": song.track,
        ":name": song.name,
        ":genre": song.genre,
        ":date": song.date,
        ":composer": song.composer,
        ":performer": song.performer,
        ":disc": song.disc,
        ":mb_artistid": song.mb_artist_id,
        ":mb_albumid": song.mb_album_id,
        ":mb_trackid": song.mb_track_id,
    })
    .db(DbErrorKind::Step)?;

    if existing.is_some() {
        debug!("Updated song `{}'", song.uri);
    } else {
        debug!("Added song `{}'", song.uri);
    }
    Ok(())
}

/// Upsert an artist, album or genre row. `artist` is the denormalized
/// album artist and is ignored for other kinds.
fn upsert_named(
    conn: &Connection,
    kind: EntityKind,
    name: &str,
    artist: Option<&str>,
    increment: bool,
) -> Result<()> {
    let table = kind.table();
    let increment = i64::from(increment);

    match (find_id(conn, kind, name)?, kind) {
        (Some(id), EntityKind::Album) => {
            let sql = "UPDATE album SET play_count = play_count + ?1, artist = ?2 WHERE id = ?3";
            let mut stmt = conn.prepare_cached(sql).db(DbErrorKind::Prepare)?;
            stmt.execute(params![increment, artist, id])
                .db(DbErrorKind::Step)?;
        }
        (Some(id), _) => {
            let sql = format!("UPDATE {table} SET play_count = play_count + ?1 WHERE id = ?2");
            let mut stmt = conn.prepare_cached(&sql).db(DbErrorKind::Prepare)?;
            stmt.execute(params![increment, id])
                .db(DbErrorKind::Step)?;
        }
        (None, EntityKind::Album) => {
            let sql = "INSERT INTO album (play_count, name, artist) VALUES (?1, ?2, ?3)";
            let mut stmt = conn.prepare_cached(sql).db(DbErrorKind::Prepare)?;
            stmt.execute(params![increment, name, artist])
                .db(DbErrorKind::Step)?;
            debug!("Added album `{}'", name);
        }
        (None, _) => {
            let sql = format!("INSERT INTO {table} (play_count, name) VALUES (?1, ?2)");
            let mut stmt = conn.prepare_cached(&sql).db(DbErrorKind::Prepare)?;
            stmt.execute(params![increment, name])
                .db(DbErrorKind::Step)?;
            debug!("Added {} `{}'", kind, name);
        }
    }
    Ok(())
}

// ============================================================================
// Query results
// ============================================================================

/// Identity of a matched row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: i64,
    /// URI for songs, name otherwise
    pub name: String,
    /// Album artist, albums only
    pub artist: Option<String>,
}

/// Full statistics of a matched row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInfo {
    pub entry: Entry,
    pub play_count: i64,
    pub love: i64,
    pub kill: i64,
    pub rating: i64,
    /// Songs only
    pub karma: Option<i64>,
    /// Unix seconds, songs only
    pub last_played: Option<i64>,
}

/// A matched row with its tag set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEntry {
    pub entry: Entry,
    pub tags: TagSet,
}

fn entry_columns(kind: EntityKind) -> Vec<&'static str> {
    let mut columns = vec!["id", kind.identity_column()];
    if kind == EntityKind::Album {
        columns.push("artist");
    }
    columns
}

/// Read the columns produced by [`entry_columns`]; returns the entry and the
/// index of the next column.
fn read_entry(kind: EntityKind, row: &Row<'_>) -> rusqlite::Result<(Entry, usize)> {
    let id = row.get(0)?;
    let name = row.get(1)?;
    if kind == EntityKind::Album {
        Ok((
            Entry {
                id,
                name,
                artist: row.get(2)?,
            },
            3,
        ))
    } else {
        Ok((
            Entry {
                id,
                name,
                artist: None,
            },
            2,
        ))
    }
}

fn query_rows<T>(
    conn: &Connection,
    sql: &str,
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql).db(DbErrorKind::Prepare)?;
    let rows = stmt.query_map([], map).db(DbErrorKind::Step)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .db(DbErrorKind::Step)
}

pub fn list(conn: &Connection, kind: EntityKind, expr: &Expression<'_>) -> Result<Vec<Entry>> {
    let sql = expr.select(kind, &entry_columns(kind));
    query_rows(conn, &sql, |row| read_entry(kind, row).map(|(entry, _)| entry))
}

pub fn list_info(
    conn: &Connection,
    kind: EntityKind,
    expr: &Expression<'_>,
) -> Result<Vec<EntityInfo>> {
    let mut columns = entry_columns(kind);
    columns.extend(["play_count", "love", "kill", "rating"]);
    if kind == EntityKind::Song {
        columns.extend(["karma", "last_played"]);
    }
    let sql = expr.select(kind, &columns);

    query_rows(conn, &sql, |row| {
        let (entry, i) = read_entry(kind, row)?;
        let (karma, last_played) = if kind == EntityKind::Song {
            (row.get(i + 4)?, row.get(i + 5)?)
        } else {
            (None, None)
        };
        Ok(EntityInfo {
            entry,
            play_count: row.get(i)?,
            love: row.get(i + 1)?,
            kill: row.get(i + 2)?,
            rating: row.get(i + 3)?,
            karma,
            last_played,
        })
    })
}

pub fn list_tags(
    conn: &Connection,
    kind: EntityKind,
    expr: &Expression<'_>,
) -> Result<Vec<TaggedEntry>> {
    let mut columns = entry_columns(kind);
    columns.push("tags");
    let sql = expr.select(kind, &columns);

    query_rows(conn, &sql, |row| {
        let (entry, i) = read_entry(kind, row)?;
        let stored: String = row.get(i)?;
        Ok(TaggedEntry {
            entry,
            tags: TagSet::parse(&stored),
        })
    })
}

pub fn row_count(conn: &Connection, kind: EntityKind) -> Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", kind.table()), [], |row| {
        row.get(0)
    })
    .db(DbErrorKind::Step)
}

// ============================================================================
// Mutations
// ============================================================================

/// Single-statement rewrites applied to every row an expression matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// play_count += n
    Count(i64),
    /// play_count := n
    CountAbsolute(i64),
    /// love += 1 (love) or love -= 1 (hate)
    Love(bool),
    /// kill += 1 (kill) or kill := 0 (unkill)
    Kill(bool),
    /// rating += n
    Rate(i64),
    /// rating := n
    RateAbsolute(i64),
    /// karma := n, songs only, 0..=100
    Karma(i64),
    /// Append a tag. Existing copies are not checked for.
    AddTag(String),
}

impl Mutation {
    /// Reject arguments that must never reach SQL.
    pub fn validate(&self, kind: EntityKind) -> Result<()> {
        match self {
            Self::Karma(_) if kind != EntityKind::Song => {
                Err(Error::argument("Karma is only tracked for songs"))
            }
            Self::Karma(n) if !(0..=100).contains(n) => Err(Error::argument(format!(
                "Karma must be between 0 and 100, got {n}"
            ))),
            Self::AddTag(tag) => tags::validate_tag(tag),
            _ => Ok(()),
        }
    }

    const fn assignment(&self) -> &'static str {
        match self {
            Self::Count(_) => "play_count = play_count + ?1",
            Self::CountAbsolute(_) => "play_count = ?1",
            Self::Love(true) => "love = love + 1",
            Self::Love(false) => "love = love - 1",
            Self::Kill(true) => "kill = kill + 1",
            Self::Kill(false) => "kill = 0",
            Self::Rate(_) => "rating = rating + ?1",
            Self::RateAbsolute(_) => "rating = ?1",
            Self::Karma(_) => "karma = ?1",
            Self::AddTag(_) => "tags = tags || ?1",
        }
    }

    fn parameter(&self) -> Option<Value> {
        match self {
            Self::Count(n)
            | Self::CountAbsolute(n)
            | Self::Rate(n)
            | Self::RateAbsolute(n)
            | Self::Karma(n) => Some(Value::Integer(*n)),
            Self::AddTag(tag) => Some(Value::Text(tags::append_fragment(tag))),
            Self::Love(_) | Self::Kill(_) => None,
        }
    }
}

/// Apply a mutation; returns the storage engine's changed-row count.
pub fn mutate(
    conn: &Connection,
    kind: EntityKind,
    expr: &Expression<'_>,
    mutation: &Mutation,
) -> Result<usize> {
    mutation.validate(kind)?;
    let sql = expr.update(kind, mutation.assignment());
    let mut stmt = conn.prepare(&sql).db(DbErrorKind::Prepare)?;
    stmt.execute(params_from_iter(mutation.parameter()))
        .db(DbErrorKind::Step)
}

/// Remove `tag` from every matching row.
///
/// Runs as one read pass and per-row updates inside a transaction, with
/// `synchronous` off for the duration. The previous setting is restored
/// even when the rewrite fails.
pub fn remove_tag(
    conn: &mut Connection,
    kind: EntityKind,
    expr: &Expression<'_>,
    tag: &str,
) -> Result<usize> {
    tags::validate_tag(tag)?;

    let previous: i64 = conn
        .pragma_query_value(None, "synchronous", |row| row.get(0))
        .db(DbErrorKind::Prepare)?;
    conn.pragma_update(None, "synchronous", 0)
        .db(DbErrorKind::Prepare)?;

    let result = rewrite_tags(conn, kind, expr, tag);
    let restored = conn
        .pragma_update(None, "synchronous", previous)
        .db(DbErrorKind::Reset);

    let changes = result?;
    restored?;
    Ok(changes)
}

fn rewrite_tags(
    conn: &mut Connection,
    kind: EntityKind,
    expr: &Expression<'_>,
    tag: &str,
) -> Result<usize> {
    let tx = super::write_transaction(conn)?;

    let rows: Vec<(i64, String)> = query_rows(&tx, &expr.select(kind, &["id", "tags"]), |row| {
        Ok((row.get(0)?, row.get(1)?))
    })?;

    let mut changes = 0;
    {
        let sql = format!("UPDATE {} SET tags = ?1 WHERE id = ?2", kind.table());
        let mut update = tx.prepare(&sql).db(DbErrorKind::Prepare)?;
        for (id, stored) in rows {
            let mut set = TagSet::parse(&stored);
            if !set.remove(tag) {
                continue;
            }
            update
                .raw_bind_parameter(1, set.serialize())
                .db(DbErrorKind::Bind)?;
            update.raw_bind_parameter(2, id).db(DbErrorKind::Bind)?;
            changes += update.raw_execute().db(DbErrorKind::Step)?;
        }
    }

    tx.commit().db(DbErrorKind::Step)?;
    Ok(changes)
}
