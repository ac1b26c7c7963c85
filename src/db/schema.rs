//! Database schema initialization and version check

use rusqlite::Connection;

use super::DbResultExt;
use crate::error::{DbErrorKind, Error, Result};

/// Version stored in `PRAGMA user_version`. There is no migration path:
/// a database carrying any other version is refused.
pub const SCHEMA_VERSION: i32 = 6;

/// Counter and tag columns shared by every entity table.
///
/// SQLite turns an overflowing integer sum into a REAL; the type checks make
/// such an update fail instead of storing it.
const COUNTER_COLUMNS: &str = "
    db_updated TEXT,
    play_count INTEGER NOT NULL DEFAULT 0 CHECK (typeof(play_count) = 'integer'),
    love INTEGER NOT NULL DEFAULT 0 CHECK (typeof(love) = 'integer'),
    kill INTEGER NOT NULL DEFAULT 0 CHECK (typeof(kill) = 'integer'),
    rating INTEGER NOT NULL DEFAULT 0 CHECK (typeof(rating) = 'integer'),
    tags TEXT NOT NULL DEFAULT ':'";

/// Create all tables, triggers and indexes, then stamp the version.
pub fn create_schema(conn: &Connection) -> Result<()> {
    let sql = format!(
        r#"
        PRAGMA encoding = "UTF-8";

        CREATE TABLE IF NOT EXISTS song (
            id INTEGER PRIMARY KEY,{COUNTER_COLUMNS},
            karma INTEGER NOT NULL DEFAULT 50 CHECK (karma >= 0 AND karma <= 100),
            last_played INTEGER,
            uri TEXT UNIQUE NOT NULL,
            duration INTEGER,
            last_modified INTEGER,
            artist TEXT,
            album TEXT,
            title TEXT,
            track TEXT,
            name TEXT,
            genre TEXT,
            date TEXT,
            composer TEXT,
            performer TEXT,
            disc TEXT,
            mb_artistid TEXT,
            mb_albumid TEXT,
            mb_trackid TEXT
        );

        CREATE TABLE IF NOT EXISTS artist (
            id INTEGER PRIMARY KEY,{COUNTER_COLUMNS},
            name TEXT UNIQUE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS album (
            id INTEGER PRIMARY KEY,{COUNTER_COLUMNS},
            artist TEXT,
            name TEXT UNIQUE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS genre (
            id INTEGER PRIMARY KEY,{COUNTER_COLUMNS},
            name TEXT UNIQUE NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_song_artist ON song(artist);
        CREATE INDEX IF NOT EXISTS idx_song_album ON song(album);
        CREATE INDEX IF NOT EXISTS idx_album_artist ON album(artist);

        CREATE TRIGGER IF NOT EXISTS song_insert_stamp AFTER INSERT ON song
        BEGIN
            UPDATE song SET db_updated = DATETIME('NOW') WHERE rowid = new.rowid;
        END;
        CREATE TRIGGER IF NOT EXISTS artist_insert_stamp AFTER INSERT ON artist
        BEGIN
            UPDATE artist SET db_updated = DATETIME('NOW') WHERE rowid = new.rowid;
        END;
        CREATE TRIGGER IF NOT EXISTS album_insert_stamp AFTER INSERT ON album
        BEGIN
            UPDATE album SET db_updated = DATETIME('NOW') WHERE rowid = new.rowid;
        END;
        CREATE TRIGGER IF NOT EXISTS genre_insert_stamp AFTER INSERT ON genre
        BEGIN
            UPDATE genre SET db_updated = DATETIME('NOW') WHERE rowid = new.rowid;
        END;

        PRAGMA user_version = {SCHEMA_VERSION};
        "#
    );

    conn.execute_batch(&sql).db(DbErrorKind::Create)
}

/// Read the stored schema version.
pub fn stored_version(conn: &Connection) -> Result<i32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .db(DbErrorKind::Version)
}

/// Refuse a database whose stored version is not [`SCHEMA_VERSION`].
pub fn check_version(conn: &Connection) -> Result<()> {
    let version = stored_version(conn)?;
    if version != SCHEMA_VERSION {
        return Err(Error::database(
            DbErrorKind::Version,
            format!("Database version {version} doesn't match current version {SCHEMA_VERSION}"),
        ));
    }
    Ok(())
}
