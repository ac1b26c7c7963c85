//! Statistics database on SQLite
//!
//! One connection is shared by the protocol server and the now-playing
//! tracker. Client commands run with an authorizer installed for the
//! duration of the command; internal updates run without one.

mod authorizer;
mod filter;
mod queries;
mod schema;
pub mod tags;

pub use authorizer::authorize;
pub use filter::Expression;
pub use queries::{EntityInfo, Entry, Mutation, TaggedEntry};
pub use schema::SCHEMA_VERSION;
pub use tags::TagSet;

use rusqlite::hooks::{AuthContext, Authorization};
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{DbErrorKind, Error, Result};
use crate::song::Song;
use crate::types::{EntityKind, Permission};

/// Attempts made by the busy handler before a locked database is reported.
const MAX_BUSY_RETRIES: i32 = 100;

/// Pause between busy retries.
const BUSY_BACKOFF: Duration = Duration::from_millis(10);

/// Converts rusqlite failures into [`Error::Database`] of a given kind.
pub(crate) trait DbResultExt<T> {
    fn db(self, kind: DbErrorKind) -> Result<T>;
}

impl<T> DbResultExt<T> for rusqlite::Result<T> {
    fn db(self, kind: DbErrorKind) -> Result<T> {
        self.map_err(|e| {
            let kind = match e.sqlite_error_code() {
                Some(ErrorCode::AuthorizationForStatementDenied) => DbErrorKind::Authorizer,
                _ => kind,
            };
            Error::database(kind, e.to_string())
        })
    }
}

fn busy_retry(attempt: i32) -> bool {
    if attempt >= MAX_BUSY_RETRIES {
        return false;
    }
    std::thread::sleep(BUSY_BACKOFF);
    true
}

/// Begin a transaction that takes the write lock up front.
///
/// SQLite skips the busy handler when a deferred transaction upgrades from
/// reading to writing, so every read-then-write path starts here.
pub(crate) fn write_transaction(conn: &mut Connection) -> Result<rusqlite::Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .db(DbErrorKind::Step)
}

/// Outcome of a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Songs written to the database
    pub processed: usize,
    /// Songs skipped for lacking artist or title
    pub skipped: usize,
}

/// Database path, version and row counts for `db --info`.
#[derive(Debug, Clone)]
pub struct DatabaseInfo {
    pub path: Option<PathBuf>,
    pub version: i32,
    pub rows: Vec<(EntityKind, i64)>,
}

/// Shared handle to the statistics database
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open the configured database, creating parent directories as needed.
    ///
    /// # Arguments
    /// * `config` - Database configuration
    /// * `data_dir` - Default data directory when no path is configured
    pub async fn new(config: &DatabaseConfig, data_dir: &Path) -> Result<Self> {
        let db_path = if let Some(ref path) = config.path {
            let path = Path::new(path);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            path.to_path_buf()
        } else {
            std::fs::create_dir_all(data_dir)?;
            data_dir.join("stats.db")
        };

        tokio::task::spawn_blocking(move || Self::open(&db_path))
            .await
            .map_err(|e| Error::other(e.to_string()))?
    }

    /// Open a database file. A new file gets the schema; an existing one
    /// must carry the current schema version.
    pub fn open(path: &Path) -> Result<Self> {
        let existed = path.exists();
        let conn = Connection::open(path).db(DbErrorKind::Open)?;
        Self::init(&conn, !existed)?;
        info!("Opened database {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().db(DbErrorKind::Open)?;
        Self::init(&conn, true)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn init(conn: &Connection, fresh: bool) -> Result<()> {
        conn.busy_handler(Some(busy_retry)).db(DbErrorKind::Open)?;
        if fresh {
            debug!("Creating schema version {}", SCHEMA_VERSION);
            schema::create_schema(conn)
        } else {
            schema::check_version(conn)
        }
    }

    /// Database file path, `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record a song sighting or a counted play.
    ///
    /// Upserts the song, its artist and, when tagged, its album and genre in
    /// one transaction. Fails with [`Error::NoTags`] when artist or title is
    /// missing; nothing is written in that case.
    pub async fn process(&self, song: &Song, increment: bool) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = write_transaction(&mut conn)?;
        queries::process(&tx, song, increment)?;
        tx.commit().db(DbErrorKind::Step)
    }

    /// Process many songs with increment=false inside one transaction.
    ///
    /// Songs without required tags are skipped and counted.
    pub async fn import(&self, songs: &[Song]) -> Result<ImportSummary> {
        let mut conn = self.conn.lock().await;
        let tx = write_transaction(&mut conn)?;
        let mut summary = ImportSummary::default();

        for song in songs {
            match queries::process(&tx, song, false) {
                Ok(()) => summary.processed += 1,
                Err(Error::NoTags(uri)) => {
                    warn!("Skipping `{}': doesn't have required tags", uri);
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tx.commit().db(DbErrorKind::Step)?;
        Ok(summary)
    }

    /// Run a client command with an authorizer for `permission` installed.
    ///
    /// The authorizer is removed again before the lock is released, whether
    /// or not the command succeeded.
    pub async fn with_permission<T>(
        &self,
        permission: Permission,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock().await;
        conn.authorizer(Some(move |ctx: AuthContext<'_>| {
            authorizer::authorize(permission, &ctx)
        }));
        let result = f(&mut *conn);
        conn.authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
        result
    }

    /// Schema version and row counts.
    pub async fn info(&self) -> Result<DatabaseInfo> {
        let conn = self.conn.lock().await;
        let version = schema::stored_version(&conn)?;
        let mut rows = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            rows.push((kind, queries::row_count(&conn, kind)?));
        }
        Ok(DatabaseInfo {
            path: self.path.clone(),
            version,
            rows,
        })
    }

    // Read/write facade used by the command layer. Each call runs under the
    // authorizer for the given permission.

    pub async fn list(&self, permission: Permission, kind: EntityKind, expr: &str) -> Result<Vec<Entry>> {
        let expr = Expression::new(expr)?;
        self.with_permission(permission, |conn| queries::list(conn, kind, &expr))
            .await
    }

    pub async fn list_info(
        &self,
        permission: Permission,
        kind: EntityKind,
        expr: &str,
    ) -> Result<Vec<EntityInfo>> {
        let expr = Expression::new(expr)?;
        self.with_permission(permission, |conn| queries::list_info(conn, kind, &expr))
            .await
    }

    pub async fn list_tags(
        &self,
        permission: Permission,
        kind: EntityKind,
        expr: &str,
    ) -> Result<Vec<TaggedEntry>> {
        let expr = Expression::new(expr)?;
        self.with_permission(permission, |conn| queries::list_tags(conn, kind, &expr))
            .await
    }

    /// Apply a counter or tag-append mutation; returns changed rows.
    pub async fn mutate(
        &self,
        permission: Permission,
        kind: EntityKind,
        expr: &str,
        mutation: Mutation,
    ) -> Result<usize> {
        let expr = Expression::new(expr)?;
        self.with_permission(permission, |conn| queries::mutate(conn, kind, &expr, &mutation))
            .await
    }

    /// Remove a tag from every matching row; returns changed rows.
    pub async fn remove_tag(
        &self,
        permission: Permission,
        kind: EntityKind,
        expr: &str,
        tag: &str,
    ) -> Result<usize> {
        let expr = Expression::new(expr)?;
        self.with_permission(permission, |conn| queries::remove_tag(conn, kind, &expr, tag))
            .await
    }
}
