//! Error types for mpd-stats

use derive_more::Display;
use thiserror::Error;

/// Phase of a storage operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DbErrorKind {
    #[display("open")]
    Open,
    #[display("create")]
    Create,
    #[display("version")]
    Version,
    #[display("authorizer")]
    Authorizer,
    #[display("prepare")]
    Prepare,
    #[display("bind")]
    Bind,
    #[display("step")]
    Step,
    #[display("reset")]
    Reset,
}

/// Numeric codes sent in `ACK [code] {command} message` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Ack {
    Arg = 2,
    Password = 3,
    Permission = 4,
    Unknown = 5,
    DatabaseOpen = 200,
    DatabaseCreate = 201,
    DatabaseVersion = 202,
    DatabaseAuthorizer = 203,
    DatabasePrepare = 204,
    DatabaseBind = 205,
    DatabaseStep = 206,
    DatabaseReset = 207,
    NoTags = 250,
}

impl Ack {
    /// Wire value of the code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }
}

impl From<DbErrorKind> for Ack {
    fn from(kind: DbErrorKind) -> Self {
        match kind {
            DbErrorKind::Open => Self::DatabaseOpen,
            DbErrorKind::Create => Self::DatabaseCreate,
            DbErrorKind::Version => Self::DatabaseVersion,
            DbErrorKind::Authorizer => Self::DatabaseAuthorizer,
            DbErrorKind::Prepare => Self::DatabasePrepare,
            DbErrorKind::Bind => Self::DatabaseBind,
            DbErrorKind::Step => Self::DatabaseStep,
            DbErrorKind::Reset => Self::DatabaseReset,
        }
    }
}

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database {kind} error: {message}")]
    Database { kind: DbErrorKind, message: String },

    #[error("Song `{0}' doesn't have required tags")]
    NoTags(String),

    #[error("{0}")]
    Argument(String),

    #[error("{0}")]
    Permission(String),

    #[error("Invalid password")]
    Password,

    #[error("unknown command \"{0}\"")]
    UnknownCommand(String),

    #[error("MPD error: {0}")]
    Mpd(String),

    #[error("Server error [{code}] {{{command}}} {message}")]
    Server {
        code: u16,
        command: String,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a storage error of the given kind
    pub fn database(kind: DbErrorKind, msg: impl Into<String>) -> Self {
        Self::Database {
            kind,
            message: msg.into(),
        }
    }

    /// Create an argument error
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an "other" error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// ACK code reported to protocol clients for this error.
    #[must_use]
    pub fn ack(&self) -> Ack {
        match self {
            Self::Database { kind, .. } => Ack::from(*kind),
            Self::NoTags(_) => Ack::NoTags,
            Self::Argument(_) => Ack::Arg,
            Self::Permission(_) => Ack::Permission,
            Self::Password => Ack::Password,
            _ => Ack::Unknown,
        }
    }

    /// Message sent after the ACK prefix. Storage errors carry only the
    /// engine message.
    #[must_use]
    pub fn ack_message(&self) -> String {
        match self {
            Self::Database { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Returns the storage error kind, if this is a storage error.
    #[must_use]
    pub const fn db_kind(&self) -> Option<DbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_codes() {
        assert_eq!(Error::argument("x").ack().code(), 2);
        assert_eq!(Error::Password.ack().code(), 3);
        assert_eq!(Error::Permission("x".into()).ack().code(), 4);
        assert_eq!(Error::UnknownCommand("x".into()).ack().code(), 5);
        assert_eq!(Error::NoTags("a.mp3".into()).ack().code(), 250);
        assert_eq!(
            Error::database(DbErrorKind::Step, "busy").ack().code(),
            206
        );
        assert_eq!(Error::other("x").ack(), Ack::Unknown);
    }

    #[test]
    fn test_database_kind_codes() {
        assert_eq!(Ack::from(DbErrorKind::Open).code(), 200);
        assert_eq!(Ack::from(DbErrorKind::Version).code(), 202);
        assert_eq!(Ack::from(DbErrorKind::Authorizer).code(), 203);
        assert_eq!(Ack::from(DbErrorKind::Reset).code(), 207);
        assert_eq!(DbErrorKind::Prepare.to_string(), "prepare");
    }

    #[test]
    fn test_messages() {
        let err = Error::database(DbErrorKind::Version, "Database version 1 doesn't match 6");
        assert_eq!(err.ack_message(), "Database version 1 doesn't match 6");
        assert_eq!(
            err.to_string(),
            "Database version error: Database version 1 doesn't match 6"
        );
        assert_eq!(
            Error::UnknownCommand("foo".into()).to_string(),
            "unknown command \"foo\""
        );
        assert_eq!(Error::Password.ack_message(), "Invalid password");
    }
}
