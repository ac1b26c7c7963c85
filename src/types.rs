//! Domain types shared by the store, the protocol and the server.
//!
//! `Permission` is the per-connection authorization bitset and `EntityKind`
//! selects which statistics table an operation targets. Bit arithmetic on
//! `Permission` is derived with `derive_more`.

use std::fmt;
use std::str::FromStr;

use derive_more::{BitAnd, BitOr, Display};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Permission
// ============================================================================

/// Session-level authorization bits.
///
/// `NONE` and `ALL` are the empty and full sets. Serialized in configuration
/// files as a list of names, e.g. `["select", "update"]`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, BitAnd, BitOr, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Permission(u8);

impl Permission {
    pub const NONE: Self = Self(0);
    pub const SELECT: Self = Self(1);
    pub const UPDATE: Self = Self(2);
    pub const ALL: Self = Self(3);

    /// True when every bit of `required` is held.
    #[must_use]
    pub const fn contains(self, required: Self) -> bool {
        self.0 & required.0 == required.0
    }

    /// Names of the individual bits held, in a stable order.
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(Self::SELECT) {
            names.push("select");
        }
        if self.contains(Self::UPDATE) {
            names.push("update");
        }
        names
    }
}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permission({})", self)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(","))
        }
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::NONE),
            "select" => Ok(Self::SELECT),
            "update" => Ok(Self::UPDATE),
            "all" => Ok(Self::ALL),
            other => Err(Error::config(format!("unknown permission '{other}'"))),
        }
    }
}

impl TryFrom<Vec<String>> for Permission {
    type Error = Error;

    fn try_from(names: Vec<String>) -> Result<Self> {
        names
            .iter()
            .try_fold(Self::NONE, |acc, name| Ok(acc | name.parse::<Self>()?))
    }
}

impl From<Permission> for Vec<String> {
    fn from(permission: Permission) -> Self {
        permission.names().into_iter().map(String::from).collect()
    }
}

// ============================================================================
// EntityKind
// ============================================================================

/// The four statistics tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    #[display("song")]
    Song,
    #[display("artist")]
    Artist,
    #[display("album")]
    Album,
    #[display("genre")]
    Genre,
}

impl EntityKind {
    pub const ALL: [Self; 4] = [Self::Song, Self::Artist, Self::Album, Self::Genre];

    /// Table holding rows of this kind.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Song => "song",
            Self::Artist => "artist",
            Self::Album => "album",
            Self::Genre => "genre",
        }
    }

    /// Column carrying the natural identity.
    #[must_use]
    pub const fn identity_column(self) -> &'static str {
        match self {
            Self::Song => "uri",
            _ => "name",
        }
    }

    /// Response key for the identity column.
    #[must_use]
    pub const fn identity_key(self) -> &'static str {
        match self {
            Self::Song => "file",
            Self::Artist => "Artist",
            Self::Album => "Album",
            Self::Genre => "Genre",
        }
    }

    /// Command name suffix selecting this kind (empty for songs).
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Song => "",
            Self::Artist => "_artist",
            Self::Album => "_album",
            Self::Genre => "_genre",
        }
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "song" => Ok(Self::Song),
            "artist" => Ok(Self::Artist),
            "album" => Ok(Self::Album),
            "genre" => Ok(Self::Genre),
            other => Err(Error::argument(format!("unknown kind '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod permission {
        use super::*;

        #[test]
        fn test_bits() {
            assert_eq!(Permission::SELECT | Permission::UPDATE, Permission::ALL);
            assert_eq!(Permission::ALL & Permission::UPDATE, Permission::UPDATE);
            assert!(Permission::ALL.contains(Permission::SELECT));
            assert!(!Permission::SELECT.contains(Permission::UPDATE));
            assert!(Permission::NONE.contains(Permission::NONE));
            assert_eq!(Permission::default(), Permission::NONE);
        }

        #[test]
        fn test_parse() {
            assert_eq!("select".parse::<Permission>().unwrap(), Permission::SELECT);
            assert_eq!(" ALL ".parse::<Permission>().unwrap(), Permission::ALL);
            assert!("write".parse::<Permission>().is_err());

            let names = vec!["select".to_string(), "update".to_string()];
            assert_eq!(Permission::try_from(names).unwrap(), Permission::ALL);
            assert_eq!(Permission::try_from(Vec::new()).unwrap(), Permission::NONE);
        }

        #[test]
        fn test_display() {
            assert_eq!(Permission::NONE.to_string(), "none");
            assert_eq!(Permission::ALL.to_string(), "select,update");
            assert_eq!(Vec::<String>::from(Permission::UPDATE), vec!["update"]);
        }
    }

    mod entity_kind {
        use super::*;

        #[test]
        fn test_columns() {
            assert_eq!(EntityKind::Song.identity_column(), "uri");
            assert_eq!(EntityKind::Album.identity_column(), "name");
            assert_eq!(EntityKind::Song.identity_key(), "file");
            assert_eq!(EntityKind::Genre.table(), "genre");
            assert_eq!(EntityKind::Artist.suffix(), "_artist");
        }

        #[test]
        fn test_parse_and_display() {
            for kind in EntityKind::ALL {
                assert_eq!(kind.to_string().parse::<EntityKind>().unwrap(), kind);
            }
            assert!("playlist".parse::<EntityKind>().is_err());
        }
    }
}
