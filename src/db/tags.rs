//! Free-form tag sets stored as a single delimited column.
//!
//! The stored form is `:tag1:tag2:...:` (an empty set is `:`), so adding a
//! tag is a plain string append in SQL. Removing one needs a rebuild, which
//! `TagSet` provides.

use std::fmt;

use crate::error::{Error, Result};

/// Separator between tags in the stored column.
pub const DELIMITER: char = ':';

/// Stored form of an empty set.
pub const EMPTY: &str = ":";

/// Check that a tag can be stored.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(Error::argument("Tag must not be empty"));
    }
    if tag.contains(DELIMITER) {
        return Err(Error::argument(format!(
            "Tag must not contain '{DELIMITER}': {tag}"
        )));
    }
    Ok(())
}

/// Text appended to the stored column to add `tag`.
#[must_use]
pub fn append_fragment(tag: &str) -> String {
    format!("{tag}{DELIMITER}")
}

/// Ordered tag collection. Duplicates are kept as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: Vec<String>,
}

impl TagSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the stored column value. Empty segments are skipped.
    #[must_use]
    pub fn parse(stored: &str) -> Self {
        Self {
            tags: stored
                .split(DELIMITER)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    /// Append a tag.
    pub fn insert(&mut self, tag: &str) -> Result<()> {
        validate_tag(tag)?;
        self.tags.push(tag.to_string());
        Ok(())
    }

    /// Drop every occurrence of `tag`. Returns whether anything was removed.
    pub fn remove(&mut self, tag: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        self.tags.len() != before
    }

    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    /// Stored column value.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = String::from(EMPTY);
        for tag in &self.tags {
            out.push_str(&append_fragment(tag));
        }
        out
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serialize() {
        let set = TagSet::parse(":rock:live:");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["rock", "live"]);
        assert_eq!(set.serialize(), ":rock:live:");

        assert!(TagSet::parse(EMPTY).is_empty());
        assert!(TagSet::parse("").is_empty());
        assert_eq!(TagSet::new().serialize(), ":");
    }

    #[test]
    fn test_append_matches_serialized_form() {
        let mut stored = String::from(EMPTY);
        stored.push_str(&append_fragment("a"));
        stored.push_str(&append_fragment("b"));
        assert_eq!(TagSet::parse(&stored).serialize(), stored);
    }

    #[test]
    fn test_remove_drops_duplicates() {
        let mut set = TagSet::parse(":x:y:x:");
        assert_eq!(set.len(), 3);
        assert!(set.remove("x"));
        assert!(!set.contains("x"));
        assert_eq!(set.serialize(), ":y:");
        assert!(!set.remove("x"));
    }

    #[test]
    fn test_insert_validates() {
        let mut set = TagSet::new();
        assert!(set.insert("good").is_ok());
        assert!(set.insert("").is_err());
        assert!(set.insert("a:b").is_err());
        assert_eq!(set.len(), 1);
        assert!(set.contains("good"));
    }
}
