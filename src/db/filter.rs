//! Statement builders around caller-supplied WHERE expressions.
//!
//! The expression text comes from protocol clients and is placed inside
//! parentheses. It is trusted input: the authorizer is what bounds what it
//! can do, not this builder. Values produced by the server itself (deltas,
//! tags) are always bound as parameters.

use crate::error::{Error, Result};
use crate::types::EntityKind;

/// A client-supplied boolean predicate over one entity table.
#[derive(Debug, Clone, Copy)]
pub struct Expression<'a> {
    text: &'a str,
}

impl<'a> Expression<'a> {
    /// Wrap an expression, rejecting blank input.
    pub fn new(text: &'a str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(Error::argument("Empty expression"));
        }
        Ok(Self { text })
    }

    #[must_use]
    pub const fn as_str(&self) -> &'a str {
        self.text
    }

    /// `SELECT <columns> FROM <table> WHERE (<expr>)`
    #[must_use]
    pub fn select(&self, kind: EntityKind, columns: &[&str]) -> String {
        format!(
            "SELECT {} FROM {} WHERE ({})",
            columns.join(", "),
            kind.table(),
            self.text
        )
    }

    /// `UPDATE <table> SET <assignment> WHERE (<expr>)`
    #[must_use]
    pub fn update(&self, kind: EntityKind, assignment: &str) -> String {
        format!(
            "UPDATE {} SET {} WHERE ({})",
            kind.table(),
            assignment,
            self.text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select() {
        let expr = Expression::new("uri = 'a.mp3'").unwrap();
        assert_eq!(
            expr.select(EntityKind::Song, &["id", "uri"]),
            "SELECT id, uri FROM song WHERE (uri = 'a.mp3')"
        );
    }

    #[test]
    fn test_update() {
        let expr = Expression::new("name like 'The %'").unwrap();
        assert_eq!(
            expr.update(EntityKind::Artist, "love = love + 1"),
            "UPDATE artist SET love = love + 1 WHERE (name like 'The %')"
        );
    }

    #[test]
    fn test_blank_rejected() {
        assert!(Expression::new("").is_err());
        assert!(Expression::new("   ").is_err());
    }
}
