//! Identity identifiers and the rules for deriving them from display names.
//!
//! Identifiers are restricted to a path- and URL-safe alphabet so that every
//! storage backend can use them as keys verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

const MAX_IDENTIFIER_LEN: usize = 128;
const MAX_STEM_LEN: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier exceeds 128 characters")]
    TooLong,
    #[error("identifier must not start with '.'")]
    LeadingDot,
    #[error("identifier contains invalid character {0:?}")]
    InvalidChar(char),
    #[error("name {0:?} has no usable characters")]
    UnusableName(String),
    #[error("unknown name mode {0:?} (expected \"exact\" or \"normalized\")")]
    UnknownNameMode(String),
}

/// Validated identifier of an enrolled identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Validate an identifier supplied from outside (request, database row).
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if raw.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if raw.len() > MAX_IDENTIFIER_LEN {
            return Err(IdentifierError::TooLong);
        }
        if raw.starts_with('.') {
            return Err(IdentifierError::LeadingDot);
        }
        if let Some(c) = raw.chars().find(|c| !is_identifier_char(*c)) {
            return Err(IdentifierError::InvalidChar(c));
        }
        Ok(Self(raw.to_string()))
    }

    /// Build a fresh identifier from a sanitized stem and a random UUID v4 suffix.
    ///
    /// Uniqueness within the gallery is enforced by the store's
    /// insert-if-absent, not by the suffix alone.
    pub fn generate(stem: &str) -> Self {
        Self(format!("{stem}_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// How a display name is turned into an identifier stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameMode {
    /// Keep case and spacing; only replace unsafe characters.
    #[default]
    Exact,
    /// Trim, lowercase and collapse whitespace before sanitizing, so
    /// `" Alice  Smith"` and `"alice smith"` share a stem.
    Normalized,
}

impl NameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NameMode::Exact => "exact",
            NameMode::Normalized => "normalized",
        }
    }
}

impl FromStr for NameMode {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(NameMode::Exact),
            "normalized" | "normalised" => Ok(NameMode::Normalized),
            other => Err(IdentifierError::UnknownNameMode(other.to_string())),
        }
    }
}

/// Derive the identifier stem for a display name.
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_` and the result is
/// truncated to 64 characters. A name made only of such characters is
/// rejected rather than mapped to a stem of underscores.
pub fn name_stem(name: &str, mode: NameMode) -> Result<String, IdentifierError> {
    let prepared = match mode {
        NameMode::Exact => name.to_string(),
        NameMode::Normalized => name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_lowercase(),
    };

    let stem: String = prepared
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();

    if !stem.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(IdentifierError::UnusableName(name.to_string()));
    }
    Ok(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_safe_identifiers() {
        assert!(Identifier::parse("alice").is_ok());
        assert!(Identifier::parse("Bob_Smith-2.v1").is_ok());
    }

    #[test]
    fn test_parse_rejects_path_unsafe() {
        assert_eq!(Identifier::parse(""), Err(IdentifierError::Empty));
        assert_eq!(Identifier::parse("../etc"), Err(IdentifierError::LeadingDot));
        assert_eq!(
            Identifier::parse("a/b"),
            Err(IdentifierError::InvalidChar('/'))
        );
        assert_eq!(
            Identifier::parse("a b"),
            Err(IdentifierError::InvalidChar(' '))
        );
        assert_eq!(
            Identifier::parse(&"x".repeat(129)),
            Err(IdentifierError::TooLong)
        );
    }

    #[test]
    fn test_exact_stem_sanitizes_deterministically() {
        assert_eq!(name_stem("Alice Smith", NameMode::Exact).unwrap(), "Alice_Smith");
        assert_eq!(name_stem("a/b\\c", NameMode::Exact).unwrap(), "a_b_c");
        assert_eq!(name_stem("José", NameMode::Exact).unwrap(), "Jos_");
        assert_eq!(
            name_stem("a/b\\c", NameMode::Exact),
            name_stem("a/b\\c", NameMode::Exact)
        );
    }

    #[test]
    fn test_normalized_stem_folds_case_and_whitespace() {
        let a = name_stem("  Alice   Smith ", NameMode::Normalized).unwrap();
        let b = name_stem("alice smith", NameMode::Normalized).unwrap();
        assert_eq!(a, "alice_smith");
        assert_eq!(a, b);
    }

    #[test]
    fn test_stem_rejects_unusable_names() {
        assert!(name_stem("", NameMode::Exact).is_err());
        assert!(name_stem("../..", NameMode::Exact).is_err());
        assert!(name_stem("   ", NameMode::Normalized).is_err());
    }

    #[test]
    fn test_stem_truncated() {
        let stem = name_stem(&"a".repeat(200), NameMode::Exact).unwrap();
        assert_eq!(stem.len(), MAX_STEM_LEN);
    }

    #[test]
    fn test_generated_identifiers_are_valid_and_distinct() {
        let a = Identifier::generate("alice");
        let b = Identifier::generate("alice");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("alice_"));
        assert_eq!(Identifier::parse(a.as_str()), Ok(a));
    }

    #[test]
    fn test_name_mode_from_str() {
        assert_eq!("exact".parse::<NameMode>(), Ok(NameMode::Exact));
        assert_eq!(" Normalized ".parse::<NameMode>(), Ok(NameMode::Normalized));
        assert!("fuzzy".parse::<NameMode>().is_err());
    }
}
