//! Target identifier parsing and validation
//!
//! Stellar targets are keyed by a numeric catalog id (`asas_sn_id`), while
//! solar-system targets are keyed by their designation (`name`). Both share
//! the same retrieval mechanics, so the pipeline treats them as one opaque key.

use crate::DatasetCategory;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex digits of the designation digest appended to name file stems
const NAME_DIGEST_LEN: usize = 10;

/// Opaque key identifying one astronomical target within a dataset category
///
/// # Examples
///
/// ```
/// use skypatrol_downloader::identifier::Identifier;
/// use skypatrol_downloader::DatasetCategory;
///
/// let star = Identifier::parse("661430583515").unwrap();
/// assert_eq!(star, Identifier::Numeric(661430583515));
///
/// let comet = Identifier::parse("2P/Encke").unwrap();
/// assert_eq!(comet.to_filesystem_safe(), "2p_encke");
///
/// // Solar-system designations stay names even when they look numeric
/// let eros = Identifier::parse_for("433", DatasetCategory::Asteroids).unwrap();
/// assert_eq!(eros, Identifier::from("433"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    /// Numeric catalog id (stellar sources)
    Numeric(u64),
    /// Designation (asteroids and comets)
    Name(String),
}

impl Identifier {
    /// Parse an identifier string
    ///
    /// Purely numeric input becomes [`Identifier::Numeric`]; anything else is
    /// kept verbatim (trimmed) as [`Identifier::Name`].
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty after trimming.
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }

        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return trimmed
                .parse::<u64>()
                .map(Identifier::Numeric)
                .map_err(|e| IdentifierError::InvalidFormat(format!("{trimmed}: {e}")));
        }

        Ok(Identifier::Name(trimmed.to_string()))
    }

    /// Parse an identifier of a given dataset category
    ///
    /// Asteroid and comet designations are always [`Identifier::Name`], so
    /// numbered objects such as `433` keep matching the backend's `name` column.
    pub fn parse_for(s: &str, category: DatasetCategory) -> Result<Self, IdentifierError> {
        if !category.is_solar_system() {
            return Self::parse(s);
        }
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }
        Ok(Identifier::Name(trimmed.to_string()))
    }

    /// Parse a comma- or newline-separated list of identifiers
    ///
    /// Blank entries are skipped; order and duplicates are preserved.
    pub fn parse_list(input: &str) -> Result<Vec<Self>, IdentifierError> {
        split_list(input).map(Self::parse).collect()
    }

    /// [`Identifier::parse_list`] with per-category parsing
    pub fn parse_list_for(
        input: &str,
        category: DatasetCategory,
    ) -> Result<Vec<Self>, IdentifierError> {
        split_list(input).map(|s| Self::parse_for(s, category)).collect()
    }

    /// Whether this is a numeric catalog id
    pub fn is_numeric(&self) -> bool {
        matches!(self, Identifier::Numeric(_))
    }

    /// Convert identifier to filesystem-safe format
    ///
    /// Returns lowercase with underscores instead of special characters.
    /// Numeric ids are returned unchanged.
    pub fn to_filesystem_safe(&self) -> String {
        match self {
            Identifier::Numeric(id) => id.to_string(),
            Identifier::Name(name) => {
                let mut safe = String::with_capacity(name.len());
                let mut last_was_sep = false;
                for c in name.chars() {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                        safe.push(c.to_ascii_lowercase());
                        last_was_sep = false;
                    } else if !last_was_sep {
                        safe.push('_');
                        last_was_sep = true;
                    }
                }
                safe.trim_matches('_').to_string()
            }
        }
    }

    /// File stem of this target's light curve
    ///
    /// Numeric ids are used as is. Names get their filesystem-safe form plus a
    /// digest of the exact designation, so names differing only in case or
    /// punctuation never share a file.
    pub fn file_stem(&self) -> String {
        match self {
            Identifier::Numeric(id) => id.to_string(),
            Identifier::Name(name) => {
                let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
                format!("{}_{}", self.to_filesystem_safe(), &digest[..NAME_DIGEST_LEN])
            }
        }
    }
}

fn split_list(input: &str) -> impl Iterator<Item = &str> {
    input
        .split(|c| c == ',' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(id) => write!(f, "{id}"),
            Identifier::Name(name) => write!(f, "{name}"),
        }
    }
}

impl From<u64> for Identifier {
    fn from(id: u64) -> Self {
        Identifier::Numeric(id)
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier::Name(name.to_string())
    }
}

/// Identifier parsing errors
#[derive(Debug, thiserror::Error)]
pub enum IdentifierError {
    /// Empty identifier
    #[error("identifier cannot be empty")]
    Empty,

    /// Invalid identifier format
    #[error("invalid identifier: {0}")]
    InvalidFormat(String),
}
