//! Internal implementation of the research identifier.

use crate::{UuidError, UuidResult};
use std::path::{Path, PathBuf};
use std::{fmt, str::FromStr};

/// Re-exported for convenience.
pub use ::uuid::Uuid;

/// Length of the canonical hyphenated form.
const CANONICAL_LEN: usize = 36;

/// Byte offsets of the hyphens in the canonical form.
const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// Number of leading characters used as the shard directory name.
const SHARD_LEN: usize = 2;

/// Canonical research identifier (lowercase hyphenated UUID).
///
/// Once constructed, the contained value is guaranteed to be canonical, so it is safe to use as
/// a directory name and to derive a sharded storage path from it.
///
/// # Construction
/// - [`ResearchId::new`] generates a fresh random identifier (UUID v4).
/// - [`ResearchId::parse`] validates an externally supplied identifier.
///
/// # Errors
/// [`ResearchId::parse`] returns [`UuidError::InvalidInput`] if the input is not already
/// canonical.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResearchId {
    uuid: Uuid,
    canonical: String,
}

impl Default for ResearchId {
    fn default() -> Self {
        Self::new()
    }
}

impl ResearchId {
    /// Generates a new identifier in canonical form.
    ///
    /// The generated UUID is cryptographically random (RFC 4122 version 4), so research paths
    /// cannot be guessed from other identifiers.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Wraps an existing UUID, rendering it in canonical form.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            canonical: uuid.hyphenated().to_string(),
        }
    }

    /// Validates and parses an identifier that must already be in canonical form.
    ///
    /// This does **not** normalise other UUID forms (uppercase, simple, braced, URN).
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::InvalidInput`] if `input` is not canonical.
    pub fn parse(input: &str) -> UuidResult<Self> {
        if !Self::is_canonical(input) {
            return Err(UuidError::InvalidInput(format!(
                "research id must be a lowercase hyphenated UUID, got: '{}'",
                input
            )));
        }

        let uuid = Uuid::parse_str(input)
            .map_err(|e| UuidError::InvalidInput(format!("invalid UUID '{}': {}", input, e)))?;
        Ok(Self {
            uuid,
            canonical: input.to_owned(),
        })
    }

    /// Returns true if `input` is in canonical form.
    ///
    /// This is a purely syntactic check:
    /// - exactly 36 bytes long
    /// - hyphens at offsets 8, 13, 18 and 23
    /// - lowercase hex characters (`0-9` and `a-f`) everywhere else
    pub fn is_canonical(input: &str) -> bool {
        input.len() == CANONICAL_LEN
            && input.bytes().enumerate().all(|(i, b)| {
                if HYPHEN_POSITIONS.contains(&i) {
                    b == b'-'
                } else {
                    matches!(b, b'0'..=b'9' | b'a'..=b'f')
                }
            })
    }

    /// Returns the underlying `uuid::Uuid`.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the canonical string.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Returns the shard prefix: the first two characters of the identifier.
    pub fn shard(&self) -> &str {
        &self.canonical[..SHARD_LEN]
    }

    /// Returns `root/<shard>/<id>`.
    ///
    /// Pure and deterministic: the same identifier always yields the same path, and no
    /// filesystem access takes place.
    pub fn sharded_dir(&self, root: &Path) -> PathBuf {
        root.join(self.shard()).join(&self.canonical)
    }
}

impl fmt::Display for ResearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl FromStr for ResearchId {
    type Err = UuidError;

    /// Equivalent to [`ResearchId::parse`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResearchId::parse(s)
    }
}

impl AsRef<str> for ResearchId {
    fn as_ref(&self) -> &str {
        &self.canonical
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ResearchId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.canonical)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ResearchId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ResearchId::parse(&s).map_err(serde::de::Error::custom)
    }
}
