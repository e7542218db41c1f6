use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::ErrorCode;

const GUID_LEN: usize = 12;
const GUID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Stable, user-visible identifier of a tree node.
///
/// GUIDs survive undo/redo: a node restored by undoing its removal comes back
/// with the same GUID. Internal row ids are not part of the public model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Guid(String);

/// Rejected GUID input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid GUID '{raw}': {reason}")]
pub struct GuidError {
    pub raw: String,
    pub reason: &'static str,
}

impl GuidError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidGuid
    }
}

impl Guid {
    /// Generate a fresh random GUID.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let raw: String = (0..GUID_LEN)
            .map(|_| char::from(GUID_ALPHABET[rng.gen_range(0..GUID_ALPHABET.len())]))
            .collect();
        Self(raw)
    }

    /// The invisible root containing the three top-level folders.
    #[must_use]
    pub fn root() -> Self {
        Self("root________".to_string())
    }

    #[must_use]
    pub fn menu() -> Self {
        Self("menu________".to_string())
    }

    #[must_use]
    pub fn toolbar() -> Self {
        Self("toolbar_____".to_string())
    }

    /// Where implicitly-created bookmarks (e.g. from tagging) land.
    #[must_use]
    pub fn unfiled() -> Self {
        Self("unfiled_____".to_string())
    }

    /// Returns `true` for the root and the three built-in top-level folders.
    #[must_use]
    pub fn is_builtin_root(&self) -> bool {
        matches!(
            self.0.as_str(),
            "root________" | "menu________" | "toolbar_____" | "unfiled_____"
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Guid {
    type Err = GuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != GUID_LEN {
            return Err(GuidError {
                raw: s.to_string(),
                reason: "expected exactly 12 characters",
            });
        }
        if !s.bytes().all(|b| GUID_ALPHABET.contains(&b)) {
            return Err(GuidError {
                raw: s.to_string(),
                reason: "only [A-Za-z0-9_-] are allowed",
            });
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Guid {
    type Error = GuidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Guid> for String {
    fn from(value: Guid) -> Self {
        value.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// BookmarkUrl
// ---------------------------------------------------------------------------

/// A bookmarked URL. Tags hang off URLs, not off individual bookmarks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BookmarkUrl(String);

/// Rejected URL input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid URL '{raw}': {reason}")]
pub struct UrlError {
    pub raw: String,
    pub reason: &'static str,
}

impl UrlError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidUrl
    }
}

impl BookmarkUrl {
    /// Parse a URL, requiring an RFC 3986 style scheme prefix.
    ///
    /// # Errors
    ///
    /// Returns [`UrlError`] when the scheme is missing or malformed, or the
    /// input contains whitespace.
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let Some((scheme, rest)) = raw.split_once(':') else {
            return Err(UrlError {
                raw: raw.to_string(),
                reason: "missing scheme",
            });
        };
        let mut chars = scheme.chars();
        let valid_scheme = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid_scheme {
            return Err(UrlError {
                raw: raw.to_string(),
                reason: "malformed scheme",
            });
        }
        if rest.is_empty() || raw.chars().any(char::is_whitespace) {
            return Err(UrlError {
                raw: raw.to_string(),
                reason: "empty or whitespace-containing body",
            });
        }
        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for BookmarkUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BookmarkUrl {
    type Error = UrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BookmarkUrl> for String {
    fn from(value: BookmarkUrl) -> Self {
        value.0
    }
}

impl fmt::Display for BookmarkUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
