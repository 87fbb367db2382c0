//! Namespaced identifiers (NSIDs) such as `com.atproto.server.createSession`.
//!
//! The registry is keyed by the exact NSID string.  [`Nsid::flat_name`] is the
//! folded, display-only form (ASCII-lowercase, `-` → `_`) used by generated
//! bindings; two method NSIDs with the same flat name are rejected at load.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum total NSID length in characters.
pub const MAX_NSID_LEN: usize = 317;

fn nsid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^[a-z]([a-z0-9-]{0,61}[a-z0-9])?",
            r"(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)+",
            r"\.[a-zA-Z]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$",
        ))
        .expect("NSID pattern compiles")
    })
}

/// Returns true if `s` is a syntactically valid NSID.
pub fn is_valid_nsid(s: &str) -> bool {
    s.len() <= MAX_NSID_LEN && nsid_re().is_match(s)
}

/// A validated NSID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Nsid(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0} is not a valid NSID")]
pub struct InvalidNsid(pub String);

impl Nsid {
    pub fn new(s: impl Into<String>) -> Result<Self, InvalidNsid> {
        let s = s.into();
        if is_valid_nsid(&s) {
            Ok(Self(s))
        } else {
            Err(InvalidNsid(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The reverse-DNS authority, e.g. `com.atproto.server`.
    pub fn authority(&self) -> &str {
        self.0.rsplit_once('.').map(|(a, _)| a).unwrap_or(&self.0)
    }

    /// The final segment, e.g. `createSession`.
    pub fn name(&self) -> &str {
        self.0.rsplit_once('.').map(|(_, n)| n).unwrap_or(&self.0)
    }

    /// Folded form of this NSID.  Display/ergonomics only, never a dispatch key.
    pub fn flat_name(&self) -> String {
        fold(&self.0)
    }
}

/// Folds an identifier the way generated bindings name it.
pub fn fold(s: &str) -> String {
    s.to_ascii_lowercase().replace('-', "_")
}

impl fmt::Display for Nsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Nsid {
    type Err = InvalidNsid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Nsid {
    type Error = InvalidNsid;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&str> for Nsid {
    type Error = InvalidNsid;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Nsid> for String {
    fn from(n: Nsid) -> Self {
        n.0
    }
}

impl AsRef<str> for Nsid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
