use std::fmt;

use serde::{Deserialize, Serialize};

/// The three method kinds a lexicon can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    /// Side-effect-free request/response (HTTP GET).
    Query,
    /// Mutating request/response (HTTP POST).
    Procedure,
    /// Persistent stream of frames (websocket).
    Subscription,
}

impl MethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Procedure => "procedure",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
