//! Held session credentials.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use xr_lexicon::bundled::{CREATE_SESSION, REFRESH_SESSION};

/// True for the two methods whose successful output replaces the session.
pub fn is_session_method(nsid: &str) -> bool {
    nsid == CREATE_SESSION || nsid == REFRESH_SESSION
}

/// The output of `createSession` / `refreshSession`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_jwt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_jwt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
}

impl Session {
    pub fn from_tokens(access: Option<String>, refresh: Option<String>) -> Self {
        Self {
            access_jwt: access,
            refresh_jwt: refresh,
            ..Self::default()
        }
    }

    pub fn from_output(output: &Value) -> Option<Self> {
        serde_json::from_value(output.clone()).ok()
    }
}

/// Called whenever the held session changes: `Some` after a successful
/// create or refresh, `None` after one failed.
pub type SessionCallback = Arc<dyn Fn(Option<&Session>) + Send + Sync>;
