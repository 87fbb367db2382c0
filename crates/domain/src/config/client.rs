use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the XRPC server, e.g. `https://bsky.social`.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "d_user_agent")]
    pub user_agent: String,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            timeout_ms: d_timeout_ms(),
            user_agent: d_user_agent(),
            headers: BTreeMap::new(),
        }
    }
}

fn d_base_url() -> String {
    "https://bsky.social".into()
}
fn d_timeout_ms() -> u64 {
    30_000
}
fn d_user_agent() -> String {
    concat!("xrpc/", env!("CARGO_PKG_VERSION")).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_parse_as_table() {
        let toml_str = r#"
            base_url = "http://localhost:8080"
            [headers]
            atproto-proxy = "did:web:api.bsky.app#bsky_appview"
        "#;
        let cfg: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.base_url, "http://localhost:8080");
        assert_eq!(cfg.timeout_ms, 30_000);
        assert_eq!(
            cfg.headers.get("atproto-proxy").map(String::as_str),
            Some("did:web:api.bsky.app#bsky_appview")
        );
    }
}
