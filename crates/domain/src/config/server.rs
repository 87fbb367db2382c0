use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_8080")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Size of the worker pool for query/procedure calls.  Subscriptions run
    /// in their own tasks and never hold a slot.
    #[serde(default = "d_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    /// Capacity of the channel between a subscription producer and its
    /// socket pump.  `1` means a frame is produced only once the previous
    /// one has been handed to the socket.
    #[serde(default = "d_subscription_buffer")]
    pub subscription_buffer: usize,
    /// Maximum accepted request body size in bytes.
    #[serde(default = "d_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Lexicon files or directories loaded at startup, in addition to the
    /// bundled ones.
    #[serde(default)]
    pub lexicon_paths: Vec<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_8080(),
            host: d_host(),
            max_concurrent_calls: d_max_concurrent_calls(),
            subscription_buffer: d_subscription_buffer(),
            max_body_bytes: d_max_body_bytes(),
            lexicon_paths: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// `host:port` suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_8080() -> u16 {
    8080
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_max_concurrent_calls() -> usize {
    64
}
fn d_subscription_buffer() -> usize {
    1
}
fn d_max_body_bytes() -> usize {
    1024 * 1024
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
