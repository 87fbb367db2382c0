use serde::Serialize;

/// Structured trace events emitted across all xrpc crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    LexiconsLoaded {
        documents: usize,
        definitions: usize,
        methods: usize,
    },
    MethodDispatched {
        nsid: String,
        kind: String,
        stage: String,
        outcome: String,
        duration_ms: u64,
    },
    SubscriptionOpened {
        nsid: String,
        stream_id: String,
    },
    SubscriptionClosed {
        nsid: String,
        stream_id: String,
        frames_sent: u64,
        reason: String,
    },
    XrpcCall {
        nsid: String,
        status: u16,
        duration_ms: u64,
    },
    SessionRefreshed {
        did: Option<String>,
        ok: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "xr_event");
    }
}
