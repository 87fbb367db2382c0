//! Lexicons compiled into the crate.

/// NSID of the session-creating procedure.
pub const CREATE_SESSION: &str = "com.atproto.server.createSession";
/// NSID of the session-refreshing procedure.
pub const REFRESH_SESSION: &str = "com.atproto.server.refreshSession";

/// `(origin, json)` pairs for every bundled document.
pub const DOCUMENTS: &[(&str, &str)] = &[
    (
        CREATE_SESSION,
        include_str!("../lexicons/com/atproto/server/createSession.json"),
    ),
    (
        REFRESH_SESSION,
        include_str!("../lexicons/com/atproto/server/refreshSession.json"),
    ),
];
