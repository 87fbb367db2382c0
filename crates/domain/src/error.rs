use crate::kind::MethodKind;

/// A value did not match its schema.
///
/// `path` locates the offending value (e.g. `input.reply.root.uri`), `reason`
/// is the human-readable explanation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{path} {reason}")]
pub struct ValidationError {
    pub path: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Fatal problems found while loading lexicon documents.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaLoadError {
    #[error("malformed lexicon {document}: {message}")]
    Malformed { document: String, message: String },

    #[error("lexicon {document} has unsupported version {version}")]
    UnsupportedVersion { document: String, version: String },

    #[error("unknown reference {reference} (from {context})")]
    UnknownReference { reference: String, context: String },

    #[error("cyclic reference chain: {}", chain.join(" -> "))]
    CyclicReference { chain: Vec<String> },

    #[error("conflicting definition {id}: {reason}")]
    ConflictingDefinition { id: String, reason: String },

    #[error("reading lexicons: {0}")]
    Io(String),
}

/// Shared error taxonomy used across all xrpc crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("schema: {0}")]
    SchemaLoad(#[from] SchemaLoadError),

    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0} not found")]
    MethodNotFound(String),

    #[error("{nsid} is a {declared}, not a {requested}")]
    WrongMethodKind {
        nsid: String,
        declared: MethodKind,
        requested: MethodKind,
    },

    /// A method-declared (or server-chosen) named error, e.g. `RepoNotFound`.
    #[error("{name}: {}", message.as_deref().unwrap_or(""))]
    Protocol {
        name: String,
        message: Option<String>,
        status: Option<u16>,
    },

    #[error("authentication failed ({name}): {}", message.as_deref().unwrap_or(""))]
    Authentication {
        name: String,
        message: Option<String>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("config: {0}")]
    Config(String),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            name: name.into(),
            message: Some(message.into()),
            status: None,
        }
    }

    /// The error name this error carries on the wire, if any.
    pub fn wire_name(&self) -> Option<&str> {
        match self {
            Self::Protocol { name, .. } | Self::Authentication { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_displays_path_first() {
        let e = ValidationError::new("parameters.message", "has unexpected type integer");
        assert_eq!(e.to_string(), "parameters.message has unexpected type integer");
    }

    #[test]
    fn cyclic_chain_is_joined() {
        let e = SchemaLoadError::CyclicReference {
            chain: vec!["a.b.c#x".into(), "a.b.c#y".into(), "a.b.c#x".into()],
        };
        assert_eq!(e.to_string(), "cyclic reference chain: a.b.c#x -> a.b.c#y -> a.b.c#x");
    }

    #[test]
    fn wire_name_only_for_named_errors() {
        assert_eq!(Error::named("RepoNotFound", "gone").wire_name(), Some("RepoNotFound"));
        assert_eq!(Error::MethodNotFound("io.x.y".into()).wire_name(), None);
    }
}
