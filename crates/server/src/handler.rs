//! Handler traits and the types passed through them.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use futures_core::Stream;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use xr_domain::{MethodKind, Nsid};
use xr_protocol::{Frame, Payload};

/// Context provided to every handler invocation.
#[derive(Clone, Debug)]
pub struct CallContext {
    pub nsid: Nsid,
    pub kind: MethodKind,
    /// Correlation id for log lines.
    pub request_id: String,
    /// Request headers, names lowercased.
    pub headers: BTreeMap<String, String>,
    /// Cancelled when the caller goes away (subscription closed, server
    /// shutting down).
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn new(nsid: Nsid, kind: MethodKind) -> Self {
        Self {
            nsid,
            kind,
            request_id: uuid::Uuid::new_v4().to_string(),
            headers: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Errors a handler can return.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    /// A declared (or otherwise expected) protocol error such as
    /// `RepoNotFound`.  Sent to the caller as `{error, message}`.
    #[error("{name}: {}", message.as_deref().unwrap_or(""))]
    Named {
        name: String,
        message: Option<String>,
    },
    /// The caller sent something the handler can't work with.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Answer with an HTTP redirect instead of a body.
    #[error("redirect to {location}")]
    Redirect {
        location: String,
        status: u16,
        headers: Vec<(String, String)>,
    },
    /// An unexpected fault.  Reported to the caller opaquely.
    #[error("internal: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            message: Some(message.into()),
        }
    }

    /// A `302 Found` redirect.
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::Redirect {
            location: location.into(),
            status: 302,
            headers: Vec::new(),
        }
    }
}

/// Result type for query and procedure handlers.  `None` means an empty
/// response body.
pub type HandlerResult = Result<Option<Payload>, HandlerError>;

/// The lazily produced frames of one subscription.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, HandlerError>> + Send>>;

/// Implement this trait to serve a query or procedure.
///
/// `params` are already decoded and validated against the method's
/// parameter schema; a JSON `input` has been validated against its input
/// schema.
#[async_trait::async_trait]
pub trait MethodHandler: Send + Sync + 'static {
    async fn call(
        &self,
        ctx: CallContext,
        params: Map<String, Value>,
        input: Option<Payload>,
    ) -> HandlerResult;
}

/// Implement this trait to serve a subscription.
///
/// `open` runs once per connection with validated parameters and returns
/// the frame stream.  Each message payload is validated as it is produced;
/// an `Err` item, or a payload that fails validation, ends the stream with
/// an error frame.
#[async_trait::async_trait]
pub trait SubscriptionHandler: Send + Sync + 'static {
    async fn open(
        &self,
        ctx: CallContext,
        params: Map<String, Value>,
    ) -> Result<FrameStream, HandlerError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Closure adapters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wraps an async closure as a [`MethodHandler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(CallContext, Map<String, Value>, Option<Payload>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait::async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(CallContext, Map<String, Value>, Option<Payload>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(
        &self,
        ctx: CallContext,
        params: Map<String, Value>,
        input: Option<Payload>,
    ) -> HandlerResult {
        (self.0)(ctx, params, input).await
    }
}

/// Wraps a closure returning a frame stream as a [`SubscriptionHandler`].
pub struct FnSubscription<F>(F);

pub fn subscription_fn<F, S>(f: F) -> FnSubscription<F>
where
    F: Fn(CallContext, Map<String, Value>) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Frame, HandlerError>> + Send + 'static,
{
    FnSubscription(f)
}

#[async_trait::async_trait]
impl<F, S> SubscriptionHandler for FnSubscription<F>
where
    F: Fn(CallContext, Map<String, Value>) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Frame, HandlerError>> + Send + 'static,
{
    async fn open(
        &self,
        ctx: CallContext,
        params: Map<String, Value>,
    ) -> Result<FrameStream, HandlerError> {
        Ok(Box::pin((self.0)(ctx, params)))
    }
}
