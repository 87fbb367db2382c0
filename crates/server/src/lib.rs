//! `xr-server` — serves lexicon methods.
//!
//! Handlers are bound to catalog methods in a [`Registry`]; the
//! [`Dispatcher`] runs every call through lookup, validation, invocation
//! and output validation; [`XrpcServer`] exposes it over HTTP and
//! websockets.

pub mod dispatch;
pub mod handler;
pub mod http;
pub mod registry;
pub mod subscription;

pub use dispatch::{
    decode_body, error_response, CallOutcome, DispatchFailure, Dispatcher, InboundCall,
    OutboundResult, Redirect,
};
pub use handler::{
    handler_fn, subscription_fn, CallContext, FrameStream, HandlerError, HandlerResult,
    MethodHandler, SubscriptionHandler,
};
pub use http::XrpcServer;
pub use registry::{Bound, Lookup, Registration, RegistrationError, Registry};
pub use subscription::{CloseReason, Closed, FrameSink, FrameSource, Subscription};
