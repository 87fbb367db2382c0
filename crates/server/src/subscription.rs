//! Subscription pump.
//!
//! Flow:
//! 1. [`Dispatcher::open`](crate::Dispatcher::open) validates parameters and
//!    asks the handler for its frame stream.
//! 2. [`Subscription::run`] spawns a producer task that pulls frames,
//!    validates each payload, encodes it, and pushes the bytes into a
//!    bounded channel.
//! 3. The pump forwards channel bytes to the sink and watches the source
//!    for the peer going away.  Whichever side ends first stops the other.

use std::panic::AssertUnwindSafe;

use futures_util::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use xr_domain::trace::TraceEvent;
use xr_domain::Error;
use xr_lexicon::{MethodDef, Validator};
use xr_protocol::{encode_frame, ErrorBody, Frame, INTERNAL_SERVER_ERROR, INVALID_REQUEST};

use crate::handler::{FrameStream, HandlerError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outbound half of a persistent stream.
#[async_trait::async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), Error>;

    /// Closes the stream after the last frame.
    async fn close(&mut self) {}
}

/// Inbound half of a persistent stream.  `None` means the peer closed it.
/// Inbound bytes are otherwise ignored.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    async fn receive(&mut self) -> Option<Vec<u8>>;
}

#[async_trait::async_trait]
impl FrameSink for mpsc::Sender<Vec<u8>> {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), Error> {
        mpsc::Sender::send(self, frame)
            .await
            .map_err(|_| Error::Transport("frame receiver dropped".into()))
    }
}

#[async_trait::async_trait]
impl FrameSource for mpsc::Receiver<Vec<u8>> {
    async fn receive(&mut self) -> Option<Vec<u8>> {
        self.recv().await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscription
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The handler's stream ran out.
    Completed,
    /// An error frame was delivered.
    Error,
    /// The peer closed the stream or stopped accepting frames.
    ClientClosed,
    /// The cancellation token fired (server shutdown).
    Cancelled,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Error => "error",
            Self::ClientClosed => "client closed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Summary returned when a subscription ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed {
    pub frames_sent: u64,
    pub reason: CloseReason,
}

/// An opened subscription, ready to be pumped over a transport.
pub struct Subscription {
    method: MethodDef,
    validator: Validator,
    events: FrameStream,
    buffer: usize,
    cancel: CancellationToken,
    stream_id: String,
}

struct Outgoing {
    bytes: Vec<u8>,
    is_error: bool,
}

impl Subscription {
    pub(crate) fn new(
        method: MethodDef,
        validator: Validator,
        events: FrameStream,
        buffer: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            method,
            validator,
            events,
            buffer: buffer.max(1),
            cancel,
            stream_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Token shared with the handler's [`CallContext`](crate::CallContext).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Pumps frames until the stream completes, errors, is cancelled, or
    /// the peer goes away.  The handler's cancellation token is always
    /// cancelled on return.
    pub async fn run<S: FrameSink, R: FrameSource>(self, mut sink: S, mut source: R) -> Closed {
        let Self {
            method,
            validator,
            events,
            buffer,
            cancel,
            stream_id,
        } = self;
        let nsid = method.nsid.to_string();

        TraceEvent::SubscriptionOpened {
            nsid: nsid.clone(),
            stream_id: stream_id.clone(),
        }
        .emit();

        let (tx, mut rx) = mpsc::channel::<Outgoing>(buffer);
        let producer = tokio::spawn(produce(method, validator, events, tx, cancel.clone()));

        let mut frames_sent = 0u64;
        let mut source_open = true;
        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => break CloseReason::Cancelled,
                next = rx.recv() => match next {
                    None => break CloseReason::Completed,
                    Some(out) => {
                        if let Err(e) = sink.send(out.bytes).await {
                            tracing::debug!(nsid = %nsid, error = %e, "subscription sink closed");
                            break CloseReason::ClientClosed;
                        }
                        frames_sent += 1;
                        if out.is_error {
                            break CloseReason::Error;
                        }
                    }
                },
                incoming = source.receive() => {
                    if incoming.is_none() {
                        source_open = false;
                        break CloseReason::ClientClosed;
                    }
                }
            }
        };

        cancel.cancel();
        drop(rx);
        if let Err(e) = producer.await {
            tracing::warn!(nsid = %nsid, error = %e, "subscription producer task failed");
        }
        if source_open {
            sink.close().await;
        }

        TraceEvent::SubscriptionClosed {
            nsid,
            stream_id,
            frames_sent,
            reason: reason.as_str().to_string(),
        }
        .emit();

        Closed {
            frames_sent,
            reason,
        }
    }
}

/// Encodes an error frame, falling back to a bare internal error.
pub fn error_frame_bytes(body: ErrorBody) -> Vec<u8> {
    encode_frame(&Frame::Error(body)).unwrap_or_else(|e| {
        tracing::error!(error = %e, "couldn't encode error frame");
        encode_frame(&Frame::Error(ErrorBody {
            error: INTERNAL_SERVER_ERROR.into(),
            message: None,
        }))
        .unwrap_or_default()
    })
}

fn handler_error_body(method: &MethodDef, e: HandlerError) -> ErrorBody {
    match e {
        HandlerError::Named { name, message } => {
            if !method.declares_error(&name) {
                tracing::warn!(nsid = %method.nsid, error = %name, "subscription sent an undeclared error");
            }
            ErrorBody {
                error: name,
                message,
            }
        }
        HandlerError::InvalidRequest(m) => ErrorBody::new(INVALID_REQUEST, m),
        other => {
            tracing::error!(error = %other, "subscription handler failed");
            ErrorBody {
                error: INTERNAL_SERVER_ERROR.into(),
                message: None,
            }
        }
    }
}

async fn produce(
    method: MethodDef,
    validator: Validator,
    mut events: FrameStream,
    tx: mpsc::Sender<Outgoing>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = AssertUnwindSafe(events.next()).catch_unwind() => next,
        };

        let frame = match next {
            Ok(None) => return,
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => Frame::Error(handler_error_body(&method, e)),
            Err(_panic) => {
                tracing::error!(nsid = %method.nsid, "subscription handler panicked");
                Frame::Error(ErrorBody {
                    error: INTERNAL_SERVER_ERROR.into(),
                    message: None,
                })
            }
        };

        let frame = match frame {
            Frame::Message { t, mut payload } => {
                match validator.validate_message(&method, t.as_deref(), &mut payload) {
                    Ok(()) => Frame::Message { t, payload },
                    Err(e) => {
                        tracing::error!(nsid = %method.nsid, error = %e, "subscription produced an invalid message");
                        Frame::Error(ErrorBody {
                            error: INTERNAL_SERVER_ERROR.into(),
                            message: None,
                        })
                    }
                }
            }
            error => error,
        };

        let is_error = frame.is_error();
        let bytes = match encode_frame(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(nsid = %method.nsid, error = %e, "couldn't encode frame");
                let bytes = error_frame_bytes(ErrorBody {
                    error: INTERNAL_SERVER_ERROR.into(),
                    message: None,
                });
                let _ = tx.send(Outgoing { bytes, is_error: true }).await;
                return;
            }
        };
        if tx.send(Outgoing { bytes, is_error }).await.is_err() || is_error {
            return;
        }
    }
}
