//! The per-call state machine and its mapping onto wire responses.
//!
//! ```text
//! LOOKUP → VALIDATE_PARAMS → VALIDATE_INPUT → INVOKE → VALIDATE_OUTPUT → DONE
//!    └──────────┴─────────────────┴────────────┴──────────┴──→ FAILED(stage, error)
//! ```
//!
//! Query and procedure invocations each hold a permit from a bounded pool
//! for the duration of the handler call.  Subscriptions branch off after
//! parameter validation (see [`crate::subscription`]) and never take a
//! permit.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use xr_domain::config::Config;
use xr_domain::trace::TraceEvent;
use xr_domain::{Error, MethodKind, Nsid, Stage};
use xr_lexicon::formats::mime_matches;
use xr_lexicon::params::loggable;
use xr_lexicon::{decode_params, Direction, MethodDef, Validator};
use xr_protocol::{
    is_token_error, ErrorBody, Payload, INTERNAL_SERVER_ERROR, INVALID_REQUEST,
    JSON_CONTENT_TYPE, METHOD_NOT_IMPLEMENTED,
};

use crate::handler::{CallContext, HandlerError};
use crate::registry::{Bound, Registry};
use crate::subscription::Subscription;

/// A call that failed, and the step it failed at.
#[derive(Debug)]
pub struct DispatchFailure {
    pub stage: Stage,
    pub error: Error,
}

impl DispatchFailure {
    fn at(stage: Stage, error: impl Into<Error>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }
}

impl std::fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

/// An HTTP redirect requested by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// What a successful call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Output(Option<Payload>),
    Redirect(Redirect),
}

/// An incoming call as received from a transport.
#[derive(Debug, Clone)]
pub struct InboundCall {
    pub nsid: String,
    /// Query or procedure, from the transport's request method.
    pub access: MethodKind,
    pub raw_params: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl InboundCall {
    pub fn new(nsid: impl Into<String>, access: MethodKind) -> Self {
        Self {
            nsid: nsid.into(),
            access,
            raw_params: Vec::new(),
            body: None,
            content_type: None,
            headers: BTreeMap::new(),
        }
    }
}

/// A transport-neutral response.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundResult {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl OutboundResult {
    fn error(status: u16, body: ErrorBody) -> Self {
        Self {
            status,
            body: serde_json::to_vec(&body).unwrap_or_default(),
            content_type: Some(JSON_CONTENT_TYPE.into()),
            headers: Vec::new(),
        }
    }

    /// The decoded error body, if this is an error response.
    pub fn error_body(&self) -> Option<ErrorBody> {
        if self.status < 300 {
            return None;
        }
        ErrorBody::parse(&self.body)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Maps an error to its wire status and body.
pub fn error_response(error: &Error) -> (u16, ErrorBody) {
    match error {
        Error::MethodNotFound(_) | Error::WrongMethodKind { .. } => {
            (501, ErrorBody::new(METHOD_NOT_IMPLEMENTED, error.to_string()))
        }
        Error::Validation(e) => (400, ErrorBody::new(INVALID_REQUEST, e.to_string())),
        Error::InvalidRequest(m) => (400, ErrorBody::new(INVALID_REQUEST, m.clone())),
        Error::Protocol {
            name,
            message,
            status,
        } => {
            let status = if is_token_error(name) {
                401
            } else {
                status.unwrap_or(400)
            };
            (
                status,
                ErrorBody {
                    error: name.clone(),
                    message: message.clone(),
                },
            )
        }
        Error::Authentication { name, message } => (
            401,
            ErrorBody {
                error: name.clone(),
                message: message.clone(),
            },
        ),
        _ => (
            500,
            ErrorBody {
                error: INTERNAL_SERVER_ERROR.into(),
                message: None,
            },
        ),
    }
}

/// Undeclared error names still reach the caller.
fn handler_error(method: &MethodDef, e: HandlerError) -> Result<CallOutcome, Error> {
    match e {
        HandlerError::Named { name, message } => {
            if !method.declares_error(&name) {
                tracing::warn!(nsid = %method.nsid, error = %name, "handler returned an undeclared error");
            }
            Err(Error::Protocol {
                name,
                message,
                status: None,
            })
        }
        HandlerError::InvalidRequest(m) => Err(Error::InvalidRequest(m)),
        HandlerError::Internal(m) => Err(Error::Internal(m)),
        HandlerError::Redirect {
            location,
            status,
            headers,
        } => Ok(CallOutcome::Redirect(Redirect {
            location,
            status,
            headers,
        })),
    }
}

fn log_failure(nsid: &str, failure: &DispatchFailure) {
    match &failure.error {
        Error::Protocol { name, .. } | Error::Authentication { name, .. } => {
            tracing::debug!(nsid, stage = %failure.stage, error = %name, "named error");
        }
        Error::Validation(e) => {
            tracing::info!(nsid, stage = %failure.stage, error = %e, "validation failed");
        }
        Error::MethodNotFound(_) | Error::WrongMethodKind { .. } | Error::InvalidRequest(_) => {
            tracing::info!(nsid, stage = %failure.stage, error = %failure.error, "call rejected");
        }
        other => {
            tracing::error!(nsid, stage = %failure.stage, error = %other, "call failed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    validator: Validator,
    pool: Arc<Semaphore>,
    subscription_buffer: usize,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, config: &Config) -> Self {
        let validator = Validator::new(registry.catalog().clone(), config.validation);
        Self {
            registry,
            validator,
            pool: Arc::new(Semaphore::new(config.server.max_concurrent_calls.max(1))),
            subscription_buffer: config.server.subscription_buffer.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Permits currently free in the request pool.
    pub fn available_permits(&self) -> usize {
        self.pool.available_permits()
    }

    /// Runs a query or procedure through every stage.
    pub async fn call(
        &self,
        ctx: CallContext,
        params: Map<String, Value>,
        input: Option<Payload>,
    ) -> Result<CallOutcome, DispatchFailure> {
        let started = Instant::now();
        let nsid = ctx.nsid.to_string();
        let kind = ctx.kind;
        let result = self.run_stages(ctx, params, input).await;

        let (stage, outcome) = match &result {
            Ok(_) => (Stage::Done, "ok".to_string()),
            Err(f) => {
                log_failure(&nsid, f);
                (f.stage, f.error.wire_name().unwrap_or("failed").to_string())
            }
        };
        TraceEvent::MethodDispatched {
            nsid,
            kind: kind.to_string(),
            stage: stage.to_string(),
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
        result
    }

    async fn run_stages(
        &self,
        ctx: CallContext,
        mut params: Map<String, Value>,
        mut input: Option<Payload>,
    ) -> Result<CallOutcome, DispatchFailure> {
        // ── LOOKUP ───────────────────────────────────────────────────
        let found = self
            .registry
            .lookup(ctx.nsid.as_str(), ctx.kind)
            .map_err(|e| DispatchFailure::at(Stage::Lookup, e))?;
        let method = found.method;
        let handler = match found.handler {
            Some(Bound::Method(h)) => h.clone(),
            _ => {
                return Err(DispatchFailure::at(
                    Stage::Lookup,
                    Error::MethodNotFound(ctx.nsid.to_string()),
                ))
            }
        };

        // ── VALIDATE_PARAMS ──────────────────────────────────────────
        self.validator
            .validate_params(method, &mut params)
            .map_err(|e| DispatchFailure::at(Stage::ValidateParams, e))?;

        // ── VALIDATE_INPUT ───────────────────────────────────────────
        self.check_payload(method, Direction::Input, input.as_mut())
            .map_err(|e| DispatchFailure::at(Stage::ValidateInput, e))?;

        // ── INVOKE ───────────────────────────────────────────────────
        tracing::debug!(
            nsid = %ctx.nsid,
            request_id = %ctx.request_id,
            params = %serde_json::Value::Object(params.iter().map(|(k, v)| (k.clone(), loggable(v))).collect()),
            "invoking handler"
        );
        let output = {
            let _permit = self
                .pool
                .acquire()
                .await
                .map_err(|e| DispatchFailure::at(Stage::Invoke, Error::Internal(e.to_string())))?;
            match AssertUnwindSafe(handler.call(ctx, params, input))
                .catch_unwind()
                .await
            {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return handler_error(method, e)
                        .map_err(|e| DispatchFailure::at(Stage::Invoke, e))
                }
                Err(_panic) => {
                    return Err(DispatchFailure::at(
                        Stage::Invoke,
                        Error::Internal("handler panicked".into()),
                    ))
                }
            }
        };

        // ── VALIDATE_OUTPUT ──────────────────────────────────────────
        let mut output = output;
        self.check_payload(method, Direction::Output, output.as_mut())
            .map_err(|e| {
                DispatchFailure::at(
                    Stage::ValidateOutput,
                    Error::Internal(format!("handler output is invalid: {e}")),
                )
            })?;

        Ok(CallOutcome::Output(output))
    }

    /// Validates one direction's payload.  Binary payloads are only
    /// compared against the declared encoding, and a mismatch is logged.
    fn check_payload(
        &self,
        method: &MethodDef,
        direction: Direction,
        payload: Option<&mut Payload>,
    ) -> Result<(), Error> {
        let declared = match direction {
            Direction::Input => method.input.as_ref(),
            _ => method.output.as_ref(),
        };
        match payload {
            Some(Payload::Json(v)) => {
                Ok(self.validator.validate_direction(method, direction, Some(v))?)
            }
            Some(Payload::Binary { content_type, .. }) => {
                let Some(body) = declared else {
                    if !self.validator.enabled() {
                        return Ok(());
                    }
                    return Err(Error::Validation(xr_domain::ValidationError::new(
                        direction.as_str(),
                        format!("{} declares no {}", method.nsid, direction.as_str()),
                    )));
                };
                if !mime_matches(&body.encoding, content_type.as_str()) {
                    tracing::warn!(
                        nsid = %method.nsid,
                        expected = %body.encoding,
                        got = %content_type,
                        "{} content type doesn't match declared encoding",
                        direction.as_str()
                    );
                }
                Ok(())
            }
            None => Ok(self.validator.validate_direction(method, direction, None)?),
        }
    }

    /// Validates parameters and opens a subscription's frame stream.
    pub async fn open(
        &self,
        ctx: CallContext,
        params: Map<String, Value>,
    ) -> Result<Subscription, DispatchFailure> {
        let nsid = ctx.nsid.to_string();
        let result = self.open_stream(ctx, params).await;
        if let Err(f) = &result {
            log_failure(&nsid, f);
        }
        result
    }

    async fn open_stream(
        &self,
        ctx: CallContext,
        mut params: Map<String, Value>,
    ) -> Result<Subscription, DispatchFailure> {
        let found = self
            .registry
            .lookup(ctx.nsid.as_str(), MethodKind::Subscription)
            .map_err(|e| DispatchFailure::at(Stage::Lookup, e))?;
        let handler = match found.handler {
            Some(Bound::Subscription(h)) => h.clone(),
            _ => {
                return Err(DispatchFailure::at(
                    Stage::Lookup,
                    Error::MethodNotFound(ctx.nsid.to_string()),
                ))
            }
        };
        self.validator
            .validate_params(found.method, &mut params)
            .map_err(|e| DispatchFailure::at(Stage::ValidateParams, e))?;

        let cancel = ctx.cancel.clone();
        let events = match AssertUnwindSafe(handler.open(ctx, params)).catch_unwind().await {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                let error = match handler_error(found.method, e) {
                    Err(e) => e,
                    Ok(_) => Error::Internal("subscriptions can't redirect".into()),
                };
                return Err(DispatchFailure::at(Stage::Invoke, error));
            }
            Err(_panic) => {
                return Err(DispatchFailure::at(
                    Stage::Invoke,
                    Error::Internal("subscription handler panicked".into()),
                ))
            }
        };
        Ok(Subscription::new(
            found.method.clone(),
            self.validator.clone(),
            events,
            self.subscription_buffer,
            cancel,
        ))
    }

    // ── Inbound boundary ────────────────────────────────────────────

    /// Decodes a raw inbound call, runs it, and maps the result onto a
    /// response.
    pub async fn handle(&self, call: InboundCall) -> OutboundResult {
        let failed = |error: Error| {
            let (status, body) = error_response(&error);
            OutboundResult::error(status, body)
        };

        let nsid = match Nsid::new(call.nsid.clone()) {
            Ok(n) => n,
            Err(e) => return failed(Error::InvalidRequest(e.to_string())),
        };
        let Some(method) = self.registry.catalog().method(nsid.as_str()) else {
            return failed(Error::MethodNotFound(nsid.to_string()));
        };

        let params = match decode_params(method, &call.raw_params) {
            Ok(p) => p,
            Err(e) => return failed(Error::InvalidRequest(e.to_string())),
        };
        let input = match decode_body(method, call.body, call.content_type.as_deref()) {
            Ok(i) => i,
            Err(e) => return failed(e),
        };

        let mut ctx = CallContext::new(nsid, call.access);
        ctx.headers = call.headers;

        match self.call(ctx, params, input).await {
            Ok(CallOutcome::Output(None)) => OutboundResult {
                status: 200,
                body: Vec::new(),
                content_type: None,
                headers: Vec::new(),
            },
            Ok(CallOutcome::Output(Some(payload))) => OutboundResult {
                status: 200,
                body: payload.to_bytes(),
                content_type: Some(payload.content_type().to_string()),
                headers: Vec::new(),
            },
            Ok(CallOutcome::Redirect(r)) => {
                let mut headers = r.headers;
                headers.push(("Location".into(), r.location));
                OutboundResult {
                    status: r.status,
                    body: Vec::new(),
                    content_type: None,
                    headers,
                }
            }
            Err(f) => failed(f.error),
        }
    }
}

/// Decodes a request body: JSON when the content type is JSON (or absent
/// and the method declares JSON input), otherwise opaque bytes.
pub fn decode_body(
    method: &MethodDef,
    body: Option<Vec<u8>>,
    content_type: Option<&str>,
) -> Result<Option<Payload>, Error> {
    let Some(bytes) = body.filter(|b| !b.is_empty()) else {
        return Ok(None);
    };
    let declared_json = method.input.as_ref().is_some_and(|b| b.is_json());
    let is_json = match content_type {
        Some(ct) => mime_matches(JSON_CONTENT_TYPE, ct),
        None => declared_json || method.input.is_none(),
    };
    if is_json {
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| Error::InvalidRequest(format!("couldn't decode JSON body: {e}")))?;
        Ok(Some(Payload::Json(value)))
    } else {
        Ok(Some(Payload::Binary {
            content_type: content_type.unwrap_or("application/octet-stream").to_string(),
            bytes,
        }))
    }
}
