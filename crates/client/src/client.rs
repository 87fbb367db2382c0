//! The call engine.
//!
//! Every call is validated against its lexicon before any network I/O,
//! encoded according to its input shape, sent through the [`Transport`],
//! and its output validated on the way back.
//!
//! # Session refresh
//!
//! A held [`Session`]'s access token is attached to every call.  When a
//! call fails authentication the engine refreshes the session at most once
//! and retries the call once.  Refreshes are single-flight: callers that
//! fail while another refresh is running wait for it and retry with the
//! token it produced instead of refreshing again.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures_core::Stream;
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use xr_domain::trace::TraceEvent;
use xr_domain::{Error, MethodKind, ValidationError};
use xr_lexicon::formats::mime_matches;
use xr_lexicon::{encode_params, loggable, Catalog, Direction, MethodDef, Validator};
use xr_protocol::{
    decode_frame, ErrorBody, Frame, Payload, AUTHENTICATION_REQUIRED, JSON_CONTENT_TYPE, XRPC_PATH,
};

use crate::builder::ClientBuilder;
use crate::session::{is_session_method, Session, SessionCallback, REFRESH_SESSION};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, Transport};

/// Frames received from a subscription.  Ends after the server closes the
/// stream or after the first `Err`.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, Error>> + Send>>;

/// Undecoded binary frames from a subscription.
pub type RawFrameStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, Error>> + Send>>;

pub(crate) struct Inner {
    pub(crate) transport: Arc<dyn Transport>,
    /// Without a trailing slash.
    pub(crate) base_url: String,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) validator: Validator,
    pub(crate) user_agent: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) session: RwLock<Option<Session>>,
    pub(crate) refresh_lock: tokio::sync::Mutex<()>,
    pub(crate) on_session: Option<SessionCallback>,
}

/// An XRPC client.  Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url)
            .field("has_session", &self.inner.session.read().is_some())
            .finish()
    }
}

/// A call that passed validation.
struct Prepared<'a> {
    method: &'a MethodDef,
    params: Vec<(String, String)>,
    input: Option<Payload>,
}

impl Client {
    pub(crate) fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.inner.catalog
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.session.read().clone()
    }

    /// Replaces the held session without notifying the session callback.
    pub fn set_session(&self, session: Option<Session>) {
        *self.inner.session.write() = session;
    }

    fn access_token(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .as_ref()
            .and_then(|s| s.access_jwt.clone())
    }

    /// Starts a [`MethodCall`] builder.
    pub fn method(&self, nsid: impl Into<String>) -> MethodCall<'_> {
        MethodCall {
            client: self,
            nsid: nsid.into(),
            params: Map::new(),
            input: None,
            headers: Vec::new(),
        }
    }

    pub async fn query(
        &self,
        nsid: &str,
        params: Map<String, Value>,
    ) -> Result<Option<Payload>, Error> {
        self.call(nsid, params, None).await
    }

    pub async fn procedure(
        &self,
        nsid: &str,
        params: Map<String, Value>,
        input: Option<Payload>,
    ) -> Result<Option<Payload>, Error> {
        self.call(nsid, params, input).await
    }

    /// Calls a query or procedure.  `None` output means an empty response.
    pub async fn call(
        &self,
        nsid: &str,
        params: Map<String, Value>,
        input: Option<Payload>,
    ) -> Result<Option<Payload>, Error> {
        self.call_with_headers(nsid, params, input, &[]).await
    }

    /// Like [`call`](Self::call) with extra headers for this request only.
    pub async fn call_with_headers(
        &self,
        nsid: &str,
        params: Map<String, Value>,
        input: Option<Payload>,
        headers: &[(String, String)],
    ) -> Result<Option<Payload>, Error> {
        let prepared = self.prepare(nsid, params, input)?;
        let seen = self.access_token();
        match self.execute(&prepared, headers).await {
            Err(e) if e.is_authentication() && !is_session_method(nsid) => {
                if !self.refresh_after(seen.as_deref()).await {
                    return Err(e);
                }
                self.execute(&prepared, headers).await
            }
            other => other,
        }
    }

    // ── Request path ─────────────────────────────────────────────────

    fn prepare(
        &self,
        nsid: &str,
        mut params: Map<String, Value>,
        mut input: Option<Payload>,
    ) -> Result<Prepared<'_>, Error> {
        let method = self
            .inner
            .catalog
            .method(nsid)
            .ok_or_else(|| Error::MethodNotFound(nsid.to_string()))?;
        if method.kind == MethodKind::Subscription {
            return Err(Error::WrongMethodKind {
                nsid: nsid.to_string(),
                declared: method.kind,
                requested: MethodKind::Query,
            });
        }

        params.retain(|_, v| !v.is_null());
        let validator = &self.inner.validator;
        validator.validate_params(method, &mut params)?;
        match input.as_mut() {
            Some(Payload::Json(v)) => validator.validate_direction(method, Direction::Input, Some(v))?,
            Some(Payload::Binary { content_type, .. }) => match &method.input {
                Some(body) if !mime_matches(&body.encoding, content_type) => tracing::warn!(
                    nsid,
                    expected = %body.encoding,
                    got = %content_type,
                    "input content type doesn't match declared encoding"
                ),
                Some(_) => {}
                None if validator.enabled() => {
                    return Err(Error::Validation(ValidationError::new(
                        Direction::Input.as_str(),
                        format!("{nsid} declares no input"),
                    )))
                }
                None => {}
            },
            None => validator.validate_direction(method, Direction::Input, None)?,
        }

        Ok(Prepared {
            method,
            params: encode_params(&params),
            input,
        })
    }

    fn method_url(&self, nsid: &str, params: &[(String, String)]) -> Result<reqwest::Url, Error> {
        let mut url = reqwest::Url::parse(&format!("{}{XRPC_PATH}/{nsid}", self.inner.base_url))
            .map_err(|e| Error::Config(format!("bad base URL {}: {e}", self.inner.base_url)))?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }

    /// Headers in precedence order: defaults, client-wide, per-call, then
    /// the binary content type and the bearer token.
    fn request_headers(
        &self,
        nsid: &str,
        input: Option<&Payload>,
        extra: &[(String, String)],
    ) -> Vec<(String, String)> {
        let mut headers = vec![("User-Agent".to_string(), self.inner.user_agent.clone())];
        if let Some(Payload::Json(_)) = input {
            headers.push(("Content-Type".into(), JSON_CONTENT_TYPE.into()));
        }
        headers.extend(self.inner.headers.iter().cloned());
        headers.extend(extra.iter().cloned());
        if let Some(Payload::Binary { content_type, .. }) = input {
            headers.push(("Content-Type".into(), content_type.clone()));
        }

        let token = self.inner.session.read().as_ref().and_then(|s| {
            if nsid == REFRESH_SESSION {
                s.refresh_jwt.clone()
            } else {
                s.access_jwt.clone()
            }
        });
        if let Some(token) = token {
            headers.push(("Authorization".into(), format!("Bearer {token}")));
        }
        headers
    }

    async fn execute(
        &self,
        p: &Prepared<'_>,
        extra_headers: &[(String, String)],
    ) -> Result<Option<Payload>, Error> {
        let nsid = p.method.nsid.as_str();
        let request = HttpRequest {
            method: match p.method.kind {
                MethodKind::Procedure => HttpMethod::Post,
                _ => HttpMethod::Get,
            },
            url: self.method_url(nsid, &p.params)?.to_string(),
            headers: self.request_headers(nsid, p.input.as_ref(), extra_headers),
            body: p.input.as_ref().map(Payload::to_bytes),
        };
        tracing::debug!(
            nsid,
            url = %request.url,
            input = %p.input.as_ref().map(|i| match i {
                Payload::Json(v) => loggable(v).to_string(),
                other => other.describe(),
            }).unwrap_or_default(),
            "xrpc call"
        );

        let started = Instant::now();
        let resp = self.inner.transport.send(request).await?;
        TraceEvent::XrpcCall {
            nsid: nsid.to_string(),
            status: resp.status,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();

        if !resp.is_success() {
            tracing::debug!(nsid, status = resp.status, body = %String::from_utf8_lossy(&resp.body), "xrpc call failed");
            if is_session_method(nsid) {
                self.store_session(None);
            }
            return Err(error_from_response(nsid, &resp));
        }

        let mut output = decode_output(resp)?;
        let validator = &self.inner.validator;
        let checked = match output.as_mut() {
            Some(Payload::Json(v)) => validator.validate_direction(p.method, Direction::Output, Some(v)),
            Some(Payload::Binary { .. }) => Ok(()),
            None => validator.validate_direction(p.method, Direction::Output, None),
        };
        if let Err(e) = checked {
            // The held session survives a session output that fails validation.
            tracing::info!(nsid, error = %e, "output failed validation");
            return Err(e.into());
        }
        if is_session_method(nsid) {
            self.store_session(output.as_ref().and_then(Payload::as_json).and_then(Session::from_output));
        }
        Ok(output)
    }

    fn store_session(&self, session: Option<Session>) {
        match &session {
            Some(s) => tracing::debug!(did = ?s.did, "storing session"),
            None => tracing::debug!("session call failed, clearing session"),
        }
        *self.inner.session.write() = session.clone();
        if let Some(cb) = &self.inner.on_session {
            cb(session.as_ref());
        }
    }

    /// Refreshes the session unless another caller already replaced the
    /// access token `seen`.  Returns whether a retry is worthwhile.
    async fn refresh_after(&self, seen: Option<&str>) -> bool {
        let _guard = self.inner.refresh_lock.lock().await;
        let Some(current) = self.session() else {
            return false;
        };
        if current.access_jwt.as_deref() != seen {
            return true;
        }
        if current.refresh_jwt.is_none() {
            return false;
        }

        let ok = match self.prepare(REFRESH_SESSION, Map::new(), None) {
            Ok(p) => match self.execute(&p, &[]).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::info!(error = %e, "session refresh failed");
                    false
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "can't refresh session");
                false
            }
        };
        TraceEvent::SessionRefreshed {
            did: self.session().and_then(|s| s.did),
            ok,
        }
        .emit();
        ok
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Opens a subscription websocket.  Frames are decoded and their
    /// payloads validated as they arrive; an error frame ends the stream
    /// with the named error.
    pub async fn subscribe(
        &self,
        nsid: &str,
        params: Map<String, Value>,
    ) -> Result<FrameStream, Error> {
        let method = self.subscription_method(nsid)?.clone();
        let mut raw = self.subscribe_raw(nsid, params).await?;
        let validator = self.inner.validator.clone();
        let frames = async_stream::stream! {
            while let Some(bytes) = raw.next().await {
                let bytes = match bytes {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                };
                match decode_frame(&bytes) {
                    Ok(Frame::Message { t, mut payload }) => {
                        match validator.validate_message(&method, t.as_deref(), &mut payload) {
                            Ok(()) => yield Ok(Frame::Message { t, payload }),
                            Err(e) => {
                                yield Err(Error::Validation(e));
                                break;
                            }
                        }
                    }
                    Ok(Frame::Error(body)) => {
                        yield Err(body.into_error(None));
                        break;
                    }
                    Err(e) => {
                        yield Err(Error::Transport(e.to_string()));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(frames))
    }

    /// Opens a subscription websocket and yields each binary frame as
    /// received.  Parameters are still validated; frames are not decoded.
    pub async fn subscribe_raw(
        &self,
        nsid: &str,
        mut params: Map<String, Value>,
    ) -> Result<RawFrameStream, Error> {
        let method = self.subscription_method(nsid)?;
        params.retain(|_, v| !v.is_null());
        self.inner.validator.validate_params(method, &mut params)?;

        let mut url = self.method_url(nsid, &encode_params(&params))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| Error::Config(format!("can't open a websocket to {url}")))?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Transport(e.to_string()))?;
        for (name, value) in self.request_headers(nsid, None, &[]) {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) else {
                tracing::warn!(header = %name, "dropping invalid header");
                continue;
            };
            request.headers_mut().insert(name, value);
        }

        tracing::debug!(nsid, url = %url, "opening subscription");
        let (mut ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let frames = async_stream::stream! {
            while let Some(msg) = ws.next().await {
                match msg {
                    Ok(Message::Binary(bytes)) => yield Ok(bytes),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        yield Err(Error::Transport(e.to_string()));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(frames))
    }

    fn subscription_method(&self, nsid: &str) -> Result<&MethodDef, Error> {
        let method = self
            .inner
            .catalog
            .method(nsid)
            .ok_or_else(|| Error::MethodNotFound(nsid.to_string()))?;
        if method.kind != MethodKind::Subscription {
            return Err(Error::WrongMethodKind {
                nsid: nsid.to_string(),
                declared: method.kind,
                requested: MethodKind::Subscription,
            });
        }
        Ok(method)
    }
}

fn decode_output(resp: HttpResponse) -> Result<Option<Payload>, Error> {
    if resp.body.is_empty() {
        return Ok(None);
    }
    match resp.content_type {
        Some(ct) if mime_matches(JSON_CONTENT_TYPE, &ct) => {
            Ok(Some(Payload::Json(serde_json::from_slice(&resp.body)?)))
        }
        Some(ct) => Ok(Some(Payload::Binary {
            content_type: ct,
            bytes: resp.body,
        })),
        None => Ok(Some(Payload::binary("application/octet-stream", resp.body))),
    }
}

/// Maps a non-2xx response onto the error taxonomy.
pub fn error_from_response(nsid: &str, resp: &HttpResponse) -> Error {
    if let Some(body) = ErrorBody::parse(&resp.body) {
        return body.into_error(Some(resp.status));
    }
    let text = String::from_utf8_lossy(&resp.body).into_owned();
    if resp.status == 401 {
        return Error::Authentication {
            name: AUTHENTICATION_REQUIRED.into(),
            message: Some(text),
        };
    }
    Error::Transport(format!("{nsid} returned {}: {text}", resp.status))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MethodCall builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fluent form of [`Client::call`]:
/// `client.method("io.example.ping").param("message", "hi").send().await`.
#[must_use = "a MethodCall does nothing until sent"]
pub struct MethodCall<'a> {
    client: &'a Client,
    nsid: String,
    params: Map<String, Value>,
    input: Option<Payload>,
    headers: Vec<(String, String)>,
}

impl<'a> MethodCall<'a> {
    /// Sets a parameter.  A `null` value is dropped when sent.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: Map<String, Value>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn input(mut self, input: impl Into<Payload>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub async fn send(self) -> Result<Option<Payload>, Error> {
        self.client
            .call_with_headers(&self.nsid, self.params, self.input, &self.headers)
            .await
    }

    /// Sends and returns the JSON output, failing on a binary one.
    pub async fn json(self) -> Result<Option<Value>, Error> {
        match self.send().await? {
            None => Ok(None),
            Some(Payload::Json(v)) => Ok(Some(v)),
            Some(other) => Err(Error::InvalidRequest(format!(
                "expected JSON output, got {}",
                other.describe()
            ))),
        }
    }

    pub async fn subscribe(self) -> Result<FrameStream, Error> {
        self.client.subscribe(&self.nsid, self.params).await
    }

    pub async fn subscribe_raw(self) -> Result<RawFrameStream, Error> {
        self.client.subscribe_raw(&self.nsid, self.params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            content_type: Some(JSON_CONTENT_TYPE.into()),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn error_responses_map_to_taxonomy() {
        let e = error_from_response("io.example.ping", &resp(400, r#"{"error":"Unwelcome","message":"no"}"#));
        assert!(matches!(e, Error::Protocol { ref name, status: Some(400), .. } if name == "Unwelcome"));

        let e = error_from_response("io.example.ping", &resp(400, r#"{"error":"ExpiredToken"}"#));
        assert!(e.is_authentication());

        let e = error_from_response("io.example.ping", &resp(401, "nope"));
        assert_eq!(e.wire_name(), Some(AUTHENTICATION_REQUIRED));

        let e = error_from_response("io.example.ping", &resp(502, "bad gateway"));
        assert!(matches!(e, Error::Transport(_)));
    }

    #[test]
    fn output_decoding_follows_content_type() {
        assert_eq!(decode_output(resp(200, "")).unwrap(), None);
        assert_eq!(
            decode_output(resp(200, r#"{"a":1}"#)).unwrap(),
            Some(Payload::Json(serde_json::json!({"a": 1})))
        );
        let png = HttpResponse {
            status: 200,
            content_type: Some("image/png".into()),
            body: vec![1, 2],
        };
        assert_eq!(decode_output(png).unwrap(), Some(Payload::binary("image/png", vec![1, 2])));
    }
}
