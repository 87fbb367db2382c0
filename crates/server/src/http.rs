//! axum adapter: serves every registered method under `/xrpc/:nsid`.
//!
//! - `GET` runs a query, or upgrades to a websocket for a subscription.
//! - `POST` runs a procedure.
//! - `OPTIONS` answers 200; CORS is wide open.
//!
//! A plain `GET` on a subscription is `405`.

use std::collections::BTreeMap;
use std::future::Future;

use axum::body::{Body, Bytes};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{DefaultBodyLimit, Path, Query, State, WebSocketUpgrade};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use xr_domain::config::ServerConfig;
use xr_domain::{Error, MethodKind, Nsid};
use xr_lexicon::decode_params;
use xr_protocol::{ErrorBody, INVALID_REQUEST};

use crate::dispatch::{error_response, Dispatcher, InboundCall, OutboundResult};
use crate::handler::CallContext;
use crate::subscription::{error_frame_bytes, FrameSink, FrameSource, Subscription};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct XrpcServer {
    dispatcher: Dispatcher,
    config: ServerConfig,
    /// Parent of every subscription's cancellation token.
    shutdown: CancellationToken,
}

impl XrpcServer {
    pub fn new(dispatcher: Dispatcher, config: ServerConfig) -> Self {
        Self {
            dispatcher,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/xrpc/:nsid",
                get(get_xrpc).post(post_xrpc).options(options_xrpc),
            )
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    /// Serves until `shutdown` resolves, then cancels open subscriptions.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, methods = self.dispatcher.registry().bound().len(), "xrpc server listening");
        }
        let token = self.shutdown.clone();
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                token.cancel();
            })
            .await
    }

    async fn open(
        &self,
        nsid: &str,
        raw_params: &[(String, String)],
        headers: BTreeMap<String, String>,
    ) -> Result<Subscription, ErrorBody> {
        let failed = |e: Error| error_response(&e).1;

        let nsid = Nsid::new(nsid).map_err(|e| failed(Error::InvalidRequest(e.to_string())))?;
        let method = self
            .dispatcher
            .registry()
            .catalog()
            .method(nsid.as_str())
            .ok_or_else(|| failed(Error::MethodNotFound(nsid.to_string())))?;
        let params = decode_params(method, raw_params)
            .map_err(|e| failed(Error::InvalidRequest(e.to_string())))?;

        let mut ctx = CallContext::new(nsid, MethodKind::Subscription);
        ctx.headers = headers;
        ctx.cancel = self.shutdown.child_token();
        self.dispatcher
            .open(ctx, params)
            .await
            .map_err(|f| failed(f.error))
    }

    async fn stream(
        self,
        socket: WebSocket,
        nsid: String,
        raw_params: Vec<(String, String)>,
        headers: BTreeMap<String, String>,
    ) {
        let (sink, stream) = socket.split();
        let mut sink = WsSink(sink);
        let source = WsSource(stream);
        match self.open(&nsid, &raw_params, headers).await {
            Ok(sub) => {
                let closed = sub.run(sink, source).await;
                tracing::debug!(nsid = %nsid, frames = closed.frames_sent, reason = closed.reason.as_str(), "websocket finished");
            }
            Err(body) => {
                if let Err(e) = sink.send(error_frame_bytes(body)).await {
                    tracing::debug!(nsid = %nsid, error = %e, "couldn't send open error");
                }
                sink.close().await;
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /xrpc/:nsid: a query, or a websocket upgrade for a subscription.
async fn get_xrpc(
    State(server): State<XrpcServer>,
    Path(nsid): Path<String>,
    Query(raw_params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let is_subscription = server
        .dispatcher
        .registry()
        .catalog()
        .method(&nsid)
        .is_some_and(|m| m.kind == MethodKind::Subscription);
    if !is_subscription {
        return dispatch(&server, nsid, MethodKind::Query, raw_params, headers, None).await;
    }

    let Some(ws) = ws else {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(ErrorBody::new(
                INVALID_REQUEST,
                format!("{nsid} is a subscription; connect with a websocket"),
            )),
        )
            .into_response();
    };
    let headers = header_map(&headers);
    ws.on_upgrade(move |socket| server.stream(socket, nsid, raw_params, headers))
        .into_response()
}

/// POST /xrpc/:nsid: a procedure.
async fn post_xrpc(
    State(server): State<XrpcServer>,
    Path(nsid): Path<String>,
    Query(raw_params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(&server, nsid, MethodKind::Procedure, raw_params, headers, Some(body)).await
}

async fn options_xrpc() -> StatusCode {
    StatusCode::OK
}

async fn dispatch(
    server: &XrpcServer,
    nsid: String,
    access: MethodKind,
    raw_params: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Bytes>,
) -> Response {
    let call = InboundCall {
        nsid,
        access,
        raw_params,
        body: body.map(|b| b.to_vec()),
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        headers: header_map(&headers),
    };
    into_response(server.dispatcher.handle(call).await)
}

// ── Helpers ──────────────────────────────────────────────────────────

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn into_response(out: OutboundResult) -> Response {
    let status = StatusCode::from_u16(out.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = HeaderMap::new();
    if let Some(ct) = out.content_type.as_deref().and_then(|ct| HeaderValue::from_str(ct).ok()) {
        headers.insert(CONTENT_TYPE, ct);
    }
    for (name, value) in out.headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "dropping invalid response header"),
        }
    }
    (status, headers, Body::from(out.body)).into_response()
}

// ── Websocket transport ──────────────────────────────────────────────

struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait::async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), Error> {
        self.0
            .send(Message::Binary(frame))
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.send(Message::Close(None)).await;
        let _ = self.0.close().await;
    }
}

struct WsSource(SplitStream<WebSocket>);

#[async_trait::async_trait]
impl FrameSource for WsSource {
    async fn receive(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Binary(bytes))) => return Some(bytes),
                Some(Ok(Message::Text(text))) => return Some(text.into_bytes()),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                // axum answers pings itself
                Some(Ok(_)) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_headers_are_carried() {
        let resp = into_response(OutboundResult {
            status: 302,
            body: Vec::new(),
            content_type: None,
            headers: vec![
                ("Location".into(), "https://example.com/".into()),
                ("bad header".into(), "x".into()),
            ],
        });
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()["location"], "https://example.com/");
        assert_eq!(resp.headers().len(), 1);
    }

    #[test]
    fn header_names_are_lowercased() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(b"X-Custom").unwrap(),
            HeaderValue::from_static("1"),
        );
        assert_eq!(header_map(&headers).get("x-custom").map(String::as_str), Some("1"));
    }
}
