//! End-to-end tests against an in-process server on an ephemeral port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use xr_domain::config::Config;
use xr_lexicon::Catalog;
use xr_protocol::{decode_frame, Frame, Payload};
use xr_server::{
    handler_fn, subscription_fn, CallContext, Dispatcher, HandlerError, Registry, XrpcServer,
};

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn catalog() -> Arc<Catalog> {
    Arc::new(
        Catalog::builder()
            .json(json!({
                "lexicon": 1,
                "id": "io.example.ping",
                "defs": {"main": {
                    "type": "query",
                    "parameters": {"type": "params", "required": ["message"], "properties": {
                        "message": {"type": "string"},
                    }},
                    "output": {"encoding": "application/json", "schema": {
                        "type": "object", "required": ["message"],
                        "properties": {"message": {"type": "string"}},
                    }},
                    "errors": [{"name": "Unwelcome"}],
                }},
            }))
            .json(json!({
                "lexicon": 1,
                "id": "io.example.echo",
                "defs": {"main": {
                    "type": "procedure",
                    "input": {"encoding": "application/json", "schema": {
                        "type": "object", "required": ["text"],
                        "properties": {"text": {"type": "string", "maxLength": 10}},
                    }},
                    "output": {"encoding": "application/json"},
                }},
            }))
            .json(json!({
                "lexicon": 1,
                "id": "io.example.count",
                "defs": {"main": {
                    "type": "subscription",
                    "parameters": {"type": "params", "properties": {
                        "start": {"type": "integer"},
                        "end": {"type": "integer"},
                    }},
                    "message": {"schema": {
                        "type": "object", "required": ["num"],
                        "properties": {"num": {"type": "integer"}},
                    }},
                }},
            }))
            .json(json!({
                "lexicon": 1,
                "id": "io.example.unbound",
                "defs": {"main": {"type": "query"}},
            }))
            .build()
            .unwrap(),
    )
}

fn int(params: &Map<String, Value>, name: &str, default: i64) -> i64 {
    params.get(name).and_then(Value::as_i64).unwrap_or(default)
}

/// Starts a server and returns its address plus a flag set when the count
/// producer is dropped.
async fn start() -> (String, Arc<AtomicBool>) {
    let dropped = Arc::new(AtomicBool::new(false));
    let mut reg = Registry::new(catalog());
    reg.register(
        "io.example.ping",
        handler_fn(|_ctx: CallContext, params: Map<String, Value>, _input| async move {
            match params.get("message").and_then(Value::as_str) {
                Some("boom") => Err(HandlerError::named("Unwelcome", "not that")),
                Some("bad") => Ok(Some(Payload::Json(json!({"message": 42})))),
                Some(m) => Ok(Some(Payload::Json(json!({"message": m})))),
                None => Ok(None),
            }
        }),
    )
    .unwrap();
    reg.register(
        "io.example.echo",
        handler_fn(|_ctx, _params, input: Option<Payload>| async move { Ok(input) }),
    )
    .unwrap();

    let flag = dropped.clone();
    reg.register_subscription(
        "io.example.count",
        subscription_fn(move |_ctx, params: Map<String, Value>| {
            let guard = SetOnDrop(flag.clone());
            let start = int(&params, "start", 0);
            let end = int(&params, "end", i64::MAX);
            async_stream::stream! {
                let _guard = guard;
                let mut n = start;
                while n < end {
                    if n == 13 {
                        yield Ok::<_, HandlerError>(Frame::message(json!({"num": "thirteen"})));
                    } else {
                        yield Ok(Frame::message(json!({"num": n})));
                    }
                    n += 1;
                    if end == i64::MAX {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                }
            }
        }),
    )
    .unwrap();

    let config = Config::default();
    let dispatcher = Dispatcher::new(Arc::new(reg), &config);
    let server = XrpcServer::new(dispatcher, config.server.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.serve(listener, std::future::pending()));
    (addr, dropped)
}

#[tokio::test]
async fn query_round_trip_and_status_mapping() {
    let (addr, _) = start().await;
    let http = reqwest::Client::new();
    let url = |rest: &str| format!("http://{addr}/xrpc/{rest}");

    let ok = http.get(url("io.example.ping?message=hello%20world")).send().await.unwrap();
    assert_eq!(ok.status(), 200);
    assert_eq!(ok.json::<Value>().await.unwrap(), json!({"message": "hello world"}));

    let missing = http.get(url("io.example.ping")).send().await.unwrap();
    assert_eq!(missing.status(), 400);
    assert_eq!(missing.json::<Value>().await.unwrap()["error"], "InvalidRequest");

    let named = http.get(url("io.example.ping?message=boom")).send().await.unwrap();
    assert_eq!(named.status(), 400);
    assert_eq!(
        named.json::<Value>().await.unwrap(),
        json!({"error": "Unwelcome", "message": "not that"})
    );

    let bad = http.get(url("io.example.ping?message=bad")).send().await.unwrap();
    assert_eq!(bad.status(), 500);
    assert_eq!(bad.json::<Value>().await.unwrap(), json!({"error": "InternalServerError"}));

    let unbound = http.get(url("io.example.unbound")).send().await.unwrap();
    assert_eq!(unbound.status(), 501);
    assert_eq!(unbound.json::<Value>().await.unwrap()["error"], "MethodNotImplemented");

    let unknown = http.get(url("io.example.nowhere")).send().await.unwrap();
    assert_eq!(unknown.status(), 501);

    let wrong_kind = http.post(url("io.example.ping?message=x")).send().await.unwrap();
    assert_eq!(wrong_kind.status(), 501);

    let subscription = http.get(url("io.example.count")).send().await.unwrap();
    assert_eq!(subscription.status(), 405);

    let options = http
        .request(reqwest::Method::OPTIONS, url("io.example.ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(options.status(), 200);
}

#[tokio::test]
async fn procedure_validates_input() {
    let (addr, _) = start().await;
    let http = reqwest::Client::new();
    let url = format!("http://{addr}/xrpc/io.example.echo");

    let ok = http.post(&url).json(&json!({"text": "hi"})).send().await.unwrap();
    assert_eq!(ok.status(), 200);
    assert_eq!(ok.json::<Value>().await.unwrap(), json!({"text": "hi"}));

    let too_long = http
        .post(&url)
        .json(&json!({"text": "this is far too long"}))
        .send()
        .await
        .unwrap();
    assert_eq!(too_long.status(), 400);
    let body = too_long.json::<Value>().await.unwrap();
    assert_eq!(body["error"], "InvalidRequest");
    assert!(body["message"].as_str().unwrap().contains("input.text"));
}

async fn collect_frames(url: &str) -> Vec<Frame> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let mut frames = Vec::new();
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Binary(bytes) => frames.push(decode_frame(&bytes).unwrap()),
            Message::Close(_) => break,
            _ => {}
        }
    }
    frames
}

#[tokio::test]
async fn subscription_delivers_frames_then_closes() {
    let (addr, _) = start().await;
    let frames = collect_frames(&format!("ws://{addr}/xrpc/io.example.count?start=1&end=4")).await;
    assert_eq!(
        frames,
        vec![
            Frame::message(json!({"num": 1})),
            Frame::message(json!({"num": 2})),
            Frame::message(json!({"num": 3})),
        ]
    );
}

#[tokio::test]
async fn invalid_payload_ends_stream_with_error_frame() {
    let (addr, _) = start().await;
    let frames = collect_frames(&format!("ws://{addr}/xrpc/io.example.count?start=12&end=20")).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], Frame::message(json!({"num": 12})));
    assert!(matches!(&frames[1], Frame::Error(b) if b.error == "InternalServerError"));
}

#[tokio::test]
async fn bad_subscription_params_send_an_error_frame() {
    let (addr, _) = start().await;
    let frames = collect_frames(&format!("ws://{addr}/xrpc/io.example.count?start=one")).await;
    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], Frame::Error(b) if b.error == "InvalidRequest"));
}

#[tokio::test]
async fn client_close_stops_the_producer() {
    let (addr, dropped) = start().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/xrpc/io.example.count"))
        .await
        .unwrap();
    for _ in 0..2 {
        match ws.next().await {
            Some(Ok(Message::Binary(_))) => {}
            other => panic!("expected a frame, got {other:?}"),
        }
    }
    ws.close(None).await.unwrap();
    drop(ws);

    for _ in 0..200 {
        if dropped.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("producer still running after the client closed");
}
