//! The client talking to a real in-process server.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use xr_client::Client;
use xr_domain::config::Config;
use xr_domain::Error;
use xr_lexicon::Catalog;
use xr_protocol::{decode_frame, Frame, Payload};
use xr_server::{handler_fn, subscription_fn, Dispatcher, HandlerError, Registry, XrpcServer};

fn catalog() -> Arc<Catalog> {
    Arc::new(
        Catalog::builder()
            .json(json!({
                "lexicon": 1,
                "id": "io.example.ping",
                "defs": {"main": {
                    "type": "query",
                    "parameters": {"type": "params", "properties": {
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
                "id": "io.example.count",
                "defs": {"main": {
                    "type": "subscription",
                    "parameters": {"type": "params", "required": ["end"], "properties": {
                        "start": {"type": "integer"},
                        "end": {"type": "integer"},
                    }},
                    "message": {"schema": {
                        "type": "object", "required": ["num"],
                        "properties": {"num": {"type": "integer"}},
                    }},
                }},
            }))
            .build()
            .unwrap(),
    )
}

async fn start() -> String {
    let mut reg = Registry::new(catalog());
    reg.register(
        "io.example.ping",
        handler_fn(|_ctx, params: Map<String, Value>, _input| async move {
            match params.get("message").and_then(Value::as_str) {
                Some("boom") => Err(HandlerError::named("Unwelcome", "not that")),
                m => Ok(Some(Payload::Json(json!({"message": m.unwrap_or("pong")})))),
            }
        }),
    )
    .unwrap();
    reg.register_subscription(
        "io.example.count",
        subscription_fn(|_ctx, params: Map<String, Value>| {
            let start = params.get("start").and_then(Value::as_i64).unwrap_or(0);
            let end = params.get("end").and_then(Value::as_i64).unwrap_or(0);
            async_stream::stream! {
                for n in start..end {
                    yield Ok::<_, HandlerError>(Frame::message(json!({"num": n})));
                }
            }
        }),
    )
    .unwrap();

    let config = Config::default();
    let server = XrpcServer::new(Dispatcher::new(Arc::new(reg), &config), config.server.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener, std::future::pending()));
    format!("http://{addr}")
}

fn client(base: &str) -> Client {
    Client::builder().base_url(base).catalog(catalog()).build().unwrap()
}

#[tokio::test]
async fn query_round_trip() {
    let c = client(&start().await);
    let out = c.method("io.example.ping").param("message", "hi").json().await.unwrap();
    assert_eq!(out, Some(json!({"message": "hi"})));

    let err = c.method("io.example.ping").param("message", "boom").send().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol { ref name, ref message, status: Some(400) }
            if name == "Unwelcome" && message.as_deref() == Some("not that")
    ));
}

#[tokio::test]
async fn subscription_yields_validated_frames() {
    let c = client(&start().await);
    let frames: Vec<_> = c
        .method("io.example.count")
        .param("start", 1)
        .param("end", 4)
        .subscribe()
        .await
        .unwrap()
        .collect()
        .await;
    let nums: Vec<_> = frames
        .into_iter()
        .map(|f| match f.unwrap() {
            Frame::Message { payload, .. } => payload["num"].clone(),
            other => panic!("unexpected frame {other:?}"),
        })
        .collect();
    assert_eq!(nums, vec![json!(1), json!(2), json!(3)]);
}

#[tokio::test]
async fn raw_subscription_yields_undecoded_frames() {
    let c = client(&start().await);
    let frames: Vec<Vec<u8>> = c
        .method("io.example.count")
        .param("start", 1)
        .param("end", 4)
        .subscribe_raw()
        .await
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(frames.len(), 3);
    let nums: Vec<_> = frames
        .iter()
        .map(|bytes| match decode_frame(bytes).unwrap() {
            Frame::Message { payload, .. } => payload["num"].clone(),
            other => panic!("unexpected frame {other:?}"),
        })
        .collect();
    assert_eq!(nums, vec![json!(1), json!(2), json!(3)]);

    let err = c.method("io.example.count").subscribe_raw().await.err().unwrap();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn subscription_params_are_checked_locally() {
    let c = client(&start().await);
    let err = c.method("io.example.count").subscribe().await.err().unwrap();
    assert!(matches!(err, Error::Validation(_)));

    let err = c.method("io.example.ping").subscribe().await.err().unwrap();
    assert!(matches!(err, Error::WrongMethodKind { .. }));
}
