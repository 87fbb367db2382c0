//! The methods this node serves: `io.example.ping` answers with the message
//! and the server time, `io.example.count` streams increasing numbers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use xr_domain::SchemaLoadError;
use xr_lexicon::Catalog;
use xr_protocol::{Frame, Payload};
use xr_server::{handler_fn, subscription_fn, HandlerError, Registry, RegistrationError};

pub const PING: &str = "io.example.ping";
pub const COUNT: &str = "io.example.count";

/// Delay between frames of an open-ended count.
const COUNT_TICK: Duration = Duration::from_millis(250);

fn ping_lexicon() -> Value {
    json!({
        "lexicon": 1,
        "id": PING,
        "defs": {"main": {
            "type": "query",
            "description": "Echo a message back with the server time.",
            "parameters": {"type": "params", "required": ["message"], "properties": {
                "message": {"type": "string", "maxLength": 256},
            }},
            "output": {"encoding": "application/json", "schema": {
                "type": "object",
                "required": ["message", "time"],
                "properties": {
                    "message": {"type": "string"},
                    "time": {"type": "string", "format": "datetime"},
                },
            }},
            "errors": [{"name": "Unwelcome"}],
        }},
    })
}

fn count_lexicon() -> Value {
    json!({
        "lexicon": 1,
        "id": COUNT,
        "defs": {"main": {
            "type": "subscription",
            "description": "Stream numbers from start (inclusive) to end (exclusive).",
            "parameters": {"type": "params", "properties": {
                "start": {"type": "integer", "minimum": 0},
                "end": {"type": "integer", "minimum": 0},
            }},
            "message": {"schema": {
                "type": "object",
                "required": ["num"],
                "properties": {"num": {"type": "integer"}},
            }},
        }},
    })
}

/// The node's own lexicons, the bundled ones, and anything under `extra`.
pub fn catalog(extra: &[PathBuf]) -> Result<Catalog, SchemaLoadError> {
    let mut builder = Catalog::builder().json(ping_lexicon()).json(count_lexicon());
    for path in extra {
        builder = builder.load_path(path);
    }
    builder.with_bundled().build()
}

pub fn registry(catalog: Arc<Catalog>) -> Result<Registry, RegistrationError> {
    let mut reg = Registry::new(catalog);

    reg.register(
        PING,
        handler_fn(|ctx, params: Map<String, Value>, _input| async move {
            let message = params
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if message.eq_ignore_ascii_case("go away") {
                return Err(HandlerError::named("Unwelcome", "rude"));
            }
            tracing::debug!(request_id = %ctx.request_id, %message, "ping");
            Ok(Some(Payload::Json(json!({
                "message": message,
                "time": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            }))))
        }),
    )?;

    reg.register_subscription(
        COUNT,
        subscription_fn(|_ctx, params: Map<String, Value>| {
            let start = params.get("start").and_then(Value::as_i64).unwrap_or(0);
            let end = params.get("end").and_then(Value::as_i64);
            async_stream::stream! {
                let mut n = start;
                while end.map_or(true, |end| n < end) {
                    yield Ok::<_, HandlerError>(Frame::message(json!({"num": n})));
                    n += 1;
                    if end.is_none() {
                        tokio::time::sleep(COUNT_TICK).await;
                    }
                }
            }
        }),
    )?;

    Ok(reg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xr_domain::config::Config;
    use xr_domain::MethodKind;
    use xr_server::{Dispatcher, InboundCall};

    fn dispatcher() -> Dispatcher {
        let catalog = Arc::new(catalog(&[]).unwrap());
        Dispatcher::new(Arc::new(registry(catalog).unwrap()), &Config::default())
    }

    #[test]
    fn catalog_includes_bundled_session_methods() {
        let catalog = catalog(&[]).unwrap();
        assert!(catalog.method(PING).is_some());
        assert!(catalog.method(COUNT).is_some());
        assert!(catalog.method("com.atproto.server.createSession").is_some());
    }

    #[tokio::test]
    async fn ping_answers_with_message_and_time() {
        let mut call = InboundCall::new(PING, MethodKind::Query);
        call.raw_params = vec![("message".into(), "hello".into())];
        let out = dispatcher().handle(call).await;
        assert_eq!(out.status, 200);
        let body: Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(body["message"], "hello");
        assert!(body["time"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn ping_requires_a_message() {
        let out = dispatcher().handle(InboundCall::new(PING, MethodKind::Query)).await;
        assert_eq!(out.status, 400);

        let mut call = InboundCall::new(PING, MethodKind::Query);
        call.raw_params = vec![("message".into(), "Go away".into())];
        let out = dispatcher().handle(call).await;
        assert_eq!(out.status, 400);
        let body: Value = serde_json::from_slice(&out.body).unwrap();
        assert_eq!(body["error"], "Unwelcome");
    }
}
