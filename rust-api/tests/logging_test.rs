//! Request logging: one structured record per request.

use std::io;
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, Layer};

use lyftr::web::{compute_signature, SIGNATURE_HEADER};
use lyftr::{router, AppState, Config, Metrics, SqliteStore};

const SECRET: &str = "testsecret";

/// Shared in-memory sink for the JSON formatter.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn records(&self) -> Vec<Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

fn app() -> Router {
    let config = Config::from_lookup(|name| match name {
        "WEBHOOK_SECRET" => Some(SECRET.to_string()),
        "DATABASE_URL" => Some("sqlite::memory:".to_string()),
        _ => None,
    })
    .unwrap();
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    router(AppState::new(config, store, Metrics::new().unwrap()))
}

async fn post(app: &Router, body: &str, signature: &str) -> StatusCode {
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn each_webhook_request_logs_one_record() {
    // Built before the subscriber so store setup is not captured.
    let app = app();

    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::registry().with(
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(move || writer.clone())
            .with_filter(LevelFilter::INFO),
    );
    let _guard = tracing::subscriber::set_default(subscriber);

    let valid = r#"{"message_id":"m1","from_msisdn":"+1555","ts":"2024-01-01T00:00:00Z","text":"hi"}"#;
    let invalid = r#"{"message_id":"m2","from_msisdn":"555","ts":"2024-01-01T00:00:00Z","text":"hi"}"#;
    let sign = |body: &str| compute_signature(SECRET, body.as_bytes());

    assert_eq!(post(&app, valid, &sign(valid)).await, StatusCode::CREATED);
    assert_eq!(post(&app, valid, &sign(valid)).await, StatusCode::OK);
    assert_eq!(post(&app, valid, "deadbeef").await, StatusCode::UNAUTHORIZED);
    assert_eq!(
        post(&app, invalid, &sign(invalid)).await,
        StatusCode::UNPROCESSABLE_ENTITY
    );

    let records = capture.records();
    assert_eq!(records.len(), 4, "{:#?}", records);
    for record in &records {
        assert_eq!(record["message"], "webhook_request");
        assert_eq!(record["path"], "/webhook");
        assert_eq!(record["method"], "POST");
        assert!(record["request_id"].is_string());
        assert!(record["latency_ms"].is_u64());
    }

    assert_eq!(records[0]["result"], "created");
    assert_eq!(records[0]["dup"], false);
    assert_eq!(records[0]["message_id"], "m1");
    assert_eq!(records[0]["status"], 201);
    assert!(records[0].get("error").is_none());

    assert_eq!(records[1]["result"], "duplicate");
    assert_eq!(records[1]["dup"], true);
    assert_eq!(records[1]["message_id"], "m1");
    assert_eq!(records[1]["status"], 200);

    assert_eq!(records[2]["result"], "invalid_signature");
    assert_eq!(records[2]["dup"], false);
    assert!(records[2].get("message_id").is_none());
    assert_eq!(records[2]["error"], "invalid_signature");

    assert_eq!(records[3]["result"], "validation_error");
    assert_eq!(records[3]["message_id"], "m2");
    assert_eq!(records[3]["error"], "validation_error");
    assert!(records[3]["reason"].as_str().unwrap().contains("from_msisdn"));
}
