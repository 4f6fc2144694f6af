//! Webhook tests: SSRF gating at registration, signed delivery to a local
//! receiver, per-attempt logging, and graceful shutdown semantics.
//!
//! Delivery tests insert subscriptions through the store directly; the SSRF
//! filter is a registration-time gate, so loopback URLs are fine for an
//! in-process receiver.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use vibe_mcp::config::Config;
use vibe_mcp::error::Error;
use vibe_mcp::indexer::Indexer;
use vibe_mcp::store::IndexStore;
use vibe_mcp::webhooks::{sign_payload, verify_signature, WebhookDispatcher};
use vibe_mcp::writer::Writer;

const SECRET: &str = "0123456789abcdef0123456789abcdef";

type Received = Arc<Mutex<Vec<(HeaderMap, Vec<u8>)>>>;

/// A local HTTP receiver capturing every request; responds with `status`.
async fn start_receiver(status: StatusCode) -> (SocketAddr, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));

    async fn capture(
        State((received, status)): State<(Received, StatusCode)>,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        received.lock().unwrap().push((headers, body.to_vec()));
        status
    }

    let app = Router::new()
        .route("/hook", post(capture))
        .with_state((Arc::clone(&received), status));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, received)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met within 5s");
}

/// Poll the delivery log until `n` rows exist for the subscription.
async fn wait_for_logs(
    store: &IndexStore,
    subscription_id: i64,
    n: usize,
) -> Vec<vibe_mcp::store::DeliveryLogRow> {
    for _ in 0..100 {
        let logs = store.delivery_logs(subscription_id).await.unwrap();
        if logs.len() >= n {
            return logs;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("delivery log rows not written within 5s");
}

async fn open_store() -> (TempDir, Arc<IndexStore>) {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(IndexStore::open(&tmp.path().join("index.db")).await.unwrap());
    (tmp, store)
}

#[tokio::test]
async fn registration_rejects_unsafe_urls() {
    let (_tmp, store) = open_store().await;
    let dispatcher = WebhookDispatcher::new(store).unwrap();
    let events = vec!["task.created".to_string()];

    for url in [
        "http://localhost:9000/in",
        "http://127.0.0.1:9000/in",
        "http://0.0.0.0/in",
        "http://[::1]/in",
        "http://10.1.2.3/in",
        "http://169.254.169.254/latest/meta-data",
        "ftp://example.com/in",
    ] {
        let result = dispatcher.register(url, SECRET, &events, None, None).await;
        assert!(matches!(result, Err(Error::Unsafe(_))), "url: {}", url);
    }
}

#[tokio::test]
async fn registration_validates_secret_and_event_types() {
    let (_tmp, store) = open_store().await;
    let dispatcher = WebhookDispatcher::new(store).unwrap();
    let url = "http://93.184.216.34/in";

    assert!(matches!(
        dispatcher
            .register(url, "xxxxxxxxxx", &["task.created".to_string()], None, None)
            .await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        dispatcher.register(url, SECRET, &[], None, None).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        dispatcher
            .register(url, SECRET, &["task.exploded".to_string()], None, None)
            .await,
        Err(Error::InvalidArgument(_))
    ));

    let ok = dispatcher
        .register(url, SECRET, &["*".to_string()], Some("demo"), None)
        .await
        .unwrap();
    assert!(ok.subscription_id > 0);
}

#[tokio::test]
async fn per_project_subscription_cap_is_enforced() {
    let (_tmp, store) = open_store().await;
    let dispatcher = WebhookDispatcher::new(store).unwrap();
    let events = vec!["*".to_string()];

    for i in 0..50 {
        dispatcher
            .register(
                &format!("http://93.184.216.34/hook/{}", i),
                SECRET,
                &events,
                Some("demo"),
                None,
            )
            .await
            .unwrap();
    }

    let result = dispatcher
        .register("http://93.184.216.34/hook/50", SECRET, &events, Some("demo"), None)
        .await;
    assert!(matches!(result, Err(Error::LimitExceeded(_))));

    // A different project is unaffected.
    dispatcher
        .register("http://93.184.216.34/other", SECRET, &events, Some("other"), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn listing_never_exposes_secrets() {
    let (_tmp, store) = open_store().await;
    let dispatcher = WebhookDispatcher::new(store).unwrap();
    dispatcher
        .register(
            "http://93.184.216.34/in",
            SECRET,
            &["task.created".to_string()],
            None,
            Some("ci hook"),
        )
        .await
        .unwrap();

    let listed = dispatcher.list(None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].description.as_deref(), Some("ci hook"));

    let as_json = serde_json::to_value(&listed[0]).unwrap();
    assert!(as_json.get("secret").is_none());
    assert!(!as_json.to_string().contains(SECRET));
}

#[tokio::test]
async fn unregister_unknown_subscription_is_not_found() {
    let (_tmp, store) = open_store().await;
    let dispatcher = WebhookDispatcher::new(store).unwrap();
    assert!(matches!(
        dispatcher.unregister(4242).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn delivery_is_signed_and_logged() {
    let (addr, received) = start_receiver(StatusCode::OK).await;
    let (_tmp, store) = open_store().await;
    let dispatcher = WebhookDispatcher::new(Arc::clone(&store)).unwrap();

    let sub_id = store
        .create_subscription(
            &format!("http://{}/hook", addr),
            SECRET,
            &["task.created".to_string()],
            Some("demo"),
            None,
        )
        .await
        .unwrap();

    dispatcher
        .fire_event(
            "task.created",
            Some("demo"),
            serde_json::json!({ "task_number": 1, "title": "New Task" }),
        )
        .await;

    wait_until(|| !received.lock().unwrap().is_empty()).await;
    let (headers, body) = received.lock().unwrap()[0].clone();

    // The body is the canonical payload and the signature covers its bytes.
    let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["event_type"], "task.created");
    assert_eq!(payload["project"], "demo");
    assert_eq!(payload["data"]["task_number"], 1);
    assert!(payload["timestamp"].as_str().unwrap().ends_with('Z'));
    let event_id = payload["event_id"].as_str().unwrap().to_string();
    assert_eq!(event_id.len(), 36);

    assert_eq!(headers.get("X-Vibe-Event").unwrap(), "task.created");
    assert_eq!(headers.get("X-Vibe-Event-ID").unwrap(), event_id.as_str());

    let signature = headers
        .get("X-Vibe-Signature")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(signature, format!("sha256={}", sign_payload(SECRET, &body)));
    assert!(verify_signature(SECRET, &body, &signature));
    assert!(!verify_signature("wrong-secret-wrong-secret-wrong!", &body, &signature));

    let logs = wait_for_logs(&store, sub_id, 1).await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].success);
    assert_eq!(logs[0].status_code, Some(200));
    assert_eq!(logs[0].event_id, event_id);
    assert_eq!(logs[0].payload.as_bytes(), &body[..]);
    assert!(logs[0].error_message.is_none());
}

#[tokio::test]
async fn failed_delivery_is_logged_with_status() {
    let (addr, received) = start_receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
    let (_tmp, store) = open_store().await;
    let dispatcher = WebhookDispatcher::new(Arc::clone(&store)).unwrap();

    let sub_id = store
        .create_subscription(
            &format!("http://{}/hook", addr),
            SECRET,
            &["*".to_string()],
            None,
            None,
        )
        .await
        .unwrap();

    dispatcher
        .fire_event("doc.updated", Some("demo"), serde_json::json!({}))
        .await;

    wait_until(|| !received.lock().unwrap().is_empty()).await;

    let logs = wait_for_logs(&store, sub_id, 1).await;
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].success);
    assert_eq!(logs[0].status_code, Some(500));
    assert!(logs[0].error_message.as_deref().unwrap().contains("HTTP 500"));
}

#[tokio::test]
async fn events_respect_type_and_project_scoping() {
    let (addr, received) = start_receiver(StatusCode::OK).await;
    let (_tmp, store) = open_store().await;
    let dispatcher = WebhookDispatcher::new(Arc::clone(&store)).unwrap();

    // Wildcard, all projects: matches.
    let wildcard = store
        .create_subscription(&format!("http://{}/hook", addr), SECRET, &["*".to_string()], None, None)
        .await
        .unwrap();
    // Right type, wrong project: no match.
    let wrong_project = store
        .create_subscription(
            &format!("http://{}/hook", addr),
            SECRET,
            &["task.created".to_string()],
            Some("other"),
            None,
        )
        .await
        .unwrap();
    // Right project, wrong type: no match.
    let wrong_type = store
        .create_subscription(
            &format!("http://{}/hook", addr),
            SECRET,
            &["doc.created".to_string()],
            Some("demo"),
            None,
        )
        .await
        .unwrap();

    dispatcher
        .fire_event("task.created", Some("demo"), serde_json::json!({}))
        .await;

    wait_until(|| !received.lock().unwrap().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(received.lock().unwrap().len(), 1);

    assert_eq!(store.delivery_logs(wildcard).await.unwrap().len(), 1);
    assert!(store.delivery_logs(wrong_project).await.unwrap().is_empty());
    assert!(store.delivery_logs(wrong_type).await.unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_makes_fire_a_no_op() {
    let (addr, received) = start_receiver(StatusCode::OK).await;
    let (_tmp, store) = open_store().await;
    let dispatcher = WebhookDispatcher::new(Arc::clone(&store)).unwrap();

    store
        .create_subscription(&format!("http://{}/hook", addr), SECRET, &["*".to_string()], None, None)
        .await
        .unwrap();

    dispatcher.shutdown(Duration::from_secs(1)).await;

    dispatcher
        .fire_event("task.created", Some("demo"), serde_json::json!({}))
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(received.lock().unwrap().is_empty());

    // A second shutdown is harmless.
    dispatcher.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn write_path_fires_events_end_to_end() {
    let (addr, received) = start_receiver(StatusCode::OK).await;

    let tmp = TempDir::new().unwrap();
    let config = Arc::new(Config::for_root(tmp.path().join("workspace")));
    let store = Arc::new(IndexStore::open(&config.db_path).await.unwrap());
    let indexer = Arc::new(Indexer::new(config.root.clone(), Arc::clone(&store)));
    let dispatcher = WebhookDispatcher::new(Arc::clone(&store)).unwrap();
    let writer = Writer::new(Arc::clone(&config), indexer, Some(Arc::clone(&dispatcher)));

    let sub_id = store
        .create_subscription(
            &format!("http://{}/hook", addr),
            SECRET,
            &["task.created".to_string(), "task.updated".to_string()],
            Some("demo"),
            None,
        )
        .await
        .unwrap();

    writer
        .create_task("demo", "Notify me", "O", &[], None)
        .await
        .unwrap();
    writer
        .update_task_status("demo", "001-notify-me.md", "done")
        .await
        .unwrap();

    wait_until(|| received.lock().unwrap().len() >= 2).await;

    let logs = wait_for_logs(&store, sub_id, 2).await;
    let types: Vec<&str> = logs.iter().map(|l| l.event_type.as_str()).collect();
    assert!(types.contains(&"task.created"));
    assert!(types.contains(&"task.updated"));
    assert!(logs.iter().all(|l| l.success));

    let updated = logs.iter().find(|l| l.event_type == "task.updated").unwrap();
    let payload: serde_json::Value = serde_json::from_str(&updated.payload).unwrap();
    assert_eq!(payload["data"]["new_status"], "done");
    assert_eq!(payload["data"]["previous_status"], "pending");
}

