//! Webhook 投递集成测试：本地 axum 回调服务模拟瞬时失败与拒绝

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use authpilot::config::WebhookSection;
use authpilot::core::{FailureReason, TerminalResult};
use authpilot::integrations::{DeliveryReport, RetryPolicy, WebhookDispatcher, WebhookPayload};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

struct Receiver {
    hits: AtomicUsize,
    fail_first: usize,
    fail_status: StatusCode,
    payloads: Mutex<Vec<serde_json::Value>>,
}

async fn hook(
    State(rx): State<Arc<Receiver>>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let n = rx.hits.fetch_add(1, Ordering::SeqCst);
    if n < rx.fail_first {
        return rx.fail_status;
    }
    rx.payloads.lock().unwrap().push(body);
    StatusCode::OK
}

async fn spawn_receiver(fail_first: usize, fail_status: StatusCode) -> (String, Arc<Receiver>) {
    let rx = Arc::new(Receiver {
        hits: AtomicUsize::new(0),
        fail_first,
        fail_status,
        payloads: Mutex::new(Vec::new()),
    });
    let app = Router::new().route("/hook", post(hook)).with_state(rx.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/hook", addr), rx)
}

fn dispatcher(max_attempts: u32) -> WebhookDispatcher {
    WebhookDispatcher::new(&WebhookSection::default()).with_policy(RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    })
}

#[tokio::test]
async fn test_transient_failures_then_success_delivers_once() {
    let (url, rx) = spawn_receiver(2, StatusCode::SERVICE_UNAVAILABLE).await;
    let dispatcher = dispatcher(5);
    let payload = WebhookPayload::from_terminal(
        "req-6",
        &TerminalResult::succeeded("auth_token=a; ct0=b".into(), 2),
    );

    let report = dispatcher.deliver(&url, &payload).await;
    assert_eq!(report, DeliveryReport::Delivered { attempts: 3, status: 200 });
    assert_eq!(rx.hits.load(Ordering::SeqCst), 3);

    // 同一请求不会再次启动投递
    assert_eq!(dispatcher.deliver(&url, &payload).await, DeliveryReport::Duplicate);
    assert_eq!(rx.hits.load(Ordering::SeqCst), 3);

    let payloads = rx.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["success"], true);
    assert_eq!(payloads[0]["result"], "auth_token=a; ct0=b");
    assert_eq!(payloads[0]["error"], serde_json::Value::Null);
    assert_eq!(payloads[0]["iterations"], 2);
    assert_eq!(payloads[0]["request_id"], "req-6");
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let (url, rx) = spawn_receiver(1, StatusCode::TOO_MANY_REQUESTS).await;
    let payload = WebhookPayload::from_terminal("req-429", &TerminalResult::failed(FailureReason::Timeout, 0));
    let report = dispatcher(3).deliver(&url, &payload).await;
    assert!(report.is_delivered());
    assert_eq!(rx.hits.load(Ordering::SeqCst), 2);
    assert_eq!(rx.payloads.lock().unwrap()[0]["error"], "timeout");
}

#[tokio::test]
async fn test_client_error_stops_immediately() {
    let (url, rx) = spawn_receiver(usize::MAX, StatusCode::BAD_REQUEST).await;
    let payload = WebhookPayload::from_terminal("req-400", &TerminalResult::succeeded("a=1".into(), 1));
    let report = dispatcher(5).deliver(&url, &payload).await;
    assert_eq!(report, DeliveryReport::Rejected { attempts: 1, status: 400 });
    assert_eq!(rx.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_ceiling() {
    let (url, rx) = spawn_receiver(usize::MAX, StatusCode::INTERNAL_SERVER_ERROR).await;
    let payload = WebhookPayload::from_terminal("req-500", &TerminalResult::succeeded("a=1".into(), 1));
    let report = dispatcher(3).deliver(&url, &payload).await;
    assert_eq!(
        report,
        DeliveryReport::Exhausted { attempts: 3, last_error: "HTTP 500".into() }
    );
    assert_eq!(rx.hits.load(Ordering::SeqCst), 3);
}
