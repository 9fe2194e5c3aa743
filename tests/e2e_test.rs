//! End-to-end flow: enqueue over HTTP, dispatch through a webhook provider,
//! read the result back over HTTP.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use courier_api::{create_router, AppState};
use courier_core::MessageStatus;
use courier_delivery::{
    storage::mock::MockMessageStore, Dispatcher, DispatcherConfig, Scheduler, SchedulerConfig,
    WebhookClient,
};
use courier_testing::{ProviderServer, RecordingCache};
use serde_json::{json, Value};
use tower::ServiceExt;

struct Service {
    app: Router,
    store: Arc<MockMessageStore>,
    scheduler: Arc<Scheduler>,
    cache: Arc<RecordingCache>,
}

fn service(provider: &ProviderServer, batch_size: usize, max_retries: u32) -> Service {
    let store = Arc::new(MockMessageStore::new());
    let cache = Arc::new(RecordingCache::new());
    let client = Arc::new(WebhookClient::new(provider.client_config()).unwrap());
    let dispatcher = Arc::new(
        Dispatcher::new(store.clone(), client, DispatcherConfig { max_retries })
            .with_cache(cache.clone()),
    );
    let scheduler = Arc::new(
        Scheduler::new(
            store.clone(),
            dispatcher,
            SchedulerConfig { batch_size, tick_interval: Duration::from_millis(50) },
        )
        .unwrap(),
    );

    let state =
        AppState { store: store.clone(), scheduler: scheduler.clone(), max_message_chars: 160 };
    Service { app: create_router(state, Duration::from_secs(5)), store, scheduler, cache }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn wait_until_settled(store: &MockMessageStore, total: usize) {
    for _ in 0..300 {
        let settled = store.count_with_status(MessageStatus::Sent).await
            + store.count_with_status(MessageStatus::Failed).await;
        if settled == total {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("messages did not settle");
}

#[tokio::test]
async fn messages_flow_from_api_to_provider_and_back() {
    let provider = ProviderServer::start().await;
    provider.accept_all("wh-accepted").await;
    let service = service(&provider, 2, 3);

    for n in 0..3 {
        let (status, _) = send(
            &service.app,
            "POST",
            "/api/v1/messages",
            Some(json!({"to": format!("+9055500000{n}"), "content": format!("hello {n}")})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, _) = send(&service.app, "POST", "/api/v1/scheduler/start", None).await;
    assert_eq!(status, StatusCode::OK);
    wait_until_settled(&service.store, 3).await;

    let (status, _) = send(&service.app, "POST", "/api/v1/scheduler/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    service.scheduler.shutdown(Duration::from_secs(5)).await.unwrap();

    let (_, body) = send(&service.app, "GET", "/api/v1/messages/sent", None).await;
    assert_eq!(body["data"]["count"], 3);
    for item in body["data"]["items"].as_array().unwrap() {
        assert_eq!(item["provider_message_id"], "wh-accepted");
    }

    assert_eq!(provider.request_count().await, 3);
    assert_eq!(service.cache.writes().len(), 3);
}

#[tokio::test]
async fn provider_outage_exhausts_retries() {
    let provider = ProviderServer::start().await;
    provider.reject_all(503, "maintenance").await;
    let service = service(&provider, 5, 2);

    let (status, _) = send(
        &service.app,
        "POST",
        "/api/v1/messages",
        Some(json!({"to": "+905550000000", "content": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    service.scheduler.start().unwrap();
    wait_until_settled(&service.store, 1).await;
    service.scheduler.shutdown(Duration::from_secs(5)).await.unwrap();

    let message = &service.store.messages().await[0];
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.retry_count, 2);
    assert!(message.last_error.as_deref().unwrap().contains("HTTP 503"));
    assert_eq!(provider.request_count().await, 2);

    let (_, body) = send(&service.app, "GET", "/api/v1/scheduler/status", None).await;
    assert_eq!(body["data"]["running"], false);
    assert_eq!(body["data"]["stats"]["delivery_failures"], 2);
    assert_eq!(body["data"]["stats"]["messages_sent"], 0);
}
