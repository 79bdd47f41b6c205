//! HTTP end-to-end tests: the API and a subscriber endpoint on real sockets,
//! with the reqwest transport in between.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use protocast::api::router;
use protocast::config::Config;
use protocast::delivery::{HttpTransport, DELIVERY_ID_HEADER};
use protocast::dlq::NoopDeadLetterPublisher;
use protocast::interfaces::DeliveryNotice;
use protocast::storage::Stores;
use protocast::Notifier;

/// Received by the fake subscriber: delivery id header and body.
type Received = (Option<String>, DeliveryNotice);

/// Subscriber endpoint that answers 500 to the first `failures` calls.
async fn spawn_subscriber(failures: usize) -> (String, mpsc::UnboundedReceiver<Received>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicUsize::new(0));

    let app = Router::new().route(
        "/hook",
        post(move |headers: HeaderMap, Json(notice): Json<DeliveryNotice>| {
            let tx = tx.clone();
            let calls = calls.clone();
            async move {
                let header = headers
                    .get(DELIVERY_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = tx.send((header, notice));
                if calls.fetch_add(1, Ordering::SeqCst) < failures {
                    StatusCode::INTERNAL_SERVER_ERROR
                } else {
                    StatusCode::OK
                }
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (format!("http://{}/hook", addr), rx)
}

async fn spawn_api() -> (String, Arc<Notifier>) {
    let config = Config::for_test();
    let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
    let notifier = Arc::new(Notifier::new(
        &config,
        Stores::in_memory(),
        Arc::new(transport),
        Arc::new(NoopDeadLetterPublisher),
    ));
    notifier.start().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(notifier.clone());
    tokio::spawn(async move { axum::serve(listener, app).await });
    (format!("http://{}", addr), notifier)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Received>) -> Received {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery arrives")
        .expect("channel open")
}

#[tokio::test]
async fn test_submitted_event_reaches_subscriber_endpoint() {
    let (endpoint, mut received) = spawn_subscriber(0).await;
    let (api, notifier) = spawn_api().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/subscribers", api))
        .json(&serde_json::json!({
            "playerId": "alice",
            "filter": { "gameIds": ["space"] },
            "endpoint": endpoint,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let resp = client
        .post(format!("{}/events", api))
        .json(&serde_json::json!({
            "gameId": "space.shooter",
            "payload": "cHJvdG90eXBl",
            "tags": ["vr"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["eventId"], 1);

    let (header, notice) = recv(&mut received).await;
    assert_eq!(header, Some(notice.delivery_id.to_string()));
    assert_eq!(notice.event_id, 1);
    assert_eq!(notice.game_id, "space.shooter");
    assert_eq!(notice.payload, "cHJvdG90eXBl");
    assert_eq!(notice.tags, vec!["vr"]);
    assert_eq!(notice.attempt, 1);

    notifier.shutdown().await;
}

#[tokio::test]
async fn test_rejected_delivery_is_retried_with_same_delivery_id() {
    let (endpoint, mut received) = spawn_subscriber(1).await;
    let (api, notifier) = spawn_api().await;
    let client = reqwest::Client::new();

    notifier
        .register(
            "alice",
            protocast::model::SubscriberFilter::all(),
            &endpoint,
        )
        .await
        .unwrap();
    client
        .post(format!("{}/events", api))
        .json(&serde_json::json!({ "gameId": "g", "payload": "" }))
        .send()
        .await
        .unwrap();

    let (_, first) = recv(&mut received).await;
    let (_, second) = recv(&mut received).await;
    assert_eq!(first.delivery_id, second.delivery_id);
    assert_eq!((first.attempt, second.attempt), (1, 2));

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status: serde_json::Value = client
                .get(format!("{}/operator/status", api))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if status["tasks"]["delivered"] == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task delivered");

    notifier.shutdown().await;
}
