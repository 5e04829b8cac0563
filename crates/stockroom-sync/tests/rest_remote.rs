//! RestRemote against a fake sync API served by axum.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::Value;
use stockroom_core::{Entity, EntityKind, Item, OperationType, Staff, SyncStatus};
use stockroom_db::{Database, DbConfig};
use stockroom_sync::{
    ConnectivitySignal, RemoteAdapter, RemoteError, RestRemote, SyncConfig, SyncEngine,
};
use tokio::net::TcpListener;

// =============================================================================
// Fake Server
// =============================================================================

/// Bodies received per resource path, keyed by record id.
#[derive(Clone, Default)]
struct FakeApi {
    records: Arc<Mutex<HashMap<String, Vec<Value>>>>,
}

async fn push(
    State(api): State<FakeApi>,
    Path(resource): Path<String>,
    Json(batch): Json<Vec<Value>>,
) -> Response {
    match resource.as_str() {
        "staff" => (StatusCode::UNPROCESSABLE_ENTITY, "unknown department").into_response(),
        "logs" => (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response(),
        _ => {
            api.records
                .lock()
                .unwrap()
                .entry(resource)
                .or_default()
                .extend(batch);
            StatusCode::OK.into_response()
        }
    }
}

async fn list(State(api): State<FakeApi>, Path(resource): Path<String>) -> Json<Vec<Value>> {
    let records = api.records.lock().unwrap();
    Json(records.get(&resource).cloned().unwrap_or_default())
}

async fn archive(State(api): State<FakeApi>, Path((resource, id)): Path<(String, String)>) -> StatusCode {
    let mut records = api.records.lock().unwrap();
    let Some(batch) = records.get_mut(&resource) else {
        return StatusCode::NOT_FOUND;
    };
    match batch.iter_mut().find(|record| record["id"] == Value::String(id.clone())) {
        Some(record) => {
            record["isActive"] = Value::Bool(false);
            StatusCode::OK
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn serve() -> (String, FakeApi) {
    let api = FakeApi::default();
    let app = Router::new()
        .route("/sync/{resource}", get(list).post(push))
        .route("/sync/{resource}/{id}", delete(archive))
        .with_state(api.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (format!("http://{addr}"), api)
}

/// A server that answers every push with `status` and counts the requests.
async fn serve_throttled(status: StatusCode) -> (String, Arc<AtomicU32>) {
    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/sync/{resource}",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (status, "slow down")
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (format!("http://{addr}"), hits)
}

async fn remote() -> (RestRemote, FakeApi) {
    let (base, api) = serve().await;
    (RestRemote::new(&base, Duration::from_secs(5)).unwrap(), api)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_create_posts_iso_timestamp() {
    let (remote, api) = remote().await;
    let item: Entity = Item::new("Heat gun", 1_700_000_000_000).into();

    let confirmed = remote.create(&item).await.unwrap();
    assert_eq!(confirmed, item);

    let records = api.records.lock().unwrap();
    let sent = &records["items"][0];
    assert_eq!(sent["lastModified"], Value::String("2023-11-14T22:13:20.000Z".into()));
    assert_eq!(sent["name"], Value::String("Heat gun".into()));
}

#[tokio::test]
async fn test_fetch_all_reads_back_pushed_records() {
    let (remote, _api) = remote().await;
    let a: Entity = Item::new("Clamp", 1_000).into();
    let b: Entity = Item::new("Vice", 2_000).into();
    remote.create(&a).await.unwrap();
    remote.update(b.id(), &b).await.unwrap();

    let fetched = remote.fetch_all(EntityKind::Item).await.unwrap();
    assert_eq!(fetched, vec![a, b]);
    assert!(remote.fetch_all(EntityKind::Staff).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_client_error_is_a_rejection() {
    let (remote, _api) = remote().await;
    let staff: Entity = Staff::new("Lee", "Nowhere", 1).into();

    match remote.create(&staff).await {
        Err(RemoteError::Rejected { status, message }) => {
            assert_eq!(status, 422);
            assert_eq!(message, "unknown department");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (remote, _api) = remote().await;
    let log: Entity = stockroom_core::CheckoutLog::open("i", "s", 1).into();

    let err = remote.create(&log).await.unwrap_err();
    assert!(matches!(err, RemoteError::Server { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_throttling_is_transient() {
    for status in [StatusCode::TOO_MANY_REQUESTS, StatusCode::REQUEST_TIMEOUT] {
        let (base, _hits) = serve_throttled(status).await;
        let remote = RestRemote::new(&base, Duration::from_secs(5)).unwrap();
        let item: Entity = Item::new("Drill press", 1).into();

        let err = remote.create(&item).await.unwrap_err();
        assert!(
            matches!(err, RemoteError::Server { status: code, .. } if code == status.as_u16()),
            "{err:?}"
        );
        assert!(err.is_transient());
    }
}

#[tokio::test]
async fn test_engine_keeps_throttled_operation_queued() {
    let (base, hits) = serve_throttled(StatusCode::TOO_MANY_REQUESTS).await;
    let remote = RestRemote::new(&base, Duration::from_secs(5)).unwrap();
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let mut config = SyncConfig::default();
    config.sync.base_backoff_ms = 1;
    let engine = SyncEngine::new(db, Arc::new(remote), ConnectivitySignal::connected(), config);

    engine
        .enqueue_mutation(OperationType::Create, &Item::new("Band saw", 10).into())
        .await
        .unwrap();
    let report = engine.trigger_sync().await;

    assert_eq!(report.status, SyncStatus::Partial);
    assert_eq!(report.dead_lettered, 0);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(engine.pending_count().await.unwrap(), 1);
    assert!(engine.dead_letters().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_archive() {
    let (remote, api) = remote().await;
    let item: Entity = Item::new("Grinder", 1).into();
    remote.create(&item).await.unwrap();

    remote.archive(EntityKind::Item, item.id()).await.unwrap();
    assert_eq!(api.records.lock().unwrap()["items"][0]["isActive"], Value::Bool(false));

    let err = remote.archive(EntityKind::Item, "missing").await.unwrap_err();
    assert!(matches!(err, RemoteError::Rejected { status: 404, .. }));
}

#[tokio::test]
async fn test_unreachable_server_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let remote = RestRemote::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
    let err = remote.fetch_all(EntityKind::Item).await.unwrap_err();
    assert!(matches!(err, RemoteError::Unavailable(_)), "{err:?}");
}

#[tokio::test]
async fn test_engine_drains_over_http() {
    let (remote, api) = remote().await;
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let mut config = SyncConfig::default();
    config.sync.base_backoff_ms = 1;
    let engine = SyncEngine::new(db, Arc::new(remote), ConnectivitySignal::connected(), config);

    let item = Item::new("Torque wrench", 10);
    engine
        .enqueue_mutation(OperationType::Create, &item.clone().into())
        .await
        .unwrap();
    engine.archive(EntityKind::Item, &item.id).await.unwrap();

    let report = engine.trigger_sync().await;
    assert_eq!(report.status, SyncStatus::Complete);
    assert_eq!(report.succeeded, 2);

    let records = api.records.lock().unwrap();
    assert_eq!(records["items"].len(), 1);
    assert_eq!(records["items"][0]["isActive"], Value::Bool(false));
}
