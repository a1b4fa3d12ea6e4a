//! Integration tests for the API server.

use std::sync::OnceLock;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::{ReservationConfig, ReservationService};
use futures_util::future::join_all;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use ticket_store::{ConcertId, InMemoryTicketStore, TicketStore};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup_with_store() -> (Router, InMemoryTicketStore) {
    let store = InMemoryTicketStore::new();
    let state = api::create_default_state(store.clone(), ReservationConfig::default());
    (api::create_app(state, get_metrics_handle()), store)
}

fn setup() -> Router {
    setup_with_store().0
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Seeds test data and returns (concert ids, member ids).
async fn init(app: &Router, seats: u32) -> (Vec<i64>, Vec<i64>) {
    let (status, body) = send(app, "POST", &format!("/api/test/init?seats={seats}"), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let ids = |key: &str| {
        body[key]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect::<Vec<_>>()
    };
    (ids("concertIds"), ids("memberIds"))
}

async fn reserve(app: &Router, concert_id: i64, member_id: i64) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/api/reservations",
        Some(json!({ "concertId": concert_id, "memberId": member_id })),
    )
    .await
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();
    let (status, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "memory");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_init_seeds_concerts_and_members() {
    let app = setup();
    let (status, body) = send(&app, "POST", "/api/test/init", None).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["concertCount"], 5);
    assert_eq!(body["memberCount"], 200);
    assert_eq!(body["concertIds"].as_array().unwrap().len(), 5);
    assert_eq!(body["memberIds"].as_array().unwrap().len(), 200);

    let concert_id = &body["concertIds"][0];
    let (status, concert) = send(&app, "GET", &format!("/api/concerts/{concert_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(concert["totalSeats"], 100);
    assert_eq!(concert["availableSeats"], 100);
    assert_eq!(concert["status"], "UPCOMING");
}

#[tokio::test]
async fn test_init_rejects_zero_seats() {
    let app = setup();
    let (status, body) = send(&app, "POST", "/api/test/init?seats=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_reserve_returns_created() {
    let app = setup();
    let (concerts, members) = init(&app, 10).await;

    let (status, body) = reserve(&app, concerts[0], members[0]).await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(body["id"].as_i64().is_some());
    assert!(body["reservationNumber"].as_str().unwrap().starts_with("RSV-"));
    assert_eq!(body["ticketCount"], 1);
    assert_eq!(body["totalAmount"], 100_000);
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["ticketIds"].as_array().unwrap().len(), 1);

    let (_, concert) = send(&app, "GET", &format!("/api/concerts/{}", concerts[0]), None).await;
    assert_eq!(concert["availableSeats"], 9);
}

#[tokio::test]
async fn test_reserve_multiple_seats() {
    let app = setup();
    let (concerts, members) = init(&app, 10).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/reservations",
        Some(json!({ "concertId": concerts[1], "memberId": members[1], "count": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ticketCount"], 3);
    assert_eq!(body["totalAmount"], 300_000);

    let id = &body["id"];
    let (status, tickets) = send(&app, "GET", &format!("/api/reservations/{id}/tickets"), None).await;
    assert_eq!(status, StatusCode::OK);
    let seats: Vec<_> = tickets
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["seatNumber"].as_u64().unwrap())
        .collect();
    assert_eq!(seats, vec![1, 2, 3]);

    let (status, body) = send(
        &app,
        "POST",
        "/api/reservations",
        Some(json!({ "concertId": concerts[1], "memberId": members[1], "count": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_sold_out_is_conflict() {
    let app = setup();
    let (concerts, members) = init(&app, 1).await;

    let (status, _) = reserve(&app, concerts[0], members[0]).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = reserve(&app, concerts[0], members[1]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "CONFLICT");
    assert!(body["message"].as_str().unwrap().contains("seats left"));
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let app = setup();
    let (concerts, members) = init(&app, 5).await;

    let (status, body) = reserve(&app, 999_999, members[0]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");

    let (status, _) = reserve(&app, concerts[0], 999_999).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/reservations/424242", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/concerts/424242", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_confirm_twice_is_conflict() {
    let app = setup();
    let (concerts, members) = init(&app, 5).await;
    let (_, created) = reserve(&app, concerts[0], members[0]).await;
    let id = &created["id"];

    let (status, body) = send(&app, "POST", &format!("/api/reservations/{id}/confirm"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CONFIRMED");
    assert_eq!(body["totalAmount"], created["totalAmount"]);

    let (status, body) = send(&app, "POST", &format!("/api/reservations/{id}/confirm"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "CONFLICT");
}

#[tokio::test]
async fn test_cancel_confirmed_restores_inventory() {
    let app = setup();
    let (concerts, members) = init(&app, 5).await;
    let (_, created) = reserve(&app, concerts[2], members[0]).await;
    let id = &created["id"];
    send(&app, "POST", &format!("/api/reservations/{id}/confirm"), None).await;

    let (status, body) = send(&app, "POST", &format!("/api/reservations/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");

    let (status, inventory) = send(
        &app,
        "GET",
        &format!("/api/concerts/{}/inventory", concerts[2]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(inventory["availableSeats"], 5);
    assert_eq!(inventory["availableTickets"], 5);
    assert_eq!(inventory["consistent"], true);

    let (status, _) = send(&app, "POST", &format!("/api/reservations/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_lookup_by_number_and_member() {
    let app = setup();
    let (concerts, members) = init(&app, 5).await;
    let (_, first) = reserve(&app, concerts[0], members[3]).await;
    let (_, second) = reserve(&app, concerts[1], members[3]).await;

    let number = second["reservationNumber"].as_str().unwrap();
    let (status, found) = send(
        &app,
        "GET",
        &format!("/api/reservations/number/{number}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["id"], second["id"]);

    let (status, list) = send(
        &app,
        "GET",
        &format!("/api/members/{}/reservations", members[3]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<_> = list.as_array().unwrap().iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, vec![first["id"].clone(), second["id"].clone()]);
}

#[tokio::test]
async fn test_inventory_report_covers_all_concerts() {
    let app = setup();
    let (concerts, members) = init(&app, 3).await;
    reserve(&app, concerts[0], members[0]).await;

    let (status, report) = send(&app, "GET", "/api/inventory/report", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["concerts"].as_array().unwrap().len(), 5);
    assert_eq!(report["mismatched"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_oversell() {
    let app = setup();
    let (concerts, members) = init(&app, 5).await;
    let concert_id = concerts[0];

    let requests = members[..6].iter().map(|&member_id| {
        let app = app.clone();
        tokio::spawn(async move { reserve(&app, concert_id, member_id).await.0 })
    });
    let statuses: Vec<_> = join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::CREATED).count(),
        5
    );
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(),
        1
    );

    let (_, concert) = send(&app, "GET", &format!("/api/concerts/{concert_id}"), None).await;
    assert_eq!(concert["availableSeats"], 0);
}

#[tokio::test]
async fn test_contention_is_service_unavailable() {
    let store = InMemoryTicketStore::new().with_lock_timeout(Duration::from_millis(10));
    let reservations = ReservationService::new(store.clone())
        .with_config(ReservationConfig::default().with_max_retries(0));
    let app = api::create_app(
        api::create_state(store.clone(), reservations),
        get_metrics_handle(),
    );
    let (concerts, members) = init(&app, 5).await;

    let _held = store.begin(ConcertId::new(concerts[0])).await.unwrap();
    let (status, body) = reserve(&app, concerts[0], members[0]).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_store_shared_with_state() {
    let (app, store) = setup_with_store();
    let (concerts, members) = init(&app, 2).await;
    reserve(&app, concerts[4], members[0]).await;

    let snapshot = store
        .inventory_snapshot(ConcertId::new(concerts[4]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.available_seats, 1);
}
