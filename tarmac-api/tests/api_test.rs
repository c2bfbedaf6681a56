use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use tarmac_api::{app, state::Backends, AppState};
use tarmac_catalog::fares::{Fare, Validity};
use tarmac_catalog::{AncillaryCatalog, FareCatalog};
use tarmac_core::gds::MockGdsClient;
use tarmac_core::{CabinClass, ManualClock};
use tarmac_store::Config;
use tower::ServiceExt;
use uuid::Uuid;

fn fares() -> FareCatalog {
    FareCatalog {
        fares: vec![Fare {
            id: Uuid::new_v4(),
            airline: "SV".into(),
            origin: "RUH".into(),
            destination: "JED".into(),
            cabin: CabinClass::Economy,
            booking_class: "M".into(),
            fare_basis: "MOWSA".into(),
            base_fare: dec!(500),
            currency: "SAR".into(),
            child_discount_pct: dec!(25),
            infant_discount_pct: dec!(90),
            validity: Validity {
                effective_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                expiry_date: None,
            },
        }],
        ..Default::default()
    }
}

async fn setup() -> Router {
    let config: Config = serde_json::from_value(json!({ "server": { "port": 0 } })).unwrap();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()));
    let state = AppState::build(
        &config,
        Backends::in_memory(),
        fares(),
        AncillaryCatalog::new(),
        Arc::new(MockGdsClient::new()),
        clock,
    );
    let app = app(state);

    let (status, _) = send(
        &app,
        "POST",
        "/v1/inventory",
        Some(json!({
            "flight_number": "SV1020",
            "departure_date": "2026-11-01",
            "origin": "RUH",
            "destination": "JED",
            "departure_time": "2026-11-01T06:00:00Z",
            "arrival_time": "2026-11-01T07:45:00Z",
            "total_seats": 150,
            "cabins": [{ "cabin": "economy", "seats": 120 }, { "cabin": "business", "seats": 30 }],
            "buckets": [{ "booking_class": "M", "cabin": "economy", "seats": 40, "fare": "500", "currency": "SAR" }],
            "seats": [{ "seat_number": "12A", "cabin": "economy", "is_window": true }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    app
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
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn booking_payload(reference: &str) -> Value {
    json!({
        "client_reference": reference,
        "itinerary_id": "SV1020@2026-11-01/Y/M",
        "passengers": [{
            "first_name": "Sara",
            "last_name": "Alharbi",
            "date_of_birth": "1988-04-02",
            "passport_number": "K1234567",
            "nationality": "SA"
        }],
        "contact": { "email": "bookings@agency.example" },
        "agent_id": "agent-7",
        "agent_type": "iata"
    })
}

#[tokio::test]
async fn test_health() {
    let app = setup().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_search_prices_and_caches() {
    let app = setup().await;
    let request = json!({
        "origin": "RUH",
        "destination": "JED",
        "departure_date": "2026-11-01",
        "passengers": { "adults": 1, "children": 1 },
        "agent_type": "iata"
    });

    let (status, body) = send(&app, "POST", "/v1/search", Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["freshness"], "valid");
    let option = &body["result"]["legs"][0][0];
    assert_eq!(option["booking_class"], "M");
    let total: Decimal = option["total_fare"].as_str().unwrap().parse().unwrap();
    assert_eq!(total, dec!(875));

    send(&app, "POST", "/v1/search", Some(request)).await;
    let (_, stats) = send(&app, "GET", "/v1/search/stats", None).await;
    assert_eq!(stats["hits"], 1);
    assert_eq!(stats["misses"], 1);
}

#[tokio::test]
async fn test_search_rejects_bad_airports() {
    let app = setup().await;
    let (status, body) = send(
        &app,
        "POST",
        "/v1/search",
        Some(json!({
            "origin": "RUH",
            "destination": "RUH",
            "departure_date": "2026-11-01",
            "passengers": { "adults": 1 },
            "agent_type": "iata"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn test_booking_lifecycle_over_http() {
    let app = setup().await;

    let (status, booking) = send(&app, "POST", "/v1/bookings", Some(booking_payload("AGY-1"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["status"], "confirmed");
    let id = booking["id"].as_str().unwrap().to_string();

    let (_, flight) = send(&app, "GET", "/v1/inventory/SV1020/2026-11-01", None).await;
    assert_eq!(flight["available_seats"], 149);

    let (status, seat) = send(
        &app,
        "POST",
        "/v1/inventory/SV1020/2026-11-01/seats/12A",
        Some(json!({ "booking_id": id, "passenger_index": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seat["status"], "booked");

    let (status, ticketed) = send(&app, "POST", &format!("/v1/bookings/{}/tickets", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticketed["status"], "ticketed");
    assert_eq!(ticketed["tickets"].as_array().unwrap().len(), 1);

    let (status, voided) = send(&app, "POST", &format!("/v1/bookings/{}/void", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(voided["status"], "voided");

    let (status, body) = send(&app, "POST", &format!("/v1/bookings/{}/cancel", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "state_conflict");

    let (_, flight) = send(&app, "GET", "/v1/inventory/SV1020/2026-11-01", None).await;
    assert_eq!(flight["available_seats"], 150);
}

#[tokio::test]
async fn test_refund_flow_over_http() {
    let app = setup().await;
    let (_, booking) = send(&app, "POST", "/v1/bookings", Some(booking_payload("AGY-2"))).await;
    let id = booking["id"].as_str().unwrap().to_string();

    let (status, refund) = send(
        &app,
        "POST",
        &format!("/v1/bookings/{}/refunds", id),
        Some(json!({ "amount": "500", "reason": "schedule change", "requested_by": "agent-7" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let refund_id = refund["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, "POST", &format!("/v1/refunds/{}/process", refund_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, approved) = send(
        &app,
        "POST",
        &format!("/v1/refunds/{}/approve", refund_id),
        Some(json!({ "decided_by": "finance-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved");

    let (status, _) = send(&app, "POST", &format!("/v1/refunds/{}/process", refund_id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, booking) = send(&app, "GET", &format!("/v1/bookings/{}", id), None).await;
    assert_eq!(booking["status"], "refunded");
}

#[tokio::test]
async fn test_unknown_booking_is_404() {
    let app = setup().await;
    let (status, body) = send(&app, "GET", &format!("/v1/bookings/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_limit_blocks_booking_with_figures() {
    let app = setup().await;
    let (status, limit) = send(
        &app,
        "POST",
        "/v1/limits",
        Some(json!({
            "name": "agent daily revenue",
            "limit_type": "revenue",
            "scope": { "scope": "agent", "agent_id": "agent-7" },
            "limit_value": "300",
            "period": "daily",
            "period_start": "2026-10-19T00:00:00Z"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "POST", "/v1/bookings", Some(booking_payload("AGY-3"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "limit_blocked");
    assert_eq!(body["details"]["limit_id"], limit["id"]);
    assert_eq!(body["details"]["limit_value"], "300");

    let (_, flight) = send(&app, "GET", "/v1/inventory/SV1020/2026-11-01", None).await;
    assert_eq!(flight["available_seats"], 150);
}

#[tokio::test]
async fn test_override_cannot_be_self_approved() {
    let app = setup().await;
    let (_, limit) = send(
        &app,
        "POST",
        "/v1/limits",
        Some(json!({
            "name": "flight seats",
            "limit_type": "seat",
            "scope": { "scope": "flight", "flight_number": "SV1020" },
            "limit_value": "10",
            "period": "total",
            "period_start": "2026-10-01T00:00:00Z",
            "override_allowed": true
        })),
    )
    .await;

    let (status, rule) = send(
        &app,
        "POST",
        "/v1/overrides",
        Some(json!({
            "target": { "target": "limit", "limit_id": limit["id"] },
            "reason": "Hajj charter block",
            "requested_by": "ops-1",
            "valid_from": "2026-10-19T00:00:00Z",
            "valid_until": "2026-10-26T00:00:00Z",
            "override_value": "40"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let rule_id = rule["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/overrides/{}/approve", rule_id),
        Some(json!({ "actor": "ops-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, approved) = send(
        &app,
        "POST",
        &format!("/v1/overrides/{}/approve", rule_id),
        Some(json!({ "actor": "ops-lead", "note": "charter confirmed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // The window is already open, so approval activates it at once.
    assert_eq!(approved["status"], "active");
}

#[tokio::test]
async fn test_unknown_ancillary_action_is_bad_request() {
    let app = setup().await;
    let uri = format!("/v1/bookings/{}/ancillaries/{}/teleport", Uuid::new_v4(), Uuid::new_v4());
    let (status, body) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "bad_request");
}
