use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fuel_dispatch::api::rest::router;
use fuel_dispatch::config::DispatchConfig;
use fuel_dispatch::engine::notify::AssignmentNotice;
use fuel_dispatch::state::AppState;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

const EARTH_RADIUS_KM: f64 = 6371.0;
const REQUESTER_LAT: f64 = 12.90;
const REQUESTER_LNG: f64 = 77.58;

fn setup() -> (axum::Router, mpsc::Receiver<AssignmentNotice>) {
    let (state, rx) = AppState::new(DispatchConfig::default(), 1024, 1024);
    (router(Arc::new(state)), rx)
}

#[derive(Clone, Copy)]
struct Caller {
    id: Uuid,
    role: &'static str,
}

impl Caller {
    fn new(role: &'static str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
        }
    }
}

fn request(method: &str, uri: &str, caller: Option<Caller>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder
            .header("x-identity-id", caller.id.to_string())
            .header("x-identity-role", caller.role)
            .header("x-identity-name", "Meera");
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn get_request(uri: &str, caller: Caller) -> Request<Body> {
    request("GET", uri, Some(caller), None)
}

fn json_request(method: &str, uri: &str, caller: Caller, body: Value) -> Request<Body> {
    request(method, uri, Some(caller), Some(body))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// A point `km` due north of the requester.
fn north(km: f64) -> Value {
    json!({
        "lat": REQUESTER_LAT + (km / EARTH_RADIUS_KM).to_degrees(),
        "lng": REQUESTER_LNG
    })
}

fn requester_location() -> Value {
    json!({ "lat": REQUESTER_LAT, "lng": REQUESTER_LNG })
}

async fn call(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn initialise_platform(app: &axum::Router, admin: Caller) {
    let (status, _) = call(
        app,
        json_request(
            "POST",
            "/admin/settings",
            admin,
            json!({
                "stock": { "petrol": 1000.0, "diesel": 1000.0 },
                "rates": { "petrol": 96.0, "diesel": 88.0 }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

/// Registers, queues and approves a station with `petrol` litres of opening supply.
async fn approved_station(
    app: &axum::Router,
    admin: Caller,
    owner: Caller,
    name: &str,
    at: Value,
    petrol_rate: f64,
    petrol: f64,
) -> String {
    let (status, station) = call(
        app,
        json_request(
            "POST",
            "/stations",
            owner,
            json!({
                "name": name,
                "contact": "919800000010",
                "address": "Bannerghatta Road",
                "city": "Bengaluru",
                "open_time": "06:00",
                "close_time": "23:00",
                "location": at,
                "petrol": { "litres": 0.0, "rate": petrol_rate },
                "diesel": { "litres": 0.0, "rate": 90.0 }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(station["status"], "pending");
    let station_id = station["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/stations/{station_id}/approval-request"),
            Some(owner),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let (status, approved) = call(
        app,
        json_request(
            "POST",
            &format!("/admin/stations/{station_id}/approve"),
            admin,
            json!({ "supply": { "petrol": petrol } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved");
    station_id
}

async fn verified_rider(app: &axum::Router, admin: Caller, rider: Caller, at: Value) -> String {
    let (status, person) = call(
        app,
        json_request(
            "POST",
            "/delivery-persons",
            rider,
            json!({
                "name": "Ravi",
                "contact": "919800000020",
                "city": "Bengaluru",
                "address": "JP Nagar",
                "location": at
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let person_id = person["id"].as_str().unwrap().to_string();

    let (status, verified) = call(
        app,
        request(
            "POST",
            &format!("/admin/delivery-persons/{person_id}/approve"),
            Some(admin),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["is_verified"], true);
    person_id
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _rx) = setup();
    let response = app
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["stations"], 0);
    assert_eq!(body["delivery_persons"], 0);
    assert_eq!(body["orders"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _rx) = setup();
    let response = app
        .oneshot(request("GET", "/metrics", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("notifications_in_queue"));
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let (app, _rx) = setup();
    let response = app
        .oneshot(request(
            "POST",
            "/dispatch/plan",
            None,
            Some(json!({
                "location": requester_location(),
                "fuel_type": "petrol",
                "quantity": 5.0
            })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn wrong_role_is_forbidden() {
    let (app, _rx) = setup();
    let (status, body) = call(
        &app,
        json_request(
            "POST",
            "/dispatch/plan",
            Caller::new("delivery_person"),
            json!({
                "location": requester_location(),
                "fuel_type": "petrol",
                "quantity": 5.0
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");
}

#[tokio::test]
async fn oversized_order_is_rejected() {
    let (app, _rx) = setup();
    let (status, body) = call(
        &app,
        json_request(
            "POST",
            "/dispatch/plan",
            Caller::new("user"),
            json!({
                "location": requester_location(),
                "fuel_type": "petrol",
                "quantity": 11.0
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn station_without_riders_is_infeasible() {
    let (app, _rx) = setup();
    let admin = Caller::new("admin");
    initialise_platform(&app, admin).await;
    approved_station(&app, admin, Caller::new("fuel_station"), "Lonely", north(1.0), 100.0, 50.0)
        .await;

    let (status, body) = call(
        &app,
        json_request(
            "POST",
            "/dispatch/plan",
            Caller::new("user"),
            json!({
                "location": requester_location(),
                "fuel_type": "petrol",
                "quantity": 5.0
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "no_feasible_assignment");
}

#[tokio::test]
async fn get_nonexistent_order_returns_404() {
    let (app, _rx) = setup();
    let (status, _) = call(
        &app,
        get_request(&format!("/orders/{}", Uuid::new_v4()), Caller::new("admin")),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn speed_order_flow_from_plan_to_delivery() {
    let (app, _rx) = setup();
    let admin = Caller::new("admin");
    let owner_a = Caller::new("fuel_station");
    let rider_a = Caller::new("delivery_person");
    let user = Caller::new("user");
    initialise_platform(&app, admin).await;

    let station_a = approved_station(&app, admin, owner_a, "A", north(3.0), 100.0, 50.0).await;
    approved_station(&app, admin, Caller::new("fuel_station"), "B", north(-5.0), 95.0, 50.0).await;
    let person_a = verified_rider(&app, admin, rider_a, north(4.0)).await;
    verified_rider(&app, admin, Caller::new("delivery_person"), north(-5.2)).await;

    let (status, plan) = call(
        &app,
        json_request(
            "POST",
            "/dispatch/plan",
            user,
            json!({
                "location": requester_location(),
                "fuel_type": "petrol",
                "quantity": 5.0
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plan["station_id"], station_a.as_str());
    assert_eq!(plan["delivery_person_id"], person_a.as_str());
    assert_eq!(plan["routing_cost_km"], 4.0);
    assert_eq!(plan["pricing"]["total_amount"], 600.0);
    assert_eq!(plan["pricing"]["speed_charges"], 20.0);

    let (status, order) = call(
        &app,
        json_request(
            "POST",
            "/orders/speed",
            user,
            json!({
                "station_id": plan["station_id"],
                "delivery_person_id": plan["delivery_person_id"],
                "fuel_type": "petrol",
                "quantity": 5.0,
                "location": requester_location(),
                "payment_mode": "on_delivery"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "confirmed");
    assert_eq!(order["payment_status"], "pending");
    let order_id = order["id"].as_str().unwrap().to_string();

    let (status, waiting) = call(
        &app,
        get_request(&format!("/stations/{station_a}/orders"), owner_a),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(waiting["speed"].as_array().unwrap().len(), 1);
    assert_eq!(waiting["standard"].as_array().unwrap().len(), 0);

    let (status, station) = call(&app, get_request(&format!("/stations/{station_a}"), owner_a)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(station["petrol"]["litres"], 45.0);

    let (status, assignment) = call(
        &app,
        json_request("POST", &format!("/orders/{order_id}/assign"), owner_a, json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assignment["order"]["status"], "out_for_delivery");
    assert!(assignment["whatsapp_link"]
        .as_str()
        .unwrap()
        .starts_with("https://wa.me/919800000020?text="));

    let (status, delivered) = call(
        &app,
        request("POST", &format!("/orders/{order_id}/deliver"), Some(rider_a), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(delivered["status"], "delivered");
    assert_eq!(delivered["payment_status"], "paid");

    let (status, me) = call(&app, get_request("/delivery-persons/me", rider_a)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["status"], "available");

    let (status, mine) = call(&app, get_request("/orders", user)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn payment_confirmation_is_idempotent() {
    let (app, _rx) = setup();
    let admin = Caller::new("admin");
    let owner = Caller::new("fuel_station");
    let user = Caller::new("user");
    initialise_platform(&app, admin).await;
    let station_id = approved_station(&app, admin, owner, "A", north(3.0), 100.0, 50.0).await;
    let person_id = verified_rider(&app, admin, Caller::new("delivery_person"), north(4.0)).await;

    let (status, order) = call(
        &app,
        json_request(
            "POST",
            "/orders/speed",
            user,
            json!({
                "station_id": station_id,
                "delivery_person_id": person_id,
                "fuel_type": "petrol",
                "quantity": 5.0,
                "location": requester_location(),
                "payment_mode": "online"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = order["id"].as_str().unwrap().to_string();
    let payment_uri = format!("/orders/{order_id}/payment");

    let bad = request(
        "POST",
        &payment_uri,
        None,
        Some(json!({ "provider_ref": "pay_001", "signature_valid": false })),
    );
    let (status, body) = call(&app, bad).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "payment_verification_failed");

    let first = request(
        "POST",
        &payment_uri,
        None,
        Some(json!({ "provider_ref": "pay_001", "signature_valid": true })),
    );
    let (status, body) = call(&app, first).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "processed");
    assert_eq!(body["order"]["status"], "processing");

    let second = request(
        "POST",
        &payment_uri,
        None,
        Some(json!({ "provider_ref": "pay_002", "signature_valid": true })),
    );
    let (status, body) = call(&app, second).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_processed");
    assert_eq!(body["order"]["provider_ref"], "pay_001");

    let (_, station) = call(&app, get_request(&format!("/stations/{station_id}"), owner)).await;
    assert_eq!(station["petrol"]["litres"], 45.0);
}

#[tokio::test]
async fn standard_booking_is_assigned_by_the_station() {
    let (app, _rx) = setup();
    let admin = Caller::new("admin");
    let owner = Caller::new("fuel_station");
    let rider = Caller::new("delivery_person");
    let user = Caller::new("user");
    initialise_platform(&app, admin).await;
    let station_id = approved_station(&app, admin, owner, "A", north(3.0), 100.0, 50.0).await;
    let person_id = verified_rider(&app, admin, rider, north(4.0)).await;

    let (status, booking) = call(
        &app,
        json_request(
            "POST",
            "/bookings",
            user,
            json!({
                "station_id": station_id,
                "fuel_type": "petrol",
                "quantity": 4.0,
                "location": requester_location(),
                "address": "22nd Main"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["kind"], "standard");
    assert_eq!(booking["total_amount"], 400.0);
    let booking_id = booking["id"].as_str().unwrap().to_string();

    let (status, candidates) = call(
        &app,
        get_request(&format!("/orders/{booking_id}/candidates"), owner),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(candidates[0]["id"], person_id.as_str());

    let (status, assignment) = call(
        &app,
        json_request(
            "POST",
            &format!("/orders/{booking_id}/assign"),
            owner,
            json!({ "delivery_person_id": person_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assignment["order"]["delivery_person_id"], person_id.as_str());

    let (status, body) = call(
        &app,
        request("POST", &format!("/orders/{booking_id}/cancel"), Some(Caller::new("user")), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, cancelled) = call(
        &app,
        request("POST", &format!("/orders/{booking_id}/cancel"), Some(user), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (_, station) = call(&app, get_request(&format!("/stations/{station_id}"), owner)).await;
    assert_eq!(station["petrol"]["litres"], 50.0);
    let (_, me) = call(&app, get_request("/delivery-persons/me", rider)).await;
    assert_eq!(me["status"], "available");
}

#[tokio::test]
async fn approval_draws_from_platform_reserve() {
    let (app, _rx) = setup();
    let admin = Caller::new("admin");
    initialise_platform(&app, admin).await;
    approved_station(&app, admin, Caller::new("fuel_station"), "A", north(3.0), 100.0, 300.0)
        .await;

    let (status, settings) = call(&app, get_request("/admin/settings", admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["petrol"]["litres"], 700.0);
    assert_eq!(settings["station_requests"].as_array().unwrap().len(), 0);
}
