use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use rental_portal::config::AppConfig;
use rental_portal::db::{self, queries};
use rental_portal::models::{AuthUser, LoginResponse, Role};
use rental_portal::routes;
use rental_portal::services::api::{ApiRequest, ApiResponse, Transport};
use rental_portal::services::session::new_session;
use rental_portal::state::AppState;

// ── Fake Backend ──

/// Scripted stand-in for the rental REST backend. Each (method, path) has a
/// queue of answers; the last one repeats.
#[derive(Clone, Default)]
struct FakeBackend {
    routes: Arc<Mutex<HashMap<(String, String), VecDeque<(u16, Value)>>>>,
    requests: Arc<Mutex<Vec<ApiRequest>>>,
}

impl FakeBackend {
    fn on(&self, method: &str, path: &str, status: u16, body: Value) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back((status, body));
        self
    }

    fn calls(&self, method: &str, path: &str) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == method && r.path == path)
            .cloned()
            .collect()
    }

    fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn execute(&self, request: &ApiRequest) -> anyhow::Result<ApiResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let mut routes = self.routes.lock().unwrap();
        let key = (request.method.to_string(), request.path.clone());
        let (status, body) = match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => (404, json!({"message": format!("no route for {}", request.path)})),
        };
        Ok(ApiResponse { status, body })
    }
}

/// Holds back answers for one path, so a second request can arrive while
/// the first is still waiting on the backend.
struct SlowBackend {
    inner: FakeBackend,
    path: &'static str,
    delay: Duration,
}

#[async_trait]
impl Transport for SlowBackend {
    async fn execute(&self, request: &ApiRequest) -> anyhow::Result<ApiResponse> {
        if request.path == self.path {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.execute(request).await
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        api_base_url: "http://backend.test/api".to_string(),
        razorpay_key_id: "rzp_test_key".to_string(),
        checkout_name: "Rental".to_string(),
        checkout_theme_color: "#3399cc".to_string(),
        payment_redirect_delay_ms: 3000,
        session_ttl_hours: 24,
    }
}

fn test_state() -> (Arc<AppState>, FakeBackend) {
    let backend = FakeBackend::default();
    let conn = db::init_db(":memory:").unwrap();
    let state = Arc::new(AppState::new(conn, test_config(), Box::new(backend.clone())));
    (state, backend)
}

fn slow_state(path: &'static str) -> (Arc<AppState>, FakeBackend) {
    let backend = FakeBackend::default();
    let transport = SlowBackend {
        inner: backend.clone(),
        path,
        delay: Duration::from_millis(50),
    };
    let conn = db::init_db(":memory:").unwrap();
    let state = Arc::new(AppState::new(conn, test_config(), Box::new(transport)));
    (state, backend)
}

fn test_app(state: Arc<AppState>) -> Router {
    routes::app(state)
}

/// Stores a logged-in session directly and returns its id.
fn login_as(state: &AppState, role: Role) -> String {
    let session = new_session(
        LoginResponse {
            access_token: "access-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            user: AuthUser {
                id: format!("{}-1", role.as_str()),
                name: "Ravi".to_string(),
                role,
            },
        },
        24,
    );
    queries::create_session(&state.db.lock().unwrap(), &session).unwrap();
    session.id
}

fn request(method: &str, uri: &str, session: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(session) = session {
        builder = builder.header("Authorization", format!("Bearer {session}"));
    }
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, Value) {
    let res = test_app(state.clone()).oneshot(req).await.unwrap();
    let status = res.status();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn booking_json(id: &str, status: &str, total: f64) -> Value {
    json!({
        "_id": id,
        "bookingRef": format!("RNT-{id}"),
        "vehicle": {"_id": "V1", "name": "Swift Dzire"},
        "pickup": {"city": "Pune", "locationName": "Station", "dateTime": "2024-06-01T10:00:00Z"},
        "dropoff": {"city": "Pune", "locationName": "Airport", "dateTime": "2024-06-03T18:00:00Z"},
        "bookingType": "self-drive",
        "priceBreakdown": {
            "baseAmount": 6500, "taxes": 1000, "deposit": 0, "discount": 0,
            "totalPayable": total, "duration": {"days": 2, "hours": 8}
        },
        "status": status
    })
}

fn draft_form(dropoff: &str) -> Value {
    json!({
        "pickup": {"city": "Pune", "locationName": "Station"},
        "dropoff": {"city": "Pune", "locationName": "Airport"},
        "pickupDateTime": "2024-06-01T10:00",
        "dropoffDateTime": dropoff,
        "bookingType": "self-drive"
    })
}

fn quote_backend(backend: &FakeBackend, available: bool, total: f64) {
    backend.on(
        "POST",
        "/bookings/check-availability",
        200,
        json!({"available": available}),
    );
    backend.on(
        "POST",
        "/bookings/calculate-price",
        200,
        json!({"priceBreakdown": {
            "baseAmount": 6500, "taxes": 1000, "totalPayable": total,
            "duration": {"days": 2, "hours": 8}
        }}),
    );
}

fn order_backend(backend: &FakeBackend) {
    backend.on(
        "POST",
        "/payments/create-order",
        200,
        json!({
            "order": {"id": "order_1", "amount": 750000, "currency": "INR"},
            "payment": {"_id": "p1"}
        }),
    );
}

fn gateway_success(order_id: &str) -> Value {
    json!({
        "razorpay_order_id": order_id,
        "razorpay_payment_id": "pay_1",
        "razorpay_signature": "sig_1"
    })
}

// ── Health & Sessions ──

#[tokio::test]
async fn test_health() {
    let (state, _) = test_state();
    let (status, json) = send(&state, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_login_creates_session_used_for_backend_calls() {
    let (state, backend) = test_state();
    backend.on(
        "POST",
        "/auth/login",
        200,
        json!({
            "accessToken": "access-9",
            "refreshToken": "refresh-9",
            "user": {"_id": "u9", "name": "Asha", "role": "vendor"}
        }),
    );
    backend.on("GET", "/bookings", 200, json!([]));

    let (status, json) = send(
        &state,
        request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "asha@example.com", "password": "secret"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["role"], "vendor");
    let session_id = json["sessionId"].as_str().unwrap().to_string();

    let login = backend.calls("POST", "/auth/login");
    assert!(login[0].bearer.is_none());

    let (status, _) = send(&state, request("GET", "/api/bookings", Some(&session_id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        backend.calls("GET", "/bookings")[0].bearer.as_deref(),
        Some("access-9")
    );
}

#[tokio::test]
async fn test_login_rejected_shows_backend_message() {
    let (state, backend) = test_state();
    backend.on("POST", "/auth/login", 401, json!({"message": "Invalid credentials"}));

    let (status, json) = send(
        &state,
        request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "a@example.com", "password": "wrong"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Invalid credentials");
    // Only the login call itself; no refresh attempt without a token.
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let (state, _) = test_state();
    let session = login_as(&state, Role::Customer);

    let (status, _) = send(&state, request("POST", "/api/auth/logout", Some(&session), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&state, request("GET", "/api/bookings", Some(&session), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["redirect"], "/login");
}

#[tokio::test]
async fn test_requires_session() {
    let (state, backend) = test_state();
    let (status, _) = send(&state, request("GET", "/api/bookings", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&state, request("GET", "/api/bookings", Some("bogus"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(backend.call_count(), 0);
}

// ── Token Refresh ──

#[tokio::test]
async fn test_expired_token_is_refreshed_once() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    backend
        .on("GET", "/bookings", 401, json!({"message": "jwt expired"}))
        .on("GET", "/bookings", 200, json!({"bookings": [booking_json("b1", "confirmed", 7500.0)]}));
    backend.on("POST", "/auth/refresh-token", 200, json!({"accessToken": "access-2"}));

    let (status, json) = send(&state, request("GET", "/api/bookings", Some(&session), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);

    let calls = backend.calls("GET", "/bookings");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].bearer.as_deref(), Some("access-1"));
    assert_eq!(calls[1].bearer.as_deref(), Some("access-2"));

    let refresh = backend.calls("POST", "/auth/refresh-token");
    assert_eq!(refresh.len(), 1);
    assert_eq!(refresh[0].body.as_ref().unwrap()["refreshToken"], "refresh-1");

    let stored = queries::get_session(&state.db.lock().unwrap(), &session)
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("access-2"));
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn test_failed_refresh_logs_out() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    backend.on("GET", "/bookings", 401, json!({}));
    backend.on("POST", "/auth/refresh-token", 401, json!({"message": "invalid refresh token"}));

    let (status, json) = send(&state, request("GET", "/api/bookings", Some(&session), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["redirect"], "/login");
    assert_eq!(backend.call_count(), 2);

    // Credentials are gone; the next call is refused without reaching the backend.
    let (status, json) = send(&state, request("GET", "/api/bookings", Some(&session), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["redirect"], "/login");
    assert_eq!(backend.call_count(), 2);
}

// ── Availability, Pricing & Booking ──

#[tokio::test]
async fn test_unavailable_vehicle_cannot_be_booked() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    quote_backend(&backend, false, 7500.0);

    let (status, json) = send(
        &state,
        request(
            "PUT",
            "/api/vehicles/V1/draft",
            Some(&session),
            Some(draft_form("2024-06-03T18:00")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["available"], false);
    assert_eq!(json["bookEnabled"], false);
    assert!(json["error"].as_str().is_some());

    let availability = backend.calls("POST", "/bookings/check-availability");
    assert_eq!(availability.len(), 1);
    let body = availability[0].body.as_ref().unwrap();
    assert_eq!(body["vehicleId"], "V1");
    assert_eq!(body["pickupDateTime"], "2024-06-01T10:00:00");
    assert_eq!(body["dropoffDateTime"], "2024-06-03T18:00:00");

    let (status, _) = send(&state, request("POST", "/api/vehicles/V1/book", Some(&session), None)).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert!(backend.calls("POST", "/bookings").is_empty());
}

#[tokio::test]
async fn test_book_available_vehicle_hands_off_to_payment() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    quote_backend(&backend, true, 7500.0);
    backend.on("POST", "/bookings", 201, booking_json("b1", "pending_payment", 7500.0));

    let (_, json) = send(
        &state,
        request(
            "PUT",
            "/api/vehicles/V1/draft",
            Some(&session),
            Some(draft_form("2024-06-03T18:00")),
        ),
    )
    .await;
    assert_eq!(json["bookEnabled"], true);
    assert_eq!(json["priceBreakdown"]["totalPayable"], 7500.0);
    assert_eq!(json["duration"], "2 days 8 hours");

    let (status, json) = send(&state, request("POST", "/api/vehicles/V1/book", Some(&session), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["bookingId"], "b1");
    assert_eq!(json["amount"], 7500.0);
    assert_eq!(json["redirect"], "/payment");

    let created = backend.calls("POST", "/bookings");
    assert_eq!(created.len(), 1);
    let body = created[0].body.as_ref().unwrap();
    assert_eq!(body["vehicleId"], "V1");
    assert_eq!(body["bookingType"], "self-drive");
    assert_eq!(body["pickup"]["locationName"], "Station");
    assert!(body.get("promoCode").is_none());

    let recorded = queries::get_quoted_total(&state.db.lock().unwrap(), "b1").unwrap();
    assert_eq!(recorded, Some(7500.0));
}

#[tokio::test]
async fn test_booking_failure_shows_backend_message() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    quote_backend(&backend, true, 7500.0);
    backend.on(
        "POST",
        "/bookings",
        400,
        json!({"message": "Vehicle is not available for selected dates"}),
    );

    send(
        &state,
        request(
            "PUT",
            "/api/vehicles/V1/draft",
            Some(&session),
            Some(draft_form("2024-06-03T18:00")),
        ),
    )
    .await;

    let (status, json) = send(&state, request("POST", "/api/vehicles/V1/book", Some(&session), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Vehicle is not available for selected dates");

    // The form stays as it was and can be resubmitted.
    let (status, json) = send(&state, request("GET", "/api/vehicles/V1/draft", Some(&session), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["bookEnabled"], true);
}

#[tokio::test]
async fn test_concurrent_book_now_creates_one_booking() {
    let (state, backend) = slow_state("/bookings");
    let session = login_as(&state, Role::Customer);
    quote_backend(&backend, true, 7500.0);
    backend.on("POST", "/bookings", 201, booking_json("b1", "pending_payment", 7500.0));

    send(
        &state,
        request(
            "PUT",
            "/api/vehicles/V1/draft",
            Some(&session),
            Some(draft_form("2024-06-03T18:00")),
        ),
    )
    .await;

    let (first, second) = tokio::join!(
        send(&state, request("POST", "/api/vehicles/V1/book", Some(&session), None)),
        send(&state, request("POST", "/api/vehicles/V1/book", Some(&session), None)),
    );
    let mut statuses = [first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
    assert_eq!(backend.calls("POST", "/bookings").len(), 1);
}

#[tokio::test]
async fn test_failed_submission_releases_the_form() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    quote_backend(&backend, true, 7500.0);
    backend
        .on("POST", "/bookings", 500, json!({}))
        .on("POST", "/bookings", 201, booking_json("b1", "pending_payment", 7500.0));

    send(
        &state,
        request(
            "PUT",
            "/api/vehicles/V1/draft",
            Some(&session),
            Some(draft_form("2024-06-03T18:00")),
        ),
    )
    .await;

    let (status, _) = send(&state, request("POST", "/api/vehicles/V1/book", Some(&session), None)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (status, json) = send(&state, request("POST", "/api/vehicles/V1/book", Some(&session), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["bookingId"], "b1");
    assert_eq!(backend.calls("POST", "/bookings").len(), 2);
}

#[tokio::test]
async fn test_date_change_requests_fresh_quote() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    quote_backend(&backend, true, 7500.0);

    send(
        &state,
        request(
            "PUT",
            "/api/vehicles/V1/draft",
            Some(&session),
            Some(draft_form("2024-06-03T18:00")),
        ),
    )
    .await;

    // Same dates again: nothing new to ask.
    send(
        &state,
        request(
            "PUT",
            "/api/vehicles/V1/draft",
            Some(&session),
            Some(draft_form("2024-06-03T18:00")),
        ),
    )
    .await;
    assert_eq!(backend.calls("POST", "/bookings/check-availability").len(), 1);

    let (_, json) = send(
        &state,
        request(
            "PUT",
            "/api/vehicles/V1/draft",
            Some(&session),
            Some(draft_form("2024-06-04T18:00")),
        ),
    )
    .await;
    assert_eq!(json["bookEnabled"], true);

    let availability = backend.calls("POST", "/bookings/check-availability");
    let price = backend.calls("POST", "/bookings/calculate-price");
    assert_eq!(availability.len(), 2);
    assert_eq!(price.len(), 2);
    assert_eq!(
        availability[1].body.as_ref().unwrap()["dropoffDateTime"],
        "2024-06-04T18:00:00"
    );
    assert_eq!(
        price[1].body.as_ref().unwrap()["dropoffDateTime"],
        "2024-06-04T18:00:00"
    );
}

#[tokio::test]
async fn test_single_date_does_not_query() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);

    let mut form = draft_form("");
    form["dropoffDateTime"] = Value::Null;
    let (status, json) = send(
        &state,
        request("PUT", "/api/vehicles/V1/draft", Some(&session), Some(form)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["bookEnabled"], false);
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_availability_error_is_inline_and_gate_stays_closed() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    backend.on("POST", "/bookings/check-availability", 500, json!({}));
    backend.on(
        "POST",
        "/bookings/calculate-price",
        200,
        json!({"priceBreakdown": {"totalPayable": 7500}}),
    );

    let (status, json) = send(
        &state,
        request(
            "PUT",
            "/api/vehicles/V1/draft",
            Some(&session),
            Some(draft_form("2024-06-03T18:00")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["bookEnabled"], false);
    assert_eq!(json["error"], "Something went wrong. Please try again.");
    // No automatic retry.
    assert_eq!(backend.calls("POST", "/bookings/check-availability").len(), 1);
}

// ── Payment ──

async fn book_b1(state: &Arc<AppState>, backend: &FakeBackend, session: &str) {
    quote_backend(backend, true, 7500.0);
    backend.on("POST", "/bookings", 201, booking_json("b1", "pending_payment", 7500.0));
    send(
        state,
        request(
            "PUT",
            "/api/vehicles/V1/draft",
            Some(session),
            Some(draft_form("2024-06-03T18:00")),
        ),
    )
    .await;
    let (status, _) = send(state, request("POST", "/api/vehicles/V1/book", Some(session), None)).await;
    assert_eq!(status, StatusCode::OK);
    backend.on("GET", "/bookings/b1", 200, booking_json("b1", "pending_payment", 7500.0));
}

#[tokio::test]
async fn test_payment_without_booking_redirects_without_backend_call() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);

    let res = test_app(state.clone())
        .oneshot(request("POST", "/api/payments", Some(&session), Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()["location"], "/bookings");

    let res = test_app(state.clone())
        .oneshot(request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b1"})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_payment_succeeds_and_redirects_to_bookings() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    book_b1(&state, &backend, &session).await;
    order_backend(&backend);
    backend.on("POST", "/payments/verify", 200, json!({"success": true}));

    let (status, json) = send(
        &state,
        request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b1", "amount": 7500})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "awaiting_gateway");
    assert_eq!(json["payEnabled"], true);
    assert_eq!(json["checkout"]["order_id"], "order_1");
    assert_eq!(json["checkout"]["amount"], 750000);
    assert_eq!(json["checkout"]["key"], "rzp_test_key");

    let orders = backend.calls("POST", "/payments/create-order");
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].body.as_ref().unwrap()["bookingId"], "b1");
    assert_eq!(orders[0].body.as_ref().unwrap()["amount"], 7500.0);
    // Status is re-read; the total comes from the one recorded at booking time.
    assert_eq!(backend.calls("GET", "/bookings/b1").len(), 1);

    let (status, json) = send(
        &state,
        request(
            "POST",
            "/api/payments/b1/success",
            Some(&session),
            Some(gateway_success("order_1")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "succeeded");
    assert_eq!(json["redirectTo"], "/bookings");
    assert_eq!(json["redirectAfterMs"], 3000);

    let verify = backend.calls("POST", "/payments/verify");
    assert_eq!(verify.len(), 1);
    let body = verify[0].body.as_ref().unwrap();
    assert_eq!(body["razorpay_order_id"], "order_1");
    assert_eq!(body["razorpay_payment_id"], "pay_1");
    assert_eq!(body["razorpay_signature"], "sig_1");
    assert_eq!(body["paymentId"], "p1");
}

#[tokio::test]
async fn test_repeated_success_callback_sends_one_verification() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    book_b1(&state, &backend, &session).await;
    order_backend(&backend);
    backend.on("POST", "/payments/verify", 200, json!({"success": true}));

    send(
        &state,
        request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b1", "amount": 7500})),
        ),
    )
    .await;

    let first = send(
        &state,
        request("POST", "/api/payments/b1/success", Some(&session), Some(gateway_success("order_1"))),
    )
    .await;
    let second = send(
        &state,
        request("POST", "/api/payments/b1/success", Some(&session), Some(gateway_success("order_1"))),
    )
    .await;
    assert_eq!(first.0, StatusCode::OK);
    assert_eq!(second.0, StatusCode::CONFLICT);
    assert_eq!(backend.calls("POST", "/payments/verify").len(), 1);

    // A paid booking cannot start another order either.
    let (status, _) = send(
        &state,
        request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b1", "amount": 7500})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(backend.calls("POST", "/payments/create-order").len(), 1);
}

#[tokio::test]
async fn test_success_callback_before_order_is_rejected() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);

    let (status, _) = send(
        &state,
        request("POST", "/api/payments/b1/success", Some(&session), Some(gateway_success("order_1"))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(backend.calls("POST", "/payments/verify").is_empty());
}

#[tokio::test]
async fn test_verification_failure_is_retryable() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    book_b1(&state, &backend, &session).await;
    order_backend(&backend);
    backend.on("POST", "/payments/verify", 200, json!({"success": false}));

    send(
        &state,
        request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b1", "amount": 7500})),
        ),
    )
    .await;
    let (status, json) = send(
        &state,
        request("POST", "/api/payments/b1/success", Some(&session), Some(gateway_success("order_1"))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "failed");
    assert_eq!(json["message"], "Payment verification failed");
    assert_eq!(json["payEnabled"], true);
    assert!(json.get("redirectTo").is_none());

    // Retrying asks for a fresh order.
    let (status, json) = send(
        &state,
        request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b1", "amount": 7500})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "awaiting_gateway");
    assert_eq!(backend.calls("POST", "/payments/create-order").len(), 2);
}

#[tokio::test]
async fn test_verification_rejection_shows_backend_message() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    book_b1(&state, &backend, &session).await;
    order_backend(&backend);
    backend.on("POST", "/payments/verify", 400, json!({"message": "Invalid payment signature"}));

    send(
        &state,
        request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b1", "amount": 7500})),
        ),
    )
    .await;
    let (_, json) = send(
        &state,
        request("POST", "/api/payments/b1/success", Some(&session), Some(gateway_success("order_1"))),
    )
    .await;
    assert_eq!(json["state"], "failed");
    assert_eq!(json["message"], "Invalid payment signature");

    let (status, json) = send(&state, request("GET", "/api/payments/b1", Some(&session), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "failed");
}

#[tokio::test]
async fn test_gateway_failure_uses_description() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    book_b1(&state, &backend, &session).await;
    order_backend(&backend);

    send(
        &state,
        request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b1", "amount": 7500})),
        ),
    )
    .await;
    let (status, json) = send(
        &state,
        request(
            "POST",
            "/api/payments/b1/failure",
            Some(&session),
            Some(json!({"description": "Card declined by issuer"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "failed");
    assert_eq!(json["message"], "Card declined by issuer");
    assert!(backend.calls("POST", "/payments/verify").is_empty());
}

#[tokio::test]
async fn test_order_creation_failure_is_shown() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    book_b1(&state, &backend, &session).await;
    backend.on("POST", "/payments/create-order", 400, json!({"message": "Booking already paid"}));

    let (status, json) = send(
        &state,
        request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b1", "amount": 7500})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "failed");
    assert_eq!(json["message"], "Booking already paid");
    assert!(json.get("checkout").is_none());
}

#[tokio::test]
async fn test_amount_must_match_booking_total() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    book_b1(&state, &backend, &session).await;
    order_backend(&backend);

    let (status, _) = send(
        &state,
        request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b1", "amount": 1})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert!(backend.calls("POST", "/payments/create-order").is_empty());
}

#[tokio::test]
async fn test_unrecorded_booking_total_is_fetched() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    backend.on("GET", "/bookings/b7", 200, booking_json("b7", "pending_payment", 4200.0));
    order_backend(&backend);

    let (status, json) = send(
        &state,
        request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b7", "amount": 4200})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "awaiting_gateway");
    assert_eq!(backend.calls("GET", "/bookings/b7").len(), 1);
    assert_eq!(
        backend.calls("POST", "/payments/create-order")[0].body.as_ref().unwrap()["amount"],
        4200.0
    );
}

#[tokio::test]
async fn test_recorded_total_does_not_reopen_paid_booking() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    // A total recorded before a restart; the booking has since been paid.
    queries::record_quoted_total(&state.db.lock().unwrap(), "b1", &session, 7500.0).unwrap();
    backend.on("GET", "/bookings/b1", 200, booking_json("b1", "confirmed", 7500.0));
    order_backend(&backend);

    let (status, json) = send(
        &state,
        request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b1", "amount": 7500})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(json["error"], "Booking is confirmed and cannot be paid.");
    assert!(backend.calls("POST", "/payments/create-order").is_empty());
}

#[tokio::test]
async fn test_settled_payment_is_forgotten_after_status_read() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    book_b1(&state, &backend, &session).await;
    order_backend(&backend);
    backend.on("POST", "/payments/verify", 200, json!({"success": true}));

    send(
        &state,
        request(
            "POST",
            "/api/payments",
            Some(&session),
            Some(json!({"bookingId": "b1", "amount": 7500})),
        ),
    )
    .await;
    send(
        &state,
        request("POST", "/api/payments/b1/success", Some(&session), Some(gateway_success("order_1"))),
    )
    .await;

    let (status, json) = send(&state, request("GET", "/api/payments/b1", Some(&session), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "succeeded");
    assert!(state.payments.is_empty());

    let (status, _) = send(&state, request("GET", "/api/payments/b1", Some(&session), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_purge_forgets_drafts_of_expired_sessions() {
    let (state, backend) = test_state();
    let live = login_as(&state, Role::Customer);
    quote_backend(&backend, true, 7500.0);
    send(
        &state,
        request(
            "PUT",
            "/api/vehicles/V1/draft",
            Some(&live),
            Some(draft_form("2024-06-03T18:00")),
        ),
    )
    .await;

    let stale = login_as(&state, Role::Customer);
    send(
        &state,
        request(
            "PUT",
            "/api/vehicles/V2/draft",
            Some(&stale),
            Some(draft_form("2024-06-03T18:00")),
        ),
    )
    .await;
    assert_eq!(state.drafts.lock().unwrap().len(), 2);

    state
        .db
        .lock()
        .unwrap()
        .execute(
            "UPDATE sessions SET expires_at = '2000-01-01 00:00:00' WHERE id = ?1",
            [&stale],
        )
        .unwrap();

    assert_eq!(state.purge_expired_sessions().unwrap(), 1);
    let drafts = state.drafts.lock().unwrap();
    assert_eq!(drafts.len(), 1);
    assert!(drafts.contains_key(&(live.clone(), "V1".to_string())));
}

#[tokio::test]
async fn test_payment_page_is_served() {
    let (state, _) = test_state();
    let res = test_app(state)
        .oneshot(request("GET", "/payment", None, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&body).contains("checkout.razorpay.com"));
}

// ── Booking Lists & Status Transitions ──

#[tokio::test]
async fn test_customer_list_has_one_row_per_booking() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    backend.on(
        "GET",
        "/bookings?status=pending_payment",
        200,
        json!([
            booking_json("b1", "pending_payment", 7500.0),
            booking_json("b1", "pending_payment", 7500.0),
        ]),
    );

    let (status, json) = send(
        &state,
        request("GET", "/api/bookings?status=pending_payment", Some(&session), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["statusLabel"], "Pending Payment");
    assert_eq!(rows[0]["payNow"]["amount"], 7500.0);
    assert!(rows[0]["actions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_status_filter_is_rejected() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);
    let (status, _) = send(
        &state,
        request("GET", "/api/bookings?status=lost", Some(&session), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_vendor_checks_out_confirmed_booking() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Vendor);
    backend
        .on("GET", "/bookings", 200, json!([booking_json("b1", "confirmed", 7500.0)]))
        .on("GET", "/bookings", 200, json!([booking_json("b1", "checked_out", 7500.0)]));
    backend.on("PATCH", "/bookings/b1/status", 200, booking_json("b1", "checked_out", 7500.0));

    let (status, json) = send(&state, request("GET", "/api/dashboard/bookings", Some(&session), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[0]["actions"][0]["status"], "checked_out");
    assert_eq!(json[0]["actions"][0]["label"], "Check Out");

    let (status, json) = send(
        &state,
        request(
            "PATCH",
            "/api/dashboard/bookings/b1/status",
            Some(&session),
            Some(json!({"status": "checked_out", "from": "confirmed"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["booking"]["status"], "checked_out");
    assert_eq!(json["bookings"][0]["status"], "checked_out");
    assert_eq!(json["bookings"][0]["actions"][0]["status"], "in_progress");

    let patches = backend.calls("PATCH", "/bookings/b1/status");
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].body.as_ref().unwrap(), &json!({"status": "checked_out"}));
    assert_eq!(backend.calls("GET", "/bookings").len(), 2);
}

#[tokio::test]
async fn test_vendor_cannot_skip_trip_states() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Vendor);

    let (status, _) = send(
        &state,
        request(
            "PATCH",
            "/api/dashboard/bookings/b1/status",
            Some(&session),
            Some(json!({"status": "completed", "from": "confirmed"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &state,
        request(
            "PATCH",
            "/api/dashboard/bookings/b1/status",
            Some(&session),
            Some(json!({"status": "cancelled"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_admin_cancels_booking() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Admin);
    backend.on("PATCH", "/bookings/b1/status", 200, booking_json("b1", "cancelled", 7500.0));
    backend.on("GET", "/bookings", 200, json!([booking_json("b1", "cancelled", 7500.0)]));

    let (status, json) = send(
        &state,
        request(
            "PATCH",
            "/api/dashboard/bookings/b1/status",
            Some(&session),
            Some(json!({"status": "cancelled", "from": "in_progress"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["booking"]["statusLabel"], "Cancelled");
    assert!(json["booking"]["actions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_transition_surfaces_error() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Vendor);
    backend.on(
        "PATCH",
        "/bookings/b1/status",
        400,
        json!({"message": "Invalid status transition"}),
    );

    let (status, json) = send(
        &state,
        request(
            "PATCH",
            "/api/dashboard/bookings/b1/status",
            Some(&session),
            Some(json!({"status": "in_progress"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid status transition");
    assert!(backend.calls("GET", "/bookings").is_empty());
}

#[tokio::test]
async fn test_customer_has_no_dashboard() {
    let (state, backend) = test_state();
    let session = login_as(&state, Role::Customer);

    let (status, _) = send(&state, request("GET", "/api/dashboard/bookings", Some(&session), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(
        &state,
        request(
            "PATCH",
            "/api/dashboard/bookings/b1/status",
            Some(&session),
            Some(json!({"status": "cancelled"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(backend.call_count(), 0);
}
