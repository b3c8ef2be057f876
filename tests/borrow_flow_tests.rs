// tests/borrow_flow_tests.rs

use lendhub::{config::Config, realtime::RealtimeHub, routes, state::AppState};
use sqlx::postgres::PgPoolOptions;

async fn spawn_app() -> String {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: database_url.clone(),
        jwt_secret: "borrow_test_secret".to_string(),
        jwt_expiration: 600,
        refresh_expiration: 3600,
        rust_log: "error".to_string(),
        admin_email: None,
        admin_password: None,
    };

    let state = AppState {
        pool,
        config,
        hub: RealtimeHub::new(),
    };
    let app = routes::create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    address
}

/// Registers a fresh user and returns (access_token, user_id).
async fn register_user(client: &reqwest::Client, address: &str) -> (String, i64) {
    let tag = &uuid::Uuid::new_v4().to_string()[..8];
    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "email": format!("u_{}@example.com", tag),
            "username": format!("u_{}", tag),
            "password": "password123",
        }))
        .send()
        .await
        .expect("Register failed");
    assert_eq!(response.status().as_u16(), 201);

    let body: serde_json::Value = response.json().await.unwrap();
    let token = body["data"]["access_token"].as_str().unwrap().to_string();
    let user_id = body["data"]["user"]["id"].as_i64().unwrap();
    (token, user_id)
}

async fn create_resource(client: &reqwest::Client, address: &str, token: &str) -> i64 {
    let response = client
        .post(format!("{}/api/resources", address))
        .bearer_auth(token)
        .json(&serde_json::json!({
            "title": "Cordless drill",
            "description": "18V drill with two batteries",
            "category": "tools",
            "max_borrow_days": 30,
        }))
        .send()
        .await
        .expect("Create resource failed");
    assert_eq!(response.status().as_u16(), 201);

    let body: serde_json::Value = response.json().await.unwrap();
    body["data"]["id"].as_i64().unwrap()
}

fn future_date(days_ahead: i64) -> String {
    (chrono::Utc::now().date_naive() + chrono::Duration::days(days_ahead))
        .format("%Y-%m-%d")
        .to_string()
}

async fn request_borrow(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    resource_id: i64,
    start_offset: i64,
    end_offset: i64,
) -> reqwest::Response {
    client
        .post(format!("{}/api/borrow-requests", address))
        .bearer_auth(token)
        .json(&serde_json::json!({
            "resource_id": resource_id,
            "start_date": future_date(start_offset),
            "end_date": future_date(end_offset),
        }))
        .send()
        .await
        .expect("Borrow request failed")
}

async fn transition(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    request_id: i64,
    action: &str,
) -> reqwest::Response {
    client
        .put(format!("{}/api/borrow-requests/{}/{}", address, request_id, action))
        .bearer_auth(token)
        .json(&serde_json::json!({}))
        .send()
        .await
        .expect("Transition failed")
}

async fn resource_availability(
    client: &reqwest::Client,
    address: &str,
    resource_id: i64,
) -> bool {
    let body: serde_json::Value = client
        .get(format!("{}/api/resources/{}", address, resource_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["data"]["resource"]["is_available"].as_bool().unwrap()
}

#[tokio::test]
async fn full_borrow_and_review_cycle() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (owner_token, owner_id) = register_user(&client, &address).await;
    let (borrower_token, _) = register_user(&client, &address).await;
    let resource_id = create_resource(&client, &address, &owner_token).await;

    // Borrower requests → pending.
    let response = request_borrow(&client, &address, &borrower_token, resource_id, 5, 9).await;
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    let request_id = body["data"]["id"].as_i64().unwrap();
    assert_eq!(body["data"]["status"], "pending");

    // Owner approves → approved, resource unavailable.
    let response = transition(&client, &address, &owner_token, request_id, "approve").await;
    assert_eq!(response.status().as_u16(), 200);
    assert!(!resource_availability(&client, &address, resource_id).await);

    // Approving twice fails with Conflict.
    let response = transition(&client, &address, &owner_token, request_id, "approve").await;
    assert_eq!(response.status().as_u16(), 409);

    // Owner marks pickup → active.
    let response = transition(&client, &address, &owner_token, request_id, "pickup").await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["status"], "active");

    // Owner processes return → returned, resource available again.
    let response = transition(&client, &address, &owner_token, request_id, "return").await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["status"], "returned");
    assert!(resource_availability(&client, &address, resource_id).await);

    // Borrower reviews the owner once — succeeds.
    let review = serde_json::json!({
        "reviewee_id": owner_id,
        "borrow_request_id": request_id,
        "direction": "borrower_to_owner",
        "rating": 5,
    });
    let response = client
        .post(format!("{}/api/reviews", address))
        .bearer_auth(&borrower_token)
        .json(&review)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    // A second identical review call → Conflict.
    let response = client
        .post(format!("{}/api/reviews", address))
        .bearer_auth(&borrower_token)
        .json(&review)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    // The reviewee's aggregate reflects the single 5-star review.
    let body: serde_json::Value = client
        .get(format!("{}/api/users/{}", address, owner_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["average_rating"].as_f64().unwrap(), 5.0);
    assert_eq!(body["data"]["total_ratings"].as_i64().unwrap(), 1);
}

#[tokio::test]
async fn unanchored_review_is_unique_per_pair() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (reviewer_token, _) = register_user(&client, &address).await;
    let (_, reviewee_id) = register_user(&client, &address).await;

    // A review with no borrow request attached.
    let review = serde_json::json!({
        "reviewee_id": reviewee_id,
        "direction": "borrower_to_owner",
        "rating": 4,
    });
    let response = client
        .post(format!("{}/api/reviews", address))
        .bearer_auth(&reviewer_token)
        .json(&review)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    // A second unanchored review of the same user → Conflict.
    let response = client
        .post(format!("{}/api/reviews", address))
        .bearer_auth(&reviewer_token)
        .json(&review)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    // The aggregate counted the review exactly once.
    let body: serde_json::Value = client
        .get(format!("{}/api/users/{}", address, reviewee_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["total_ratings"].as_i64().unwrap(), 1);
    assert_eq!(body["data"]["average_rating"].as_f64().unwrap(), 4.0);
}

#[tokio::test]
async fn overlapping_request_against_pending_is_rejected() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (owner_token, _) = register_user(&client, &address).await;
    let (b_token, _) = register_user(&client, &address).await;
    let (c_token, _) = register_user(&client, &address).await;
    let resource_id = create_resource(&client, &address, &owner_token).await;

    // B requests days 10..15 → pending.
    let response = request_borrow(&client, &address, &b_token, resource_id, 10, 15).await;
    assert_eq!(response.status().as_u16(), 201);

    // C requests 12..20 while B's request is still pending → Conflict.
    let response = request_borrow(&client, &address, &c_token, resource_id, 12, 20).await;
    assert_eq!(response.status().as_u16(), 409);

    // C requests a disjoint gap → succeeds.
    let response = request_borrow(&client, &address, &c_token, resource_id, 20, 25).await;
    assert_eq!(response.status().as_u16(), 201);
}

#[tokio::test]
async fn self_borrow_is_rejected() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (owner_token, _) = register_user(&client, &address).await;
    let resource_id = create_resource(&client, &address, &owner_token).await;

    let response = request_borrow(&client, &address, &owner_token, resource_id, 5, 9).await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn cancelling_approved_request_restores_availability() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (owner_token, _) = register_user(&client, &address).await;
    let (borrower_token, _) = register_user(&client, &address).await;
    let resource_id = create_resource(&client, &address, &owner_token).await;

    let response = request_borrow(&client, &address, &borrower_token, resource_id, 5, 9).await;
    let body: serde_json::Value = response.json().await.unwrap();
    let request_id = body["data"]["id"].as_i64().unwrap();

    transition(&client, &address, &owner_token, request_id, "approve").await;
    assert!(!resource_availability(&client, &address, resource_id).await);

    // Requester cancels the approved request.
    let response = transition(&client, &address, &borrower_token, request_id, "cancel").await;
    assert_eq!(response.status().as_u16(), 200);
    assert!(resource_availability(&client, &address, resource_id).await);
}

#[tokio::test]
async fn cancelling_pending_request_leaves_availability_untouched() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (owner_token, _) = register_user(&client, &address).await;
    let (borrower_token, _) = register_user(&client, &address).await;
    let resource_id = create_resource(&client, &address, &owner_token).await;

    let response = request_borrow(&client, &address, &borrower_token, resource_id, 5, 9).await;
    let body: serde_json::Value = response.json().await.unwrap();
    let request_id = body["data"]["id"].as_i64().unwrap();

    let response = transition(&client, &address, &borrower_token, request_id, "cancel").await;
    assert_eq!(response.status().as_u16(), 200);
    assert!(resource_availability(&client, &address, resource_id).await);
}

#[tokio::test]
async fn non_party_cannot_transition() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (owner_token, _) = register_user(&client, &address).await;
    let (borrower_token, _) = register_user(&client, &address).await;
    let (outsider_token, _) = register_user(&client, &address).await;
    let resource_id = create_resource(&client, &address, &owner_token).await;

    let response = request_borrow(&client, &address, &borrower_token, resource_id, 5, 9).await;
    let body: serde_json::Value = response.json().await.unwrap();
    let request_id = body["data"]["id"].as_i64().unwrap();

    let response = transition(&client, &address, &outsider_token, request_id, "approve").await;
    assert_eq!(response.status().as_u16(), 401);

    // The borrower cannot approve their own request either.
    let response = transition(&client, &address, &borrower_token, request_id, "approve").await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn invalid_dates_are_rejected() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (owner_token, _) = register_user(&client, &address).await;
    let (borrower_token, _) = register_user(&client, &address).await;
    let resource_id = create_resource(&client, &address, &owner_token).await;

    // Start date in the past.
    let response = client
        .post(format!("{}/api/borrow-requests", address))
        .bearer_auth(&borrower_token)
        .json(&serde_json::json!({
            "resource_id": resource_id,
            "start_date": "2020-01-01",
            "end_date": "2020-01-05",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    // End date before start date.
    let response = request_borrow(&client, &address, &borrower_token, resource_id, 9, 5).await;
    assert_eq!(response.status().as_u16(), 400);
}
