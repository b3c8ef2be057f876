// tests/auth_tests.rs

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
        jwt_secret: "auth_test_secret".to_string(),
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

fn unique_tag() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

#[tokio::test]
async fn register_login_and_refresh() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let tag = unique_tag();

    let credentials = serde_json::json!({
        "email": format!("a_{}@example.com", tag),
        "username": format!("a_{}", tag),
        "password": "password123",
    });

    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&credentials)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["success"].as_bool().unwrap());
    assert!(body["data"]["access_token"].is_string());
    assert!(body["data"]["refresh_token"].is_string());
    // The password hash never leaves the server.
    assert!(body["data"]["user"]["password"].is_null());

    // Duplicate registration conflicts.
    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&credentials)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    // Login with the right password.
    let response = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({
            "email": format!("a_{}@example.com", tag),
            "password": "password123",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let access_token = body["data"]["access_token"].as_str().unwrap().to_string();
    let refresh_token = body["data"]["refresh_token"].as_str().unwrap().to_string();

    // Wrong password is rejected.
    let response = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({
            "email": format!("a_{}@example.com", tag),
            "password": "wrong-password",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    // Refresh issues a new token pair.
    let response = client
        .post(format!("{}/api/auth/refresh", address))
        .json(&serde_json::json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["data"]["access_token"].is_string());

    // An access token is not accepted as a refresh token.
    let response = client
        .post(format!("{}/api/auth/refresh", address))
        .json(&serde_json::json!({ "refresh_token": access_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn protected_routes_require_token() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/users/me", address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = client
        .get(format!("{}/api/users/me", address))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn profile_update_sanitizes_bio() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let tag = unique_tag();

    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "email": format!("p_{}@example.com", tag),
            "username": format!("p_{}", tag),
            "password": "password123",
        }))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    let token = body["data"]["access_token"].as_str().unwrap().to_string();

    let response = client
        .put(format!("{}/api/users/me", address))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "bio": "I lend tools <script>alert('x')</script> on weekends",
            "location": "Springfield",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let bio = body["data"]["bio"].as_str().unwrap();
    assert!(!bio.contains("<script>"));
    assert_eq!(body["data"]["location"], "Springfield");
}

#[tokio::test]
async fn admin_routes_reject_regular_users() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let tag = unique_tag();

    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "email": format!("r_{}@example.com", tag),
            "username": format!("r_{}", tag),
            "password": "password123",
        }))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    let token = body["data"]["access_token"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/api/admin/borrow-requests/overdue", address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
}
