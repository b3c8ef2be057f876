// tests/chat_tests.rs

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
        jwt_secret: "chat_test_secret".to_string(),
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

async fn register_user(client: &reqwest::Client, address: &str) -> (String, i64) {
    let tag = &uuid::Uuid::new_v4().to_string()[..8];
    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "email": format!("c_{}@example.com", tag),
            "username": format!("c_{}", tag),
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

async fn open_chat(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    other_id: i64,
) -> reqwest::Response {
    client
        .post(format!("{}/api/chats", address))
        .bearer_auth(token)
        .json(&serde_json::json!({ "user_id": other_id }))
        .send()
        .await
        .expect("Open chat failed")
}

async fn send_message(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    chat_id: i64,
    content: &str,
) -> reqwest::Response {
    client
        .post(format!("{}/api/chats/{}/messages", address, chat_id))
        .bearer_auth(token)
        .json(&serde_json::json!({ "content": content }))
        .send()
        .await
        .expect("Send message failed")
}

#[tokio::test]
async fn create_or_get_returns_one_row_per_pair() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (a_token, a_id) = register_user(&client, &address).await;
    let (b_token, b_id) = register_user(&client, &address).await;

    // First open creates.
    let response = open_chat(&client, &address, &a_token, b_id).await;
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    let chat_id = body["data"]["id"].as_i64().unwrap();

    // Opening again — from either side — returns the same chat with 200.
    let response = open_chat(&client, &address, &a_token, b_id).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["id"].as_i64().unwrap(), chat_id);

    let response = open_chat(&client, &address, &b_token, a_id).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["id"].as_i64().unwrap(), chat_id);
}

#[tokio::test]
async fn self_chat_is_rejected() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (token, user_id) = register_user(&client, &address).await;
    let response = open_chat(&client, &address, &token, user_id).await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn non_participant_sees_not_found() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (a_token, _) = register_user(&client, &address).await;
    let (_, b_id) = register_user(&client, &address).await;
    let (outsider_token, _) = register_user(&client, &address).await;

    let response = open_chat(&client, &address, &a_token, b_id).await;
    let body: serde_json::Value = response.json().await.unwrap();
    let chat_id = body["data"]["id"].as_i64().unwrap();

    // Existence is not disclosed: 404, not 401.
    let response = send_message(&client, &address, &outsider_token, chat_id, "hi").await;
    assert_eq!(response.status().as_u16(), 404);

    let response = client
        .get(format!("{}/api/chats/{}/messages", address, chat_id))
        .bearer_auth(&outsider_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn unread_counters_track_reads() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (a_token, a_id) = register_user(&client, &address).await;
    let (b_token, b_id) = register_user(&client, &address).await;

    let response = open_chat(&client, &address, &a_token, b_id).await;
    let body: serde_json::Value = response.json().await.unwrap();
    let chat_id = body["data"]["id"].as_i64().unwrap();

    send_message(&client, &address, &a_token, chat_id, "first").await;
    send_message(&client, &address, &a_token, chat_id, "second").await;

    // B has two unread; the counter field depends on which slot B occupies.
    let body: serde_json::Value = client
        .get(format!("{}/api/chats", address))
        .bearer_auth(&b_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let chat = &body["data"]["items"][0];
    let b_is_user1 = chat["user1_id"].as_i64().unwrap() == b_id;
    let unread = if b_is_user1 {
        chat["user1_unread_count"].as_i64().unwrap()
    } else {
        chat["user2_unread_count"].as_i64().unwrap()
    };
    assert_eq!(unread, 2);

    // Fetching the messages marks them read.
    let response = client
        .get(format!("{}/api/chats/{}/messages", address, chat_id))
        .bearer_auth(&b_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: serde_json::Value = client
        .get(format!("{}/api/chats", address))
        .bearer_auth(&b_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let chat = &body["data"]["items"][0];
    let unread = if b_is_user1 {
        chat["user1_unread_count"].as_i64().unwrap()
    } else {
        chat["user2_unread_count"].as_i64().unwrap()
    };
    assert_eq!(unread, 0);

    // A's own unread count stayed zero throughout.
    let a_is_user1 = chat["user1_id"].as_i64().unwrap() == a_id;
    let a_unread = if a_is_user1 {
        chat["user1_unread_count"].as_i64().unwrap()
    } else {
        chat["user2_unread_count"].as_i64().unwrap()
    };
    assert_eq!(a_unread, 0);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (a_token, _) = register_user(&client, &address).await;
    let (_, b_id) = register_user(&client, &address).await;

    let response = open_chat(&client, &address, &a_token, b_id).await;
    let body: serde_json::Value = response.json().await.unwrap();
    let chat_id = body["data"]["id"].as_i64().unwrap();

    let response = send_message(&client, &address, &a_token, chat_id, "   ").await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn deleting_last_message_clears_preview() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (a_token, _) = register_user(&client, &address).await;
    let (_, b_id) = register_user(&client, &address).await;

    let response = open_chat(&client, &address, &a_token, b_id).await;
    let body: serde_json::Value = response.json().await.unwrap();
    let chat_id = body["data"]["id"].as_i64().unwrap();

    let response = send_message(&client, &address, &a_token, chat_id, "only one").await;
    let body: serde_json::Value = response.json().await.unwrap();
    let message_id = body["data"]["id"].as_i64().unwrap();

    let response = client
        .delete(format!("{}/api/messages/{}", address, message_id))
        .bearer_auth(&a_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    // No visible message survives, so the denormalized preview is gone too.
    let body: serde_json::Value = client
        .get(format!("{}/api/chats?include_archived=true", address))
        .bearer_auth(&a_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let chat = &body["data"]["items"][0];
    assert!(chat["last_message_preview"].is_null());
    assert!(chat["last_message_at"].is_null());
}

#[tokio::test]
async fn message_deletion_is_hidden_from_outsiders() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (a_token, _) = register_user(&client, &address).await;
    let (b_token, b_id) = register_user(&client, &address).await;
    let (outsider_token, _) = register_user(&client, &address).await;

    let response = open_chat(&client, &address, &a_token, b_id).await;
    let body: serde_json::Value = response.json().await.unwrap();
    let chat_id = body["data"]["id"].as_i64().unwrap();

    let response = send_message(&client, &address, &a_token, chat_id, "hello").await;
    let body: serde_json::Value = response.json().await.unwrap();
    let message_id = body["data"]["id"].as_i64().unwrap();

    // A non-participant gets 404, same as every other chat path.
    let response = client
        .delete(format!("{}/api/messages/{}", address, message_id))
        .bearer_auth(&outsider_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    // The other participant may see it but not delete it.
    let response = client
        .delete(format!("{}/api/messages/{}", address, message_id))
        .bearer_auth(&b_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn rapid_messages_collapse_into_one_notification() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let (a_token, _) = register_user(&client, &address).await;
    let (b_token, b_id) = register_user(&client, &address).await;

    let response = open_chat(&client, &address, &a_token, b_id).await;
    let body: serde_json::Value = response.json().await.unwrap();
    let chat_id = body["data"]["id"].as_i64().unwrap();

    for content in ["one", "two", "three"] {
        let response = send_message(&client, &address, &a_token, chat_id, content).await;
        assert_eq!(response.status().as_u16(), 201);
    }

    // B's inbox holds a single deduplicated chat notification with the
    // latest preview and a running count.
    let body: serde_json::Value = client
        .get(format!("{}/api/notifications?kind=new_message", address))
        .bearer_auth(&b_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["body"], "three");
    assert_eq!(items[0]["metadata"]["message_count"].as_i64().unwrap(), 3);
}
