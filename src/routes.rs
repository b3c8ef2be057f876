// src/routes.rs

use axum::{
    Router, http::Method, middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{auth, borrow_requests, chats, notifications, resources, reviews, users},
    realtime,
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, resources, borrow requests, chats,
///   reviews, notifications, admin, realtime).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (pool, config, realtime hub).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let require_auth = middleware::from_fn_with_state(state.clone(), auth_middleware);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh));

    let user_routes = Router::new()
        .route("/{id}", get(users::get_profile))
        .merge(
            Router::new()
                .route("/me", get(users::me).put(users::update_me))
                .layer(require_auth.clone()),
        );

    let resource_routes = Router::new()
        .route("/", get(resources::list_resources))
        .route("/search", get(resources::list_resources))
        .route("/nearby", get(resources::nearby_resources))
        .route("/{id}", get(resources::get_resource))
        .route("/{id}/photos", get(resources::list_photos))
        .merge(
            Router::new()
                .route("/", post(resources::create_resource))
                .route(
                    "/{id}",
                    put(resources::update_resource).delete(resources::delete_resource),
                )
                .route("/{id}/photos", post(resources::add_photo))
                .route("/{id}/photos/{photo_id}", delete(resources::delete_photo))
                .route(
                    "/{id}/photos/{photo_id}/primary",
                    put(resources::set_primary_photo),
                )
                .layer(require_auth.clone()),
        );

    let borrow_routes = Router::new()
        .route(
            "/",
            get(borrow_requests::list_borrow_requests).post(borrow_requests::create_borrow_request),
        )
        .route("/stats", get(borrow_requests::stats))
        .route("/{id}", get(borrow_requests::get_borrow_request))
        .route("/{id}/approve", put(borrow_requests::approve))
        .route("/{id}/reject", put(borrow_requests::reject))
        .route("/{id}/cancel", put(borrow_requests::cancel))
        .route("/{id}/pickup", put(borrow_requests::pickup))
        .route("/{id}/return", put(borrow_requests::process_return))
        .route("/{id}/complete", put(borrow_requests::complete))
        .layer(require_auth.clone());

    let chat_routes = Router::new()
        .route("/", get(chats::list_chats).post(chats::create_or_get_chat))
        .route(
            "/{id}/messages",
            get(chats::get_messages).post(chats::send_message),
        )
        .route("/{id}/read", put(chats::mark_read))
        .route("/{id}/archive", put(chats::toggle_archive))
        .route("/{id}/mute", put(chats::toggle_mute))
        .layer(require_auth.clone());

    let message_routes = Router::new()
        .route("/{id}", delete(chats::delete_message))
        .layer(require_auth.clone());

    let review_routes = Router::new()
        .route("/user/{id}", get(reviews::list_for_user))
        .merge(
            Router::new()
                .route("/", post(reviews::create_review))
                .route("/pending", get(reviews::pending_reviews))
                .route("/{id}", put(reviews::update_review))
                .route("/{id}/response", post(reviews::add_response))
                .route("/{id}/flag", post(reviews::flag_review))
                .route("/{id}/vote", post(reviews::vote_review))
                .layer(require_auth.clone()),
        );

    let notification_routes = Router::new()
        .route(
            "/",
            get(notifications::list_notifications).delete(notifications::delete_many),
        )
        .route("/unread-count", get(notifications::unread_count))
        .route("/stats", get(notifications::stats))
        .route("/read", put(notifications::mark_many_read))
        .route("/read-all", put(notifications::mark_all_read))
        .route(
            "/{id}",
            delete(notifications::delete_notification),
        )
        .route("/{id}/read", put(notifications::mark_read))
        .layer(require_auth.clone());

    let admin_routes = Router::new()
        .route("/reviews/{id}/moderate", put(reviews::moderate_review))
        .route("/notifications", post(notifications::admin_create))
        .route("/notifications/scheduled", get(notifications::list_scheduled_ready))
        .route("/notifications/{id}/sent", put(notifications::mark_sent))
        .route("/notifications/expired", delete(notifications::cleanup_expired))
        .route("/announce", post(notifications::announce))
        .route("/borrow-requests/overdue", post(borrow_requests::mark_overdue))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(require_auth.clone());

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/users", user_routes)
        .nest("/api/resources", resource_routes)
        .nest("/api/borrow-requests", borrow_routes)
        .nest("/api/chats", chat_routes)
        .nest("/api/messages", message_routes)
        .nest("/api/reviews", review_routes)
        .nest("/api/notifications", notification_routes)
        .nest("/api/admin", admin_routes)
        .route("/api/ws", get(realtime::ws_handler))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
