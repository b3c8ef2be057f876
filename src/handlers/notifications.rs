// src/handlers/notifications.rs
//
// Per-user notification inbox: CRUD, read-state, scheduling, expiry, plus the
// internal creation helpers the borrow / chat / review handlers call. Creation
// after a core write is a best-effort side channel: callers log-and-swallow
// failures instead of rolling back.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::notification::{
        CHAT_DEDUP_WINDOW_MINUTES, CreateNotificationRequest, MarkAllParams, MarkSentRequest,
        Notification, NotificationGroupCount, NotificationIdList, NotificationListParams,
        NotificationMeta, kind,
    },
    realtime::{RealtimeHub, ServerEvent, user_room},
    utils::{
        envelope::{ok, ok_paginated, pagination},
        jwt::Claims,
    },
};

/// Entity links a notification may carry.
#[derive(Debug, Default)]
pub struct NotificationLinks {
    pub resource_id: Option<i64>,
    pub borrow_request_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub review_id: Option<i64>,
    pub actor_id: Option<i64>,
}

/// Unread, unexpired notification count for a user.
async fn unread_count_for(pool: &PgPool, user_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM notifications
        WHERE user_id = $1 AND is_read = FALSE
          AND (expires_at IS NULL OR expires_at > NOW())
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}

async fn publish_new(pool: &PgPool, hub: &RealtimeHub, notification: Notification) {
    let user_id = notification.user_id;
    hub.publish(&user_room(user_id), &ServerEvent::NewNotification { notification })
        .await;
    if let Ok(count) = unread_count_for(pool, user_id).await {
        hub.publish(
            &user_room(user_id),
            &ServerEvent::UnreadCountUpdated { chat_id: None, unread_count: count },
        )
        .await;
    }
}

/// Inserts a notification and pushes it to the recipient's room.
/// Internal entry point for the lifecycle / chat / review handlers.
pub async fn create_notification(
    pool: &PgPool,
    hub: &RealtimeHub,
    user_id: i64,
    notification_kind: &str,
    priority: &str,
    title: &str,
    body: &str,
    links: NotificationLinks,
) -> Result<Notification, AppError> {
    let notification = sqlx::query_as::<_, Notification>(
        r#"
        INSERT INTO notifications
            (user_id, kind, priority, title, body,
             resource_id, borrow_request_id, chat_id, review_id, actor_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(notification_kind)
    .bind(priority)
    .bind(title)
    .bind(body)
    .bind(links.resource_id)
    .bind(links.borrow_request_id)
    .bind(links.chat_id)
    .bind(links.review_id)
    .bind(links.actor_id)
    .fetch_one(pool)
    .await?;

    publish_new(pool, hub, notification.clone()).await;
    Ok(notification)
}

/// Chat-message notification with deduplication: if an unread chat
/// notification for the same (user, chat) pair exists within the dedup
/// window, update it in place (preview replaced, timestamp bumped, counter
/// incremented) instead of inserting a new row. Bounds inbox growth under
/// rapid messaging.
pub async fn upsert_chat_notification(
    pool: &PgPool,
    hub: &RealtimeHub,
    recipient_id: i64,
    chat_id: i64,
    sender_id: i64,
    sender_name: &str,
    preview: &str,
) -> Result<Notification, AppError> {
    let existing = sqlx::query_as::<_, Notification>(
        r#"
        SELECT * FROM notifications
        WHERE user_id = $1 AND chat_id = $2 AND kind = $3 AND is_read = FALSE
          AND created_at > NOW() - make_interval(mins => $4)
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(recipient_id)
    .bind(chat_id)
    .bind(kind::NEW_MESSAGE)
    .bind(CHAT_DEDUP_WINDOW_MINUTES as i32)
    .fetch_optional(pool)
    .await?;

    let title = format!("New message from {}", sender_name);

    let notification = if let Some(existing) = existing {
        let message_count = match NotificationMeta::from_value(existing.metadata.clone()) {
            Some(NotificationMeta::ChatPreview { message_count }) => message_count + 1,
            _ => 2,
        };
        let meta = NotificationMeta::ChatPreview { message_count };

        sqlx::query_as::<_, Notification>(
            r#"
            UPDATE notifications
            SET title = $1, body = $2, metadata = $3, created_at = NOW()
            WHERE id = $4
            RETURNING *
            "#,
        )
        .bind(&title)
        .bind(preview)
        .bind(meta.to_value())
        .bind(existing.id)
        .fetch_one(pool)
        .await?
    } else {
        let meta = NotificationMeta::ChatPreview { message_count: 1 };
        sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications
                (user_id, kind, priority, title, body, chat_id, actor_id, metadata)
            VALUES ($1, $2, 'normal', $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(recipient_id)
        .bind(kind::NEW_MESSAGE)
        .bind(&title)
        .bind(preview)
        .bind(chat_id)
        .bind(sender_id)
        .bind(meta.to_value())
        .fetch_one(pool)
        .await?
    };

    publish_new(pool, hub, notification.clone()).await;
    Ok(notification)
}

/// List the caller's notifications. Expired rows are excluded unless
/// `include_expired=true`.
pub async fn list_notifications(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<NotificationListParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit, offset) = pagination(params.page, params.limit, 50);
    let unread_only = params.unread_only.unwrap_or(false);
    let include_expired = params.include_expired.unwrap_or(false);

    let filter = r#"
        WHERE user_id = $1
          AND (NOT $2 OR is_read = FALSE)
          AND ($3::TEXT IS NULL OR kind = $3)
          AND ($4::TEXT IS NULL OR priority = $4)
          AND ($5 OR expires_at IS NULL OR expires_at > NOW())
    "#;

    let notifications = sqlx::query_as::<_, Notification>(&format!(
        "SELECT * FROM notifications {filter} ORDER BY created_at DESC LIMIT $6 OFFSET $7"
    ))
    .bind(claims.user_id())
    .bind(unread_only)
    .bind(&params.kind)
    .bind(&params.priority)
    .bind(include_expired)
    .bind(limit)
    .bind(offset)
    .fetch_all(&pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM notifications {filter}"))
        .bind(claims.user_id())
        .bind(unread_only)
        .bind(&params.kind)
        .bind(&params.priority)
        .bind(include_expired)
        .fetch_one(&pool)
        .await?;

    Ok(ok_paginated(notifications, page, limit, total))
}

/// Unread (unexpired) notification count for the caller.
pub async fn unread_count(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let count = unread_count_for(&pool, claims.user_id()).await?;
    Ok(ok(serde_json::json!({ "unread_count": count })))
}

/// Counts grouped by kind and by priority.
pub async fn stats(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let by_kind = sqlx::query_as::<_, NotificationGroupCount>(
        r#"
        SELECT kind AS label, COUNT(*) AS count FROM notifications
        WHERE user_id = $1 GROUP BY kind ORDER BY count DESC
        "#,
    )
    .bind(claims.user_id())
    .fetch_all(&pool)
    .await?;

    let by_priority = sqlx::query_as::<_, NotificationGroupCount>(
        r#"
        SELECT priority AS label, COUNT(*) AS count FROM notifications
        WHERE user_id = $1 GROUP BY priority ORDER BY count DESC
        "#,
    )
    .bind(claims.user_id())
    .fetch_all(&pool)
    .await?;

    let unread = unread_count_for(&pool, claims.user_id()).await?;

    Ok(ok(serde_json::json!({
        "by_kind": by_kind,
        "by_priority": by_priority,
        "unread_count": unread,
    })))
}

/// Mark one notification read. Idempotent: an already-read row is returned
/// unchanged rather than erroring.
pub async fn mark_read(
    State(pool): State<PgPool>,
    State(hub): State<RealtimeHub>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let owner_id: i64 = sqlx::query_scalar("SELECT user_id FROM notifications WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Notification not found".to_string()))?;

    if owner_id != claims.user_id() {
        return Err(AppError::AuthError("Not your notification".to_string()));
    }

    let notification = sqlx::query_as::<_, Notification>(
        r#"
        UPDATE notifications
        SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_one(&pool)
    .await?;

    hub.publish(
        &user_room(owner_id),
        &ServerEvent::NotificationRead { notification_ids: vec![id] },
    )
    .await;

    Ok(ok(notification))
}

/// All-or-nothing ownership check for bulk operations: every id must exist
/// and belong to the caller before anything is mutated.
async fn verify_bulk_ownership(
    pool: &PgPool,
    ids: &[i64],
    user_id: i64,
) -> Result<(), AppError> {
    let existing: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT id) FROM notifications WHERE id = ANY($1)")
            .bind(ids)
            .fetch_one(pool)
            .await?;

    let mut distinct = ids.to_vec();
    distinct.sort_unstable();
    distinct.dedup();

    if existing < distinct.len() as i64 {
        return Err(AppError::NotFound("One or more notifications not found".to_string()));
    }

    let owned: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT id) FROM notifications WHERE id = ANY($1) AND user_id = $2",
    )
    .bind(ids)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    if owned < distinct.len() as i64 {
        return Err(AppError::AuthError(
            "One or more notifications do not belong to you".to_string(),
        ));
    }

    Ok(())
}

/// Mark an explicit id list read (all-or-nothing).
pub async fn mark_many_read(
    State(pool): State<PgPool>,
    State(hub): State<RealtimeHub>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<NotificationIdList>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    verify_bulk_ownership(&pool, &payload.ids, claims.user_id()).await?;

    let updated = sqlx::query(
        r#"
        UPDATE notifications
        SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
        WHERE id = ANY($1)
        "#,
    )
    .bind(&payload.ids)
    .execute(&pool)
    .await?;

    hub.publish(
        &user_room(claims.user_id()),
        &ServerEvent::NotificationRead { notification_ids: payload.ids.clone() },
    )
    .await;

    Ok(ok(serde_json::json!({ "updated": updated.rows_affected() })))
}

/// Mark all of the caller's notifications read, optionally scoped to a kind.
pub async fn mark_all_read(
    State(pool): State<PgPool>,
    State(hub): State<RealtimeHub>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<MarkAllParams>,
) -> Result<impl IntoResponse, AppError> {
    let ids: Vec<i64> = sqlx::query_scalar(
        r#"
        UPDATE notifications
        SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
        WHERE user_id = $1 AND is_read = FALSE
          AND ($2::TEXT IS NULL OR kind = $2)
        RETURNING id
        "#,
    )
    .bind(claims.user_id())
    .bind(&params.kind)
    .fetch_all(&pool)
    .await?;

    if !ids.is_empty() {
        hub.publish(
            &user_room(claims.user_id()),
            &ServerEvent::NotificationRead { notification_ids: ids.clone() },
        )
        .await;
    }

    Ok(ok(serde_json::json!({ "updated": ids.len() })))
}

/// Delete one notification. Owner only.
pub async fn delete_notification(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let owner_id: i64 = sqlx::query_scalar("SELECT user_id FROM notifications WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Notification not found".to_string()))?;

    if owner_id != claims.user_id() {
        return Err(AppError::AuthError("Not your notification".to_string()));
    }

    sqlx::query("DELETE FROM notifications WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Delete an explicit id list (all-or-nothing).
pub async fn delete_many(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<NotificationIdList>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    verify_bulk_ownership(&pool, &payload.ids, claims.user_id()).await?;

    let deleted = sqlx::query("DELETE FROM notifications WHERE id = ANY($1)")
        .bind(&payload.ids)
        .execute(&pool)
        .await?;

    Ok(ok(serde_json::json!({ "deleted": deleted.rows_affected() })))
}

/// Admin: create a notification, fanned out to N users. Scheduled rows are
/// not pushed over the realtime channel until the delivery sweep sends them.
pub async fn admin_create(
    State(pool): State<PgPool>,
    State(hub): State<RealtimeHub>,
    Json(payload): Json<CreateNotificationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let priority = payload.priority.as_deref().unwrap_or("normal");

    let created = sqlx::query_as::<_, Notification>(
        r#"
        INSERT INTO notifications (user_id, kind, priority, title, body, scheduled_for, expires_at)
        SELECT UNNEST($1::BIGINT[]), $2, $3, $4, $5, $6, $7
        RETURNING *
        "#,
    )
    .bind(&payload.user_ids)
    .bind(&payload.kind)
    .bind(priority)
    .bind(&payload.title)
    .bind(&payload.body)
    .bind(payload.scheduled_for)
    .bind(payload.expires_at)
    .fetch_all(&pool)
    .await?;

    if payload.scheduled_for.is_none() {
        for notification in &created {
            publish_new(&pool, &hub, notification.clone()).await;
        }
    }

    Ok((StatusCode::CREATED, ok(created)))
}

/// Admin: scheduled notifications whose time has come and that are unsent.
pub async fn list_scheduled_ready(
    State(pool): State<PgPool>,
) -> Result<impl IntoResponse, AppError> {
    let ready = sqlx::query_as::<_, Notification>(
        r#"
        SELECT * FROM notifications
        WHERE scheduled_for IS NOT NULL AND scheduled_for <= NOW() AND is_sent = FALSE
        ORDER BY scheduled_for ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    Ok(ok(ready))
}

/// Admin: record per-channel delivery timestamps and flag the row sent.
pub async fn mark_sent(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<MarkSentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let notification = sqlx::query_as::<_, Notification>(
        r#"
        UPDATE notifications SET
            is_sent = TRUE,
            push_sent_at = CASE WHEN $1 THEN NOW() ELSE push_sent_at END,
            email_sent_at = CASE WHEN $2 THEN NOW() ELSE email_sent_at END,
            sms_sent_at = CASE WHEN $3 THEN NOW() ELSE sms_sent_at END
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(payload.push.unwrap_or(false))
    .bind(payload.email.unwrap_or(false))
    .bind(payload.sms.unwrap_or(false))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Notification not found".to_string()))?;

    Ok(ok(notification))
}

/// Admin: bulk-delete expired notifications, returning the removed count.
pub async fn cleanup_expired(
    State(pool): State<PgPool>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = sqlx::query("DELETE FROM notifications WHERE expires_at < NOW()")
        .execute(&pool)
        .await?;

    tracing::info!("Expired notification cleanup removed {} rows", deleted.rows_affected());

    Ok(ok(serde_json::json!({ "deleted": deleted.rows_affected() })))
}

/// Admin: system announcement to a list of users. Stored as a notification
/// per recipient and pushed to each recipient's realtime room.
pub async fn announce(
    State(pool): State<PgPool>,
    State(hub): State<RealtimeHub>,
    Json(payload): Json<CreateNotificationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    for user_id in &payload.user_ids {
        hub.publish(
            &user_room(*user_id),
            &ServerEvent::SystemAnnouncement {
                title: payload.title.clone(),
                body: payload.body.clone(),
            },
        )
        .await;
    }

    let created = sqlx::query_as::<_, Notification>(
        r#"
        INSERT INTO notifications (user_id, kind, priority, title, body, expires_at)
        SELECT UNNEST($1::BIGINT[]), $2, $3, $4, $5, $6
        RETURNING *
        "#,
    )
    .bind(&payload.user_ids)
    .bind(kind::SYSTEM)
    .bind(payload.priority.as_deref().unwrap_or("high"))
    .bind(&payload.title)
    .bind(&payload.body)
    .bind(payload.expires_at)
    .fetch_all(&pool)
    .await?;

    Ok((StatusCode::CREATED, ok(created)))
}

/// Internal helper for fire-and-forget callers: log and swallow failures so
/// the primary operation never rolls back because of its side channel.
pub async fn notify_best_effort(
    pool: &PgPool,
    hub: &RealtimeHub,
    user_id: i64,
    notification_kind: &str,
    title: &str,
    body: &str,
    links: NotificationLinks,
) {
    if let Err(e) = create_notification(
        pool,
        hub,
        user_id,
        notification_kind,
        "normal",
        title,
        body,
        links,
    )
    .await
    {
        tracing::warn!("Best-effort notification failed: {}", e);
    }
}
