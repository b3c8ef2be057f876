// src/handlers/chats.rs
//
// Two-party conversations. Non-participants are told "chat not found" rather
// than "forbidden" so existence is never disclosed. Unread counters are
// eagerly recomputed from the message table after every state change instead
// of being incrementally trusted.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::{PgPool, Postgres, Transaction};
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        chat::{canonical_pair, Chat, ChatListParams, CreateChatRequest},
        message::{Message, MessageListParams, MessageStatus, SendMessageRequest},
    },
    realtime::{ServerEvent, chat_room, user_room},
    state::AppState,
    utils::{
        envelope::{ok, ok_paginated, pagination},
        html::clean_html,
        jwt::Claims,
    },
};

use super::notifications::upsert_chat_notification;

const PREVIEW_LEN: usize = 120;

fn preview_of(content: &str) -> String {
    content.chars().take(PREVIEW_LEN).collect()
}

/// Fetch a chat the caller participates in. Absence and denied access are
/// both reported as NotFound.
async fn participant_chat(pool: &PgPool, chat_id: i64, user_id: i64) -> Result<Chat, AppError> {
    sqlx::query_as::<_, Chat>(
        "SELECT * FROM chats WHERE id = $1 AND (user1_id = $2 OR user2_id = $2)",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Chat not found".to_string()))
}

/// Recompute both unread counters from the underlying message set.
async fn recompute_unread(
    tx: &mut Transaction<'_, Postgres>,
    chat_id: i64,
) -> Result<Chat, AppError> {
    let chat = sqlx::query_as::<_, Chat>(
        r#"
        UPDATE chats SET
            user1_unread_count = (
                SELECT COUNT(*) FROM messages m
                WHERE m.chat_id = chats.id AND m.status = 'visible'
                  AND m.is_read = FALSE AND m.sender_id = chats.user2_id
            ),
            user2_unread_count = (
                SELECT COUNT(*) FROM messages m
                WHERE m.chat_id = chats.id AND m.status = 'visible'
                  AND m.is_read = FALSE AND m.sender_id = chats.user1_id
            )
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(chat_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(chat)
}

/// Create-or-get the conversation with another user. Exactly one row exists
/// per unordered pair (stored with the smaller id first).
pub async fn create_or_get_chat(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    let caller = claims.user_id();
    if payload.user_id == caller {
        return Err(AppError::BadRequest(
            "You cannot open a chat with yourself".to_string(),
        ));
    }

    let other: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
        .bind(payload.user_id)
        .fetch_optional(&pool)
        .await?;
    if other.is_none() {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    let (user1_id, user2_id) = canonical_pair(caller, payload.user_id);

    if let Some(existing) = sqlx::query_as::<_, Chat>(
        "SELECT * FROM chats WHERE user1_id = $1 AND user2_id = $2",
    )
    .bind(user1_id)
    .bind(user2_id)
    .fetch_optional(&pool)
    .await?
    {
        return Ok((StatusCode::OK, ok(existing)));
    }

    // ON CONFLICT DO NOTHING + re-read covers a lost creation race: either
    // way the caller gets the single row for this pair.
    let inserted = sqlx::query_as::<_, Chat>(
        r#"
        INSERT INTO chats (user1_id, user2_id) VALUES ($1, $2)
        ON CONFLICT (user1_id, user2_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(user1_id)
    .bind(user2_id)
    .fetch_optional(&pool)
    .await?;

    match inserted {
        Some(chat) => Ok((StatusCode::CREATED, ok(chat))),
        None => {
            let chat = sqlx::query_as::<_, Chat>(
                "SELECT * FROM chats WHERE user1_id = $1 AND user2_id = $2",
            )
            .bind(user1_id)
            .bind(user2_id)
            .fetch_one(&pool)
            .await?;
            Ok((StatusCode::OK, ok(chat)))
        }
    }
}

/// The caller's conversations, most recent activity first.
pub async fn list_chats(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<ChatListParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit, offset) = pagination(params.page, params.limit, 50);
    let include_archived = params.include_archived.unwrap_or(false);

    let filter = r#"
        WHERE (user1_id = $1 OR user2_id = $1)
          AND ($2 OR NOT (CASE WHEN user1_id = $1 THEN user1_archived ELSE user2_archived END))
    "#;

    let chats = sqlx::query_as::<_, Chat>(&format!(
        r#"
        SELECT * FROM chats {filter}
        ORDER BY last_message_at DESC NULLS LAST, created_at DESC
        LIMIT $3 OFFSET $4
        "#
    ))
    .bind(claims.user_id())
    .bind(include_archived)
    .bind(limit)
    .bind(offset)
    .fetch_all(&pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM chats {filter}"))
        .bind(claims.user_id())
        .bind(include_archived)
        .fetch_one(&pool)
        .await?;

    Ok(ok_paginated(chats, page, limit, total))
}

/// Send a message. Persists it, refreshes the chat's denormalized fields,
/// fans out over the realtime channel and files a deduplicated notification
/// for the recipient. The notification is best-effort: its failure never
/// fails the send.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<i64>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    let content = payload.content.trim();
    if content.is_empty() {
        return Err(AppError::BadRequest("Message cannot be empty".to_string()));
    }

    let sender_id = claims.user_id();
    let chat = participant_chat(&state.pool, chat_id, sender_id).await?;
    let recipient_id = chat.other_user(sender_id);
    let content = clean_html(content);

    if let Some(reply_to) = payload.reply_to_id {
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM messages WHERE id = $1 AND chat_id = $2")
                .bind(reply_to)
                .bind(chat_id)
                .fetch_optional(&state.pool)
                .await?;
        if exists.is_none() {
            return Err(AppError::BadRequest(
                "Replied-to message is not in this chat".to_string(),
            ));
        }
    }

    let mut tx = state.pool.begin().await?;

    let message = sqlx::query_as::<_, Message>(
        r#"
        INSERT INTO messages (chat_id, sender_id, content, reply_to_id)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(chat_id)
    .bind(sender_id)
    .bind(&content)
    .bind(payload.reply_to_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE chats SET last_message_preview = $1, last_message_at = NOW() WHERE id = $2",
    )
    .bind(preview_of(&content))
    .bind(chat_id)
    .execute(&mut *tx)
    .await?;

    let updated_chat = recompute_unread(&mut tx, chat_id).await?;

    tx.commit().await?;

    state
        .hub
        .publish(
            &chat_room(chat_id),
            &ServerEvent::NewMessage { chat_id, message: message.clone() },
        )
        .await;
    state
        .hub
        .publish(
            &user_room(recipient_id),
            &ServerEvent::UnreadCountUpdated {
                chat_id: Some(chat_id),
                unread_count: updated_chat.unread_for(recipient_id) as i64,
            },
        )
        .await;

    let sender_name: String = sqlx::query_scalar("SELECT username FROM users WHERE id = $1")
        .bind(sender_id)
        .fetch_optional(&state.pool)
        .await?
        .unwrap_or_else(|| "Someone".to_string());

    if let Err(e) = upsert_chat_notification(
        &state.pool,
        &state.hub,
        recipient_id,
        chat_id,
        sender_id,
        &sender_name,
        &preview_of(&content),
    )
    .await
    {
        tracing::warn!("Chat notification failed for chat {}: {}", chat_id, e);
    }

    Ok((StatusCode::CREATED, ok(message)))
}

/// Marks the counterpart's unread messages read and refreshes both counters.
/// Returns the refreshed chat.
async fn mark_chat_read(
    state: &AppState,
    chat: &Chat,
    reader_id: i64,
) -> Result<Chat, AppError> {
    let mut tx = state.pool.begin().await?;

    let marked = sqlx::query(
        r#"
        UPDATE messages SET is_read = TRUE, read_at = NOW()
        WHERE chat_id = $1 AND sender_id = $2 AND is_read = FALSE AND status = 'visible'
        "#,
    )
    .bind(chat.id)
    .bind(chat.other_user(reader_id))
    .execute(&mut *tx)
    .await?;

    let updated = recompute_unread(&mut tx, chat.id).await?;
    tx.commit().await?;

    if marked.rows_affected() > 0 {
        state
            .hub
            .publish(
                &chat_room(chat.id),
                &ServerEvent::MessageReadReceipt { chat_id: chat.id, reader_id },
            )
            .await;
    }

    Ok(updated)
}

/// A page of messages, chronological (oldest first). Participant only. As a
/// side effect the counterpart's messages are marked read.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<i64>,
    Query(params): Query<MessageListParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit, offset) = pagination(params.page, params.limit, 50);
    let reader_id = claims.user_id();
    let chat = participant_chat(&state.pool, chat_id, reader_id).await?;

    // Page newest-first so page 1 is the most recent window, then reorder
    // chronologically for the caller.
    let mut messages = sqlx::query_as::<_, Message>(
        r#"
        SELECT * FROM messages
        WHERE chat_id = $1 AND status = 'visible'
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(chat_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;
    messages.reverse();

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages WHERE chat_id = $1 AND status = 'visible'",
    )
    .bind(chat_id)
    .fetch_one(&state.pool)
    .await?;

    mark_chat_read(&state, &chat, reader_id).await?;

    Ok(ok_paginated(messages, page, limit, total))
}

/// Explicitly mark a conversation read.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let reader_id = claims.user_id();
    let chat = participant_chat(&state.pool, chat_id, reader_id).await?;
    let updated = mark_chat_read(&state, &chat, reader_id).await?;
    Ok(ok(updated))
}

/// Toggle the caller's archived flag on a chat.
pub async fn toggle_archive(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id();
    participant_chat(&pool, chat_id, user_id).await?;

    let chat = sqlx::query_as::<_, Chat>(
        r#"
        UPDATE chats SET
            user1_archived = CASE WHEN user1_id = $1 THEN NOT user1_archived ELSE user1_archived END,
            user2_archived = CASE WHEN user2_id = $1 THEN NOT user2_archived ELSE user2_archived END
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(chat_id)
    .fetch_one(&pool)
    .await?;

    Ok(ok(chat))
}

/// Toggle the caller's muted flag on a chat.
pub async fn toggle_mute(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id();
    participant_chat(&pool, chat_id, user_id).await?;

    let chat = sqlx::query_as::<_, Chat>(
        r#"
        UPDATE chats SET
            user1_muted = CASE WHEN user1_id = $1 THEN NOT user1_muted ELSE user1_muted END,
            user2_muted = CASE WHEN user2_id = $1 THEN NOT user2_muted ELSE user2_muted END
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(chat_id)
    .fetch_one(&pool)
    .await?;

    Ok(ok(chat))
}

/// Soft-delete a message. Sender only. The chat preview falls back to the
/// latest surviving message, or clears entirely when none survives.
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
        .bind(message_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Message not found".to_string()))?;

    // Same disguise as every other chat path: outsiders learn nothing.
    participant_chat(&state.pool, message.chat_id, claims.user_id()).await
        .map_err(|_| AppError::NotFound("Message not found".to_string()))?;

    if message.sender_id != claims.user_id() {
        return Err(AppError::AuthError(
            "Only the sender can delete a message".to_string(),
        ));
    }

    let mut tx = state.pool.begin().await?;

    sqlx::query("UPDATE messages SET status = $1 WHERE id = $2")
        .bind(MessageStatus::Deleted.as_str())
        .bind(message_id)
        .execute(&mut *tx)
        .await?;

    // Correlated subqueries so the preview goes NULL when the deleted
    // message was the last visible one.
    sqlx::query(
        r#"
        UPDATE chats SET
            last_message_preview = (
                SELECT LEFT(content, 120) FROM messages
                WHERE chat_id = $1 AND status = 'visible'
                ORDER BY created_at DESC
                LIMIT 1
            ),
            last_message_at = (
                SELECT created_at FROM messages
                WHERE chat_id = $1 AND status = 'visible'
                ORDER BY created_at DESC
                LIMIT 1
            )
        WHERE id = $1
        "#,
    )
    .bind(message.chat_id)
    .execute(&mut *tx)
    .await?;

    recompute_unread(&mut tx, message.chat_id).await?;

    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}
