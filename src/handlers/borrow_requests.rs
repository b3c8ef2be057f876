// src/handlers/borrow_requests.rs
//
// Borrow-request lifecycle: pending → approved → active → returned →
// completed, with rejected / cancelled / overdue side exits. Guard checks and
// the date-overlap conflict test run inside a transaction holding FOR UPDATE
// on the touched rows, so two concurrent requests cannot both pass the check.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        borrow_request::{
            BorrowListParams, BorrowRequest, BorrowStatus, CreateBorrowRequest, ReturnRequest,
            Transition,
        },
        notification::kind,
        resource::Resource,
    },
    state::AppState,
    utils::{
        envelope::{ok, ok_paginated, pagination},
        jwt::Claims,
    },
};

use super::notifications::{NotificationLinks, notify_best_effort};

/// Create a borrow request (→ pending) and notify the resource owner.
pub async fn create_borrow_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateBorrowRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let requester_id = claims.user_id();
    let today = Utc::now().date_naive();

    if payload.start_date < today {
        return Err(AppError::BadRequest(
            "Start date cannot be in the past".to_string(),
        ));
    }
    if payload.end_date <= payload.start_date {
        return Err(AppError::BadRequest(
            "End date must be after start date".to_string(),
        ));
    }

    let mut tx = state.pool.begin().await?;

    // Lock the resource row so concurrent requests serialize on it.
    let resource = sqlx::query_as::<_, Resource>(
        "SELECT * FROM resources WHERE id = $1 AND status = 'active' FOR UPDATE",
    )
    .bind(payload.resource_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Resource not found".to_string()))?;

    if resource.owner_id == requester_id {
        return Err(AppError::BadRequest(
            "You cannot borrow your own resource".to_string(),
        ));
    }

    if !resource.is_available {
        return Err(AppError::Conflict(
            "Resource is not available".to_string(),
        ));
    }

    let requested_days = (payload.end_date - payload.start_date).num_days();
    if requested_days > resource.max_borrow_days as i64 {
        return Err(AppError::BadRequest(format!(
            "This resource can be borrowed for at most {} days",
            resource.max_borrow_days
        )));
    }

    // Inclusive interval overlap against every request still in a blocking
    // status: existing.start <= new.end AND existing.end >= new.start.
    let conflicting: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM borrow_requests
        WHERE resource_id = $1
          AND status IN ('pending', 'approved', 'active')
          AND start_date <= $2 AND end_date >= $3
        "#,
    )
    .bind(payload.resource_id)
    .bind(payload.end_date)
    .bind(payload.start_date)
    .fetch_one(&mut *tx)
    .await?;

    if conflicting > 0 {
        return Err(AppError::Conflict(
            "Requested dates overlap an existing request".to_string(),
        ));
    }

    let request = sqlx::query_as::<_, BorrowRequest>(
        r#"
        INSERT INTO borrow_requests (resource_id, requester_id, owner_id, start_date, end_date, note)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(payload.resource_id)
    .bind(requester_id)
    .bind(resource.owner_id)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(&payload.note)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    notify_best_effort(
        &state.pool,
        &state.hub,
        resource.owner_id,
        kind::BORROW_REQUESTED,
        "New borrow request",
        &format!("Someone wants to borrow \"{}\"", resource.title),
        NotificationLinks {
            resource_id: Some(resource.id),
            borrow_request_id: Some(request.id),
            actor_id: Some(requester_id),
            ..Default::default()
        },
    )
    .await;

    Ok((StatusCode::CREATED, ok(request)))
}

/// List the caller's borrow requests, as requester (default) or as owner.
pub async fn list_borrow_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<BorrowListParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit, offset) = pagination(params.page, params.limit, 50);
    let as_owner = params.role.as_deref() == Some("owner");

    if let Some(status) = params.status.as_deref() {
        if BorrowStatus::parse(status).is_none() {
            return Err(AppError::BadRequest(format!("Unknown status '{}'", status)));
        }
    }

    let filter = r#"
        WHERE (CASE WHEN $1 THEN owner_id ELSE requester_id END) = $2
          AND ($3::TEXT IS NULL OR status = $3)
    "#;

    let requests = sqlx::query_as::<_, BorrowRequest>(&format!(
        "SELECT * FROM borrow_requests {filter} ORDER BY created_at DESC LIMIT $4 OFFSET $5"
    ))
    .bind(as_owner)
    .bind(claims.user_id())
    .bind(&params.status)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM borrow_requests {filter}"))
        .bind(as_owner)
        .bind(claims.user_id())
        .bind(&params.status)
        .fetch_one(&state.pool)
        .await?;

    Ok(ok_paginated(requests, page, limit, total))
}

/// Fetch one borrow request. Parties only.
pub async fn get_borrow_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let request = sqlx::query_as::<_, BorrowRequest>("SELECT * FROM borrow_requests WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Borrow request not found".to_string()))?;

    if !request.is_party(claims.user_id()) {
        return Err(AppError::AuthError(
            "Not a party to this borrow request".to_string(),
        ));
    }

    Ok(ok(request))
}

/// Locks the request row and enforces the actor + state guards shared by all
/// transitions. Returns the locked row with its parsed status.
async fn locked_request(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    actor_id: i64,
    transition: Transition,
) -> Result<(BorrowRequest, BorrowStatus), AppError> {
    let request =
        sqlx::query_as::<_, BorrowRequest>("SELECT * FROM borrow_requests WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(AppError::NotFound("Borrow request not found".to_string()))?;

    if !request.is_party(actor_id) {
        return Err(AppError::AuthError(
            "Not a party to this borrow request".to_string(),
        ));
    }

    let expected_actor = if transition.owner_acts() {
        request.owner_id
    } else {
        request.requester_id
    };
    if actor_id != expected_actor {
        return Err(AppError::AuthError(
            "You cannot perform this transition".to_string(),
        ));
    }

    let status = request
        .status_enum()
        .ok_or_else(|| AppError::InternalServerError(format!("Corrupt status '{}'", request.status)))?;

    if !transition.allowed_from(status) {
        return Err(AppError::Conflict(format!(
            "Cannot {} a request that is {}",
            transition.target().as_str(),
            status.as_str()
        )));
    }

    Ok((request, status))
}

/// Owner approves a pending request. The resource becomes unavailable.
pub async fn approve(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.pool.begin().await?;
    let (request, _) = locked_request(&mut tx, id, claims.user_id(), Transition::Approve).await?;

    let updated = sqlx::query_as::<_, BorrowRequest>(
        r#"
        UPDATE borrow_requests
        SET status = 'approved', approved_at = NOW(), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE resources SET is_available = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(request.resource_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    notify_best_effort(
        &state.pool,
        &state.hub,
        request.requester_id,
        kind::BORROW_APPROVED,
        "Borrow request approved",
        "Your borrow request was approved",
        NotificationLinks {
            resource_id: Some(request.resource_id),
            borrow_request_id: Some(id),
            actor_id: Some(request.owner_id),
            ..Default::default()
        },
    )
    .await;

    Ok(ok(updated))
}

/// Owner rejects a pending request.
pub async fn reject(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.pool.begin().await?;
    let (request, _) = locked_request(&mut tx, id, claims.user_id(), Transition::Reject).await?;

    let updated = sqlx::query_as::<_, BorrowRequest>(
        "UPDATE borrow_requests SET status = 'rejected', updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    notify_best_effort(
        &state.pool,
        &state.hub,
        request.requester_id,
        kind::BORROW_REJECTED,
        "Borrow request declined",
        "Your borrow request was declined",
        NotificationLinks {
            resource_id: Some(request.resource_id),
            borrow_request_id: Some(id),
            actor_id: Some(request.owner_id),
            ..Default::default()
        },
    )
    .await;

    Ok(ok(updated))
}

/// Requester cancels a pending or approved request. A cancelled approval
/// restores the resource's availability; a cancelled pending request never
/// changed it.
pub async fn cancel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.pool.begin().await?;
    let (request, status) = locked_request(&mut tx, id, claims.user_id(), Transition::Cancel).await?;

    let updated = sqlx::query_as::<_, BorrowRequest>(
        "UPDATE borrow_requests SET status = 'cancelled', updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    if status == BorrowStatus::Approved {
        sqlx::query("UPDATE resources SET is_available = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(request.resource_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    notify_best_effort(
        &state.pool,
        &state.hub,
        request.owner_id,
        kind::BORROW_CANCELLED,
        "Borrow request cancelled",
        "The requester cancelled their borrow request",
        NotificationLinks {
            resource_id: Some(request.resource_id),
            borrow_request_id: Some(id),
            actor_id: Some(request.requester_id),
            ..Default::default()
        },
    )
    .await;

    Ok(ok(updated))
}

/// Owner confirms handover. The loan becomes active.
pub async fn pickup(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.pool.begin().await?;
    locked_request(&mut tx, id, claims.user_id(), Transition::Pickup).await?;

    let updated = sqlx::query_as::<_, BorrowRequest>(
        r#"
        UPDATE borrow_requests
        SET status = 'active', picked_up_at = NOW(), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(ok(updated))
}

/// Owner processes the return, optionally attaching an issue report. The
/// resource becomes available again. Works from active and from overdue.
pub async fn process_return(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<ReturnRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let has_issue = payload.has_issue.unwrap_or(false);
    if has_issue && payload.issue_note.is_none() {
        return Err(AppError::BadRequest(
            "An issue report requires an issue note".to_string(),
        ));
    }

    let mut tx = state.pool.begin().await?;
    let (request, _) = locked_request(&mut tx, id, claims.user_id(), Transition::Return).await?;

    let updated = sqlx::query_as::<_, BorrowRequest>(
        r#"
        UPDATE borrow_requests
        SET status = 'returned', returned_at = NOW(),
            has_issue = $1, issue_note = $2, updated_at = NOW()
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(has_issue)
    .bind(&payload.issue_note)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE resources SET is_available = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(request.resource_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(ok(updated))
}

/// Owner closes the transaction after a return. Bumps both parties'
/// `successful_borrows` and the resource's `borrow_count`.
pub async fn complete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.pool.begin().await?;
    let (request, _) = locked_request(&mut tx, id, claims.user_id(), Transition::Complete).await?;

    let updated = sqlx::query_as::<_, BorrowRequest>(
        r#"
        UPDATE borrow_requests
        SET status = 'completed', completed_at = NOW(), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE users SET successful_borrows = successful_borrows + 1 WHERE id = ANY($1)",
    )
    .bind(vec![request.requester_id, request.owner_id])
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE resources SET borrow_count = borrow_count + 1 WHERE id = $1")
        .bind(request.resource_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(ok(updated))
}

/// Admin sweep: flag active loans past their end date as overdue and notify
/// each requester. Invoked by an external timer.
pub async fn mark_overdue(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let flagged = sqlx::query_as::<_, BorrowRequest>(
        r#"
        UPDATE borrow_requests
        SET status = 'overdue', updated_at = NOW()
        WHERE status = 'active' AND end_date < CURRENT_DATE
        RETURNING *
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    for request in &flagged {
        notify_best_effort(
            &state.pool,
            &state.hub,
            request.requester_id,
            kind::BORROW_OVERDUE,
            "Borrowed item overdue",
            "A borrowed item is past its return date",
            NotificationLinks {
                resource_id: Some(request.resource_id),
                borrow_request_id: Some(request.id),
                ..Default::default()
            },
        )
        .await;
    }

    Ok(ok(serde_json::json!({ "flagged": flagged.len() })))
}

/// Per-status counts for the caller, split by role.
pub async fn stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    #[derive(serde::Serialize, sqlx::FromRow)]
    struct StatusCount {
        status: String,
        count: i64,
    }

    let as_requester = sqlx::query_as::<_, StatusCount>(
        "SELECT status, COUNT(*) AS count FROM borrow_requests WHERE requester_id = $1 GROUP BY status",
    )
    .bind(claims.user_id())
    .fetch_all(&state.pool)
    .await?;

    let as_owner = sqlx::query_as::<_, StatusCount>(
        "SELECT status, COUNT(*) AS count FROM borrow_requests WHERE owner_id = $1 GROUP BY status",
    )
    .bind(claims.user_id())
    .fetch_all(&state.pool)
    .await?;

    Ok(ok(serde_json::json!({
        "as_requester": as_requester,
        "as_owner": as_owner,
    })))
}
