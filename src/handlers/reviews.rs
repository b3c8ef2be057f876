// src/handlers/reviews.rs
//
// Post-transaction bidirectional feedback. The reviewee's rolling aggregate
// is always fully recomputed from the visible reviews rather than adjusted
// incrementally, so it stays correct under edits, hides and shows.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        borrow_request::BorrowRequest,
        notification::kind,
        review::{
            CreateReviewRequest, EDIT_WINDOW_HOURS, FlagReviewRequest, ModerateReviewRequest,
            PendingReview, Review, ReviewDirection, ReviewResponseRequest, ReviewVisibility,
            UpdateReviewRequest, VoteReviewRequest,
        },
    },
    state::AppState,
    utils::{
        envelope::{ok, ok_paginated, pagination},
        html::clean_html,
        jwt::Claims,
    },
};

use super::notifications::{NotificationLinks, notify_best_effort};

/// Full recomputation of a user's rating aggregates over visible reviews.
async fn recompute_user_rating(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE users SET
            average_rating = COALESCE((
                SELECT AVG(rating)::DOUBLE PRECISION FROM reviews
                WHERE reviewee_id = $1 AND visibility = 'visible'
            ), 0),
            total_ratings = (
                SELECT COUNT(*) FROM reviews
                WHERE reviewee_id = $1 AND visibility = 'visible'
            ),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Create a review, optionally anchored to a borrow request.
pub async fn create_review(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let reviewer_id = claims.user_id();

    if payload.reviewee_id == reviewer_id {
        return Err(AppError::BadRequest(
            "You cannot review yourself".to_string(),
        ));
    }

    let direction = ReviewDirection::parse(&payload.direction)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown direction '{}'", payload.direction)))?;

    let reviewee: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
        .bind(payload.reviewee_id)
        .fetch_optional(&state.pool)
        .await?;
    if reviewee.is_none() {
        return Err(AppError::NotFound("Reviewee not found".to_string()));
    }

    if let Some(request_id) = payload.borrow_request_id {
        let request =
            sqlx::query_as::<_, BorrowRequest>("SELECT * FROM borrow_requests WHERE id = $1")
                .bind(request_id)
                .fetch_optional(&state.pool)
                .await?
                .ok_or(AppError::NotFound("Borrow request not found".to_string()))?;

        let reviewable = request
            .status_enum()
            .map(|s| s.is_reviewable())
            .unwrap_or(false);
        if !reviewable {
            return Err(AppError::Conflict(
                "Borrow request is not completed yet".to_string(),
            ));
        }

        if !request.is_party(reviewer_id) {
            return Err(AppError::AuthError(
                "Not a party to this borrow request".to_string(),
            ));
        }

        if request.counterpart(reviewer_id) != Some(payload.reviewee_id) {
            return Err(AppError::BadRequest(
                "Reviewee must be the other party of the transaction".to_string(),
            ));
        }

        let expected_direction = if reviewer_id == request.requester_id {
            ReviewDirection::BorrowerToOwner
        } else {
            ReviewDirection::OwnerToBorrower
        };
        if direction != expected_direction {
            return Err(AppError::BadRequest(
                "Review direction does not match your role".to_string(),
            ));
        }
    }

    let mut tx = state.pool.begin().await?;

    let review = sqlx::query_as::<_, Review>(
        r#"
        INSERT INTO reviews
            (borrow_request_id, reviewer_id, reviewee_id, direction, rating,
             communication_rating, punctuality_rating, item_condition_rating,
             experience_rating, comment)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(payload.borrow_request_id)
    .bind(reviewer_id)
    .bind(payload.reviewee_id)
    .bind(direction.as_str())
    .bind(payload.rating)
    .bind(payload.communication_rating)
    .bind(payload.punctuality_rating)
    .bind(payload.item_condition_rating)
    .bind(payload.experience_rating)
    .bind(payload.comment.as_deref().map(clean_html))
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if e.to_string().contains("unique constraint") || e.to_string().contains("23505") {
            AppError::Conflict("You already reviewed this transaction".to_string())
        } else {
            AppError::from(e)
        }
    })?;

    recompute_user_rating(&mut tx, payload.reviewee_id).await?;

    tx.commit().await?;

    notify_best_effort(
        &state.pool,
        &state.hub,
        payload.reviewee_id,
        kind::NEW_REVIEW,
        "New review received",
        &format!("You received a {}-star review", payload.rating),
        NotificationLinks {
            review_id: Some(review.id),
            borrow_request_id: payload.borrow_request_id,
            actor_id: Some(reviewer_id),
            ..Default::default()
        },
    )
    .await;

    Ok((StatusCode::CREATED, ok(review)))
}

#[derive(Debug, serde::Deserialize)]
pub struct ReviewListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Visible reviews received by a user, newest first.
pub async fn list_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<ReviewListParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit, offset) = pagination(params.page, params.limit, 50);

    let reviews = sqlx::query_as::<_, Review>(
        r#"
        SELECT * FROM reviews
        WHERE reviewee_id = $1 AND visibility = 'visible'
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM reviews WHERE reviewee_id = $1 AND visibility = 'visible'",
    )
    .bind(user_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(ok_paginated(reviews, page, limit, total))
}

/// Completed-or-returned transactions involving the caller with no review by
/// the caller yet — a left anti-join.
pub async fn pending_reviews(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id();

    let pending = sqlx::query_as::<_, PendingReview>(
        r#"
        SELECT
            br.id AS borrow_request_id,
            r.id AS resource_id,
            r.title AS resource_title,
            CASE WHEN br.requester_id = $1 THEN br.owner_id ELSE br.requester_id END
                AS counterpart_id,
            u.username AS counterpart_username,
            CASE WHEN br.requester_id = $1 THEN 'borrower_to_owner' ELSE 'owner_to_borrower' END
                AS direction,
            COALESCE(br.completed_at, br.returned_at) AS completed_at
        FROM borrow_requests br
        JOIN resources r ON r.id = br.resource_id
        JOIN users u
          ON u.id = CASE WHEN br.requester_id = $1 THEN br.owner_id ELSE br.requester_id END
        WHERE (br.requester_id = $1 OR br.owner_id = $1)
          AND br.status IN ('returned', 'completed')
          AND NOT EXISTS (
              SELECT 1 FROM reviews rv
              WHERE rv.borrow_request_id = br.id AND rv.reviewer_id = $1
          )
        ORDER BY COALESCE(br.completed_at, br.returned_at) DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(ok(pending))
}

/// Edit a review. Reviewer only, within the edit window. A rating change
/// triggers a recomputation of the reviewee's aggregates.
pub async fn update_review(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let review = sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Review not found".to_string()))?;

    if review.reviewer_id != claims.user_id() {
        return Err(AppError::AuthError(
            "Only the reviewer can edit a review".to_string(),
        ));
    }

    let created_at = review
        .created_at
        .ok_or_else(|| AppError::InternalServerError("Review missing created_at".to_string()))?;
    if Utc::now() - created_at > Duration::hours(EDIT_WINDOW_HOURS) {
        return Err(AppError::Conflict(
            "The edit window for this review has expired".to_string(),
        ));
    }

    let rating_changed = payload.rating.is_some_and(|r| r != review.rating);

    let mut tx = state.pool.begin().await?;

    let updated = sqlx::query_as::<_, Review>(
        r#"
        UPDATE reviews SET
            rating = COALESCE($1, rating),
            communication_rating = COALESCE($2, communication_rating),
            punctuality_rating = COALESCE($3, punctuality_rating),
            item_condition_rating = COALESCE($4, item_condition_rating),
            experience_rating = COALESCE($5, experience_rating),
            comment = COALESCE($6, comment),
            updated_at = NOW()
        WHERE id = $7
        RETURNING *
        "#,
    )
    .bind(payload.rating)
    .bind(payload.communication_rating)
    .bind(payload.punctuality_rating)
    .bind(payload.item_condition_rating)
    .bind(payload.experience_rating)
    .bind(payload.comment.as_deref().map(clean_html))
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    if rating_changed {
        recompute_user_rating(&mut tx, review.reviewee_id).await?;
    }

    tx.commit().await?;

    Ok(ok(updated))
}

/// The reviewee's one-time response.
pub async fn add_response(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<ReviewResponseRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let review = sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Review not found".to_string()))?;

    if review.reviewee_id != claims.user_id() {
        return Err(AppError::AuthError(
            "Only the reviewee can respond".to_string(),
        ));
    }

    if review.response.is_some() {
        return Err(AppError::Conflict(
            "This review already has a response".to_string(),
        ));
    }

    let updated = sqlx::query_as::<_, Review>(
        r#"
        UPDATE reviews SET response = $1, response_at = NOW(), updated_at = NOW()
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(clean_html(&payload.response))
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    Ok(ok(updated))
}

/// Loads a review and rejects the caller if they are one of its two parties.
async fn review_for_third_party(
    pool: &PgPool,
    id: i64,
    caller: i64,
) -> Result<Review, AppError> {
    let review = sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Review not found".to_string()))?;

    if review.reviewer_id == caller || review.reviewee_id == caller {
        return Err(AppError::AuthError(
            "The parties of a review cannot do this".to_string(),
        ));
    }

    Ok(review)
}

/// Flag a review for moderation. Any user except its two parties; a
/// non-empty reason is required.
pub async fn flag_review(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<FlagReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    review_for_third_party(&state.pool, id, claims.user_id()).await?;

    let updated = sqlx::query_as::<_, Review>(
        r#"
        UPDATE reviews SET is_flagged = TRUE, flag_reason = $1, updated_at = NOW()
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(&payload.reason)
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    Ok(ok(updated))
}

/// Vote on review helpfulness. One vote per (review, voter), enforced by a
/// unique constraint.
pub async fn vote_review(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<VoteReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    review_for_third_party(&state.pool, id, claims.user_id()).await?;

    let mut tx = state.pool.begin().await?;

    sqlx::query("INSERT INTO review_votes (review_id, voter_id, helpful) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(claims.user_id())
        .bind(payload.helpful)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if e.to_string().contains("unique constraint") || e.to_string().contains("23505") {
                AppError::Conflict("You already voted on this review".to_string())
            } else {
                AppError::from(e)
            }
        })?;

    let updated = sqlx::query_as::<_, Review>(
        r#"
        UPDATE reviews SET
            helpful_votes = helpful_votes + CASE WHEN $1 THEN 1 ELSE 0 END,
            total_votes = total_votes + 1,
            updated_at = NOW()
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(payload.helpful)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(ok(updated))
}

/// Admin moderation: hide / show (both recompute the reviewee's aggregates)
/// or verify (flag only).
pub async fn moderate_review(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ModerateReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let review = sqlx::query_as::<_, Review>("SELECT * FROM reviews WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::NotFound("Review not found".to_string()))?;

    let mut tx = state.pool.begin().await?;

    let updated = match payload.action.as_str() {
        "hide" | "show" => {
            let visibility = if payload.action == "hide" {
                ReviewVisibility::Hidden
            } else {
                ReviewVisibility::Visible
            };

            let updated = sqlx::query_as::<_, Review>(
                "UPDATE reviews SET visibility = $1, updated_at = NOW() WHERE id = $2 RETURNING *",
            )
            .bind(visibility.as_str())
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

            recompute_user_rating(&mut tx, review.reviewee_id).await?;
            updated
        }
        "verify" => {
            sqlx::query_as::<_, Review>(
                "UPDATE reviews SET is_verified = TRUE, updated_at = NOW() WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?
        }
        other => {
            return Err(AppError::BadRequest(format!(
                "Unknown moderation action '{}'",
                other
            )));
        }
    };

    tx.commit().await?;

    Ok(ok(updated))
}
