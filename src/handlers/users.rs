// src/handlers/users.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::user::{PublicProfile, UpdateProfileRequest, User},
    utils::{envelope::ok, html::clean_html, jwt::Claims},
};

/// Returns the authenticated user's own record.
pub async fn me(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(claims.user_id())
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(ok(user))
}

/// Updates the authenticated user's profile (location, coordinates, bio).
pub async fn update_me(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let bio = payload.bio.as_deref().map(clean_html);

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users SET
            location = COALESCE($1, location),
            latitude = COALESCE($2, latitude),
            longitude = COALESCE($3, longitude),
            bio = COALESCE($4, bio),
            updated_at = NOW()
        WHERE id = $5
        RETURNING *
        "#,
    )
    .bind(&payload.location)
    .bind(payload.latitude)
    .bind(payload.longitude)
    .bind(&bio)
    .bind(claims.user_id())
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(ok(user))
}

/// Public profile of any user: aggregates and counters, no email.
pub async fn get_profile(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let profile = sqlx::query_as::<_, PublicProfile>(
        r#"
        SELECT id, username, is_verified, location, bio,
               average_rating, total_ratings, items_shared, successful_borrows,
               created_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(ok(profile))
}
