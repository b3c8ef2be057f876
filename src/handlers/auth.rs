// src/handlers/auth.rs

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    models::user::{LoginRequest, RefreshRequest, RegisterRequest, User},
    utils::{
        hash::{hash_password, verify_password},
        jwt::{TOKEN_REFRESH, sign_access_token, sign_refresh_token, verify_token_type},
    },
};

/// Registers a new user.
///
/// Hashes the password using Argon2 before storing it.
/// Returns 201 Created with the user object and a fresh token pair.
pub async fn register(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let hashed_password = hash_password(&payload.password)?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, username, password, location)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&payload.email)
    .bind(&payload.username)
    .bind(&hashed_password)
    .bind(&payload.location)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        // Postgres error code for unique violation is 23505
        if e.to_string().contains("unique constraint") || e.to_string().contains("23505") {
            AppError::Conflict("Email or username already in use".to_string())
        } else {
            tracing::error!("Failed to register user: {:?}", e);
            AppError::from(e)
        }
    })?;

    let access_token = sign_access_token(user.id, &user.role, &config)?;
    let refresh_token = sign_refresh_token(user.id, &user.role, &config)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": {
                "user": user,
                "access_token": access_token,
                "refresh_token": refresh_token,
                "token_type": "Bearer",
            }
        })),
    ))
}

/// Authenticates a user and returns a token pair.
pub async fn login(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&payload.email)
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Login DB error: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?
        .ok_or(AppError::AuthError("Invalid credentials".to_string()))?;

    let is_valid = verify_password(&payload.password, &user.password)?;

    if !is_valid {
        return Err(AppError::AuthError("Invalid credentials".to_string()));
    }

    let access_token = sign_access_token(user.id, &user.role, &config)?;
    let refresh_token = sign_refresh_token(user.id, &user.role, &config)?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "user": user,
            "access_token": access_token,
            "refresh_token": refresh_token,
            "token_type": "Bearer",
        }
    })))
}

/// Exchanges a valid refresh token for a new token pair.
///
/// Re-reads the user so role changes since issuance take effect.
pub async fn refresh(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let claims = verify_token_type(&payload.refresh_token, &config.jwt_secret, TOKEN_REFRESH)?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(claims.user_id())
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::AuthError("Unknown user".to_string()))?;

    let access_token = sign_access_token(user.id, &user.role, &config)?;
    let refresh_token = sign_refresh_token(user.id, &user.role, &config)?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "access_token": access_token,
            "refresh_token": refresh_token,
            "token_type": "Bearer",
        }
    })))
}
