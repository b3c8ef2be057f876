// src/handlers/resources.rs

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
    models::resource::{
        AddPhotoRequest, CreateResourceRequest, NearbyParams, Resource, ResourceListParams,
        ResourcePhoto, ResourceStatus, UpdateResourceRequest,
    },
    utils::{
        envelope::{ok, ok_paginated, pagination},
        html::clean_html,
        jwt::Claims,
    },
};

/// Create a new listing. The caller becomes the owner; their `items_shared`
/// counter is bumped in the same transaction.
pub async fn create_resource(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateResourceRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let owner_id = claims.user_id();
    let mut tx = pool.begin().await?;

    let resource = sqlx::query_as::<_, Resource>(
        r#"
        INSERT INTO resources
            (owner_id, title, description, category, condition,
             deposit, max_borrow_days, pickup_required, latitude, longitude)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(owner_id)
    .bind(&payload.title)
    .bind(clean_html(&payload.description))
    .bind(&payload.category)
    .bind(payload.condition.as_deref().unwrap_or("good"))
    .bind(payload.deposit.unwrap_or(0.0))
    .bind(payload.max_borrow_days.unwrap_or(14))
    .bind(payload.pickup_required.unwrap_or(true))
    .bind(payload.latitude)
    .bind(payload.longitude)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE users SET items_shared = items_shared + 1 WHERE id = $1")
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok((StatusCode::CREATED, ok(resource)))
}

/// List active resources with optional category / availability / keyword
/// filters. Newest first, offset-paginated.
pub async fn list_resources(
    State(pool): State<PgPool>,
    Query(params): Query<ResourceListParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, limit, offset) = pagination(params.page, params.limit, 100);
    let available_only = params.available_only.unwrap_or(false);

    let filter = r#"
        WHERE status = 'active'
          AND ($1::TEXT IS NULL OR category = $1)
          AND ($2::TEXT IS NULL OR title ILIKE '%' || $2 || '%' OR description ILIKE '%' || $2 || '%')
          AND (NOT $3 OR is_available)
    "#;

    let resources = sqlx::query_as::<_, Resource>(&format!(
        "SELECT * FROM resources {filter} ORDER BY created_at DESC LIMIT $4 OFFSET $5"
    ))
    .bind(&params.category)
    .bind(&params.q)
    .bind(available_only)
    .bind(limit)
    .bind(offset)
    .fetch_all(&pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM resources {filter}"))
        .bind(&params.category)
        .bind(&params.q)
        .bind(available_only)
        .fetch_one(&pool)
        .await?;

    Ok(ok_paginated(resources, page, limit, total))
}

/// Resources within `radius_km` of a point, nearest first (haversine).
pub async fn nearby_resources(
    State(pool): State<PgPool>,
    Query(params): Query<NearbyParams>,
) -> Result<impl IntoResponse, AppError> {
    if !(-90.0..=90.0).contains(&params.latitude) || !(-180.0..=180.0).contains(&params.longitude) {
        return Err(AppError::BadRequest("Invalid coordinates".to_string()));
    }
    let radius_km = params.radius_km.unwrap_or(10.0).clamp(0.1, 100.0);
    let limit = params.limit.unwrap_or(20).clamp(1, 100);

    let resources = sqlx::query_as::<_, Resource>(
        r#"
        SELECT * FROM (
            SELECT *,
                6371.0 * acos(LEAST(1.0,
                    cos(radians($1)) * cos(radians(latitude)) * cos(radians(longitude) - radians($2))
                    + sin(radians($1)) * sin(radians(latitude))
                )) AS distance_km
            FROM resources
            WHERE status = 'active' AND latitude IS NOT NULL AND longitude IS NOT NULL
        ) nearby
        WHERE distance_km <= $3
        ORDER BY distance_km ASC
        LIMIT $4
        "#,
    )
    .bind(params.latitude)
    .bind(params.longitude)
    .bind(radius_km)
    .bind(limit)
    .fetch_all(&pool)
    .await?;

    Ok(ok(resources))
}

/// Fetch a single listing and count the view. Inactive listings read as absent.
pub async fn get_resource(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let resource = sqlx::query_as::<_, Resource>(
        r#"
        UPDATE resources SET views_count = views_count + 1
        WHERE id = $1 AND status = 'active'
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Resource not found".to_string()))?;

    let photos = sqlx::query_as::<_, ResourcePhoto>(
        "SELECT * FROM resource_photos WHERE resource_id = $1 ORDER BY display_order ASC",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(ok(serde_json::json!({ "resource": resource, "photos": photos })))
}

/// Update a listing. Owner only.
pub async fn update_resource(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateResourceRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let owner_id: i64 = sqlx::query_scalar(
        "SELECT owner_id FROM resources WHERE id = $1 AND status = 'active'",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Resource not found".to_string()))?;

    if owner_id != claims.user_id() {
        return Err(AppError::AuthError(
            "Only the owner can update this resource".to_string(),
        ));
    }

    let description = payload.description.as_deref().map(clean_html);

    let resource = sqlx::query_as::<_, Resource>(
        r#"
        UPDATE resources SET
            title = COALESCE($1, title),
            description = COALESCE($2, description),
            category = COALESCE($3, category),
            condition = COALESCE($4, condition),
            deposit = COALESCE($5, deposit),
            max_borrow_days = COALESCE($6, max_borrow_days),
            pickup_required = COALESCE($7, pickup_required),
            updated_at = NOW()
        WHERE id = $8
        RETURNING *
        "#,
    )
    .bind(&payload.title)
    .bind(&description)
    .bind(&payload.category)
    .bind(&payload.condition)
    .bind(payload.deposit)
    .bind(payload.max_borrow_days)
    .bind(payload.pickup_required)
    .bind(id)
    .fetch_one(&pool)
    .await?;

    Ok(ok(resource))
}

/// Soft-delete a listing (status → inactive). Owner only; blocked while any
/// pending/approved/active borrow request exists against it.
pub async fn delete_resource(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;

    let owner_id: i64 = sqlx::query_scalar(
        "SELECT owner_id FROM resources WHERE id = $1 AND status = 'active' FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Resource not found".to_string()))?;

    if owner_id != claims.user_id() {
        return Err(AppError::AuthError(
            "Only the owner can delete this resource".to_string(),
        ));
    }

    let active_requests: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM borrow_requests
        WHERE resource_id = $1 AND status IN ('pending', 'approved', 'active')
        "#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    if active_requests > 0 {
        return Err(AppError::Conflict(
            "Resource has open borrow requests".to_string(),
        ));
    }

    sqlx::query(
        "UPDATE resources SET status = $1, is_available = FALSE, updated_at = NOW() WHERE id = $2",
    )
    .bind(ResourceStatus::Inactive.as_str())
    .bind(id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE users SET items_shared = GREATEST(0, items_shared - 1) WHERE id = $1")
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn owned_resource_id(
    pool: &PgPool,
    resource_id: i64,
    user_id: i64,
) -> Result<(), AppError> {
    let owner_id: i64 =
        sqlx::query_scalar("SELECT owner_id FROM resources WHERE id = $1 AND status = 'active'")
            .bind(resource_id)
            .fetch_optional(pool)
            .await?
            .ok_or(AppError::NotFound("Resource not found".to_string()))?;

    if owner_id != user_id {
        return Err(AppError::AuthError(
            "Only the owner can manage photos".to_string(),
        ));
    }
    Ok(())
}

/// Attach a photo. Owner only; defaults to the end of the display order.
pub async fn add_photo(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<AddPhotoRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    owned_resource_id(&pool, id, claims.user_id()).await?;

    let photo = sqlx::query_as::<_, ResourcePhoto>(
        r#"
        INSERT INTO resource_photos (resource_id, url, display_order)
        VALUES ($1, $2, COALESCE(
            $3,
            (SELECT COALESCE(MAX(display_order), 0) + 1 FROM resource_photos WHERE resource_id = $1)
        ))
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&payload.url)
    .bind(payload.display_order)
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, ok(photo)))
}

/// All photos of a resource, presentation order.
pub async fn list_photos(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let photos = sqlx::query_as::<_, ResourcePhoto>(
        "SELECT * FROM resource_photos WHERE resource_id = $1 ORDER BY display_order ASC",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(ok(photos))
}

/// Remove a photo. Owner only.
pub async fn delete_photo(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((id, photo_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    owned_resource_id(&pool, id, claims.user_id()).await?;

    let deleted = sqlx::query("DELETE FROM resource_photos WHERE id = $1 AND resource_id = $2")
        .bind(photo_id)
        .bind(id)
        .execute(&pool)
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(AppError::NotFound("Photo not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Promote a photo to primary (display_order = 1), shifting the photos it
/// passes down by one so relative order is preserved.
pub async fn set_primary_photo(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((id, photo_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    owned_resource_id(&pool, id, claims.user_id()).await?;

    let mut tx = pool.begin().await?;

    let current_order: i32 = sqlx::query_scalar(
        "SELECT display_order FROM resource_photos WHERE id = $1 AND resource_id = $2 FOR UPDATE",
    )
    .bind(photo_id)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Photo not found".to_string()))?;

    sqlx::query(
        r#"
        UPDATE resource_photos SET display_order = display_order + 1
        WHERE resource_id = $1 AND id <> $2 AND display_order < $3
        "#,
    )
    .bind(id)
    .bind(photo_id)
    .bind(current_order)
    .execute(&mut *tx)
    .await?;

    let photo = sqlx::query_as::<_, ResourcePhoto>(
        "UPDATE resource_photos SET display_order = 1 WHERE id = $1 RETURNING *",
    )
    .bind(photo_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(ok(photo))
}
