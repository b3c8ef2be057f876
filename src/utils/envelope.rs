// src/utils/envelope.rs

use axum::Json;
use serde::Serialize;
use serde_json::{Value, json};

/// Wraps a payload in the standard success envelope.
pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Success envelope for paginated list endpoints.
pub fn ok_paginated<T: Serialize>(items: T, page: i64, limit: i64, total: i64) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "items": items,
            "pagination": { "page": page, "limit": limit, "total": total }
        }
    }))
}

/// Clamps `page`/`limit` query values to sane bounds.
/// Returns (page, limit, offset).
pub fn pagination(page: Option<i64>, limit: Option<i64>, max_limit: i64) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(20).clamp(1, max_limit);
    (page, limit, (page - 1) * limit)
}
