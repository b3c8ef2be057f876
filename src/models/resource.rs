// src/models/resource.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use url::Url;
use validator::Validate;

/// Lifecycle state of a listing. Inactive rows stay in the table because
/// borrow requests and reviews reference them historically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Active,
    Inactive,
}

impl ResourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Active => "active",
            ResourceStatus::Inactive => "inactive",
        }
    }
}

pub const CONDITIONS: [&str; 5] = ["new", "like_new", "good", "fair", "worn"];

/// Represents the 'resources' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub condition: String,

    /// Borrowing terms.
    pub deposit: f64,
    pub max_borrow_days: i32,
    pub pickup_required: bool,

    /// False while an approved/active borrow request exists.
    pub is_available: bool,
    pub status: String,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    /// Denormalized analytics.
    pub views_count: i32,
    pub borrow_count: i32,
    pub average_rating: f64,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Ordered photo belonging to a resource; display_order 1 is the primary photo.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ResourcePhoto {
    pub id: i64,
    pub resource_id: i64,
    pub url: String,
    pub display_order: i32,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for creating a resource.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateResourceRequest {
    #[validate(length(min = 1, max = 150, message = "Title must be 1-150 characters."))]
    pub title: String,

    #[validate(length(min = 1, max = 5000, message = "Description must be 1-5000 characters."))]
    pub description: String,

    #[validate(length(min = 1, max = 50))]
    pub category: String,

    #[validate(custom(function = validate_condition))]
    pub condition: Option<String>,

    #[validate(range(min = 0.0, message = "Deposit cannot be negative."))]
    pub deposit: Option<f64>,

    #[validate(range(min = 1, max = 365, message = "Max borrow days must be 1-365."))]
    pub max_borrow_days: Option<i32>,

    pub pickup_required: Option<bool>,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// DTO for updating a resource (all fields optional).
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateResourceRequest {
    #[validate(length(min = 1, max = 150))]
    pub title: Option<String>,

    #[validate(length(min = 1, max = 5000))]
    pub description: Option<String>,

    #[validate(length(min = 1, max = 50))]
    pub category: Option<String>,

    #[validate(custom(function = validate_condition))]
    pub condition: Option<String>,

    #[validate(range(min = 0.0))]
    pub deposit: Option<f64>,

    #[validate(range(min = 1, max = 365))]
    pub max_borrow_days: Option<i32>,

    pub pickup_required: Option<bool>,
}

fn validate_condition(condition: &str) -> Result<(), validator::ValidationError> {
    if !CONDITIONS.contains(&condition) {
        return Err(validator::ValidationError::new("invalid_condition"));
    }
    Ok(())
}

/// DTO for attaching a photo.
#[derive(Debug, Deserialize, Validate)]
pub struct AddPhotoRequest {
    #[validate(length(min = 1, max = 500), custom(function = validate_url_string))]
    pub url: String,

    #[validate(range(min = 1, max = 50))]
    pub display_order: Option<i32>,
}

fn validate_url_string(url: &str) -> Result<(), validator::ValidationError> {
    if Url::parse(url).is_err() {
        return Err(validator::ValidationError::new("invalid_url"));
    }
    Ok(())
}

/// Query parameters for listing/searching resources.
#[derive(Debug, Deserialize)]
pub struct ResourceListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,

    /// Search keyword matched against title and description.
    pub q: Option<String>,

    pub category: Option<String>,

    /// When true, only currently available resources are returned.
    pub available_only: Option<bool>,
}

/// Query parameters for the nearby search.
#[derive(Debug, Deserialize)]
pub struct NearbyParams {
    pub latitude: f64,
    pub longitude: f64,
    /// Search radius in kilometers (default 10, max 100).
    pub radius_km: Option<f64>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_whitelist() {
        assert!(validate_condition("good").is_ok());
        assert!(validate_condition("mint").is_err());
    }

    #[test]
    fn photo_url_must_parse() {
        assert!(validate_url_string("https://cdn.example.com/p/1.jpg").is_ok());
        assert!(validate_url_string("not a url").is_err());
    }
}
