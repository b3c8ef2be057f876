// src/models/user.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'users' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    /// Unique email address used for login.
    pub email: String,

    /// Unique display handle.
    pub username: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    /// User role: 'user' or 'admin'.
    pub role: String,

    /// Whether the user completed identity verification.
    pub is_verified: bool,

    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub bio: Option<String>,

    /// Rolling aggregate over all visible reviews received.
    pub average_rating: f64,
    pub total_ratings: i32,

    /// Activity counters maintained by the resource / borrow lifecycle.
    pub items_shared: i32,
    pub successful_borrows: i32,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Public-facing profile: no email, no credentials.
#[derive(Debug, Serialize, FromRow)]
pub struct PublicProfile {
    pub id: i64,
    pub username: String,
    pub is_verified: bool,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub average_rating: f64,
    pub total_ratings: i32,
    pub items_shared: i32,
    pub successful_borrows: i32,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for registration.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "A valid email address is required."))]
    pub email: String,

    #[validate(length(
        min = 3,
        max = 50,
        message = "Username length must be between 3 and 50 characters."
    ))]
    pub username: String,

    #[validate(length(
        min = 8,
        max = 128,
        message = "Password length must be between 8 and 128 characters."
    ))]
    pub password: String,

    #[validate(length(max = 100))]
    pub location: Option<String>,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// DTO for the refresh-token exchange.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// DTO for profile updates (all fields optional).
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(max = 100, message = "Location must be at most 100 characters."))]
    pub location: Option<String>,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    #[validate(length(max = 1000, message = "Bio must be at most 1000 characters."))]
    pub bio: Option<String>,
}
