// src/models/review.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// How long a reviewer may edit their review after creation.
pub const EDIT_WINDOW_HOURS: i64 = 24;

/// Which way the feedback points within a borrow transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDirection {
    BorrowerToOwner,
    OwnerToBorrower,
}

impl ReviewDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewDirection::BorrowerToOwner => "borrower_to_owner",
            ReviewDirection::OwnerToBorrower => "owner_to_borrower",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "borrower_to_owner" => Some(ReviewDirection::BorrowerToOwner),
            "owner_to_borrower" => Some(ReviewDirection::OwnerToBorrower),
            _ => None,
        }
    }
}

/// Moderation visibility of a review. Hidden reviews are excluded from
/// listings and from the reviewee's aggregate rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVisibility {
    Visible,
    Hidden,
}

impl ReviewVisibility {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewVisibility::Visible => "visible",
            ReviewVisibility::Hidden => "hidden",
        }
    }
}

/// Represents the 'reviews' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub borrow_request_id: Option<i64>,
    pub reviewer_id: i64,
    pub reviewee_id: i64,
    pub direction: String,
    pub rating: i32,
    pub communication_rating: Option<i32>,
    pub punctuality_rating: Option<i32>,
    pub item_condition_rating: Option<i32>,
    pub experience_rating: Option<i32>,
    pub comment: Option<String>,
    pub visibility: String,
    pub is_verified: bool,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub response: Option<String>,
    pub response_at: Option<chrono::DateTime<chrono::Utc>>,
    pub helpful_votes: i32,
    pub total_votes: i32,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for creating a review.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateReviewRequest {
    pub reviewee_id: i64,
    pub borrow_request_id: Option<i64>,
    /// "borrower_to_owner" or "owner_to_borrower".
    pub direction: String,

    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5."))]
    pub rating: i32,

    #[validate(range(min = 1, max = 5))]
    pub communication_rating: Option<i32>,
    #[validate(range(min = 1, max = 5))]
    pub punctuality_rating: Option<i32>,
    #[validate(range(min = 1, max = 5))]
    pub item_condition_rating: Option<i32>,
    #[validate(range(min = 1, max = 5))]
    pub experience_rating: Option<i32>,

    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

/// DTO for editing a review within the edit window.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateReviewRequest {
    #[validate(range(min = 1, max = 5))]
    pub rating: Option<i32>,
    #[validate(range(min = 1, max = 5))]
    pub communication_rating: Option<i32>,
    #[validate(range(min = 1, max = 5))]
    pub punctuality_rating: Option<i32>,
    #[validate(range(min = 1, max = 5))]
    pub item_condition_rating: Option<i32>,
    #[validate(range(min = 1, max = 5))]
    pub experience_rating: Option<i32>,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

/// DTO for the reviewee's one-time response.
#[derive(Debug, Deserialize, Validate)]
pub struct ReviewResponseRequest {
    #[validate(length(min = 1, max = 1000, message = "Response must be 1-1000 characters."))]
    pub response: String,
}

/// DTO for flagging a review.
#[derive(Debug, Deserialize, Validate)]
pub struct FlagReviewRequest {
    #[validate(length(min = 1, max = 500, message = "A flag reason is required."))]
    pub reason: String,
}

/// DTO for voting on review helpfulness.
#[derive(Debug, Deserialize)]
pub struct VoteReviewRequest {
    pub helpful: bool,
}

/// DTO for admin moderation.
#[derive(Debug, Deserialize)]
pub struct ModerateReviewRequest {
    /// "hide", "show" or "verify".
    pub action: String,
}

/// A completed transaction the user has not reviewed yet.
#[derive(Debug, Serialize, FromRow)]
pub struct PendingReview {
    pub borrow_request_id: i64,
    pub resource_id: i64,
    pub resource_title: String,
    pub counterpart_id: i64,
    pub counterpart_username: String,
    /// Direction the caller's review would take.
    pub direction: String,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_round_trip() {
        assert_eq!(
            ReviewDirection::parse("borrower_to_owner").unwrap().as_str(),
            "borrower_to_owner"
        );
        assert_eq!(
            ReviewDirection::parse("owner_to_borrower").unwrap().as_str(),
            "owner_to_borrower"
        );
        assert!(ReviewDirection::parse("sideways").is_none());
    }
}
