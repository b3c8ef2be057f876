// src/models/borrow_request.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Lifecycle of a borrow transaction.
///
/// pending → approved → active → returned → completed, with side exits
/// pending → rejected, {pending, approved} → cancelled and active → overdue
/// (still resolvable to returned once the owner processes the return).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorrowStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Active,
    Returned,
    Completed,
    Overdue,
}

impl BorrowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BorrowStatus::Pending => "pending",
            BorrowStatus::Approved => "approved",
            BorrowStatus::Rejected => "rejected",
            BorrowStatus::Cancelled => "cancelled",
            BorrowStatus::Active => "active",
            BorrowStatus::Returned => "returned",
            BorrowStatus::Completed => "completed",
            BorrowStatus::Overdue => "overdue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BorrowStatus::Pending),
            "approved" => Some(BorrowStatus::Approved),
            "rejected" => Some(BorrowStatus::Rejected),
            "cancelled" => Some(BorrowStatus::Cancelled),
            "active" => Some(BorrowStatus::Active),
            "returned" => Some(BorrowStatus::Returned),
            "completed" => Some(BorrowStatus::Completed),
            "overdue" => Some(BorrowStatus::Overdue),
            _ => None,
        }
    }

    /// Terminal "completed-like" statuses that make a request reviewable.
    pub fn is_reviewable(self) -> bool {
        matches!(self, BorrowStatus::Returned | BorrowStatus::Completed)
    }
}

/// Lifecycle transitions an actor can request on an existing borrow request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Approve,
    Reject,
    Cancel,
    Pickup,
    Return,
    Complete,
}

impl Transition {
    /// Target state of the transition.
    pub fn target(self) -> BorrowStatus {
        match self {
            Transition::Approve => BorrowStatus::Approved,
            Transition::Reject => BorrowStatus::Rejected,
            Transition::Cancel => BorrowStatus::Cancelled,
            Transition::Pickup => BorrowStatus::Active,
            Transition::Return => BorrowStatus::Returned,
            Transition::Complete => BorrowStatus::Completed,
        }
    }

    /// Guard: is this transition legal from `from`?
    pub fn allowed_from(self, from: BorrowStatus) -> bool {
        match self {
            Transition::Approve | Transition::Reject => from == BorrowStatus::Pending,
            Transition::Cancel => {
                matches!(from, BorrowStatus::Pending | BorrowStatus::Approved)
            }
            Transition::Pickup => from == BorrowStatus::Approved,
            // An overdue loan is still returned through the normal path.
            Transition::Return => matches!(from, BorrowStatus::Active | BorrowStatus::Overdue),
            Transition::Complete => from == BorrowStatus::Returned,
        }
    }

    /// Who may request this transition: the resource owner or the requester.
    pub fn owner_acts(self) -> bool {
        !matches!(self, Transition::Cancel)
    }
}

/// Two inclusive date ranges conflict iff s1 ≤ e2 AND e1 ≥ s2.
/// Symmetric, so it holds for all pairs regardless of insertion order.
pub fn ranges_overlap(s1: NaiveDate, e1: NaiveDate, s2: NaiveDate, e2: NaiveDate) -> bool {
    s1 <= e2 && e1 >= s2
}

/// Represents the 'borrow_requests' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BorrowRequest {
    pub id: i64,
    pub resource_id: i64,
    pub requester_id: i64,
    /// Denormalized from the resource at creation time.
    pub owner_id: i64,
    pub status: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub note: Option<String>,
    pub deposit_paid: bool,
    pub approved_at: Option<chrono::DateTime<chrono::Utc>>,
    pub picked_up_at: Option<chrono::DateTime<chrono::Utc>>,
    pub returned_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub has_issue: bool,
    pub issue_note: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl BorrowRequest {
    pub fn status_enum(&self) -> Option<BorrowStatus> {
        BorrowStatus::parse(&self.status)
    }

    pub fn is_party(&self, user_id: i64) -> bool {
        self.requester_id == user_id || self.owner_id == user_id
    }

    /// The party opposite `user_id`, if `user_id` is a party at all.
    pub fn counterpart(&self, user_id: i64) -> Option<i64> {
        if user_id == self.requester_id {
            Some(self.owner_id)
        } else if user_id == self.owner_id {
            Some(self.requester_id)
        } else {
            None
        }
    }
}

/// DTO for creating a borrow request.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBorrowRequest {
    pub resource_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    #[validate(length(max = 1000, message = "Note must be at most 1000 characters."))]
    pub note: Option<String>,
}

/// DTO for processing a return, optionally with an issue report.
#[derive(Debug, Deserialize, Validate)]
pub struct ReturnRequest {
    pub has_issue: Option<bool>,

    #[validate(length(min = 1, max = 1000))]
    pub issue_note: Option<String>,
}

/// Query parameters for listing borrow requests.
#[derive(Debug, Deserialize)]
pub struct BorrowListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// "requester" (default) or "owner".
    pub role: Option<String>,
    pub status: Option<String>,
}
