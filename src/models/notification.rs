// src/models/notification.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Window inside which a second chat message updates the existing unread
/// notification instead of inserting a new row.
pub const CHAT_DEDUP_WINDOW_MINUTES: i64 = 5;

pub const PRIORITIES: [&str; 4] = ["low", "normal", "high", "urgent"];

/// Well-known notification kinds produced by the services.
pub mod kind {
    pub const BORROW_REQUESTED: &str = "borrow_requested";
    pub const BORROW_APPROVED: &str = "borrow_approved";
    pub const BORROW_REJECTED: &str = "borrow_rejected";
    pub const BORROW_CANCELLED: &str = "borrow_cancelled";
    pub const BORROW_OVERDUE: &str = "borrow_overdue";
    pub const NEW_MESSAGE: &str = "new_message";
    pub const NEW_REVIEW: &str = "new_review";
    pub const SYSTEM: &str = "system";
}

/// Known producer/consumer contracts for the metadata bag, kept type-safe as a
/// tagged variant instead of an open dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationMeta {
    /// Chat notification dedup counter: how many messages this row stands for.
    ChatPreview { message_count: i64 },
    /// Anything without a declared contract.
    #[serde(untagged)]
    Other(serde_json::Value),
}

impl NotificationMeta {
    pub fn from_value(value: Option<serde_json::Value>) -> Option<Self> {
        value.map(|v| serde_json::from_value(v.clone()).unwrap_or(NotificationMeta::Other(v)))
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Represents the 'notifications' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub priority: String,
    pub title: String,
    pub body: String,
    pub resource_id: Option<i64>,
    pub borrow_request_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub review_id: Option<i64>,
    /// The user whose action caused the notification, when there is one.
    pub actor_id: Option<i64>,
    pub is_read: bool,
    pub read_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_sent: bool,
    pub push_sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub email_sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub sms_sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub scheduled_for: Option<chrono::DateTime<chrono::Utc>>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Query parameters for the notification inbox.
#[derive(Debug, Deserialize)]
pub struct NotificationListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub unread_only: Option<bool>,
    pub kind: Option<String>,
    pub priority: Option<String>,
    /// Expired rows are excluded unless this is true.
    pub include_expired: Option<bool>,
}

/// DTO for admin creation: one notification, fanned out to N users.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateNotificationRequest {
    #[validate(length(min = 1, message = "At least one recipient is required."))]
    pub user_ids: Vec<i64>,

    #[validate(length(min = 1, max = 50))]
    pub kind: String,

    #[validate(custom(function = validate_priority))]
    pub priority: Option<String>,

    #[validate(length(min = 1, max = 200))]
    pub title: String,

    #[validate(length(min = 1, max = 2000))]
    pub body: String,

    pub scheduled_for: Option<chrono::DateTime<chrono::Utc>>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn validate_priority(priority: &str) -> Result<(), validator::ValidationError> {
    if !PRIORITIES.contains(&priority) {
        return Err(validator::ValidationError::new("invalid_priority"));
    }
    Ok(())
}

/// DTO for bulk read/delete over an explicit id list.
#[derive(Debug, Deserialize, Validate)]
pub struct NotificationIdList {
    #[validate(length(min = 1, message = "At least one id is required."))]
    pub ids: Vec<i64>,
}

/// Optional kind scope for mark-all-read.
#[derive(Debug, Deserialize)]
pub struct MarkAllParams {
    pub kind: Option<String>,
}

/// DTO recording per-channel delivery.
#[derive(Debug, Deserialize)]
pub struct MarkSentRequest {
    pub push: Option<bool>,
    pub email: Option<bool>,
    pub sms: Option<bool>,
}

/// Per-kind / per-priority counts for the stats endpoint.
#[derive(Debug, Serialize, FromRow)]
pub struct NotificationGroupCount {
    pub label: String,
    pub count: i64,
}
