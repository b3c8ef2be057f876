// src/models/message.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Soft-delete lifecycle of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Visible,
    Deleted,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Visible => "visible",
            MessageStatus::Deleted => "deleted",
        }
    }
}

/// Represents the 'messages' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub content: String,
    /// 'text' or 'system'.
    pub kind: String,
    pub status: String,
    pub is_read: bool,
    pub read_at: Option<chrono::DateTime<chrono::Utc>>,
    pub reply_to_id: Option<i64>,
    /// Free-form bag for system messages; chat notifications use the tagged
    /// form in `models::notification::NotificationMeta` instead.
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// DTO for sending a message.
#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 2000, message = "Message must be 1-2000 characters."))]
    pub content: String,

    pub reply_to_id: Option<i64>,
}

/// Query parameters for the message page.
#[derive(Debug, Deserialize)]
pub struct MessageListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
