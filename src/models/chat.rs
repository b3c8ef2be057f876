// src/models/chat.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'chats' table in the database.
///
/// One row per unordered user pair: rows are stored with user1_id < user2_id,
/// enforced by a CHECK plus a UNIQUE (user1_id, user2_id) constraint. The
/// last-message preview and per-side unread counters are denormalized so chat
/// lists never re-aggregate the messages table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub user1_id: i64,
    pub user2_id: i64,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<chrono::DateTime<chrono::Utc>>,
    pub user1_unread_count: i32,
    pub user2_unread_count: i32,
    pub user1_archived: bool,
    pub user2_archived: bool,
    pub user1_muted: bool,
    pub user2_muted: bool,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Chat {
    pub fn is_participant(&self, user_id: i64) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The other participant. Caller must already be known to be a participant.
    pub fn other_user(&self, user_id: i64) -> i64 {
        if self.user1_id == user_id {
            self.user2_id
        } else {
            self.user1_id
        }
    }

    pub fn unread_for(&self, user_id: i64) -> i32 {
        if self.user1_id == user_id {
            self.user1_unread_count
        } else {
            self.user2_unread_count
        }
    }
}

/// Canonicalizes an unordered user pair so exactly one chat row can exist.
pub fn canonical_pair(a: i64, b: i64) -> (i64, i64) {
    if a < b { (a, b) } else { (b, a) }
}

/// DTO for opening (or fetching) a conversation with another user.
#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub user_id: i64,
}

/// Query parameters for listing the caller's chats.
#[derive(Debug, Deserialize)]
pub struct ChatListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// Include archived conversations (default false).
    pub include_archived: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_canonicalized() {
        assert_eq!(canonical_pair(7, 3), (3, 7));
        assert_eq!(canonical_pair(3, 7), (3, 7));
    }

    #[test]
    fn other_user_flips_sides() {
        let chat = Chat {
            id: 1,
            user1_id: 3,
            user2_id: 7,
            last_message_preview: None,
            last_message_at: None,
            user1_unread_count: 2,
            user2_unread_count: 0,
            user1_archived: false,
            user2_archived: false,
            user1_muted: false,
            user2_muted: false,
            created_at: None,
        };
        assert_eq!(chat.other_user(3), 7);
        assert_eq!(chat.other_user(7), 3);
        assert_eq!(chat.unread_for(3), 2);
        assert!(!chat.is_participant(8));
    }
}
