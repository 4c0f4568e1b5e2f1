use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest message body accepted, counted in characters.
pub const MAX_BODY_CHARS: usize = 4000;

/// Longest reaction emote accepted, counted in characters.
pub const MAX_EMOTE_CHARS: usize = 16;

/// Longest conversation title accepted, counted in characters.
pub const MAX_TITLE_CHARS: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub is_group: bool,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// One row per (conversation, member) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

/// A message in a conversation. `is_deleted` only ever goes from false to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emote: String,
    pub created_at: DateTime<Utc>,
}

/// Returns true if `body` is within the message length limit.
pub fn is_valid_body(body: &str) -> bool {
    body.chars().count() <= MAX_BODY_CHARS
}

/// Returns true if `emote` is non-empty and within the emote length limit.
pub fn is_valid_emote(emote: &str) -> bool {
    !emote.is_empty() && emote.chars().count() <= MAX_EMOTE_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limits_count_characters_not_bytes() {
        assert!(is_valid_body("hi"));
        assert!(is_valid_body("   "));
        assert!(is_valid_body(""));

        let at_limit = "é".repeat(MAX_BODY_CHARS);
        assert!(at_limit.len() > MAX_BODY_CHARS);
        assert!(is_valid_body(&at_limit));
        assert!(!is_valid_body(&"a".repeat(MAX_BODY_CHARS + 1)));
    }

    #[test]
    fn emote_limits() {
        assert!(is_valid_emote("👍"));
        assert!(!is_valid_emote(""));
        assert!(!is_valid_emote(&"x".repeat(MAX_EMOTE_CHARS + 1)));
    }
}
