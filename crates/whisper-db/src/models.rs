//! Database row types. These map directly to SQLite rows and stay
//! independent of the whisper-types models; `TryFrom` converts between them.

use anyhow::{Error, Result, anyhow};
use uuid::Uuid;

use whisper_types::models::{Conversation, Membership, Message, Reaction};

use crate::parse_timestamp;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub created_at: String,
    pub last_seen_at: Option<String>,
}

pub struct ConversationRow {
    pub id: String,
    pub title: Option<String>,
    pub is_group: bool,
    pub created_at: String,
    pub last_activity_at: String,
}

pub struct MembershipRow {
    pub conversation_id: String,
    pub user_id: String,
    pub is_admin: bool,
    pub joined_at: String,
    pub last_read_at: Option<String>,
    pub unread_count: u32,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub sent_at: String,
    pub edited_at: Option<String>,
    pub is_deleted: bool,
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emote: String,
    pub created_at: String,
}

/// One line of a member's conversation list.
pub struct ConversationSummaryRow {
    pub conversation_id: String,
    pub title: Option<String>,
    pub is_group: bool,
    /// Body of the newest message, `None` if there is none or it was deleted.
    pub last_body: Option<String>,
    pub last_sent_at: Option<String>,
    pub unread_count: u32,
}

pub(crate) fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| anyhow!("corrupt id '{}': {}", raw, e))
}

fn parse_optional(raw: Option<&str>) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    raw.map(parse_timestamp).transpose()
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = Error;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            is_group: row.is_group,
            title: row.title,
            created_at: parse_timestamp(&row.created_at)?,
            last_activity_at: parse_timestamp(&row.last_activity_at)?,
        })
    }
}

impl TryFrom<MembershipRow> for Membership {
    type Error = Error;

    fn try_from(row: MembershipRow) -> Result<Self> {
        Ok(Self {
            conversation_id: parse_id(&row.conversation_id)?,
            user_id: parse_id(&row.user_id)?,
            is_admin: row.is_admin,
            joined_at: parse_timestamp(&row.joined_at)?,
            last_read_at: parse_optional(row.last_read_at.as_deref())?,
            unread_count: row.unread_count,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            conversation_id: parse_id(&row.conversation_id)?,
            sender_id: parse_id(&row.sender_id)?,
            body: row.body,
            sent_at: parse_timestamp(&row.sent_at)?,
            edited_at: parse_optional(row.edited_at.as_deref())?,
            is_deleted: row.is_deleted,
        })
    }
}

impl TryFrom<ReactionRow> for Reaction {
    type Error = Error;

    fn try_from(row: ReactionRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            message_id: parse_id(&row.message_id)?,
            user_id: parse_id(&row.user_id)?,
            emote: row.emote,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl From<&Message> for MessageRow {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.to_string(),
            conversation_id: message.conversation_id.to_string(),
            sender_id: message.sender_id.to_string(),
            body: message.body.clone(),
            sent_at: crate::to_timestamp(message.sent_at),
            edited_at: message.edited_at.map(crate::to_timestamp),
            is_deleted: message.is_deleted,
        }
    }
}
