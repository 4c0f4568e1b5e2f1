use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

// -- Conversations --

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: Uuid,
    pub title: Option<String>,
    pub is_group: bool,
    pub last_body: Option<String>,
    pub last_sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub unread_count: u32,
}

// -- Messages --

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    /// Empty when the message is deleted.
    pub body: String,
    pub sent_at: chrono::DateTime<chrono::Utc>,
    pub edited_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_deleted: bool,
    pub reactions: Vec<ReactionGroup>,
}

// -- Reactions --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emote: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}
