use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum GatewayEvent {
    /// Server confirms authentication and lists the groups the connection joined
    Ready {
        user_id: Uuid,
        conversation_ids: Vec<Uuid>,
    },

    /// A new message was posted
    MessageCreated {
        id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: String,
        sent_at: DateTime<Utc>,
        is_deleted: bool,
    },

    /// The sender changed a message body
    MessageEdited {
        id: Uuid,
        body: String,
        edited_at: DateTime<Utc>,
    },

    /// A message was deleted. Carries no body.
    MessageDeleted { id: Uuid },

    /// A reaction was added or removed. The event does not say which; clients
    /// re-derive the current reaction set.
    ReactionToggled {
        message_id: Uuid,
        user_id: Uuid,
        emote: String,
    },

    /// A member started or stopped typing
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    MemberAdded { conversation_id: Uuid, target_id: Uuid },

    MemberRemoved { conversation_id: Uuid, target_id: Uuid },

    /// A command failed in the store. Sent only to the connection that issued it.
    Error { operation: String, message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum GatewayCommand {
    /// Authenticate a connection that did not present a credential on upgrade
    Identify { token: String },

    SendMessage { conversation_id: Uuid, body: String },

    MarkRead { conversation_id: Uuid },

    EditMessage { message_id: Uuid, body: String },

    DeleteMessage { message_id: Uuid },

    React { message_id: Uuid, emote: String },

    Typing { conversation_id: Uuid, is_typing: bool },

    JoinConversation { conversation_id: Uuid },

    LeaveConversation { conversation_id: Uuid },

    AddUser { conversation_id: Uuid, target_id: Uuid },

    RemoveUser { conversation_id: Uuid, target_id: Uuid },
}

impl GatewayCommand {
    /// Wire name of the command, used in logs and `error` events.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::SendMessage { .. } => "send-message",
            Self::MarkRead { .. } => "mark-read",
            Self::EditMessage { .. } => "edit-message",
            Self::DeleteMessage { .. } => "delete-message",
            Self::React { .. } => "react",
            Self::Typing { .. } => "typing",
            Self::JoinConversation { .. } => "join-conversation",
            Self::LeaveConversation { .. } => "leave-conversation",
            Self::AddUser { .. } => "add-user",
            Self::RemoveUser { .. } => "remove-user",
        }
    }
}
