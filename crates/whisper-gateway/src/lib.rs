pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod membership;
pub mod outcome;
pub mod pipeline;
pub mod presence;
pub mod registry;
pub mod store;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use uuid::Uuid;

use whisper_db::Database;
use whisper_types::events::GatewayCommand;

use crate::dispatcher::{ConnectionId, Dispatcher};
use crate::error::GatewayError;
use crate::identity::IdentityVerifier;
use crate::membership::MembershipManager;
use crate::outcome::Outcome;
use crate::pipeline::MessagePipeline;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;
use crate::store::Store;

/// The real-time core, wired together. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    pub dispatcher: Dispatcher,
    pub registry: ConnectionRegistry,
    pub pipeline: MessagePipeline,
    pub members: MembershipManager,
}

impl Gateway {
    pub fn new(db: Arc<Database>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        let store = Store::new(db);
        let dispatcher = Dispatcher::new();
        let presence = PresenceTracker::new(store.clone());

        Self {
            registry: ConnectionRegistry::new(verifier, store.clone(), dispatcher.clone(), presence),
            pipeline: MessagePipeline::new(store.clone(), dispatcher.clone()),
            members: MembershipManager::new(store, dispatcher.clone()),
            dispatcher,
        }
    }

    /// Run one command on behalf of an authenticated connection.
    pub async fn execute(
        &self,
        conn_id: ConnectionId,
        user_id: Uuid,
        command: GatewayCommand,
    ) -> Result<Outcome, GatewayError> {
        match command {
            // The connection is already bound to an identity.
            GatewayCommand::Identify { .. } => Ok(Outcome::Unchanged),
            GatewayCommand::SendMessage { conversation_id, body } => {
                self.pipeline.send_message(user_id, conversation_id, body).await
            }
            GatewayCommand::MarkRead { conversation_id } => self.pipeline.mark_read(user_id, conversation_id).await,
            GatewayCommand::EditMessage { message_id, body } => {
                self.pipeline.edit_message(user_id, message_id, body).await
            }
            GatewayCommand::DeleteMessage { message_id } => self.pipeline.delete_message(user_id, message_id).await,
            GatewayCommand::React { message_id, emote } => self.pipeline.react(user_id, message_id, emote).await,
            GatewayCommand::Typing {
                conversation_id,
                is_typing,
            } => self.pipeline.typing(user_id, conversation_id, is_typing).await,
            GatewayCommand::JoinConversation { conversation_id } => {
                self.registry
                    .join_conversation(conn_id, user_id, conversation_id)
                    .await
            }
            GatewayCommand::LeaveConversation { conversation_id } => {
                Ok(self.registry.leave_conversation(conn_id, conversation_id).await)
            }
            GatewayCommand::AddUser {
                conversation_id,
                target_id,
            } => self.members.add_user(user_id, conversation_id, target_id).await,
            GatewayCommand::RemoveUser {
                conversation_id,
                target_id,
            } => self.members.remove_user(user_id, conversation_id, target_id).await,
        }
    }
}
