use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use whisper_types::events::GatewayEvent;

use crate::dispatcher::{ConnectionId, Dispatcher};
use crate::error::{ConnectError, GatewayError};
use crate::identity::IdentityVerifier;
use crate::outcome::Outcome;
use crate::presence::PresenceTracker;
use crate::store::Store;

/// A connection that passed identity verification and is registered for fan-out.
pub struct Session {
    pub conn_id: ConnectionId,
    pub user_id: Uuid,
    /// Groups subscribed at connect time.
    pub conversation_ids: Vec<Uuid>,
    /// Outbound queue for this connection.
    pub events: mpsc::Receiver<GatewayEvent>,
}

/// Binds connections to identities and drives their group subscriptions.
#[derive(Clone)]
pub struct ConnectionRegistry {
    verifier: Arc<dyn IdentityVerifier>,
    store: Store,
    dispatcher: Dispatcher,
    presence: PresenceTracker,
}

impl ConnectionRegistry {
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        store: Store,
        dispatcher: Dispatcher,
        presence: PresenceTracker,
    ) -> Self {
        Self {
            verifier,
            store,
            dispatcher,
            presence,
        }
    }

    /// Verify `credential`, then register the connection and subscribe it to
    /// every conversation the identity belongs to. Nothing is left registered
    /// if verification or a membership lookup fails.
    pub async fn on_connect(&self, credential: &str) -> Result<Session, ConnectError> {
        let Some(user_id) = self.verifier.verify(credential) else {
            warn!("No valid identity in credential; aborting connection");
            return Err(ConnectError::Unauthenticated);
        };

        // Registered before memberships are read, so a concurrent add_user
        // either shows up in the listing or finds this connection live.
        let (conn_id, events) = self.dispatcher.register(user_id).await;
        let conversation_ids = match self.subscribe_memberships(conn_id, user_id).await {
            Ok(ids) => ids,
            Err(e) => {
                self.dispatcher.unregister(conn_id).await;
                return Err(e.into());
            }
        };

        self.presence.touch(user_id);
        info!(
            "{} connected as {} with {} groups",
            user_id,
            conn_id,
            conversation_ids.len()
        );

        Ok(Session {
            conn_id,
            user_id,
            conversation_ids,
            events,
        })
    }

    /// Subscribe to the listed memberships, then re-read them and drop any
    /// that a concurrent remove_user deleted in between.
    async fn subscribe_memberships(&self, conn_id: ConnectionId, user_id: Uuid) -> Result<Vec<Uuid>, GatewayError> {
        let listed = self
            .store
            .call(move |db| db.list_conversation_ids(user_id))
            .await?;
        for conversation_id in &listed {
            self.dispatcher.subscribe(conn_id, *conversation_id).await;
            debug!("Subscribed {} ({}) to group {}", user_id, conn_id, conversation_id);
        }

        let current: HashSet<Uuid> = self
            .store
            .call(move |db| db.list_conversation_ids(user_id))
            .await?
            .into_iter()
            .collect();
        for conversation_id in self.dispatcher.groups_of(conn_id).await {
            if !current.contains(&conversation_id) {
                self.dispatcher.unsubscribe(conn_id, conversation_id).await;
                debug!("{} lost membership of {} while connecting", user_id, conversation_id);
            }
        }

        Ok(self.dispatcher.groups_of(conn_id).await)
    }

    /// Drop the connection's subscriptions and stamp presence.
    pub async fn on_disconnect(&self, conn_id: ConnectionId, user_id: Uuid, reason: &str) {
        self.dispatcher.unregister(conn_id).await;
        self.presence.touch(user_id);
        info!("{} ({}) disconnected: {}", user_id, conn_id, reason);
    }

    /// Attach this connection to a conversation's group. Only members may join.
    pub async fn join_conversation(
        &self,
        conn_id: ConnectionId,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Outcome, GatewayError> {
        let is_member = self
            .store
            .call(move |db| Ok(db.get_membership(conversation_id, user_id)?.is_some()))
            .await?;
        if !is_member {
            debug!("{} may not join {}: not a member", user_id, conversation_id);
            return Ok(Outcome::Denied);
        }

        Ok(if self.dispatcher.subscribe(conn_id, conversation_id).await {
            Outcome::Applied
        } else {
            Outcome::Unchanged
        })
    }

    /// Detach this connection from a group. The membership row is untouched.
    pub async fn leave_conversation(&self, conn_id: ConnectionId, conversation_id: Uuid) -> Outcome {
        if self.dispatcher.unsubscribe(conn_id, conversation_id).await {
            Outcome::Applied
        } else {
            Outcome::Unchanged
        }
    }
}
