use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use whisper_db::queries;
use whisper_types::events::GatewayEvent;

use crate::dispatcher::Dispatcher;
use crate::error::GatewayError;
use crate::outcome::Outcome;
use crate::pipeline::is_admin;
use crate::store::Store;

/// Admin-gated add/remove of conversation members.
#[derive(Clone)]
pub struct MembershipManager {
    store: Store,
    dispatcher: Dispatcher,
}

impl MembershipManager {
    pub fn new(store: Store, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Add `target_id` as a regular member. The target's live connections are
    /// subscribed before `member-added` goes out, so they see it too.
    pub async fn add_user(
        &self,
        caller_id: Uuid,
        conversation_id: Uuid,
        target_id: Uuid,
    ) -> Result<Outcome, GatewayError> {
        let outcome = self
            .store
            .call(move |db| {
                db.transaction(|tx| {
                    if !is_admin(tx, conversation_id, caller_id)? {
                        return Ok(Outcome::Denied);
                    }
                    if queries::user_by_id(tx, target_id)?.is_none() {
                        return Ok(Outcome::NotFound);
                    }
                    let inserted = queries::insert_membership(tx, conversation_id, target_id, false, Utc::now())?;
                    Ok(if inserted { Outcome::Applied } else { Outcome::Unchanged })
                })
            })
            .await?;

        if !outcome.is_applied() {
            debug!(
                "add_user {} -> {} by {} not applied: {:?}",
                target_id, conversation_id, caller_id, outcome
            );
            return Ok(outcome);
        }

        info!("{} added {} to conversation {}", caller_id, target_id, conversation_id);
        self.dispatcher.subscribe_user(target_id, conversation_id).await;
        self.dispatcher
            .broadcast(
                conversation_id,
                GatewayEvent::MemberAdded {
                    conversation_id,
                    target_id,
                },
            )
            .await;

        Ok(Outcome::Applied)
    }

    /// Remove `target_id`. Admins cannot remove themselves this way. The target
    /// still receives `member-removed`, then its live connections leave the group.
    pub async fn remove_user(
        &self,
        caller_id: Uuid,
        conversation_id: Uuid,
        target_id: Uuid,
    ) -> Result<Outcome, GatewayError> {
        if caller_id == target_id {
            debug!("{} tried to remove themselves from {}", caller_id, conversation_id);
            return Ok(Outcome::Denied);
        }

        let outcome = self
            .store
            .call(move |db| {
                db.transaction(|tx| {
                    if !is_admin(tx, conversation_id, caller_id)? {
                        return Ok(Outcome::Denied);
                    }
                    let removed = queries::delete_membership(tx, conversation_id, target_id)?;
                    Ok(if removed { Outcome::Applied } else { Outcome::NotFound })
                })
            })
            .await?;

        if !outcome.is_applied() {
            debug!(
                "remove_user {} <- {} by {} not applied: {:?}",
                target_id, conversation_id, caller_id, outcome
            );
            return Ok(outcome);
        }

        info!("{} removed {} from conversation {}", caller_id, target_id, conversation_id);
        self.dispatcher
            .broadcast(
                conversation_id,
                GatewayEvent::MemberRemoved {
                    conversation_id,
                    target_id,
                },
            )
            .await;
        self.dispatcher.unsubscribe_user(target_id, conversation_id).await;

        Ok(Outcome::Applied)
    }
}
