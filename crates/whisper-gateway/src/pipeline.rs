//! Message mutations: send, mark-read, edit, delete, react, typing.
//!
//! Every check and the write it guards run inside one store transaction, so a
//! concurrent delete or membership change can never slip between them. The
//! broadcast happens after commit. Lifecycle of a message:
//! Active --edit--> Active --delete--> Deleted (terminal).

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use whisper_db::Connection;
use whisper_db::models::MessageRow;
use whisper_db::queries;
use whisper_types::events::GatewayEvent;
use whisper_types::models::{Message, is_valid_body, is_valid_emote};

use crate::dispatcher::Dispatcher;
use crate::error::GatewayError;
use crate::outcome::Outcome;
use crate::store::Store;

/// Result of the checks run inside a transaction: either the value needed to
/// broadcast, or the outcome explaining why nothing was written.
type Checked<T> = Result<T, Outcome>;

#[derive(Clone)]
pub struct MessagePipeline {
    store: Store,
    dispatcher: Dispatcher,
}

impl MessagePipeline {
    pub fn new(store: Store, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Insert the message, bump every other member's unread counter and the
    /// conversation's activity time as one transaction, then broadcast.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        conversation_id: Uuid,
        body: String,
    ) -> Result<Outcome, GatewayError> {
        if !is_valid_body(&body) {
            debug!("{} sent an invalid body to {}", sender_id, conversation_id);
            return Ok(Outcome::Invalid);
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            body,
            sent_at: Utc::now(),
            edited_at: None,
            is_deleted: false,
        };
        let row = MessageRow::from(&message);
        let sent_at = message.sent_at;

        let created = self
            .store
            .call(move |db| {
                db.transaction(|tx| {
                    if queries::membership(tx, conversation_id, sender_id)?.is_none() {
                        return Ok(false);
                    }
                    queries::insert_message(tx, &row)?;
                    queries::increment_unread(tx, conversation_id, sender_id)?;
                    queries::set_conversation_activity(tx, conversation_id, sent_at)?;
                    Ok(true)
                })
            })
            .await?;

        if !created {
            debug!("{} is not a member of {}, message dropped", sender_id, conversation_id);
            return Ok(Outcome::Denied);
        }

        self.dispatcher
            .broadcast(
                conversation_id,
                GatewayEvent::MessageCreated {
                    id: message.id,
                    conversation_id,
                    sender_id,
                    body: message.body,
                    sent_at,
                    is_deleted: false,
                },
            )
            .await;

        Ok(Outcome::Applied)
    }

    /// Personal state only; nothing is broadcast.
    pub async fn mark_read(&self, user_id: Uuid, conversation_id: Uuid) -> Result<Outcome, GatewayError> {
        let marked = self
            .store
            .call(move |db| db.with_conn(|conn| queries::mark_read(conn, conversation_id, user_id, Utc::now())))
            .await?;

        Ok(if marked { Outcome::Applied } else { Outcome::Denied })
    }

    pub async fn edit_message(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        body: String,
    ) -> Result<Outcome, GatewayError> {
        if !is_valid_body(&body) {
            return Ok(Outcome::Invalid);
        }

        let edited_at = Utc::now();
        let new_body = body.clone();
        let checked: Checked<Uuid> = self
            .store
            .call(move |db| {
                db.transaction(|tx| {
                    let message = match load_message(tx, message_id)? {
                        Ok(message) => message,
                        Err(outcome) => return Ok(Err(outcome)),
                    };
                    if message.sender_id != user_id {
                        return Ok(Err(Outcome::Denied));
                    }
                    if !queries::update_message_body(tx, message_id, &new_body, edited_at)? {
                        return Ok(Err(Outcome::Gone));
                    }
                    Ok(Ok(message.conversation_id))
                })
            })
            .await?;

        let conversation_id = match checked {
            Ok(conversation_id) => conversation_id,
            Err(outcome) => {
                debug!("Edit of {} by {} not applied: {:?}", message_id, user_id, outcome);
                return Ok(outcome);
            }
        };

        self.dispatcher
            .broadcast(
                conversation_id,
                GatewayEvent::MessageEdited {
                    id: message_id,
                    body,
                    edited_at,
                },
            )
            .await;

        Ok(Outcome::Applied)
    }

    /// Allowed for the sender or an admin of the conversation. Deletion is terminal.
    pub async fn delete_message(&self, user_id: Uuid, message_id: Uuid) -> Result<Outcome, GatewayError> {
        let checked: Checked<Uuid> = self
            .store
            .call(move |db| {
                db.transaction(|tx| {
                    let message = match load_message(tx, message_id)? {
                        Ok(message) => message,
                        Err(outcome) => return Ok(Err(outcome)),
                    };
                    if message.sender_id != user_id && !is_admin(tx, message.conversation_id, user_id)? {
                        return Ok(Err(Outcome::Denied));
                    }
                    if !queries::soft_delete_message(tx, message_id)? {
                        return Ok(Err(Outcome::Unchanged));
                    }
                    Ok(Ok(message.conversation_id))
                })
            })
            .await?;

        let conversation_id = match checked {
            Ok(conversation_id) => conversation_id,
            Err(outcome) => {
                debug!("Delete of {} by {} not applied: {:?}", message_id, user_id, outcome);
                return Ok(outcome);
            }
        };

        self.dispatcher
            .broadcast(conversation_id, GatewayEvent::MessageDeleted { id: message_id })
            .await;

        Ok(Outcome::Applied)
    }

    /// Toggle the caller's `emote` on a live message. The broadcast is the same
    /// whether the reaction was added or removed.
    pub async fn react(&self, user_id: Uuid, message_id: Uuid, emote: String) -> Result<Outcome, GatewayError> {
        if !is_valid_emote(&emote) {
            return Ok(Outcome::Invalid);
        }

        let toggled_emote = emote.clone();
        let checked: Checked<(Uuid, bool)> = self
            .store
            .call(move |db| {
                db.transaction(|tx| {
                    let message = match load_message(tx, message_id)? {
                        Ok(message) => message,
                        Err(outcome) => return Ok(Err(outcome)),
                    };
                    if message.is_deleted {
                        return Ok(Err(Outcome::Gone));
                    }
                    let added = queries::toggle_reaction(
                        tx,
                        Uuid::new_v4(),
                        message_id,
                        user_id,
                        &toggled_emote,
                        Utc::now(),
                    )?;
                    Ok(Ok((message.conversation_id, added)))
                })
            })
            .await?;

        let (conversation_id, added) = match checked {
            Ok(toggled) => toggled,
            Err(outcome) => {
                debug!("Reaction on {} by {} not applied: {:?}", message_id, user_id, outcome);
                return Ok(outcome);
            }
        };
        debug!(
            "{} {} {} on {}",
            user_id,
            if added { "added" } else { "removed" },
            emote,
            message_id
        );

        self.dispatcher
            .broadcast(
                conversation_id,
                GatewayEvent::ReactionToggled {
                    message_id,
                    user_id,
                    emote,
                },
            )
            .await;

        Ok(Outcome::Applied)
    }

    /// Ephemeral; never persisted.
    pub async fn typing(&self, user_id: Uuid, conversation_id: Uuid, is_typing: bool) -> Result<Outcome, GatewayError> {
        let is_member = self
            .store
            .call(move |db| Ok(db.get_membership(conversation_id, user_id)?.is_some()))
            .await?;
        if !is_member {
            return Ok(Outcome::Denied);
        }

        self.dispatcher
            .broadcast(
                conversation_id,
                GatewayEvent::Typing {
                    conversation_id,
                    user_id,
                    is_typing,
                },
            )
            .await;

        Ok(Outcome::Applied)
    }
}

/// Edit, delete and react are gated on sender, admin and lifecycle rules,
/// not on current membership: a former member may still manage what they sent.
fn load_message(conn: &Connection, message_id: Uuid) -> anyhow::Result<Checked<Message>> {
    match queries::message_by_id(conn, message_id)? {
        Some(row) => Ok(Ok(Message::try_from(row)?)),
        None => Ok(Err(Outcome::NotFound)),
    }
}

pub(crate) fn is_admin(conn: &Connection, conversation_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
    Ok(queries::membership(conn, conversation_id, user_id)?.is_some_and(|m| m.is_admin))
}
