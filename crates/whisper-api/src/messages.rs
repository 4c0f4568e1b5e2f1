use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use whisper_db::to_timestamp;
use whisper_types::api::{Claims, MessageResponse, ReactionGroup};
use whisper_types::models::Message;

use crate::{ApiState, blocking, internal};

pub const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: only messages sent strictly before this instant.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

/// A page of history, newest first. Members only.
pub async fn get_messages(
    State(state): State<ApiState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let limit = query.limit.clamp(1, MAX_PAGE);
    let before = query.before.map(to_timestamp);

    let (rows, reaction_rows) = blocking(&state, move |db| {
        if db.get_membership(conversation_id, user_id).map_err(internal)?.is_none() {
            return Err(StatusCode::FORBIDDEN);
        }

        let rows = db
            .get_messages(conversation_id, limit, before.as_deref())
            .map_err(internal)?;

        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = db.get_reactions_for_messages(&message_ids).map_err(internal)?;

        Ok((rows, reaction_rows))
    })
    .await?;

    // message_id -> emote -> user_ids, in insertion order of first reaction
    let mut reaction_map: HashMap<String, Vec<(String, Vec<Uuid>)>> = HashMap::new();
    for r in reaction_rows {
        let Ok(uid) = r.user_id.parse::<Uuid>() else {
            warn!("Corrupt user_id '{}' on reaction '{}'", r.user_id, r.id);
            continue;
        };
        let groups = reaction_map.entry(r.message_id).or_default();
        match groups.iter_mut().find(|(emote, _)| *emote == r.emote) {
            Some((_, user_ids)) => user_ids.push(uid),
            None => groups.push((r.emote, vec![uid])),
        }
    }

    let messages: Vec<MessageResponse> = rows
        .into_iter()
        .filter_map(|row| {
            let reactions = reaction_map
                .remove(&row.id)
                .unwrap_or_default()
                .into_iter()
                .map(|(emote, user_ids)| ReactionGroup {
                    emote,
                    count: user_ids.len(),
                    user_ids,
                })
                .collect();

            let id = row.id.clone();
            let message = match Message::try_from(row) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Skipping corrupt message '{}': {:#}", id, e);
                    return None;
                }
            };

            Some(MessageResponse {
                id: message.id,
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                body: if message.is_deleted { String::new() } else { message.body },
                sent_at: message.sent_at,
                edited_at: message.edited_at,
                is_deleted: message.is_deleted,
                reactions,
            })
        })
        .collect();

    Ok(Json(messages))
}
