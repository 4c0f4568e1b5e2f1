use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::warn;

use whisper_db::parse_timestamp;
use whisper_types::api::{Claims, ConversationSummary};

use crate::{ApiState, blocking, internal};

/// The caller's conversations, most recently active first.
pub async fn list_conversations(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let rows = blocking(&state, move |db| db.list_conversation_summaries(user_id).map_err(internal)).await?;

    let summaries: Vec<ConversationSummary> = rows
        .into_iter()
        .filter_map(|row| {
            let conversation_id = match row.conversation_id.parse() {
                Ok(id) => id,
                Err(e) => {
                    warn!("Corrupt conversation id '{}': {}", row.conversation_id, e);
                    return None;
                }
            };
            Some(ConversationSummary {
                conversation_id,
                title: row.title,
                is_group: row.is_group,
                last_body: row.last_body,
                last_sent_at: row.last_sent_at.as_deref().and_then(|raw| parse_timestamp(raw).ok()),
                unread_count: row.unread_count,
            })
        })
        .collect();

    Ok(Json(summaries))
}
