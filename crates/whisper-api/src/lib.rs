//! Read-only REST surface over the conversation store. All routes expect a
//! bearer token accepted by the same verifier as the gateway.

pub mod conversations;
pub mod messages;
pub mod middleware;

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::error;

use whisper_db::Database;
use whisper_gateway::identity::JwtVerifier;

pub type ApiState = Arc<ApiStateInner>;

pub struct ApiStateInner {
    pub db: Arc<Database>,
    pub verifier: Arc<JwtVerifier>,
}

/// Run a blocking store read off the async runtime.
pub(crate) async fn blocking<F, T>(state: &ApiState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> Result<T, StatusCode> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
}

/// Log a store failure and turn it into a 500.
pub(crate) fn internal(e: anyhow::Error) -> StatusCode {
    error!("Store error: {:#}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::{Router, middleware::from_fn_with_state, routing::get};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    pub fn state() -> ApiState {
        Arc::new(ApiStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            verifier: Arc::new(JwtVerifier::new("api-secret", None, None)),
        })
    }

    pub fn router(state: ApiState) -> Router {
        Router::new()
            .route("/conversations", get(crate::conversations::list_conversations))
            .route("/conversations/{conversation_id}/messages", get(crate::messages::get_messages))
            .layer(from_fn_with_state(state.clone(), crate::middleware::require_auth))
            .with_state(state)
    }

    /// GET `uri` as `user_id`; returns status and parsed JSON body (Null if empty).
    pub async fn get_json(state: &ApiState, uri: &str, user_id: Uuid) -> (StatusCode, serde_json::Value) {
        let token = state
            .verifier
            .issue(user_id, "tester", chrono::Duration::minutes(5))
            .unwrap();
        let request = Request::get(uri)
            .header("authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();

        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}
