pub mod config;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, header},
    middleware,
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use whisper_api::middleware::require_auth;
use whisper_api::{ApiState, ApiStateInner, conversations, messages};
use whisper_db::Database;
use whisper_gateway::Gateway;
use whisper_gateway::connection;
use whisper_gateway::identity::JwtVerifier;

#[derive(Clone)]
struct ServerState {
    gateway: Gateway,
}

/// Build the full HTTP surface: the `/gateway` WebSocket plus the REST reads.
pub fn router(db: Arc<Database>, verifier: Arc<JwtVerifier>) -> Router {
    let gateway = Gateway::new(db.clone(), verifier.clone());
    let api_state: ApiState = Arc::new(ApiStateInner { db, verifier });

    let protected_routes = Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/{conversation_id}/messages", get(messages::get_messages))
        .layer(middleware::from_fn_with_state(api_state.clone(), require_auth))
        .with_state(api_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(ServerState { gateway });

    Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// The credential comes from the Authorization header or, for browsers that
/// cannot set headers on a WebSocket, the `access_token` query parameter.
async fn ws_upgrade(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let credential = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| params.get("access_token").cloned());

    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.gateway, credential))
}
