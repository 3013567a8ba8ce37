use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use domain::RoomId;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OnlineCount {
    room_id: RoomId,
    online: usize,
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/rooms/{room_id}/online", get(online_count))
        .route("/ws", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn online_count(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<OnlineCount>, ApiError> {
    let room_id = RoomId::from(room_id);
    state.sessions.membership().find_room(room_id).await?;
    let online = state.sessions.presence().online_count(room_id).await?;

    Ok(Json(OnlineCount { room_id, online }))
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let credential = extract_credential(query.token, &headers);
    ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state, credential).run())
}

/// `?token=` 优先，其次 `Authorization: Bearer <token>`
fn extract_credential(query_token: Option<String>, headers: &HeaderMap) -> Option<String> {
    query_token.filter(|token| !token.is_empty()).or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}
