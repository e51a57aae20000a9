use axum::{
    Json, debug_handler,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::info;

use crate::{
    AppError, AppResult, AppState,
    auth::AuthUser,
    message::{ConversationSummary, Identity, Message, NewMessage},
    store::SharedStore,
};

use super::RoomMux;

/// Number of messages returned by the recent feed.
const RECENT_LIMIT: u32 = 5;

#[derive(Deserialize)]
pub(crate) struct HistoryQuery {
    #[serde(rename = "userId")]
    user_id: Option<Identity>,
}

/// Persists a message, then pushes it to the receiver's room.
#[debug_handler(state = AppState)]
pub(crate) async fn send_msg(
    AuthUser(sender): AuthUser,
    State(store): State<SharedStore>,
    State(rooms): State<RoomMux>,
    Json(NewMessage { receiver, content }): Json<NewMessage>,
) -> AppResult<(StatusCode, Json<Message>)> {
    if content.trim().is_empty() {
        return Err(AppError::BadRequest("message content is empty".to_owned()));
    }
    if receiver.as_str().is_empty() {
        return Err(AppError::BadRequest("missing receiverId".to_owned()));
    }

    let message = store.create(&sender, &receiver, &content).await?;
    let delivered = rooms.deliver_message(&message);
    info!("{sender} -> {receiver}: message {} ({delivered} live)", message.id);

    Ok((StatusCode::CREATED, Json(message)))
}

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    AuthUser(viewer): AuthUser,
    State(store): State<SharedStore>,
    Query(HistoryQuery { user_id }): Query<HistoryQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let Some(peer) = user_id else {
        return Err(AppError::BadRequest("Missing userId parameter".to_owned()));
    };
    Ok(Json(store.between(&viewer, &peer).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn recent(
    AuthUser(viewer): AuthUser,
    State(store): State<SharedStore>,
) -> AppResult<Json<Vec<Message>>> {
    Ok(Json(store.recent(&viewer, RECENT_LIMIT).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn conversations(
    AuthUser(viewer): AuthUser,
    State(store): State<SharedStore>,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(store.conversations(&viewer).await?))
}
