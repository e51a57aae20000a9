use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as Frame, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::{AppState, auth::AuthUser, message::Identity, protocol::ClientEvent, store::SharedStore};

use super::{DeliverySession, RoomMux};

#[debug_handler(state = AppState)]
pub async fn room_ws(
    AuthUser(owner): AuthUser,
    State(rooms): State<RoomMux>,
    State(store): State<SharedStore>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |stream| serve(stream, rooms, store, owner))
}

async fn serve(stream: WebSocket, rooms: RoomMux, store: SharedStore, owner: Identity) {
    let (mut session, mut outbox) = DeliverySession::open(rooms, store, owner);
    let conn = session.id();
    let (mut sender, mut receiver) = stream.split();

    let mut forward_task = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let text = match event.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!("{conn}: cannot encode {}: {e}", event.name());
                    continue;
                }
            };
            if sender.send(Frame::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Frame::Text(text))) => match ClientEvent::decode(text.as_str()) {
                    Ok(event) => {
                        if let Err(e) = session.handle(event).await {
                            warn!("{conn}: {e:#}");
                        }
                    }
                    Err(e) => warn!("{conn}: dropped malformed frame: {e:#}"),
                },
                Some(Ok(Frame::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("{conn}: transport error: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = &mut forward_task => break,
        }
    }

    forward_task.abort();
    drop(session);
}
