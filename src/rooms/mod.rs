mod msg;
mod mux;
mod session;
mod ws;

use axum::{Router, routing::get};

use crate::AppState;

pub use mux::{ConnectionId, Outbox, RoomMux};
pub use session::DeliverySession;
pub use ws::room_ws;

/// Request/response message endpoints, mounted under `/api`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages", get(msg::history).post(msg::send_msg))
        .route("/messages/recent", get(msg::recent))
        .route("/conversations", get(msg::conversations))
}
