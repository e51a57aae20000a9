//! Client side of messaging: the reconnecting socket transport, the HTTP API
//! client and the per-conversation timeline.

mod api;
mod chat;
mod timeline;
mod transport;

pub use api::{HttpApi, MessageApi};
pub use chat::{ChatView, EventSink, LiveFeed, LiveUpdate};
pub use timeline::Timeline;
pub use transport::{Backoff, Transport, TransportConfig, TransportState};
