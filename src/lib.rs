pub mod appresult;
pub mod auth;
pub mod client;
pub mod config;
pub mod message;
pub mod protocol;
pub mod rooms;
pub mod session;
pub mod store;

use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    http::{HeaderValue, Method, header::CONTENT_TYPE},
    routing::get,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};

pub use appresult::{AppError, AppResult};
pub use config::Config;

use rooms::RoomMux;
use store::SharedStore;

/// Everything request handlers share. The multiplexer is created once here and
/// handed to every handler that pushes messages.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: SharedStore,
    pub rooms: RoomMux,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: SharedStore, config: Config) -> AppState {
        AppState {
            store,
            rooms: RoomMux::new(),
            config: Arc::new(config),
        }
    }
}

pub fn app(state: AppState) -> anyhow::Result<Router> {
    let config = state.config.clone();

    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_minutes)));

    let cors = CorsLayer::new()
        .allow_origin(config.frontend_url.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true);

    let api = Router::new()
        .merge(rooms::router())
        .merge(auth::router(config.dev_login));

    Ok(Router::new()
        .route(&config.socket_path, get(rooms::room_ws))
        .nest("/api", api)
        .with_state(state)
        .layer(session_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}
