use axum::{debug_handler, extract::Path, http::StatusCode};
use tower_sessions::Session;
use tracing::info;

use crate::{AppError, AppResult, message::Identity, session::USER_ID};

/// Binds the session to `identity` without a provider round-trip.
#[debug_handler]
pub async fn dev_login(
    Path(identity): Path<String>,
    session: Session,
) -> AppResult<StatusCode> {
    if identity.trim().is_empty() {
        return Err(AppError::BadRequest("empty identity".to_owned()));
    }

    session.insert(USER_ID, Identity::new(identity.clone())).await?;
    info!("dev login as {identity}");
    Ok(StatusCode::NO_CONTENT)
}
