//! Session-backed authentication.
//!
//! Signing in is owned by the external identity provider, which stores the
//! user's identity in the session under [`USER_ID`]. Everything here only reads
//! that binding, except the development login.

use axum::{Router, extract::FromRequestParts, http::request::Parts, routing::post};
use tower_sessions::Session;

use crate::{AppError, AppState, message::Identity, session::USER_ID};

mod login;
mod logout;

pub use login::dev_login;
pub use logout::logout;

/// The identity bound to the caller's session. Rejects with 401 when absent.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, message)| anyhow::anyhow!(message))?;

        match session.get::<Identity>(USER_ID).await? {
            Some(identity) => Ok(AuthUser(identity)),
            None => Err(AppError::Unauthorized),
        }
    }
}

pub fn router(dev_login: bool) -> Router<AppState> {
    let router = Router::new().route("/logout", post(logout::logout));
    if dev_login {
        router.route("/dev/login/{identity}", post(login::dev_login))
    } else {
        router
    }
}
