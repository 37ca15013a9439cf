//! Route handlers.
//!
//! Every handler sits behind the security pipeline; bodies arrive already
//! parsed and sanitized through [`SanitizedBody`](crate::http::SanitizedBody).

use axum::Router;

use crate::http::AppState;

pub mod auth;
pub mod contact;
pub mod public;
pub mod uploads;

/// All application routes, without the outer layers.
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(public::router(state))
        .merge(auth::router())
        .merge(contact::router(state))
        .merge(uploads::router(state))
}
