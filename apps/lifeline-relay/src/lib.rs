//! Signaling relay for Lifeline support sessions.
//!
//! Both peers of a support session talk to this relay over plain HTTP
//! until their direct WebRTC transport is up: the host registers a
//! session and gets a shareable six-digit code, the viewer joins with
//! that code, and both sides poll `/signal` for the opposite role's
//! offer/answer/ICE messages. Everything lives in one in-process store;
//! the relay never sees media or control traffic.

pub mod cli;
pub mod config;
pub mod handlers;
pub mod rate_limit;
pub mod store;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use handlers::SharedStore;

/// Assemble the relay router over a session store. Split out from
/// `main` so tests (and the client crate's end-to-end tests) can mount
/// the real surface in-process.
pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/session", post(handlers::session_action))
        .route(
            "/signal",
            post(handlers::post_signal).get(handlers::get_signals),
        )
        .with_state(store)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
