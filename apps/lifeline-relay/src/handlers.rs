use axum::{
    extract::{ConnectInfo, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use lifeline_proto::{
    PollQuery, PollResponse, SessionAction, SessionDescriptor, SessionResponse, SignalRequest,
};

use crate::store::{SessionStore, StoreError, SupportSession};

pub type SharedStore = Arc<SessionStore>;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    active_sessions: usize,
}

/// What the host gets back from `create`: the shareable code and the
/// host secret, never the viewer's.
fn host_view(session: &SupportSession) -> SessionDescriptor {
    SessionDescriptor {
        id: session.id.clone(),
        code: Some(session.code.clone()),
        host_secret: Some(session.host_secret.clone()),
        viewer_secret: None,
        status: session.status,
        remote_control_enabled: session.remote_control_enabled,
        expires_at: session.expires_at,
    }
}

/// What the viewer gets back from `join`: its own secret only. The code
/// is omitted too — the viewer already typed it.
fn viewer_view(session: &SupportSession) -> SessionDescriptor {
    SessionDescriptor {
        id: session.id.clone(),
        code: None,
        host_secret: None,
        viewer_secret: session.viewer_secret.clone(),
        status: session.status,
        remote_control_enabled: session.remote_control_enabled,
        expires_at: session.expires_at,
    }
}

fn store_failure(err: StoreError) -> Response {
    match err {
        StoreError::RateLimited { retry_after } => {
            let secs = retry_after.as_secs().max(1);
            let body = SessionResponse {
                success: false,
                session: None,
                error: Some(err.to_string()),
                retry_after: Some(secs),
            };
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            response.headers_mut().insert(
                "Retry-After",
                HeaderValue::from_str(&secs.to_string()).unwrap(),
            );
            response
        }
        other => Json(SessionResponse::err(other.to_string())).into_response(),
    }
}

/// POST /session — create/join/end/toggle, discriminated by `action`.
pub async fn session_action(
    State(store): State<SharedStore>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(action): Json<SessionAction>,
) -> Response {
    match action {
        SessionAction::Create => match store.create_session(Some(addr.ip())) {
            Ok(session) => Json(SessionResponse::ok(host_view(&session))).into_response(),
            Err(err) => store_failure(err),
        },
        SessionAction::Join { code } => match store.join_session(&code, Some(addr.ip())) {
            Ok(session) => Json(SessionResponse::ok(viewer_view(&session))).into_response(),
            Err(err) => {
                debug!(%code, %err, "join rejected");
                store_failure(err)
            }
        },
        SessionAction::End { session_id } => {
            if store.end_session(&session_id) {
                Json(SessionResponse {
                    success: true,
                    session: None,
                    error: None,
                    retry_after: None,
                })
                .into_response()
            } else {
                Json(SessionResponse::err(StoreError::SessionNotFound.to_string())).into_response()
            }
        }
        SessionAction::EnableRemoteControl { session_id, secret } => {
            toggle_remote_control(&store, &session_id, &secret, true)
        }
        SessionAction::DisableRemoteControl { session_id, secret } => {
            toggle_remote_control(&store, &session_id, &secret, false)
        }
    }
}

fn toggle_remote_control(store: &SessionStore, session_id: &str, secret: &str, enabled: bool) -> Response {
    if store.set_remote_control(session_id, secret, enabled) {
        Json(SessionResponse {
            success: true,
            session: None,
            error: None,
            retry_after: None,
        })
        .into_response()
    } else {
        Json(SessionResponse::err(StoreError::InvalidSecret.to_string())).into_response()
    }
}

/// POST /signal — authenticated append to the session's signal log.
/// Validation failures return structured errors with no partial
/// mutation; nothing is appended unless the role's secret checks out.
pub async fn post_signal(
    State(store): State<SharedStore>,
    Json(request): Json<SignalRequest>,
) -> Json<lifeline_proto::AckResponse> {
    if let Err(err) =
        store.validate_signal_request(&request.session_id, request.signal.from, &request.secret)
    {
        return Json(lifeline_proto::AckResponse::err(err.to_string()));
    }
    if store.add_signal(&request.session_id, request.signal) {
        Json(lifeline_proto::AckResponse::ok())
    } else {
        Json(lifeline_proto::AckResponse::err(
            StoreError::SessionNotFound.to_string(),
        ))
    }
}

/// GET /signal — authenticated poll for opposite-role signals past the
/// caller's cursor.
pub async fn get_signals(
    State(store): State<SharedStore>,
    Query(query): Query<PollQuery>,
) -> Json<PollResponse> {
    if let Err(err) = store.validate_signal_request(&query.session_id, query.role, &query.secret) {
        return Json(PollResponse {
            success: false,
            signals: Vec::new(),
            remote_control_enabled: None,
            error: Some(err.to_string()),
        });
    }
    match store.signals_for(&query.session_id, query.role, query.after) {
        Some(batch) => Json(PollResponse {
            success: true,
            signals: batch.signals,
            remote_control_enabled: Some(batch.remote_control_enabled),
            error: None,
        }),
        None => Json(PollResponse {
            success: false,
            signals: Vec::new(),
            remote_control_enabled: None,
            error: Some(StoreError::SessionNotFound.to_string()),
        }),
    }
}

/// GET /health — liveness plus a cheap gauge of current load.
pub async fn health_check(State(store): State<SharedStore>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        active_sessions: store.session_count(),
    })
}
