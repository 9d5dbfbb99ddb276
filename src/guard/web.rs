use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};

use crate::audit::AuditTrail;
use crate::guard::engine::Guard;
use crate::guard::errors::GuardError;
use crate::guard::types::{DecideRequest, Location, SecurityEventsResponse};
use crate::guard::GuardTable;
use crate::session::{Session, SessionRegistry};

#[derive(Clone, Debug)]
pub struct ApiState {
    pub table: Arc<GuardTable>,
    pub audit: AuditTrail,
    pub sessions: SessionRegistry,
}

/// Privileged API: decisions, session publishing and the security event
/// trail. Served on the admin listener only.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/decide", post(handle_decide))
        .route("/v1/security-events", get(handle_security_events))
        .route(
            "/v1/sessions/{session_id}",
            put(handle_put_session).delete(handle_delete_session),
        )
        .route("/healthz", get(health))
        .with_state(state)
}

async fn handle_decide(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<DecideRequest>,
) -> impl IntoResponse {
    let location = match Location::parse(&req.location) {
        Ok(l) => l,
        Err(e) => return e.into_response(),
    };
    let user_agent = req.user_agent.or_else(|| {
        headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    // every request is its own navigation attempt
    let guard = Guard::new(state.table.clone(), state.audit.log.clone());
    let decision = guard.decide(&req.session, &location, user_agent.as_deref());
    Json(decision).into_response()
}

async fn handle_security_events(State(state): State<ApiState>) -> impl IntoResponse {
    match &state.audit.memory {
        Some(sink) => Json(SecurityEventsResponse {
            events: sink.events(),
        })
        .into_response(),
        None => GuardError::EventsUnavailable.into_response(),
    }
}

async fn handle_put_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Json(session): Json<Session>,
) -> impl IntoResponse {
    tracing::debug!(
        authenticated = session.is_authenticated,
        initialized = session.initialized,
        "session published"
    );
    state.sessions.insert(session_id, session);
    StatusCode::NO_CONTENT
}

async fn handle_delete_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.remove(&session_id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

pub(crate) async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
