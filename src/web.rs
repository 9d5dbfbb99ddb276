//! HTTP surface. The public listener serves the dashboard bundle behind
//! [`require_access`]; the admin listener serves the API from
//! [`crate::guard::web`].
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use miette::IntoDiagnostic;
use tower_http::services::ServeDir;

use crate::audit::{AuditTrail, SecurityLog};
use crate::guard::engine::Guard;
use crate::guard::loader::load_policies;
use crate::guard::types::{Decision, GuardConfig, Location};
use crate::guard::web::{health, ApiState};
use crate::guard::GuardTable;
use crate::session::{Session, SessionCookie, SessionRegistry};
use crate::settings::Settings;

/// Adds the browser hardening headers to every response.
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    // decisions depend on the session, never cache them
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    response
}

/// Looks up the session behind an incoming request.
pub trait SessionResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Session;
}

/// Resolves the session cookie against a [`SessionRegistry`]. Requests
/// without a known cookie are anonymous.
#[derive(Clone, Debug)]
pub struct CookieSessionResolver {
    registry: SessionRegistry,
}

impl CookieSessionResolver {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }
}

impl SessionResolver for CookieSessionResolver {
    fn resolve(&self, headers: &HeaderMap) -> Session {
        SessionCookie::from_headers(headers)
            .and_then(|cookie| self.registry.get(&cookie.session_id))
            .unwrap_or_else(Session::anonymous)
    }
}

#[derive(Clone)]
pub struct AccessState {
    pub table: Arc<GuardTable>,
    pub log: SecurityLog,
    pub resolver: Arc<dyn SessionResolver>,
}

/// Route middleware: the wrapped handler only runs when the guard table
/// allows the request.
pub async fn require_access(
    State(state): State<AccessState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let raw = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let location = match Location::parse(raw) {
        Ok(l) => l,
        Err(e) => return e.into_response(),
    };
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let session = state.resolver.resolve(request.headers());

    let guard = Guard::new(state.table.clone(), state.log.clone());
    match guard.decide(&session, &location, user_agent.as_deref()) {
        Decision::Allow => next.run(request).await,
        Decision::Loading => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, "1")],
        )
            .into_response(),
        Decision::Redirect(redirect) => Redirect::to(&redirect.to).into_response(),
    }
}

/// Public router: `/healthz` and, when a static directory is configured, the
/// dashboard bundle behind [`require_access`]. The session and security
/// event API is not reachable here, see [`admin_app`].
pub fn app(state: ApiState, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new().route("/healthz", get(health));

    if let Some(dir) = static_dir {
        let access = AccessState {
            table: state.table.clone(),
            log: state.audit.log.clone(),
            resolver: Arc::new(CookieSessionResolver::new(state.sessions.clone())),
        };
        let dashboard = Router::new()
            .fallback_service(ServeDir::new(dir))
            .layer(middleware::from_fn_with_state(access, require_access));
        router = router.merge(dashboard);
    }

    router.layer(middleware::from_fn(security_headers))
}

/// Admin router for the authentication subsystem.
pub fn admin_app(state: ApiState) -> Router {
    crate::guard::web::router(state).layer(middleware::from_fn(security_headers))
}

pub async fn serve(settings: Settings) -> miette::Result<()> {
    let table = load_policies(
        &settings.guard.policies_dir,
        GuardConfig::from(&settings.guard),
    )?;
    let audit = AuditTrail::from_settings(&settings.audit)?;

    let state = ApiState {
        table: Arc::new(table),
        audit,
        sessions: SessionRegistry::new(),
    };

    let public_addr: SocketAddr = settings
        .listen_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;
    let admin_addr: SocketAddr = settings
        .admin_listen_addr()
        .parse()
        .map_err(|e| miette::miette!("bad admin addr: {e}"))?;

    // Start admin API on a separate port
    let admin_listener = tokio::net::TcpListener::bind(admin_addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%admin_addr, "Admin API listening");
    let admin_router = admin_app(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(admin_listener, admin_router).await {
            tracing::error!(error = %e, "Admin server failed");
        }
    });

    if let Some(dir) = &settings.server.static_dir {
        tracing::info!(dir = %dir.display(), "Serving dashboard behind route guards");
    }
    let router = app(state, settings.server.static_dir.as_deref());

    tracing::info!(%public_addr, "Public server listening");
    let listener = tokio::net::TcpListener::bind(public_addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, router).await.into_diagnostic()?;
    Ok(())
}
