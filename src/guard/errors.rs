use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GuardError {
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(eventgate::guard::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(eventgate::guard::invalid_policy),
        help("Each policy file must contain `route` nodes, e.g. route \"/dashboard\" {{ role \"vendor\" }}")
    )]
    InvalidPolicy(String),

    #[error("Invalid rule for route `{route}`: {reason}")]
    #[diagnostic(
        code(eventgate::guard::invalid_rule),
        help("Give a route either `role \"<name>\"` or a non-empty `roles {{ - \"<name>\" }}` list, not both")
    )]
    InvalidRule { route: String, reason: String },

    #[error("Invalid location `{0}`")]
    #[diagnostic(
        code(eventgate::guard::invalid_location),
        help("Locations are absolute paths with an optional query, e.g. /events?create=true")
    )]
    InvalidLocation(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(eventgate::guard::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev")
    )]
    KdlParse(String),

    #[error("Security events are only kept by the memory sink")]
    #[diagnostic(
        code(eventgate::guard::events_unavailable),
        help("Set audit.sink = \"memory\" to expose recent events over HTTP")
    )]
    EventsUnavailable,

    #[error("I/O error: {0}")]
    #[diagnostic(code(eventgate::guard::io))]
    Io(#[from] std::io::Error),
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GuardError::InvalidPolicy(_)
            | GuardError::InvalidRule { .. }
            | GuardError::InvalidLocation(_)
            | GuardError::KdlParse(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            GuardError::EventsUnavailable => (StatusCode::NOT_FOUND, self.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
