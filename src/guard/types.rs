use serde::{Deserialize, Serialize};

use crate::audit::SecurityEvent;
use crate::guard::errors::GuardError;
use crate::session::{Role, Session};
use crate::settings;

/// Requested path plus its query pairs, e.g. `/events?create=true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Location {
    /// Parse an absolute location. A fragment is dropped, protocol-relative
    /// (`//host`) and relative inputs are rejected.
    ///
    /// The path is stored decoded and in canonical form, so it names the same
    /// resource a file server would: percent-escapes are decoded, empty and
    /// `.` segments are dropped. `..` segments, escaped `/` and escapes that
    /// are not UTF-8 are rejected.
    pub fn parse(s: &str) -> Result<Self, GuardError> {
        let raw = s.trim();
        let without_fragment = raw.split_once('#').map(|(l, _)| l).unwrap_or(raw);
        if !without_fragment.starts_with('/') || without_fragment.starts_with("//") {
            return Err(GuardError::InvalidLocation(s.to_string()));
        }

        let (raw_path, query) = match without_fragment.split_once('?') {
            Some((path, qs)) => {
                let query: Vec<(String, String)> = serde_urlencoded::from_str(qs)
                    .map_err(|_| GuardError::InvalidLocation(s.to_string()))?;
                (path, query)
            }
            None => (without_fragment, Vec::new()),
        };

        let path =
            canonical_path(raw_path).ok_or_else(|| GuardError::InvalidLocation(s.to_string()))?;
        Ok(Self { path, query })
    }

    /// First value of a query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn canonical_path(raw: &str) -> Option<String> {
    let mut segments = Vec::new();
    for segment in raw.split('/') {
        let decoded = urlencoding::decode(segment).ok()?;
        match decoded.as_ref() {
            "" | "." => {}
            ".." => return None,
            d if d.contains(['/', '\\', '\0']) => return None,
            d => segments.push(d.to_string()),
        }
    }

    let mut path = format!("/{}", segments.join("/"));
    if raw.ends_with('/') && !segments.is_empty() {
        path.push('/');
    }
    Some(path)
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let encoded: Vec<_> = self
            .path
            .split('/')
            .map(urlencoding::encode)
            .collect();
        f.write_str(&encoded.join("/"))?;
        if !self.query.is_empty() {
            let qs = serde_urlencoded::to_string(&self.query).unwrap_or_default();
            write!(f, "?{qs}")?;
        }
        Ok(())
    }
}

/// Which roles a rule admits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// No restriction: a public-but-wrapped route.
    Any,
    Role(Role),
    OneOf(Vec<Role>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub requirement: Requirement,
    pub fallback_route: String,
}

impl AccessRule {
    pub fn open(fallback_route: impl Into<String>) -> Self {
        Self {
            requirement: Requirement::Any,
            fallback_route: fallback_route.into(),
        }
    }

    pub fn require_role(role: impl Into<Role>, fallback_route: impl Into<String>) -> Self {
        Self {
            requirement: Requirement::Role(role.into()),
            fallback_route: fallback_route.into(),
        }
    }

    pub fn require_any_of<R: Into<Role>>(
        roles: impl IntoIterator<Item = R>,
        fallback_route: impl Into<String>,
    ) -> Self {
        Self {
            requirement: Requirement::OneOf(roles.into_iter().map(Into::into).collect()),
            fallback_route: fallback_route.into(),
        }
    }

    /// Build a rule from the per-route configuration surface, where the single
    /// and the set form are separate optional fields.
    pub fn from_parts(
        route: &str,
        required_role: Option<Role>,
        required_roles: Option<Vec<Role>>,
        fallback_route: String,
    ) -> Result<Self, GuardError> {
        let requirement = match (required_role, required_roles) {
            (Some(_), Some(_)) => {
                return Err(GuardError::InvalidRule {
                    route: route.to_string(),
                    reason: "`role` and `roles` are mutually exclusive".into(),
                })
            }
            (Some(role), None) => Requirement::Role(role),
            (None, Some(roles)) if roles.is_empty() => {
                return Err(GuardError::InvalidRule {
                    route: route.to_string(),
                    reason: "`roles` must list at least one role".into(),
                })
            }
            (None, Some(roles)) => Requirement::OneOf(roles),
            (None, None) => Requirement::Any,
        };
        Ok(Self {
            requirement,
            fallback_route,
        })
    }
}

/// Route pattern from a policy file: an exact path, or `/prefix/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Exact(String),
    Prefix(String),
}

impl PathPattern {
    pub fn parse(s: &str) -> Result<Self, GuardError> {
        if !s.starts_with('/') {
            return Err(GuardError::InvalidPolicy(format!(
                "route pattern `{s}` must start with `/`"
            )));
        }
        if let Some(prefix) = s.strip_suffix("/*") {
            return Ok(PathPattern::Prefix(normalize_path(prefix).to_string()));
        }
        if s.contains('*') {
            return Err(GuardError::InvalidPolicy(format!(
                "route pattern `{s}` may only use `*` as a trailing `/*`"
            )));
        }
        Ok(PathPattern::Exact(normalize_path(s).to_string()))
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = normalize_path(path);
        match self {
            PathPattern::Exact(p) => p == path,
            PathPattern::Prefix(p) => {
                path == p
                    || path
                        .strip_prefix(p.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathPattern::Exact(p) => f.write_str(p),
            PathPattern::Prefix(p) => write!(f, "{p}/*"),
        }
    }
}

fn normalize_path(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" if !path.is_empty() => "/",
        trimmed => trimmed,
    }
}

/// What makes a guard engage on a matching path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Every visit to the path.
    Path,
    /// Only visits where the query parameter equals the sentinel.
    QueryParam { name: String, sentinel: String },
}

/// Settings the guards share: where to send unauthenticated visitors and the
/// fallback for rules that do not name one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    pub sign_in_route: String,
    pub return_param: String,
    pub default_fallback: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        GuardConfig::from(&settings::Guard::default())
    }
}

impl From<&settings::Guard> for GuardConfig {
    fn from(value: &settings::Guard) -> Self {
        Self {
            sign_in_route: value.sign_in_route.clone(),
            return_param: value.return_param.clone(),
            default_fallback: value.default_fallback.clone(),
        }
    }
}

impl GuardConfig {
    /// Redirect to sign-in, carrying the requested location so the
    /// authentication flow can return the visitor afterwards.
    pub fn sign_in_redirect(&self, location: &Location) -> Redirect {
        let to = url_append_query(
            self.sign_in_route.clone(),
            &[(self.return_param.as_str(), location.to_string())],
        );
        Redirect {
            to,
            replace: true,
            reason: RedirectReason::Unauthenticated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectReason {
    Unauthenticated,
    Forbidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub to: String,
    /// Replace the current history entry instead of pushing a new one.
    pub replace: bool,
    pub reason: RedirectReason,
}

impl Redirect {
    pub fn forbidden(to: &str) -> Self {
        Self {
            to: to.to_string(),
            replace: true,
            reason: RedirectReason::Forbidden,
        }
    }
}

/// Outcome of running a guard against one session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    /// Session bootstrap has not finished; show a placeholder.
    Loading,
    Allow,
    Redirect(Redirect),
}

impl Decision {
    pub fn is_denied(&self) -> bool {
        matches!(self, Decision::Redirect(r) if r.reason == RedirectReason::Forbidden)
    }
}

/// What a guarded view produces: the content is only ever built on `Content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View<T> {
    Loading,
    Redirect(Redirect),
    Content(T),
}

/// A single `route` node from a policy file, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDef {
    pub pattern: String,
    pub trigger: Trigger,
    pub required_role: Option<Role>,
    pub required_roles: Option<Vec<Role>>,
    pub fallback: Option<String>,
}

/// Intermediate result from parsing a single KDL file.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub routes: Vec<RouteDef>,
}

pub(crate) fn url_append_query(mut base: String, params: &[(&str, String)]) -> String {
    let qs = serde_urlencoded::to_string(
        params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<Vec<(String, String)>>(),
    )
    .unwrap_or_default();
    if base.contains('?') {
        base.push('&');
    } else {
        base.push('?');
    }
    base.push_str(&qs);
    base
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    pub session: Session,
    /// e.g. "/events?create=true"
    pub location: String,
    /// Falls back to the request's own User-Agent header.
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecurityEventsResponse {
    pub events: Vec<SecurityEvent>,
}
