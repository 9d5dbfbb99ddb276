use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::HeaderMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub const SESSION_COOKIE_NAME: &str = "eventgate_session";

/// Coarse permission label attached to a user.
///
/// Labels outside the known set are kept verbatim in [`Role::Other`] so they
/// can still be named in rules and audit records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Vendor,
    User,
    Demo,
    Other(String),
}

impl Role {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "vendor" => Role::Vendor,
            "user" => Role::User,
            "demo" => Role::Demo,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Vendor => "vendor",
            Role::User => "user",
            Role::Demo => "demo",
            Role::Other(s) => s,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::parse(&value)
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::parse(value)
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication state of the active user, as last published by the
/// authentication subsystem.
///
/// The default value is the bootstrap state: nothing is known yet, so guards
/// hold every decision until `initialized` flips.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub user_id: Option<String>,
    pub role: Option<Role>,
    pub is_authenticated: bool,
    pub initialized: bool,
}

impl Session {
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// Bootstrap finished and no valid credentials were found.
    pub fn anonymous() -> Self {
        Self {
            initialized: true,
            ..Self::default()
        }
    }

    pub fn authenticated(user_id: impl Into<String>, role: impl Into<Role>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role: Some(role.into()),
            is_authenticated: true,
            initialized: true,
        }
    }
}

/// Shared handle on the current [`Session`].
///
/// Snapshots are published whole, so a reader never observes a mix of two
/// sessions. Guards hold clones of this context and only read it.
#[derive(Clone, Debug)]
pub struct SessionContext {
    tx: Arc<watch::Sender<Arc<Session>>>,
}

impl SessionContext {
    pub fn new(initial: Session) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Arc<Session> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Session>> {
        self.tx.subscribe()
    }

    /// Replace the session. Subscribers are woken even if nothing changed.
    pub fn publish(&self, session: Session) {
        self.tx.send_replace(Arc::new(session));
    }

    pub fn update(&self, f: impl FnOnce(&mut Session)) {
        self.tx.send_modify(|current| {
            let mut next = (**current).clone();
            f(&mut next);
            *current = Arc::new(next);
        });
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(Session::uninitialized())
    }
}

#[derive(Clone, Debug)]
pub struct SessionCookie {
    pub session_id: String,
}

impl SessionCookie {
    pub fn new(session_id: String) -> Self {
        Self { session_id }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let cookie_header = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;

        for cookie in cookie_header.split(';') {
            let cookie = cookie.trim();
            if let Some(value) = cookie
                .strip_prefix(SESSION_COOKIE_NAME)
                .and_then(|s| s.strip_prefix('='))
            {
                if value.is_empty() {
                    return None;
                }
                return Some(Self::new(value.to_string()));
            }
        }
        None
    }
}

/// Server-side sessions keyed by cookie id, published by the authentication
/// subsystem.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: impl Into<String>, session: Session) {
        self.sessions.write().insert(session_id.into(), session);
    }

    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.sessions.write().remove(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
