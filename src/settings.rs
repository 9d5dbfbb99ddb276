use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub guard: Guard,
    pub audit: Audit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
    /// Dashboard bundle to serve behind the guard middleware. Not served when unset.
    pub static_dir: Option<PathBuf>,
    /// Port of the decision, session and security-event API (defaults to port + 1).
    /// Only the authentication subsystem should be able to reach it.
    pub admin_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guard {
    /// Directory holding the `.kdl` route policy files.
    pub policies_dir: PathBuf,
    /// Where unauthenticated visitors are sent.
    pub sign_in_route: String,
    /// Query parameter on the sign-in route that carries the requested location.
    pub return_param: String,
    /// Fallback for route rules that do not name one.
    pub default_fallback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    Tracing,
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub sink: AuditSinkKind,
    /// JSON lines file for the `file` sink.
    pub path: PathBuf,
    /// Number of events the `memory` sink retains.
    pub capacity: usize,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: None,
            admin_port: None,
        }
    }
}

impl Default for Guard {
    fn default() -> Self {
        Self {
            policies_dir: PathBuf::from("policies"),
            sign_in_route: "/sign-in".to_string(),
            return_param: "redirect".to_string(),
            default_fallback: "/homepage".to_string(),
        }
    }
}

impl Default for Audit {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::Tracing,
            path: PathBuf::from("data/security-events.jsonl"),
            capacity: 1000,
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default(
                "guard.policies_dir",
                Guard::default().policies_dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("guard.sign_in_route", Guard::default().sign_in_route)
            .into_diagnostic()?
            .set_default("guard.return_param", Guard::default().return_param)
            .into_diagnostic()?
            .set_default("guard.default_fallback", Guard::default().default_fallback)
            .into_diagnostic()?
            .set_default("audit.sink", "tracing")
            .into_diagnostic()?
            .set_default(
                "audit.path",
                Audit::default().path.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("audit.capacity", Audit::default().capacity as u64)
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: EVENTGATE__SERVER__PORT=9090, etc.
        builder =
            builder.add_source(config::Environment::with_prefix("EVENTGATE").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        if s.audit.path.is_relative() {
            s.audit.path = std::env::current_dir()
                .into_diagnostic()?
                .join(&s.audit.path);
        }

        Ok(s)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn admin_listen_addr(&self) -> String {
        let port = self
            .server
            .admin_port
            .unwrap_or_else(|| self.server.port.saturating_add(1));
        format!("{}:{}", self.server.host, port)
    }
}
