//! Security event log for denied access attempts.
//!
//! Recording is strictly downstream of the access decision: a guard has already
//! chosen its redirect when it hands an event to [`SecurityLog::record`], and a
//! failing sink only produces a warning.
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::errors::GateError;
use crate::guard::types::Location;
use crate::session::{Role, Session};
use crate::settings::{Audit, AuditSinkKind};

/// Audit record of one denied access attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Role the session held when it was denied.
    pub role: Option<Role>,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Requested path and query.
    pub location: String,
    pub user_agent: Option<String>,
    /// Where the visitor was sent instead.
    pub fallback: String,
}

impl SecurityEvent {
    pub fn denied(
        session: &Session,
        location: &Location,
        user_agent: Option<&str>,
        fallback: &str,
    ) -> Self {
        Self {
            role: session.role.clone(),
            user_id: session.user_id.clone(),
            timestamp: Utc::now(),
            location: location.to_string(),
            user_agent: user_agent.map(str::to_string),
            fallback: fallback.to_string(),
        }
    }
}

pub trait SecuritySink: Send + Sync {
    fn record(&self, event: &SecurityEvent) -> Result<(), GateError>;
}

/// Fire-and-forget front of a [`SecuritySink`].
///
/// Sinks that only touch memory are called inline. Sinks that do I/O sit
/// behind [`SecurityLog::background`], so `record` never waits on them.
#[derive(Clone)]
pub struct SecurityLog {
    delivery: Delivery,
}

#[derive(Clone)]
enum Delivery {
    Inline(Arc<dyn SecuritySink>),
    Queued(mpsc::Sender<SecurityEvent>),
}

impl SecurityLog {
    pub fn new(sink: Arc<dyn SecuritySink>) -> Self {
        Self {
            delivery: Delivery::Inline(sink),
        }
    }

    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink))
    }

    /// Hand events to `sink` on a dedicated writer thread through a queue of
    /// `capacity` events. Events arriving while the queue is full are dropped
    /// with a warning.
    pub fn background(sink: Arc<dyn SecuritySink>, capacity: usize) -> Result<Self, GateError> {
        let (tx, mut rx) = mpsc::channel::<SecurityEvent>(capacity.max(1));
        std::thread::Builder::new()
            .name("eventgate-audit".into())
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    if let Err(e) = sink.record(&event) {
                        tracing::warn!(
                            error = %e,
                            location = %event.location,
                            "failed to record security event"
                        );
                    }
                }
                tracing::debug!("security event writer stopped");
            })?;
        Ok(Self {
            delivery: Delivery::Queued(tx),
        })
    }

    pub fn record(&self, event: SecurityEvent) {
        match &self.delivery {
            Delivery::Inline(sink) => {
                if let Err(e) = sink.record(&event) {
                    tracing::warn!(
                        error = %e,
                        location = %event.location,
                        "failed to record security event"
                    );
                }
            }
            Delivery::Queued(tx) => {
                if let Err(e) = tx.try_send(event) {
                    let (reason, event) = match e {
                        TrySendError::Full(event) => ("queue full", event),
                        TrySendError::Closed(event) => ("writer stopped", event),
                    };
                    tracing::warn!(
                        location = %event.location,
                        reason,
                        "dropped security event"
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for SecurityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityLog").finish_non_exhaustive()
    }
}

/// Emits each event as a `warn` on the `eventgate::security` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl SecuritySink for TracingSink {
    fn record(&self, event: &SecurityEvent) -> Result<(), GateError> {
        tracing::warn!(
            target: "eventgate::security",
            role = event.role.as_ref().map(Role::as_str).unwrap_or("-"),
            user_id = event.user_id.as_deref().unwrap_or("-"),
            location = %event.location,
            user_agent = event.user_agent.as_deref().unwrap_or("-"),
            fallback = %event.fallback,
            timestamp = %event.timestamp.to_rfc3339(),
            "access denied"
        );
        Ok(())
    }
}

/// Keeps the most recent events in memory, oldest evicted first.
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    events: Mutex<VecDeque<SecurityEvent>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Oldest first.
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl SecuritySink for MemorySink {
    fn record(&self, event: &SecurityEvent) -> Result<(), GateError> {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }
}

/// Appends one JSON document per line.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self, GateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecuritySink for JsonLinesSink {
    fn record(&self, event: &SecurityEvent) -> Result<(), GateError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

/// The configured log plus direct access to the memory sink, when that is the
/// one in use.
#[derive(Clone, Debug)]
pub struct AuditTrail {
    pub log: SecurityLog,
    pub memory: Option<Arc<MemorySink>>,
}

impl AuditTrail {
    /// Trail for a long-running service: the file sink is written in the
    /// background.
    pub fn from_settings(audit: &Audit) -> Result<Self, GateError> {
        Self::build(audit, true)
    }

    /// Trail for one-shot commands that exit right after deciding: every sink
    /// is written before `record` returns.
    pub fn from_settings_inline(audit: &Audit) -> Result<Self, GateError> {
        Self::build(audit, false)
    }

    fn build(audit: &Audit, background: bool) -> Result<Self, GateError> {
        let trail = match audit.sink {
            AuditSinkKind::Tracing => Self {
                log: SecurityLog::tracing(),
                memory: None,
            },
            AuditSinkKind::Memory => {
                let sink = Arc::new(MemorySink::new(audit.capacity));
                Self {
                    log: SecurityLog::new(sink.clone()),
                    memory: Some(sink),
                }
            }
            AuditSinkKind::File => {
                let sink = Arc::new(JsonLinesSink::open(&audit.path)?);
                tracing::info!(path = %sink.path().display(), "Writing security events");
                let log = if background {
                    SecurityLog::background(sink, audit.capacity)?
                } else {
                    SecurityLog::new(sink)
                };
                Self { log, memory: None }
            }
        };
        Ok(trail)
    }

    pub fn in_memory(capacity: usize) -> Self {
        let sink = Arc::new(MemorySink::new(capacity));
        Self {
            log: SecurityLog::new(sink.clone()),
            memory: Some(sink),
        }
    }
}
