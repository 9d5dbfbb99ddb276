pub mod engine;
pub mod errors;
pub mod loader;
pub mod policy;
pub mod predicate;
pub mod types;
pub mod watcher;
pub mod web;

use std::sync::Arc;

use engine::{Gate, ParamGuard, RouteGuard};
use types::{Decision, GuardConfig, Location, PathPattern};

use crate::session::Session;

/// Guard attached to one route entry.
#[derive(Debug, Clone)]
pub enum RouteGate {
    Route(RouteGuard),
    Param(ParamGuard),
}

impl Gate for RouteGate {
    fn evaluate(&self, session: &Session, location: &Location) -> Decision {
        match self {
            RouteGate::Route(g) => g.evaluate(session, location),
            RouteGate::Param(g) => g.evaluate(session, location),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub pattern: PathPattern,
    pub gate: RouteGate,
}

/// Compiled route policies, loaded from KDL files.
/// Immutable after construction; policy changes require a service reload.
#[derive(Debug, Clone)]
pub struct GuardTable {
    config: Arc<GuardConfig>,
    entries: Vec<RouteEntry>,
}

impl GuardTable {
    pub fn new(config: Arc<GuardConfig>) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    pub fn config(&self) -> &Arc<GuardConfig> {
        &self.config
    }

    pub fn push(&mut self, pattern: PathPattern, gate: RouteGate) {
        self.entries.push(RouteEntry { pattern, gate });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matching<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a RouteEntry> + 'a {
        self.entries.iter().filter(move |e| e.pattern.matches(path))
    }
}

impl Gate for GuardTable {
    /// Route guards run before parameter guards, each in declaration order;
    /// the first decision other than `Allow` wins. Paths no entry matches are
    /// not guarded.
    fn evaluate(&self, session: &Session, location: &Location) -> Decision {
        let route_gates = self
            .matching(&location.path)
            .filter(|e| matches!(e.gate, RouteGate::Route(_)));
        let param_gates = self
            .matching(&location.path)
            .filter(|e| matches!(e.gate, RouteGate::Param(_)));

        for entry in route_gates.chain(param_gates) {
            match entry.gate.evaluate(session, location) {
                Decision::Allow => continue,
                other => return other,
            }
        }
        Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::types::{AccessRule, Redirect, RedirectReason};
    use crate::session::Role;

    fn table() -> GuardTable {
        let config = Arc::new(GuardConfig::default());
        let mut table = GuardTable::new(config.clone());
        table.push(
            PathPattern::parse("/events").unwrap(),
            RouteGate::Route(RouteGuard::new(AccessRule::open("/homepage"), config.clone())),
        );
        table.push(
            PathPattern::parse("/events").unwrap(),
            RouteGate::Param(ParamGuard::new(
                "create",
                "true",
                AccessRule::require_role(Role::Vendor, "/homepage"),
                config.clone(),
            )),
        );
        table.push(
            PathPattern::parse("/dashboard/*").unwrap(),
            RouteGate::Route(RouteGuard::new(
                AccessRule::require_any_of([Role::Vendor, Role::Demo], "/events"),
                config,
            )),
        );
        table
    }

    fn loc(s: &str) -> Location {
        Location::parse(s).unwrap()
    }

    #[test]
    fn test_unguarded_paths_pass() {
        let table = table();
        assert_eq!(
            table.evaluate(&Session::anonymous(), &loc("/pricing")),
            Decision::Allow
        );
        assert_eq!(
            table.evaluate(&Session::uninitialized(), &loc("/blog/launch")),
            Decision::Allow
        );
    }

    #[test]
    fn test_param_mode_restricted_but_route_open() {
        let table = table();
        let user = Session::authenticated("u-1", "user");
        assert_eq!(table.evaluate(&user, &loc("/events")), Decision::Allow);
        assert_eq!(
            table.evaluate(&user, &loc("/events?create=true")),
            Decision::Redirect(Redirect::forbidden("/homepage"))
        );
        let vendor = Session::authenticated("u-2", "vendor");
        assert_eq!(
            table.evaluate(&vendor, &loc("/events?create=true")),
            Decision::Allow
        );
    }

    #[test]
    fn test_prefix_routes() {
        let table = table();
        let demo = Session::authenticated("u-3", "demo");
        let user = Session::authenticated("u-1", "user");
        assert_eq!(table.evaluate(&demo, &loc("/dashboard/team")), Decision::Allow);
        assert_eq!(
            table.evaluate(&user, &loc("/dashboard/team")),
            Decision::Redirect(Redirect::forbidden("/events"))
        );
    }

    #[test]
    fn test_anonymous_on_guarded_route() {
        let table = table();
        match table.evaluate(&Session::anonymous(), &loc("/events?create=true")) {
            Decision::Redirect(r) => assert_eq!(r.reason, RedirectReason::Unauthenticated),
            other => panic!("expected sign-in redirect, got {other:?}"),
        }
    }
}
