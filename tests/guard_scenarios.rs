//! End-to-end guard behavior against the dashboard route policies.
mod helpers;

use std::sync::{mpsc, Arc};
use std::time::Duration;

use eventgate::audit::{MemorySink, SecurityEvent, SecurityLog, SecuritySink};
use eventgate::errors::GateError;
use eventgate::guard::engine::{Gate, Guard};
use eventgate::guard::types::{Decision, Location, Redirect, RedirectReason, View};
use eventgate::guard::GuardTable;
use eventgate::session::Role;
use helpers::{PolicyDir, SessionBuilder};
use parking_lot::Mutex;

fn mounted(table: GuardTable) -> (Guard<GuardTable>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new(64));
    (Guard::new(table, SecurityLog::new(sink.clone())), sink)
}

fn loc(s: &str) -> Location {
    Location::parse(s).unwrap()
}

#[test]
fn test_user_creating_event_is_sent_home_and_logged() {
    let policies = PolicyDir::dashboard();
    let (guard, sink) = mounted(policies.load());
    let session = SessionBuilder::new().user_id("u-42").build();

    let decision = guard.decide(&session, &loc("/events?create=true"), Some("Mozilla/5.0"));
    assert_eq!(decision, Decision::Redirect(Redirect::forbidden("/homepage")));

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].role, Some(Role::User));
    assert_eq!(events[0].user_id.as_deref(), Some("u-42"));
    assert_eq!(events[0].location, "/events?create=true");
    assert_eq!(events[0].user_agent.as_deref(), Some("Mozilla/5.0"));
    assert_eq!(events[0].fallback, "/homepage");
}

#[test]
fn test_vendor_creating_event_renders() {
    let policies = PolicyDir::dashboard();
    let (guard, sink) = mounted(policies.load());
    let session = SessionBuilder::new().role("vendor").build();

    let view = guard.render(&session, &loc("/events?create=true"), None, || "create form");
    assert_eq!(view, View::Content("create form"));
    assert!(sink.is_empty());
}

#[test]
fn test_bootstrap_shows_only_loading() {
    let policies = PolicyDir::dashboard();
    let (guard, sink) = mounted(policies.load());

    for role in ["vendor", "user", "demo"] {
        let session = SessionBuilder::new().role(role).loading().build();
        for path in ["/events?create=true", "/dashboard/stats", "/team"] {
            let view = guard.render(&session, &loc(path), None, || "content");
            assert_eq!(view, View::Loading, "{role} at {path}");
        }
    }
    assert!(sink.is_empty());
}

#[test]
fn test_anonymous_goes_to_sign_in_with_return_location() {
    let policies = PolicyDir::dashboard();
    let (guard, sink) = mounted(policies.load());
    let session = SessionBuilder::new().anonymous().build();

    match guard.decide(&session, &loc("/events?create=true"), None) {
        Decision::Redirect(r) => {
            assert_eq!(r.reason, RedirectReason::Unauthenticated);
            assert_eq!(r.to, "/sign-in?redirect=%2Fevents%3Fcreate%3Dtrue");
            assert!(r.replace);
        }
        other => panic!("expected sign-in redirect, got {other:?}"),
    }
    // sign-in redirects are not security events
    assert!(sink.is_empty());
}

#[test]
fn test_only_listed_roles_reach_dashboard() {
    let table = PolicyDir::dashboard().load();
    let cases = [
        ("vendor", true),
        ("demo", true),
        ("user", false),
        ("organizer", false),
        ("Vendor", false),
    ];
    for (role, allowed) in cases {
        let session = SessionBuilder::new().role(role).build();
        let decision = table.evaluate(&session, &loc("/dashboard/attendees"));
        assert_eq!(decision == Decision::Allow, allowed, "role {role}");
        if !allowed {
            assert_eq!(decision, Decision::Redirect(Redirect::forbidden("/homepage")));
        }
    }
}

#[test]
fn test_events_list_open_to_every_signed_in_role() {
    let table = PolicyDir::dashboard().load();
    for role in ["vendor", "user", "demo"] {
        let session = SessionBuilder::new().role(role).build();
        assert_eq!(table.evaluate(&session, &loc("/events")), Decision::Allow);
        assert_eq!(
            table.evaluate(&session, &loc("/events?create=false")),
            Decision::Allow
        );
    }
}

#[test]
fn test_rule_without_fallback_uses_default() {
    let table = PolicyDir::dashboard().load();
    let session = SessionBuilder::new().role("demo").build();
    assert_eq!(
        table.evaluate(&session, &loc("/team")),
        Decision::Redirect(Redirect::forbidden("/homepage"))
    );
}

#[test]
fn test_session_without_role_is_denied() {
    let policies = PolicyDir::dashboard();
    let (guard, sink) = mounted(policies.load());
    let session = SessionBuilder::new().without_role().build();

    assert!(guard.decide(&session, &loc("/team"), None).is_denied());
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.events()[0].role, None);
}

#[test]
fn test_reevaluation_is_idempotent() {
    let policies = PolicyDir::dashboard();
    let (guard, sink) = mounted(policies.load());
    let session = SessionBuilder::new().build();
    let location = loc("/events?create=true");

    let decisions: Vec<_> = (0..5)
        .map(|_| guard.decide(&session, &location, None))
        .collect();
    assert!(decisions.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(sink.len(), 1);

    // a changed session is a fresh attempt
    let other = SessionBuilder::new().user_id("u-2").build();
    guard.decide(&other, &location, None);
    assert_eq!(sink.len(), 2);
}

struct FailingSink;

impl SecuritySink for FailingSink {
    fn record(&self, _event: &SecurityEvent) -> Result<(), GateError> {
        Err(GateError::SinkUnavailable("collector offline".into()))
    }
}

#[test]
fn test_redirect_survives_failing_sink() {
    let table = PolicyDir::dashboard().load();
    let guard = Guard::new(table, SecurityLog::new(Arc::new(FailingSink)));
    let session = SessionBuilder::new().build();

    let view = guard.render(&session, &loc("/events?create=true"), None, || "form");
    assert_eq!(view, View::Redirect(Redirect::forbidden("/homepage")));
}

/// Holds every write until the test opens `gate`.
struct StalledSink {
    gate: Mutex<()>,
    written: Mutex<mpsc::Sender<String>>,
}

impl SecuritySink for StalledSink {
    fn record(&self, event: &SecurityEvent) -> Result<(), GateError> {
        let _open = self.gate.lock();
        let _ = self.written.lock().send(event.location.clone());
        Ok(())
    }
}

#[test]
fn test_redirect_does_not_wait_for_stalled_sink() {
    let (tx, rx) = mpsc::channel();
    let sink = Arc::new(StalledSink {
        gate: Mutex::new(()),
        written: Mutex::new(tx),
    });
    let log = SecurityLog::background(sink.clone(), 16).unwrap();
    let guard = Guard::new(PolicyDir::dashboard().load(), log);
    let user = SessionBuilder::new().build();

    let held = sink.gate.lock();
    assert!(guard.decide(&user, &loc("/events?create=true"), None).is_denied());
    assert!(guard.decide(&user, &loc("/team"), None).is_denied());
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    drop(held);
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        "/events?create=true"
    );
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "/team");
}
