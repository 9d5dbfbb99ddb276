use std::sync::Arc;

use parking_lot::Mutex;

use crate::audit::{SecurityEvent, SecurityLog};
use crate::guard::predicate::is_authorized;
use crate::guard::types::{AccessRule, Decision, GuardConfig, Location, Redirect, View};
use crate::session::Session;

/// Something that decides, from one session snapshot, whether a location may
/// be shown.
///
/// Implementations are pure: no logging and no memory of earlier calls. The
/// stateful side (audit records, de-duplication) lives in [`Guard`].
pub trait Gate: Send + Sync {
    fn evaluate(&self, session: &Session, location: &Location) -> Decision;
}

impl<G: Gate + ?Sized> Gate for Arc<G> {
    fn evaluate(&self, session: &Session, location: &Location) -> Decision {
        (**self).evaluate(session, location)
    }
}

/// Shared decision sequence. `engaged` is false when the guard does not apply
/// to this visit (a parameter guard without its parameter).
fn decide_rule(
    config: &GuardConfig,
    rule: &AccessRule,
    session: &Session,
    location: &Location,
    engaged: bool,
) -> Decision {
    // 1. Never decide on a session that has not finished bootstrapping
    if !session.initialized {
        return Decision::Loading;
    }

    // 2. Unauthenticated visitors go to sign-in whatever the rule says
    if !session.is_authenticated {
        return Decision::Redirect(config.sign_in_redirect(location));
    }

    // 3. Role check
    if !engaged || is_authorized(session.role.as_ref(), rule) {
        Decision::Allow
    } else {
        Decision::Redirect(Redirect::forbidden(&rule.fallback_route))
    }
}

/// Guards a whole route.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    rule: AccessRule,
    config: Arc<GuardConfig>,
}

impl RouteGuard {
    pub fn new(rule: AccessRule, config: Arc<GuardConfig>) -> Self {
        Self { rule, config }
    }

    pub fn rule(&self) -> &AccessRule {
        &self.rule
    }
}

impl Gate for RouteGuard {
    fn evaluate(&self, session: &Session, location: &Location) -> Decision {
        decide_rule(&self.config, &self.rule, session, location, true)
    }
}

/// Guards a mode of a route selected by a query parameter, such as
/// `/events?create=true`. Without the parameter the route renders for any
/// authenticated role.
#[derive(Debug, Clone)]
pub struct ParamGuard {
    param: String,
    sentinel: String,
    rule: AccessRule,
    config: Arc<GuardConfig>,
}

impl ParamGuard {
    pub fn new(
        param: impl Into<String>,
        sentinel: impl Into<String>,
        rule: AccessRule,
        config: Arc<GuardConfig>,
    ) -> Self {
        Self {
            param: param.into(),
            sentinel: sentinel.into(),
            rule,
            config,
        }
    }

    pub fn rule(&self) -> &AccessRule {
        &self.rule
    }

    pub fn is_engaged(&self, location: &Location) -> bool {
        location.param(&self.param) == Some(self.sentinel.as_str())
    }
}

impl Gate for ParamGuard {
    fn evaluate(&self, session: &Session, location: &Location) -> Decision {
        let engaged = self.is_engaged(location);
        decide_rule(&self.config, &self.rule, session, location, engaged)
    }
}

struct LastDecision {
    session: Session,
    location: Location,
    decision: Decision,
}

/// A mounted guard: a [`Gate`] plus the security log and the memory of its
/// last decision.
///
/// Re-running the guard on an unchanged session and location returns the
/// remembered decision without logging a second denial.
pub struct Guard<G> {
    gate: G,
    log: SecurityLog,
    last: Mutex<Option<LastDecision>>,
}

impl<G: Gate> Guard<G> {
    pub fn new(gate: G, log: SecurityLog) -> Self {
        Self {
            gate,
            log,
            last: Mutex::new(None),
        }
    }

    pub fn gate(&self) -> &G {
        &self.gate
    }

    pub fn decide(
        &self,
        session: &Session,
        location: &Location,
        user_agent: Option<&str>,
    ) -> Decision {
        let decision = {
            let mut last = self.last.lock();
            if let Some(prev) = last.as_ref() {
                if prev.session == *session && prev.location == *location {
                    return prev.decision.clone();
                }
            }
            let decision = self.gate.evaluate(session, location);
            *last = Some(LastDecision {
                session: session.clone(),
                location: location.clone(),
                decision: decision.clone(),
            });
            decision
        };

        // record outside the memo lock
        match &decision {
            Decision::Redirect(redirect) if decision.is_denied() => {
                tracing::debug!(
                    path = %location,
                    fallback = %redirect.to,
                    "role check failed"
                );
                self.log.record(SecurityEvent::denied(
                    session,
                    location,
                    user_agent,
                    &redirect.to,
                ));
            }
            Decision::Redirect(redirect) => {
                tracing::debug!(path = %location, to = %redirect.to, "sign-in required");
            }
            Decision::Loading | Decision::Allow => {}
        }
        decision
    }

    /// Decide, and build the protected content only when access is allowed.
    pub fn render<T>(
        &self,
        session: &Session,
        location: &Location,
        user_agent: Option<&str>,
        content: impl FnOnce() -> T,
    ) -> View<T> {
        match self.decide(session, location, user_agent) {
            Decision::Loading => View::Loading,
            Decision::Redirect(redirect) => View::Redirect(redirect),
            Decision::Allow => View::Content(content()),
        }
    }
}

impl<G> std::fmt::Debug for Guard<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard").finish_non_exhaustive()
    }
}
