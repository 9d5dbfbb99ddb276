use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::guard::engine::{Gate, Guard};
use crate::guard::types::{Decision, Location};
use crate::session::SessionContext;

/// Performs client-side navigation.
pub trait Navigator: Send + Sync + 'static {
    /// `replace` asks for the current history entry to be replaced rather
    /// than a new one pushed.
    fn navigate(&self, to: &str, replace: bool);
}

/// Keeps a mounted guard in step with the session.
///
/// The guard is re-run on the current snapshot and again every time the
/// session context publishes. A redirect is handed to the [`Navigator`] and
/// ends the watch, since the guarded view is leaving. `Loading` and `Allow`
/// are exposed through [`GuardWatcher::decision`] for the renderer.
pub struct GuardWatcher {
    decisions: watch::Receiver<Decision>,
    task: JoinHandle<()>,
}

impl GuardWatcher {
    pub fn spawn<G: Gate + 'static>(
        guard: Arc<Guard<G>>,
        context: &SessionContext,
        location: Location,
        user_agent: Option<String>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let mut sessions = context.subscribe();
        let (tx, decisions) = watch::channel(Decision::Loading);

        let task = tokio::spawn(async move {
            loop {
                let session = sessions.borrow_and_update().clone();
                let decision = guard.decide(&session, &location, user_agent.as_deref());

                if let Decision::Redirect(redirect) = &decision {
                    tracing::debug!(to = %redirect.to, "guard redirecting");
                    navigator.navigate(&redirect.to, redirect.replace);
                    tx.send_replace(decision);
                    break;
                }
                tx.send_replace(decision);

                if sessions.changed().await.is_err() {
                    tracing::debug!(path = %location, "session context closed, guard stopped");
                    break;
                }
            }
        });

        Self { decisions, task }
    }

    /// Latest decision.
    pub fn decision(&self) -> Decision {
        self.decisions.borrow().clone()
    }

    /// Wait until the guard has left `Loading`. If the watch stopped while
    /// still loading, returns `Loading`.
    pub async fn settled(&mut self) -> Decision {
        let settled = self
            .decisions
            .wait_for(|d| !matches!(d, Decision::Loading))
            .await
            .map(|d| d.clone());
        match settled {
            Ok(decision) => decision,
            Err(_) => self.decisions.borrow().clone(),
        }
    }

    /// Wait for the next decision the guard publishes.
    pub async fn changed(&mut self) -> Option<Decision> {
        self.decisions.changed().await.ok()?;
        Some(self.decisions.borrow_and_update().clone())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for GuardWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{MemorySink, SecurityLog};
    use crate::guard::engine::RouteGuard;
    use crate::guard::types::{AccessRule, GuardConfig};
    use crate::session::{Role, Session};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingNavigator {
        calls: Mutex<Vec<(String, bool)>>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, to: &str, replace: bool) {
            self.calls.lock().push((to.to_string(), replace));
        }
    }

    fn vendor_only() -> (Arc<Guard<RouteGuard>>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new(8));
        let gate = RouteGuard::new(
            AccessRule::require_role(Role::Vendor, "/homepage"),
            Arc::new(GuardConfig::default()),
        );
        (Arc::new(Guard::new(gate, SecurityLog::new(sink.clone()))), sink)
    }

    #[tokio::test]
    async fn test_waits_for_initialization_then_allows() {
        let (guard, sink) = vendor_only();
        let context = SessionContext::default();
        let navigator = Arc::new(RecordingNavigator::default());
        let mut watcher = GuardWatcher::spawn(
            guard,
            &context,
            Location::parse("/dashboard").unwrap(),
            None,
            navigator.clone(),
        );

        assert_eq!(watcher.decision(), Decision::Loading);

        context.publish(Session::authenticated("u-1", "vendor"));
        assert_eq!(watcher.settled().await, Decision::Allow);
        assert!(navigator.calls.lock().is_empty());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_denial_navigates_with_replace_and_stops() {
        let (guard, sink) = vendor_only();
        let context = SessionContext::default();
        let navigator = Arc::new(RecordingNavigator::default());
        let mut watcher = GuardWatcher::spawn(
            guard,
            &context,
            Location::parse("/dashboard").unwrap(),
            Some("agent".into()),
            navigator.clone(),
        );

        context.publish(Session::authenticated("u-1", "user"));
        let decision = watcher.settled().await;
        assert!(decision.is_denied());

        assert_eq!(
            navigator.calls.lock().as_slice(),
            &[("/homepage".to_string(), true)]
        );
        assert_eq!(sink.len(), 1);

        // the watch has ended; later session changes are not observed
        context.publish(Session::authenticated("u-1", "vendor"));
        tokio::task::yield_now().await;
        assert_eq!(navigator.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_role_change_is_reevaluated() {
        let (guard, sink) = vendor_only();
        let context = SessionContext::new(Session::authenticated("u-1", "vendor"));
        let navigator = Arc::new(RecordingNavigator::default());
        let mut watcher = GuardWatcher::spawn(
            guard,
            &context,
            Location::parse("/dashboard").unwrap(),
            None,
            navigator.clone(),
        );
        assert_eq!(watcher.settled().await, Decision::Allow);

        // republishing the same session does not log or navigate
        context.publish(Session::authenticated("u-1", "vendor"));
        assert_eq!(watcher.changed().await, Some(Decision::Allow));
        assert!(sink.is_empty());

        context.update(|s| s.role = Some(Role::Demo));
        let next = watcher.changed().await.unwrap();
        assert!(next.is_denied());
        assert_eq!(sink.len(), 1);
        assert_eq!(navigator.calls.lock().len(), 1);
    }
}
