use std::path::Path;

use eventgate::guard::loader::load_policies;
use eventgate::guard::types::GuardConfig;
use eventgate::guard::GuardTable;
use eventgate::session::{Role, Session};
use tempfile::TempDir;

/// Route policies of the event dashboard, as deployed.
pub const DASHBOARD_POLICY: &str = r#"
route "/dashboard/*" {
    roles {
        - "vendor"
        - "demo"
    }
    fallback "/homepage"
}

route "/events"

route "/events" param="create" equals="true" {
    role "vendor"
    fallback "/homepage"
}

route "/team" {
    role "vendor"
}
"#;

/// Builder for session snapshots; starts as a signed-in `user`.
pub struct SessionBuilder {
    session: Session,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            session: Session::authenticated("user-1", Role::User),
        }
    }

    pub fn role(mut self, role: &str) -> Self {
        self.session.role = Some(Role::parse(role));
        self
    }

    pub fn without_role(mut self) -> Self {
        self.session.role = None;
        self
    }

    pub fn user_id(mut self, user_id: &str) -> Self {
        self.session.user_id = Some(user_id.to_string());
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.session = Session::anonymous();
        self
    }

    /// Keep identity and role but mark bootstrap as still running.
    pub fn loading(mut self) -> Self {
        self.session.initialized = false;
        self
    }

    pub fn build(self) -> Session {
        self.session
    }
}

/// Temporary policies directory.
pub struct PolicyDir {
    dir: TempDir,
}

impl PolicyDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn dashboard() -> Self {
        Self::new().with_file("dashboard.kdl", DASHBOARD_POLICY)
    }

    pub fn with_file(self, name: &str, contents: &str) -> Self {
        std::fs::write(self.dir.path().join(name), contents).expect("Failed to write policy");
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn load(&self) -> GuardTable {
        load_policies(self.path(), GuardConfig::default()).expect("Failed to load policies")
    }
}
