use crate::guard::types::{AccessRule, Requirement};
use crate::session::Role;

/// Whether a session holding `role` satisfies `rule`.
///
/// Pure and total: a missing role fails every rule that names roles, and a
/// rule that names none admits everyone.
pub fn is_authorized(role: Option<&Role>, rule: &AccessRule) -> bool {
    match &rule.requirement {
        Requirement::Any => true,
        Requirement::Role(required) => role == Some(required),
        Requirement::OneOf(roles) if roles.is_empty() => true,
        Requirement::OneOf(roles) => role.is_some_and(|r| roles.contains(r)),
    }
}
