use crate::guard::errors::GuardError;
use crate::guard::types::*;
use crate::session::Role;
use kdl::KdlDocument;

/// Parse a KDL document string into route definitions.
pub fn parse_kdl_document(source: &str) -> Result<ParsedPolicy, GuardError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| GuardError::KdlParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "route" => {
                let pattern = first_string_arg(node).ok_or_else(|| {
                    GuardError::InvalidPolicy(
                        "route node requires a path argument (e.g. route \"/dashboard\")".into(),
                    )
                })?;

                let param = node.get("param").and_then(|v| v.as_string());
                let equals = node.get("equals").and_then(|v| v.as_string());
                let trigger = match (param, equals) {
                    (Some(name), sentinel) => Trigger::QueryParam {
                        name: name.to_string(),
                        sentinel: sentinel.unwrap_or("true").to_string(),
                    },
                    (None, Some(_)) => {
                        return Err(GuardError::InvalidPolicy(format!(
                            "route `{pattern}` sets `equals` without `param`"
                        )));
                    }
                    (None, None) => Trigger::Path,
                };

                let mut required_role = None;
                let mut required_roles = None;
                let mut fallback = None;

                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "role" => {
                                let role = first_string_arg(child).ok_or_else(|| {
                                    GuardError::InvalidPolicy(format!(
                                        "`role` in route `{pattern}` needs a role name"
                                    ))
                                })?;
                                required_role = Some(Role::parse(&role));
                            }
                            "roles" => {
                                required_roles = Some(
                                    dash_list(child)
                                        .iter()
                                        .map(|r| Role::parse(r))
                                        .collect::<Vec<_>>(),
                                );
                            }
                            "fallback" => {
                                fallback = first_string_arg(child);
                            }
                            other => {
                                return Err(GuardError::InvalidPolicy(format!(
                                    "unexpected child `{other}` in route `{pattern}` (expected `role`, `roles` or `fallback`)"
                                )));
                            }
                        }
                    }
                }

                policy.routes.push(RouteDef {
                    pattern,
                    trigger,
                    required_role,
                    required_roles,
                    fallback,
                });
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(policy)
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// roles {
///     - "vendor"
///     - "demo"
/// }
/// ```
fn dash_list(node: &kdl::KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
