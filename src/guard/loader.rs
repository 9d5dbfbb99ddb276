use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::guard::engine::{ParamGuard, RouteGuard};
use crate::guard::errors::GuardError;
use crate::guard::policy::parse_kdl_document;
use crate::guard::types::*;
use crate::guard::{GuardTable, RouteGate};

/// Load all `.kdl` policy files from the given directory and compile them
/// into a single immutable `GuardTable`.
pub fn load_policies(dir: &Path, config: GuardConfig) -> Result<GuardTable, GuardError> {
    if !dir.is_dir() {
        return Err(GuardError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut all_parsed = Vec::new();
    let mut file_count = 0;

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| GuardError::PolicyLoadError {
                path: path.display().to_string(),
                source,
            })?;
        let parsed = parse_kdl_document(&contents)?;
        all_parsed.push(parsed);
        file_count += 1;
    }

    let table = compile_policies(all_parsed, config)?;

    tracing::info!(
        files = file_count,
        routes = table.len(),
        "Loaded route policies"
    );

    Ok(table)
}

/// Validate and merge parsed policies, in order, into a `GuardTable`.
pub fn compile_policies(
    parsed: Vec<ParsedPolicy>,
    config: GuardConfig,
) -> Result<GuardTable, GuardError> {
    let config = Arc::new(config);
    let mut table = GuardTable::new(config.clone());
    let mut seen: HashSet<(String, Option<String>)> = HashSet::new();

    for def in parsed.into_iter().flat_map(|p| p.routes) {
        let pattern = PathPattern::parse(&def.pattern)?;

        let trigger_key = match &def.trigger {
            Trigger::Path => None,
            Trigger::QueryParam { name, sentinel } => Some(format!("{name}={sentinel}")),
        };
        if !seen.insert((pattern.to_string(), trigger_key)) {
            return Err(GuardError::InvalidPolicy(format!(
                "route `{}` is declared more than once",
                def.pattern
            )));
        }

        let fallback = def
            .fallback
            .unwrap_or_else(|| config.default_fallback.clone());
        if !fallback.starts_with('/') {
            return Err(GuardError::InvalidRule {
                route: def.pattern,
                reason: format!("fallback `{fallback}` must be an absolute path"),
            });
        }

        let rule =
            AccessRule::from_parts(&def.pattern, def.required_role, def.required_roles, fallback)?;

        let gate = match def.trigger {
            Trigger::Path => RouteGate::Route(RouteGuard::new(rule, config.clone())),
            Trigger::QueryParam { name, sentinel } => {
                RouteGate::Param(ParamGuard::new(name, sentinel, rule, config.clone()))
            }
        };
        table.push(pattern, gate);
    }

    Ok(table)
}
