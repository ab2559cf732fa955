//! Scope strings: parsing helpers, validation and client restrictions.

mod evaluator;
mod restriction;

pub use evaluator::{
    ClusterRoleEvaluator, ScopeDescription, ScopeEvaluator, ScopeRegistry, UserEvaluator,
    parse_cluster_role_scope,
};
pub use restriction::{RestrictionError, validate_scope_restrictions};

pub const USER_FULL: &str = "user:full";
pub const USER_INFO: &str = "user:info";
pub const USER_CHECK_ACCESS: &str = "user:check-access";
pub const USER_LIST_SCOPED_PROJECTS: &str = "user:list-scoped-projects";
pub const USER_LIST_ALL_PROJECTS: &str = "user:list-projects";

/// Scope granted when a request does not ask for one.
pub const DEFAULT_SCOPE: &str = USER_FULL;

/// Splits a space separated scope parameter, dropping empty entries.
pub fn split(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(str::to_owned).collect()
}

pub fn join<S: AsRef<str>>(scopes: &[S]) -> String {
    scopes
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Union of `existing` and `added`, preserving first-seen order.
pub fn add<S: AsRef<str>>(existing: &[S], added: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(existing.len() + added.len());
    for scope in existing.iter().chain(added.iter()) {
        let scope = scope.as_ref();
        if !out.iter().any(|s| s == scope) {
            out.push(scope.to_owned());
        }
    }
    out
}

/// True when every scope in `requested` is already in `granted`.
pub fn covers<S: AsRef<str>, R: AsRef<str>>(granted: &[S], requested: &[R]) -> bool {
    requested
        .iter()
        .all(|r| granted.iter().any(|g| g.as_ref() == r.as_ref()))
}
