use std::sync::Arc;

use crate::error::{ScopeError, ScopeErrors};

use super::{
    USER_CHECK_ACCESS, USER_FULL, USER_INFO, USER_LIST_ALL_PROJECTS, USER_LIST_SCOPED_PROJECTS,
};

const USER_INDICATOR: &str = "user:";
const CLUSTER_ROLE_INDICATOR: &str = "role:";
const ESCALATING_SCOPE_INDICATOR: &str = ":!";
const ALL_NAMESPACES: &str = "*";

/// What the consent page shows for a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeDescription {
    pub description: String,
    pub warning: Option<String>,
    pub escalating: bool,
}

/// Understands one family of scope strings.
pub trait ScopeEvaluator: Send + Sync {
    fn handles(&self, scope: &str) -> bool;
    fn validate(&self, scope: &str) -> Result<(), String>;
    fn describe(&self, scope: &str) -> ScopeDescription;
}

pub struct UserEvaluator;

impl ScopeEvaluator for UserEvaluator {
    fn handles(&self, scope: &str) -> bool {
        scope.starts_with(USER_INDICATOR)
    }

    fn validate(&self, scope: &str) -> Result<(), String> {
        match scope {
            USER_FULL | USER_INFO | USER_CHECK_ACCESS | USER_LIST_SCOPED_PROJECTS
            | USER_LIST_ALL_PROJECTS => Ok(()),
            _ => Err(format!("unrecognized scope: {scope}")),
        }
    }

    fn describe(&self, scope: &str) -> ScopeDescription {
        let (description, warning) = match scope {
            USER_INFO => (
                "Read-only access to your user information (including username, identities, and group membership)",
                None,
            ),
            USER_CHECK_ACCESS => (
                "Read-only access to view your privileges (for example, \"can I create builds?\")",
                None,
            ),
            USER_LIST_SCOPED_PROJECTS => (
                "Read-only access to list your projects viewable with this token and view their metadata",
                None,
            ),
            USER_LIST_ALL_PROJECTS => (
                "Read-only access to list your projects and view their metadata",
                None,
            ),
            USER_FULL => (
                "Full read/write access with all of your permissions",
                Some("Includes any access you have to escalating resources like secrets"),
            ),
            _ => ("Unknown user scope", None),
        };
        ScopeDescription {
            description: description.to_owned(),
            warning: warning.map(str::to_owned),
            escalating: scope == USER_FULL,
        }
    }
}

pub struct ClusterRoleEvaluator;

impl ScopeEvaluator for ClusterRoleEvaluator {
    fn handles(&self, scope: &str) -> bool {
        scope.starts_with(CLUSTER_ROLE_INDICATOR)
    }

    fn validate(&self, scope: &str) -> Result<(), String> {
        parse_cluster_role_scope(scope).map(|_| ())
    }

    fn describe(&self, scope: &str) -> ScopeDescription {
        match parse_cluster_role_scope(scope) {
            Ok((role, namespace, escalating)) => {
                let description = if namespace == ALL_NAMESPACES {
                    format!("Anything the {role:?} role can do in all projects")
                } else {
                    format!("Anything the {role:?} role can do in project {namespace:?}")
                };
                let warning = if escalating {
                    Some("Includes access to escalating resources like secrets".to_owned())
                } else {
                    Some(
                        "Excludes access to escalating resources like secrets even if the role grants them"
                            .to_owned(),
                    )
                };
                ScopeDescription {
                    description,
                    warning,
                    escalating,
                }
            }
            Err(err) => ScopeDescription {
                description: err,
                warning: None,
                escalating: false,
            },
        }
    }
}

/// Splits `role:<name>:<namespace>[:!]` into its parts. Namespaces cannot
/// contain colons but role names can, so the last colon separates them.
pub fn parse_cluster_role_scope(scope: &str) -> Result<(String, String, bool), String> {
    let bad_format = || format!("bad format for scope {scope}");
    let rest = scope
        .strip_prefix(CLUSTER_ROLE_INDICATOR)
        .ok_or_else(bad_format)?;
    let (rest, escalating) = match rest.strip_suffix(ESCALATING_SCOPE_INDICATOR) {
        Some(trimmed) => (trimmed, true),
        None => (rest, false),
    };
    match rest.rfind(':') {
        Some(idx) if idx > 0 && idx < rest.len() - 1 => Ok((
            rest[..idx].to_owned(),
            rest[idx + 1..].to_owned(),
            escalating,
        )),
        _ => Err(bad_format()),
    }
}

/// Ordered set of evaluators. The first evaluator that handles a scope owns it.
#[derive(Clone)]
pub struct ScopeRegistry {
    evaluators: Vec<Arc<dyn ScopeEvaluator>>,
}

impl Default for ScopeRegistry {
    fn default() -> Self {
        Self::new(vec![Arc::new(UserEvaluator), Arc::new(ClusterRoleEvaluator)])
    }
}

impl ScopeRegistry {
    pub fn new(evaluators: Vec<Arc<dyn ScopeEvaluator>>) -> Self {
        Self { evaluators }
    }

    fn evaluator_for(&self, scope: &str) -> Option<&Arc<dyn ScopeEvaluator>> {
        self.evaluators.iter().find(|e| e.handles(scope))
    }

    /// Checks every scope in the list and reports all failures together.
    /// Allowed characters follow RFC 6749 section 3.3:
    /// `%x21 / %x23-5B / %x5D-7E`.
    pub fn validate_scopes<S: AsRef<str>>(&self, scopes: &[S]) -> Result<(), ScopeErrors> {
        let mut errors = Vec::new();
        if scopes.is_empty() {
            errors.push(ScopeError::Required);
        }

        for (index, scope) in scopes.iter().enumerate() {
            let scope = scope.as_ref();
            let mut illegal = false;
            for ch in scope.chars() {
                if !matches!(ch, '!' | '#'..='[' | ']'..='~') {
                    errors.push(ScopeError::Invalid {
                        index,
                        value: scope.to_owned(),
                        reason: format!("{ch:?} not allowed"),
                    });
                    illegal = true;
                }
            }
            if illegal {
                continue;
            }
            if scope.is_empty() {
                errors.push(ScopeError::Invalid {
                    index,
                    value: String::new(),
                    reason: "may not be empty".into(),
                });
                continue;
            }

            let reason = match self.evaluator_for(scope) {
                Some(evaluator) => evaluator.validate(scope).err(),
                None => Some("no scope handler found".to_owned()),
            };
            if let Some(reason) = reason {
                errors.push(ScopeError::Invalid {
                    index,
                    value: scope.to_owned(),
                    reason,
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ScopeErrors(errors))
        }
    }

    pub fn describe(&self, scope: &str) -> ScopeDescription {
        match self.evaluator_for(scope) {
            Some(evaluator) => evaluator.describe(scope),
            None => ScopeDescription {
                description: format!("Unknown scope {scope}"),
                warning: None,
                escalating: false,
            },
        }
    }
}
