use thiserror::Error;

use super::parse_cluster_role_scope;
use crate::model::{OAuthClient, ScopeRestriction};

const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .0.join(", "))]
pub struct RestrictionError(pub Vec<String>);

/// Checks that `scopes` are allowed by the client's restrictions. A client
/// without restrictions may request anything, but never an empty scope list.
pub fn validate_scope_restrictions<S: AsRef<str>>(
    client: &OAuthClient,
    scopes: &[S],
) -> Result<(), RestrictionError> {
    if scopes.is_empty() {
        return Err(RestrictionError(vec![format!(
            "{} may not request unscoped tokens",
            client.name()
        )]));
    }
    if client.scope_restrictions.is_empty() {
        return Ok(());
    }

    let errors: Vec<String> = scopes
        .iter()
        .filter_map(|scope| check_scope(client, scope.as_ref()).err())
        .flatten()
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(RestrictionError(errors))
    }
}

/// A scope passes when any single restriction accepts it.
fn check_scope(client: &OAuthClient, scope: &str) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    for restriction in &client.scope_restrictions {
        let outcome = match restriction {
            ScopeRestriction::ExactValues(values) => {
                if values.iter().any(|v| v == scope) {
                    Ok(())
                } else {
                    Err(format!("{scope} not found in {values:?}"))
                }
            }
            ScopeRestriction::ClusterRole {
                role_names,
                namespaces,
                allow_escalation,
            } => check_cluster_role(scope, role_names, namespaces, *allow_escalation),
        };
        match outcome {
            Ok(()) => return Ok(()),
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() {
        errors.push(format!("{scope} did not match any scope restriction"));
    }
    Err(errors)
}

fn check_cluster_role(
    scope: &str,
    role_names: &[String],
    namespaces: &[String],
    allow_escalation: bool,
) -> Result<(), String> {
    let (role, namespace, escalating) = parse_cluster_role_scope(scope)?;
    if !role_names.iter().any(|r| r == WILDCARD || *r == role) {
        return Err(format!("{scope} does not use an approved name"));
    }
    if !namespaces.iter().any(|n| n == WILDCARD || *n == namespace) {
        return Err(format!("{scope} does not use an approved namespace"));
    }
    if escalating && !allow_escalation {
        return Err(format!("{scope} is not allowed to escalate"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn restricted(restrictions: Vec<ScopeRestriction>) -> OAuthClient {
        let mut client = OAuthClient::new("console");
        client.scope_restrictions = restrictions;
        client
    }

    #[test]
    fn unrestricted_client_allows_any_nonempty_scope() {
        let client = OAuthClient::new("console");
        assert!(validate_scope_restrictions(&client, &["user:full"]).is_ok());
        assert!(validate_scope_restrictions::<&str>(&client, &[]).is_err());
    }

    #[test]
    fn exact_values() {
        let client = restricted(vec![ScopeRestriction::ExactValues(vec![
            "user:info".into(),
        ])]);
        assert!(validate_scope_restrictions(&client, &["user:info"]).is_ok());
        let err = validate_scope_restrictions(&client, &["user:info", "user:full"]).unwrap_err();
        assert!(err.to_string().contains("user:full not found"));
    }

    #[test]
    fn any_restriction_may_accept() {
        let client = restricted(vec![
            ScopeRestriction::ExactValues(vec!["user:info".into()]),
            ScopeRestriction::ClusterRole {
                role_names: vec!["view".into()],
                namespaces: vec!["*".into()],
                allow_escalation: false,
            },
        ]);
        assert!(validate_scope_restrictions(&client, &["user:info", "role:view:ns1"]).is_ok());
    }

    #[test]
    fn cluster_role_checks() {
        let client = restricted(vec![ScopeRestriction::ClusterRole {
            role_names: vec!["view".into()],
            namespaces: vec!["ns1".into()],
            allow_escalation: false,
        }]);
        assert!(validate_scope_restrictions(&client, &["role:view:ns1"]).is_ok());
        assert!(
            validate_scope_restrictions(&client, &["role:edit:ns1"])
                .unwrap_err()
                .to_string()
                .contains("approved name")
        );
        assert!(
            validate_scope_restrictions(&client, &["role:view:ns2"])
                .unwrap_err()
                .to_string()
                .contains("approved namespace")
        );
        assert!(
            validate_scope_restrictions(&client, &["role:view:ns1:!"])
                .unwrap_err()
                .to_string()
                .contains("not allowed to escalate")
        );
    }
}
