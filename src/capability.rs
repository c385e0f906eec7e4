//! Scope-gated field classification.
//!
//! A handful of fields are only returned to credentials holding a
//! specific access scope; exposing them in the catalog without the scope
//! would make every sync of that stream fail. Discovery classifies such
//! fields as unsupported instead, based on one scope introspection call
//! per run.

use std::collections::HashSet;

use tracing::warn;

/// Fields gated behind an access scope, with the scope unlocking each.
const SCOPE_GATED_FIELDS: &[(&str, &str)] = &[("author", "read_users")];

/// Answers "may this field be exposed?" for the scopes granted to the
/// running credential.
#[derive(Debug, Clone)]
pub struct Capability {
    scopes: HashSet<String>,
}

impl Capability {
    pub fn new(scopes: HashSet<String>) -> Self {
        Self { scopes }
    }

    /// Whether a field may be emitted. Ungated fields always may; gated
    /// fields need their scope, and a denial is logged once per lookup.
    pub fn field_supported(&self, field: &str) -> bool {
        let Some(scope) = required_scope(field) else {
            return true;
        };
        let granted = self.scopes.contains(scope);
        if !granted {
            warn!(field, scope, "skipping field: required scope is not granted");
        }
        granted
    }
}

fn required_scope(field: &str) -> Option<&'static str> {
    SCOPE_GATED_FIELDS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, scope)| *scope)
}
