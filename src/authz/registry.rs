//! Registry of capabilities per policy domain.
//!
//! A policy domain is a named rule set, usually a role such as `editor` or
//! `viewer`. The registry is assembled once (by hand or from a
//! [`PolicyConfig`](crate::config::PolicyConfig)) and then shared: each
//! capability sits behind an `Arc` and is never mutated again, so lookups
//! and decisions need no locking.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut editor = Capability::new();
//! editor.can::<Document>("update", owned_by_subject)?;
//!
//! let mut registry = PolicyRegistry::new();
//! registry.insert("editor", editor)?;
//!
//! let registry = Arc::new(registry);
//! if registry.allows("editor", "update", &document)? {
//!     // ...
//! }
//! ```

use std::{collections::BTreeMap, sync::Arc};

use thiserror::Error;

use super::{
    capability::{Capability, Decision},
    error::CriteriaError,
    predicate::Specification,
    resource::Resource,
};

#[derive(Debug, Error)]
pub enum PolicyRegistryError {
    #[error("Policy domain '{0}' is already registered")]
    DuplicateDomain(String),

    #[error("Unknown policy domain '{0}'")]
    UnknownDomain(String),

    #[error(transparent)]
    Criteria(#[from] CriteriaError),
}

/// Capabilities keyed by domain name.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    domains: BTreeMap<String, Arc<Capability>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finished capability under `name`.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        capability: Capability,
    ) -> Result<Arc<Capability>, PolicyRegistryError> {
        let name = name.into();
        if self.domains.contains_key(&name) {
            return Err(PolicyRegistryError::DuplicateDomain(name));
        }

        let capability = Arc::new(capability);
        tracing::debug!(
            domain = %name,
            actions = capability.registered_actions().len(),
            has_rules = capability.has_rules(),
            "Registered policy domain"
        );
        self.domains.insert(name, Arc::clone(&capability));
        Ok(capability)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Capability>> {
        self.domains.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.domains.contains_key(name)
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> + '_ {
        self.domains.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    fn capability(&self, name: &str) -> Result<&Capability, PolicyRegistryError> {
        self.domains
            .get(name)
            .map(Arc::as_ref)
            .ok_or_else(|| PolicyRegistryError::UnknownDomain(name.to_string()))
    }

    pub fn allows<R: Resource>(
        &self,
        domain: &str,
        action: &str,
        object: &R,
    ) -> Result<bool, PolicyRegistryError> {
        Ok(self.capability(domain)?.allows(action, object)?)
    }

    pub fn explain<R: Resource>(
        &self,
        domain: &str,
        action: &str,
        object: &R,
    ) -> Result<Decision, PolicyRegistryError> {
        Ok(self.capability(domain)?.explain(action, object)?)
    }

    /// Whether any of `domains` permits `action` on `object`.
    ///
    /// Unknown domains are skipped; a subject holding several roles is
    /// allowed when one of them allows.
    pub fn allows_any<R: Resource>(
        &self,
        domains: &[&str],
        action: &str,
        object: &R,
    ) -> Result<bool, PolicyRegistryError> {
        for domain in domains {
            let Some(capability) = self.domains.get(*domain) else {
                tracing::warn!(domain = %domain, "Skipping unknown policy domain");
                continue;
            };
            if capability.allows(action, object)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn to_specification<R: Resource>(
        &self,
        domain: &str,
        action: &str,
    ) -> Result<Specification, PolicyRegistryError> {
        Ok(self.capability(domain)?.to_specification::<R>(action)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authz::{
            capability::{READ, UPDATE},
            comparison::{Comparison, Operation},
            criteria::Criteria,
        },
        tests::fixtures::{Parent, parent},
    };

    fn registry() -> PolicyRegistry {
        let mut viewer = Capability::new();
        viewer.can::<Parent>(READ, Criteria::True).unwrap();

        let mut owner = Capability::new();
        let own = Comparison::new(Parent::schema(), "id", Operation::Equals, 1).unwrap();
        owner.can::<Parent>(UPDATE, own.into()).unwrap();

        let mut registry = PolicyRegistry::new();
        registry.insert("viewer", viewer).unwrap();
        registry.insert("owner", owner).unwrap();
        registry
    }

    #[test]
    fn test_duplicate_domain_rejected() {
        let mut registry = registry();
        let err = registry.insert("viewer", Capability::new()).unwrap_err();
        assert!(matches!(err, PolicyRegistryError::DuplicateDomain(name) if name == "viewer"));
    }

    #[test]
    fn test_lookup() {
        let registry = registry();
        assert_eq!(registry.domains().collect::<Vec<_>>(), vec!["owner", "viewer"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("viewer"));
        assert!(registry.get("admin").is_none());
    }

    #[test]
    fn test_allows_per_domain() {
        let registry = registry();
        assert!(registry.allows("viewer", READ, &parent(2)).unwrap());
        assert!(!registry.allows("viewer", UPDATE, &parent(1)).unwrap());
        assert!(registry.allows("owner", UPDATE, &parent(1)).unwrap());
        assert!(!registry.allows("owner", UPDATE, &parent(2)).unwrap());

        let err = registry.allows("admin", READ, &parent(1)).unwrap_err();
        assert!(matches!(err, PolicyRegistryError::UnknownDomain(_)));
    }

    #[test]
    fn test_allows_any() {
        let registry = registry();
        assert!(registry.allows_any(&["viewer", "owner"], UPDATE, &parent(1)).unwrap());
        assert!(!registry.allows_any(&["viewer", "admin"], UPDATE, &parent(1)).unwrap());
        assert!(!registry.allows_any(&[], READ, &parent(1)).unwrap());
    }

    #[test]
    fn test_to_specification() {
        let registry = registry();
        let spec = registry.to_specification::<Parent>("owner", UPDATE).unwrap();
        assert_eq!(spec.to_string(), "FROM Parent WHERE (FALSE) OR (id = 1)");
    }
}
