use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::authz::{
    Capability, Criteria, CriteriaBuilder, CriteriaError, Operation, STANDARD_ACTIONS, Schema,
    Value,
};

/// Policy effect (allow or deny).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    #[default]
    Allow,
    Deny,
}

impl PolicyEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

/// A named rule set, typically one role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainConfig {
    /// Unique name for this domain.
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,

    /// Overrides the top-level `default_access` for this domain.
    #[serde(default)]
    pub default_access: Option<bool>,

    /// Custom actions for this domain only, in addition to the top-level ones.
    #[serde(default)]
    pub actions: BTreeMap<String, Vec<String>>,

    /// Aliases for this domain only, in addition to the top-level ones.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// One `can` or `cannot` registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default)]
    pub effect: PolicyEffect,

    /// Actions the rule applies to; each one is registered separately.
    pub actions: Vec<String>,

    /// Resource type name, as registered in the catalog.
    pub resource: String,

    /// Criteria in builder order. Empty matches everything.
    ///
    /// ```toml
    /// when = [ { field = "owner.id", value = 7 }, "and", "not", { field = "archived", value = true } ]
    /// ```
    #[serde(default)]
    pub when: Vec<ConditionToken>,
}

/// A step of the criteria builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionToken {
    Keyword(Keyword),
    Compare(CompareConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keyword {
    And,
    Or,
    Not,
    Accept,
    Reject,
}

/// A field comparison. An omitted `value` tests for null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompareConfig {
    pub field: String,
    #[serde(default)]
    pub op: Operation,
    #[serde(default)]
    pub value: Value,
}

impl DomainConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation("Domain name cannot be empty".into()));
        }
        validate_actions(&self.actions)
            .map_err(|e| ConfigError::Validation(format!("Domain '{}': {e}", self.name)))?;

        for (i, rule) in self.rules.iter().enumerate() {
            if rule.actions.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Domain '{}' rule {i} must name at least one action",
                    self.name
                )));
            }
            if rule.actions.iter().any(|a| a.trim().is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "Domain '{}' rule {i} has an empty action",
                    self.name
                )));
            }
            if rule.resource.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Domain '{}' rule {i} must name a resource",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Assemble the capability for this domain.
    pub(super) fn build(
        &self,
        defaults: &DomainDefaults<'_>,
        schemas: impl Fn(&str) -> Option<&'static Schema>,
    ) -> Result<Capability, ConfigError> {
        let policy_error = |source| ConfigError::Policy {
            domain: self.name.clone(),
            source,
        };

        let mut capability = Capability::new();
        capability.set_default_access(self.default_access.unwrap_or(defaults.default_access));

        for (action, members) in defaults.actions.iter().chain(&self.actions) {
            let members: Vec<&str> = members.iter().map(String::as_str).collect();
            capability
                .register_action(action, &members)
                .map_err(policy_error)?;
        }
        for (alias, action) in defaults.aliases.iter().chain(&self.aliases) {
            capability.alias_for_action(alias, action);
        }

        for rule in &self.rules {
            let schema = schemas(&rule.resource).ok_or_else(|| ConfigError::UnknownResource {
                domain: self.name.clone(),
                resource: rule.resource.clone(),
            })?;
            let criteria = rule.criteria(schema).map_err(policy_error)?;

            for action in &rule.actions {
                let registered = match rule.effect {
                    PolicyEffect::Allow => capability.can_for(action, schema, criteria.clone()),
                    PolicyEffect::Deny => capability.cannot_for(action, schema, criteria.clone()),
                };
                registered.map_err(policy_error)?;
            }
            tracing::trace!(
                domain = %self.name,
                effect = rule.effect.as_str(),
                actions = ?rule.actions,
                resource = %rule.resource,
                criteria = %criteria,
                "Loaded policy rule"
            );
        }

        Ok(capability)
    }
}

impl RuleConfig {
    /// Replay the `when` tokens through a [`CriteriaBuilder`].
    pub fn criteria(
        &self,
        schema: &'static Schema,
    ) -> Result<Criteria, CriteriaError> {
        if self.when.is_empty() {
            return Ok(Criteria::True);
        }

        let mut builder = CriteriaBuilder::for_schema(schema);
        for token in &self.when {
            match token {
                ConditionToken::Keyword(Keyword::And) => {
                    builder.and()?;
                }
                ConditionToken::Keyword(Keyword::Or) => {
                    builder.or()?;
                }
                ConditionToken::Keyword(Keyword::Not) => {
                    builder.not();
                }
                ConditionToken::Keyword(Keyword::Accept) => {
                    builder.accept()?;
                }
                ConditionToken::Keyword(Keyword::Reject) => {
                    builder.reject()?;
                }
                ConditionToken::Compare(compare) => {
                    builder.compare(&compare.field, compare.op, compare.value.clone())?;
                }
            }
        }
        builder.build()
    }
}

/// Settings every domain inherits from the top level.
pub(super) struct DomainDefaults<'a> {
    pub default_access: bool,
    pub actions: &'a BTreeMap<String, Vec<String>>,
    pub aliases: &'a BTreeMap<String, String>,
}

pub(super) fn validate_actions(actions: &BTreeMap<String, Vec<String>>) -> Result<(), String> {
    for (name, members) in actions {
        if name.trim().is_empty() {
            return Err("Custom action name cannot be empty".into());
        }
        if STANDARD_ACTIONS.contains(&name.to_lowercase().as_str()) {
            return Err(format!("Cannot redefine standard action '{name}'"));
        }
        if members.is_empty() {
            return Err(format!("Custom action '{name}' must expand to at least one action"));
        }
    }
    Ok(())
}
