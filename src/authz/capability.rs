//! Allow/deny rules per action and resource type.
//!
//! A [`Capability`] holds the rules of one policy domain (typically a role).
//! Rules are registered with [`Capability::can`] and [`Capability::cannot`]
//! during setup; afterwards the capability is only queried, either to decide
//! on a single resource ([`Capability::allows`]) or to compile a query
//! filter selecting every permitted resource ([`Capability::to_specification`]).
//!
//! # Resolution
//!
//! 1. The requested action is mapped through the aliases (`index` → `read`).
//! 2. The controlling actions are the action itself, `manage`, and every
//!    action group containing it (`crud` contains `read`).
//! 3. For each controlling action the allow criteria and deny criteria are
//!    ANDed; the per-action results are ORed.
//! 4. Without any controlling criteria the default applies: the configured
//!    default access while no rules exist at all, deny once any rule exists.
//!
//! Mutation needs `&mut self`; share a finished capability through an
//! `Arc` so concurrent readers never observe registration.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::{
    criteria::Criteria,
    error::CriteriaError,
    predicate::{PredicateFactory, Specification, SpecificationBuilder},
    resource::{Resource, Schema},
};

pub const CREATE: &str = "create";
pub const READ: &str = "read";
pub const UPDATE: &str = "update";
pub const DELETE: &str = "delete";
pub const CRUD: &str = "crud";
pub const MANAGE: &str = "manage";
pub const INDEX: &str = "index";
pub const SHOW: &str = "show";

/// Actions that cannot be redefined with [`Capability::register_action`].
pub const STANDARD_ACTIONS: [&str; 6] = [CREATE, CRUD, DELETE, MANAGE, READ, UPDATE];

/// Criteria per action, then per resource type name.
type RuleMap = BTreeMap<String, BTreeMap<&'static str, Criteria>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Allow,
    Deny,
}

/// The outcome of a single authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// The action as requested.
    pub action: String,
    /// The action after alias resolution.
    pub canonical_action: String,
    pub resource: String,
    /// Controlling actions that contributed criteria.
    pub matched_actions: Vec<String>,
    /// True when no criteria applied and the default decided.
    pub defaulted: bool,
}

struct Resolution {
    canonical: String,
    matched: Vec<String>,
    criteria: Option<Criteria>,
}

#[derive(Debug, Clone)]
pub struct Capability {
    action_groups: BTreeMap<String, Vec<String>>,
    aliases: BTreeMap<String, String>,
    allow_rules: RuleMap,
    deny_rules: RuleMap,
    default_access: bool,
}

impl Default for Capability {
    fn default() -> Self {
        Self::new()
    }
}

impl Capability {
    /// An empty capability that allows everything until a rule is registered.
    pub fn new() -> Self {
        let mut action_groups = BTreeMap::new();
        action_groups.insert(
            CRUD.to_string(),
            [CREATE, READ, UPDATE, DELETE].map(String::from).to_vec(),
        );
        let mut aliases = BTreeMap::new();
        aliases.insert(INDEX.to_string(), READ.to_string());
        aliases.insert(SHOW.to_string(), READ.to_string());

        Self {
            action_groups,
            aliases,
            allow_rules: RuleMap::new(),
            deny_rules: RuleMap::new(),
            default_access: true,
        }
    }

    // ========== Registration ==========

    /// Allow `action` on `R` where `criteria` matches.
    pub fn can<R: Resource>(&mut self, action: &str, criteria: Criteria) -> Result<(), CriteriaError> {
        self.can_for(action, R::schema(), criteria)
    }

    pub fn can_all<R: Resource>(&mut self, actions: &[&str], criteria: Criteria) -> Result<(), CriteriaError> {
        for action in actions {
            self.can_for(action, R::schema(), criteria.clone())?;
        }
        Ok(())
    }

    pub fn can_for(
        &mut self,
        action: &str,
        schema: &'static Schema,
        criteria: Criteria,
    ) -> Result<(), CriteriaError> {
        self.update(Effect::Allow, action, schema, criteria)
    }

    /// Deny `action` on `R` where `criteria` matches.
    pub fn cannot<R: Resource>(&mut self, action: &str, criteria: Criteria) -> Result<(), CriteriaError> {
        self.cannot_for(action, R::schema(), criteria)
    }

    pub fn cannot_all<R: Resource>(&mut self, actions: &[&str], criteria: Criteria) -> Result<(), CriteriaError> {
        for action in actions {
            self.cannot_for(action, R::schema(), criteria.clone())?;
        }
        Ok(())
    }

    pub fn cannot_for(
        &mut self,
        action: &str,
        schema: &'static Schema,
        criteria: Criteria,
    ) -> Result<(), CriteriaError> {
        self.update(Effect::Deny, action, schema, Criteria::not(criteria))
    }

    fn update(
        &mut self,
        effect: Effect,
        action: &str,
        schema: &'static Schema,
        criteria: Criteria,
    ) -> Result<(), CriteriaError> {
        criteria.verify(schema)?;

        let canonical = self.canonical_action(action).to_string();
        tracing::trace!(
            action = %action,
            canonical_action = %canonical,
            resource = %schema.name,
            effect = ?effect,
            criteria = %criteria,
            "Registering rule"
        );

        let rules = match effect {
            Effect::Allow => &mut self.allow_rules,
            Effect::Deny => &mut self.deny_rules,
        };
        let entry = rules
            .entry(canonical)
            .or_default()
            .entry(schema.name)
            .or_insert_with(|| Criteria::or(vec![Criteria::False]));
        if let Criteria::Join(join) = entry {
            join.add(criteria);
        }
        Ok(())
    }

    /// Define a custom action as a group of other actions.
    ///
    /// Registering the same group again is a no-op; changing an existing
    /// group or redefining a standard action fails.
    pub fn register_action(&mut self, action: &str, actions: &[&str]) -> Result<(), CriteriaError> {
        if STANDARD_ACTIONS.contains(&action.to_lowercase().as_str()) {
            return Err(CriteriaError::RegisterAction(format!(
                "Cannot register standard action {action}"
            )));
        }

        match self.action_groups.get(action) {
            None => {
                tracing::trace!(action = %action, expands_to = ?actions, "Registering action");
                self.action_groups.insert(
                    action.to_string(),
                    actions.iter().map(|a| a.to_string()).collect(),
                );
                Ok(())
            }
            Some(registered) => {
                let current: BTreeSet<&str> = registered.iter().map(String::as_str).collect();
                let requested: BTreeSet<&str> = actions.iter().copied().collect();
                if current == requested {
                    Ok(())
                } else {
                    Err(CriteriaError::RegisterAction(format!(
                        "Cannot change registration of {action} from {registered:?} to {actions:?}"
                    )))
                }
            }
        }
    }

    /// Make `alias` resolve to `action`, replacing any previous alias.
    pub fn alias_for_action(&mut self, alias: &str, action: &str) {
        self.aliases.insert(alias.to_string(), action.to_string());
    }

    pub fn set_default_access(&mut self, default_access: bool) {
        self.default_access = default_access;
    }

    pub fn default_access(&self) -> bool {
        self.default_access
    }

    pub fn registered_actions(&self) -> &BTreeMap<String, Vec<String>> {
        &self.action_groups
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    /// Whether any allow or deny rule exists for any action and type.
    pub fn has_rules(&self) -> bool {
        !self.allow_rules.is_empty() || !self.deny_rules.is_empty()
    }

    // ========== Decisions ==========

    /// Decide whether `action` is permitted on `object`.
    ///
    /// Evaluation errors propagate; they never fall back to the default.
    pub fn allows<R: Resource>(&self, action: &str, object: &R) -> Result<bool, CriteriaError> {
        self.explain(action, object).map(|decision| decision.allowed)
    }

    pub fn denies<R: Resource>(&self, action: &str, object: &R) -> Result<bool, CriteriaError> {
        self.allows(action, object).map(|allowed| !allowed)
    }

    /// Like [`allows`](Self::allows), but fails with `AccessDenied` instead of returning false.
    pub fn authorize<R: Resource>(&self, action: &str, object: &R) -> Result<(), CriteriaError> {
        if self.allows(action, object)? {
            Ok(())
        } else {
            Err(CriteriaError::access_denied(format!(
                "{action} on {} is not permitted",
                R::schema().name
            )))
        }
    }

    /// Decide on `object` and report how the decision was reached.
    pub fn explain<R: Resource>(&self, action: &str, object: &R) -> Result<Decision, CriteriaError> {
        let schema = R::schema();
        let resolution = self.resolve(action, schema);

        let (allowed, defaulted) = match &resolution.criteria {
            None => (self.base_access(), true),
            Some(criteria) => match criteria.evaluate(object, schema) {
                Ok(allowed) => (allowed, false),
                Err(e) => {
                    tracing::warn!(
                        action = %action,
                        resource = %schema.name,
                        error = %e,
                        "Criteria evaluation error"
                    );
                    return Err(e);
                }
            },
        };

        tracing::debug!(
            action = %action,
            canonical_action = %resolution.canonical,
            resource = %schema.name,
            matched_actions = ?resolution.matched,
            allowed,
            defaulted,
            "Authorization decision"
        );

        Ok(Decision {
            allowed,
            action: action.to_string(),
            canonical_action: resolution.canonical,
            resource: schema.name.to_string(),
            matched_actions: resolution.matched,
            defaulted,
        })
    }

    /// The combined criteria controlling `action` on a resource type, if any.
    pub fn criteria_for(&self, action: &str, schema: &Schema) -> Option<Criteria> {
        self.resolve(action, schema).criteria
    }

    /// Compile the permitted subset of `R` for `action` into a query filter.
    pub fn to_specification<R: Resource>(&self, action: &str) -> Result<Specification, CriteriaError> {
        self.to_specification_for(action, R::schema())
    }

    pub fn to_specification_for(
        &self,
        action: &str,
        schema: &Schema,
    ) -> Result<Specification, CriteriaError> {
        let mut builder = SpecificationBuilder::new();
        let root = builder.root();
        let filter = self.to_predicate(action, schema, &mut builder, &root)?;
        Ok(builder.finish(schema.name, filter))
    }

    /// Compile the permitted subset into any predicate backend.
    ///
    /// Without controlling criteria this compiles the default: an always-true
    /// or always-false predicate.
    pub fn to_predicate<F: PredicateFactory>(
        &self,
        action: &str,
        schema: &Schema,
        factory: &mut F,
        scope: &F::Scope,
    ) -> Result<F::Predicate, CriteriaError> {
        let resolution = self.resolve(action, schema);
        let criteria = resolution.criteria.unwrap_or(if self.base_access() {
            Criteria::True
        } else {
            Criteria::False
        });

        tracing::debug!(
            action = %action,
            canonical_action = %resolution.canonical,
            resource = %schema.name,
            matched_actions = ?resolution.matched,
            criteria = %criteria,
            "Compiling authorization filter"
        );

        criteria.to_predicate(factory, scope)
    }

    // ========== Resolution ==========

    fn canonical_action<'a>(&'a self, action: &'a str) -> &'a str {
        self.aliases.get(action).map(String::as_str).unwrap_or(action)
    }

    fn base_access(&self) -> bool {
        if self.has_rules() {
            false
        } else {
            self.default_access
        }
    }

    fn controlling_actions(&self, canonical: &str) -> Vec<String> {
        let mut controlling = vec![canonical.to_string()];
        if canonical != MANAGE {
            controlling.push(MANAGE.to_string());
        }
        for (group, members) in &self.action_groups {
            if members.iter().any(|m| m == canonical) && !controlling.contains(group) {
                controlling.push(group.clone());
            }
        }
        controlling
    }

    fn lookup<'a>(&self, rules: &'a RuleMap, action: &str, schema: &Schema) -> Option<&'a Criteria> {
        rules
            .get(self.canonical_action(action))
            .and_then(|by_type| by_type.get(schema.name))
    }

    fn resolve(&self, action: &str, schema: &Schema) -> Resolution {
        let canonical = self.canonical_action(action).to_string();
        let mut matched = Vec::new();
        let mut per_action = Vec::new();

        for controlling in self.controlling_actions(&canonical) {
            let allow = self.lookup(&self.allow_rules, &controlling, schema);
            let deny = self.lookup(&self.deny_rules, &controlling, schema);
            let combined = match (allow, deny) {
                (Some(allow), Some(deny)) => Criteria::and(vec![allow.clone(), deny.clone()]),
                (Some(only), None) | (None, Some(only)) => only.clone(),
                (None, None) => continue,
            };
            matched.push(controlling);
            per_action.push(combined);
        }

        let criteria = match per_action.len() {
            0 => None,
            1 => per_action.pop(),
            _ => Some(Criteria::or(per_action)),
        };

        Resolution {
            canonical,
            matched,
            criteria,
        }
    }
}
