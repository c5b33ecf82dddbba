//! Allowance: an authorization policy engine.
//!
//! Rules say which actions a policy domain may perform on which resource
//! types, narrowed by criteria over the resource's fields. The same rules
//! decide on a single loaded resource or compile into a query filter that
//! selects every permitted resource.
//!
//! ```rust,ignore
//! let catalog = Catalog::new().with::<Document>();
//! let registry = PolicyConfig::from_file("policy.toml")?.build(&catalog)?;
//!
//! registry.allows("editor", "update", &document)?;
//! let spec = registry.to_specification::<Document>("editor", "read")?;
//! ```

pub mod authz;
pub mod config;

#[cfg(test)]
mod tests;

pub use authz::{
    Capability, Catalog, Criteria, CriteriaBuilder, CriteriaError, Field, FieldAccessError,
    FieldDef, Filter, Operation, PolicyRegistry, Resource, Schema, Specification, Value,
};
pub use config::{ConfigError, PolicyConfig};
