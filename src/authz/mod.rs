//! Authorization: criteria, capabilities and policy domains.
//!
//! The pieces, bottom up:
//! - [`Resource`] and [`Schema`] describe what a criteria can look at
//! - [`Criteria`] is a boolean tree of field [`Comparison`]s, built directly
//!   or token by token through [`CriteriaBuilder`]
//! - [`Capability`] registers allow and deny criteria per action and
//!   resource type, and answers `allows` or compiles a [`Specification`]
//! - [`PolicyRegistry`] holds one shared capability per policy domain
//!
//! The decision flow:
//! 1. Resolve the requested action through the aliases
//! 2. Collect the criteria of every controlling action (the action, `manage`,
//!    and each action group containing it)
//! 3. AND the allow and deny sides of each action; OR the actions together
//! 4. Evaluate against the resource, or fall back to the default access

mod builder;
pub mod capability;
pub mod comparison;
pub mod criteria;
mod error;
pub mod predicate;
mod registry;
pub mod resource;
mod value;

pub use builder::CriteriaBuilder;
pub use capability::{
    CREATE, CRUD, Capability, DELETE, Decision, INDEX, MANAGE, READ, SHOW, STANDARD_ACTIONS,
    UPDATE,
};
pub use comparison::{Comparison, Operation};
pub use criteria::{Criteria, Join, JoinKind};
pub use error::CriteriaError;
pub use predicate::{
    FieldRef, Filter, JoinClause, PredicateFactory, Specification, SpecificationBuilder,
};
pub use registry::{PolicyRegistry, PolicyRegistryError};
pub use resource::{Catalog, Field, FieldAccessError, FieldDef, Resource, Schema, Shape};
pub use value::Value;
