//! Consolidated test modules.
//!
//! `fixtures` holds the resource types every unit test evaluates against;
//! `policy_e2e` drives whole policy files through the registry.

mod policy_e2e;
