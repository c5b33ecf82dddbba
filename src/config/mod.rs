//! Policy configuration.
//!
//! Policies are configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! default_access = false
//!
//! [actions]
//! publish = ["create", "update"]
//!
//! [aliases]
//! list = "read"
//!
//! [[domains]]
//! name = "editor"
//!
//! [[domains.rules]]
//! effect = "allow"
//! actions = ["read", "publish"]
//! resource = "Document"
//! when = [ { field = "owner.id", value = "${EDITOR_ID}" }, "or", { field = "public", value = true } ]
//! ```

mod policy;

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    sync::LazyLock,
};

pub use policy::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::authz::{Catalog, CriteriaError, PolicyRegistry, PolicyRegistryError};

/// Root of a policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Access granted while a domain has no rules at all.
    /// Any rule, for any action or type, turns the default into deny.
    #[serde(default = "default_true")]
    pub default_access: bool,

    /// Custom actions shared by every domain.
    #[serde(default)]
    pub actions: BTreeMap<String, Vec<String>>,

    /// Action aliases shared by every domain.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    #[serde(default)]
    pub domains: Vec<DomainConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_access: true,
            actions: BTreeMap::new(),
            aliases: BTreeMap::new(),
            domains: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: PolicyConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    ///
    /// Resource names are checked later, against the catalog, in [`build`](Self::build).
    fn validate(&self) -> Result<(), ConfigError> {
        validate_actions(&self.actions).map_err(ConfigError::Validation)?;

        for (alias, action) in &self.aliases {
            if alias.trim().is_empty() || action.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Alias '{alias}' -> '{action}' must name both sides"
                )));
            }
        }

        let mut seen = HashSet::new();
        for domain in &self.domains {
            domain.validate()?;
            if !seen.insert(domain.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate domain name '{}'",
                    domain.name
                )));
            }
        }

        if self.domains.is_empty() {
            tracing::warn!("Policy configuration defines no domains");
        }
        Ok(())
    }

    /// Build the registry, resolving resource names through `catalog`.
    pub fn build(&self, catalog: &Catalog) -> Result<PolicyRegistry, ConfigError> {
        let defaults = DomainDefaults {
            default_access: self.default_access,
            actions: &self.actions,
            aliases: &self.aliases,
        };

        let mut registry = PolicyRegistry::new();
        for domain in &self.domains {
            let capability = domain.build(&defaults, |name| catalog.get(name))?;
            registry.insert(domain.name.clone(), capability)?;
        }

        tracing::debug!(
            domains = registry.len(),
            resources = ?catalog.names().collect::<Vec<_>>(),
            "Built policy registry"
        );
        Ok(registry)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Domain '{domain}' refers to unknown resource '{resource}'")]
    UnknownResource { domain: String, resource: String },

    #[error("Invalid policy in domain '{domain}': {source}")]
    Policy {
        domain: String,
        #[source]
        source: CriteriaError,
    },

    #[error(transparent)]
    Registry(#[from] PolicyRegistryError),
}

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand `${VAR}` references, leaving anything after a `#` untouched.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);
            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);
            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
