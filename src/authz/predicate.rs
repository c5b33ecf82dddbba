//! Query-filter compilation.
//!
//! Criteria compile to predicates through [`PredicateFactory`], which is the
//! whole contract a query backend has to offer: boolean connectives,
//! equality and null tests on a field, and inner joins to related types.
//!
//! [`SpecificationBuilder`] is the built-in backend. It produces a
//! [`Specification`]: the joins a query needs plus a [`Filter`] tree over
//! the root type and the joined aliases. Specifications serialize to JSON
//! for handoff and render as SQL-like text for diagnostics.

use std::fmt;

use serde::Serialize;

use super::value::Value;

/// A query backend that criteria can compile into.
pub trait PredicateFactory {
    type Predicate;
    /// A position in the query: the root type or a joined relationship.
    type Scope;

    fn and(&mut self, predicates: Vec<Self::Predicate>) -> Self::Predicate;
    fn or(&mut self, predicates: Vec<Self::Predicate>) -> Self::Predicate;
    fn not(&mut self, predicate: Self::Predicate) -> Self::Predicate;
    fn equals(&mut self, scope: &Self::Scope, field: &str, value: &Value) -> Self::Predicate;
    fn is_null(&mut self, scope: &Self::Scope, field: &str) -> Self::Predicate;
    fn join(&mut self, scope: &Self::Scope, field: &str) -> Self::Scope;
}

/// A field on the root type (`alias == None`) or on a joined relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub field: String,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{alias}.{}", self.field),
            None => f.write_str(&self.field),
        }
    }
}

/// A boolean filter over a root type and its joins.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// True when empty.
    And { filters: Vec<Filter> },
    /// False when empty.
    Or { filters: Vec<Filter> },
    Not { filter: Box<Filter> },
    Equals { field: FieldRef, value: Value },
    IsNull { field: FieldRef },
}

impl Filter {
    pub fn always() -> Self {
        Filter::And { filters: vec![] }
    }

    pub fn never() -> Self {
        Filter::Or { filters: vec![] }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And { filters } if filters.is_empty() => f.write_str("TRUE"),
            Filter::Or { filters } if filters.is_empty() => f.write_str("FALSE"),
            Filter::And { filters } => write_joined(f, filters, "AND"),
            Filter::Or { filters } => write_joined(f, filters, "OR"),
            Filter::Not { filter } => write!(f, "NOT ({filter})"),
            Filter::Equals { field, value } => write!(f, "{field} = {value}"),
            Filter::IsNull { field } => write!(f, "{field} IS NULL"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, filters: &[Filter], operator: &str) -> fmt::Result {
    if let [only] = filters {
        return write!(f, "{only}");
    }
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            write!(f, " {operator} ")?;
        }
        write!(f, "({filter})")?;
    }
    Ok(())
}

/// An inner join from a scope to one of its relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinClause {
    pub alias: String,
    /// The joining scope; `None` for the root type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub field: String,
}

/// A compiled query filter for one resource type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Specification {
    pub resource: String,
    pub joins: Vec<JoinClause>,
    pub filter: Filter,
}

impl Specification {
    /// The specification as a JSON document, for handoff to a query layer.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl fmt::Display for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FROM {}", self.resource)?;
        for join in &self.joins {
            let parent = join.parent.as_deref().unwrap_or(&self.resource);
            write!(f, " JOIN {parent}.{} AS {}", join.field, join.alias)?;
        }
        write!(f, " WHERE {}", self.filter)
    }
}

/// Builds [`Specification`]s; scopes are join aliases (`None` is the root).
#[derive(Debug, Default)]
pub struct SpecificationBuilder {
    joins: Vec<JoinClause>,
}

impl SpecificationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<String> {
        None
    }

    pub fn finish(self, resource: impl Into<String>, filter: Filter) -> Specification {
        Specification {
            resource: resource.into(),
            joins: self.joins,
            filter,
        }
    }
}

impl PredicateFactory for SpecificationBuilder {
    type Predicate = Filter;
    type Scope = Option<String>;

    fn and(&mut self, filters: Vec<Filter>) -> Filter {
        Filter::And { filters }
    }

    fn or(&mut self, filters: Vec<Filter>) -> Filter {
        Filter::Or { filters }
    }

    fn not(&mut self, filter: Filter) -> Filter {
        Filter::Not {
            filter: Box::new(filter),
        }
    }

    fn equals(&mut self, scope: &Option<String>, field: &str, value: &Value) -> Filter {
        Filter::Equals {
            field: FieldRef {
                alias: scope.clone(),
                field: field.to_string(),
            },
            value: value.clone(),
        }
    }

    fn is_null(&mut self, scope: &Option<String>, field: &str) -> Filter {
        Filter::IsNull {
            field: FieldRef {
                alias: scope.clone(),
                field: field.to_string(),
            },
        }
    }

    fn join(&mut self, scope: &Option<String>, field: &str) -> Option<String> {
        let alias = format!("j{}", self.joins.len() + 1);
        self.joins.push(JoinClause {
            alias: alias.clone(),
            parent: scope.clone(),
            field: field.to_string(),
        });
        Some(alias)
    }
}
