//! Boolean criteria over resources.
//!
//! A [`Criteria`] is evaluated two ways: interpreted against a live
//! resource with [`Criteria::matches`], or compiled into a query predicate
//! with [`Criteria::to_predicate`]. Every tree must pass
//! [`Criteria::verify`] for its resource type before it is evaluated;
//! [`CriteriaBuilder`](super::CriteriaBuilder) and
//! [`Capability`](super::Capability) both enforce this.

use std::fmt;

use super::{
    comparison::Comparison,
    error::CriteriaError,
    predicate::PredicateFactory,
    resource::{Resource, Schema},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// Matches everything; compiles to an empty AND.
    True,
    /// Matches nothing; compiles to an empty OR.
    False,
    Not(Box<Criteria>),
    Comparison(Comparison),
    Join(Join),
}

impl Criteria {
    pub fn not(child: Criteria) -> Self {
        Criteria::Not(Box::new(child))
    }

    pub fn and(children: Vec<Criteria>) -> Self {
        Criteria::Join(Join::new(JoinKind::And, children))
    }

    pub fn or(children: Vec<Criteria>) -> Self {
        Criteria::Join(Join::new(JoinKind::Or, children))
    }

    pub fn as_join(&self) -> Option<&Join> {
        match self {
            Criteria::Join(join) => Some(join),
            _ => None,
        }
    }

    /// Evaluate against a resource.
    ///
    /// Joins short-circuit: AND stops at the first false child, OR at the
    /// first true one. Later children are not evaluated.
    pub fn matches<R: Resource>(&self, object: &R) -> Result<bool, CriteriaError> {
        self.evaluate(object, R::schema())
    }

    pub(crate) fn evaluate(&self, object: &dyn Resource, schema: &Schema) -> Result<bool, CriteriaError> {
        match self {
            Criteria::True => Ok(true),
            Criteria::False => Ok(false),
            Criteria::Not(child) => Ok(!child.evaluate(object, schema)?),
            Criteria::Comparison(comparison) => comparison.matches(object, schema),
            Criteria::Join(join) => {
                for child in &join.children {
                    let matched = child.evaluate(object, schema)?;
                    match (join.kind, matched) {
                        (JoinKind::And, false) => return Ok(false),
                        (JoinKind::Or, true) => return Ok(true),
                        _ => {}
                    }
                }
                Ok(join.kind == JoinKind::And)
            }
        }
    }

    /// Check the tree's structure and field paths against a resource type.
    ///
    /// Fails fast on the first malformed node.
    pub fn verify(&self, schema: &Schema) -> Result<(), CriteriaError> {
        match self {
            Criteria::True | Criteria::False => Ok(()),
            Criteria::Not(child) => child.verify(schema),
            Criteria::Comparison(comparison) => comparison.verify(schema),
            Criteria::Join(join) => {
                if join.children.len() < 2 {
                    return Err(CriteriaError::missing(format!(
                        "{} requires at least two joined criteria",
                        join.kind
                    )));
                }
                join.children.iter().try_for_each(|child| child.verify(schema))
            }
        }
    }

    /// Compile into a predicate of the given backend, rooted at `scope`.
    pub fn to_predicate<F: PredicateFactory>(
        &self,
        factory: &mut F,
        scope: &F::Scope,
    ) -> Result<F::Predicate, CriteriaError> {
        match self {
            Criteria::True => Ok(factory.and(vec![])),
            Criteria::False => Ok(factory.or(vec![])),
            Criteria::Not(child) => {
                let inner = child.to_predicate(factory, scope)?;
                Ok(factory.not(inner))
            }
            Criteria::Comparison(comparison) => comparison.to_predicate(factory, scope),
            Criteria::Join(join) => {
                let predicates = join
                    .children
                    .iter()
                    .map(|child| child.to_predicate(factory, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match join.kind {
                    JoinKind::And => factory.and(predicates),
                    JoinKind::Or => factory.or(predicates),
                })
            }
        }
    }
}

impl From<Comparison> for Criteria {
    fn from(comparison: Comparison) -> Self {
        Criteria::Comparison(comparison)
    }
}

impl From<Join> for Criteria {
    fn from(join: Join) -> Self {
        Criteria::Join(join)
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criteria::True => f.write_str("TRUE"),
            Criteria::False => f.write_str("FALSE"),
            Criteria::Not(child) if child.as_join().is_some() => write!(f, "NOT ({child})"),
            Criteria::Not(child) => write!(f, "NOT {child}"),
            Criteria::Comparison(comparison) => write!(f, "{comparison}"),
            Criteria::Join(join) => write!(f, "{join}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    And,
    Or,
}

impl JoinKind {
    /// Lower binds tighter.
    pub fn priority(&self) -> u8 {
        match self {
            JoinKind::And => 1,
            JoinKind::Or => 2,
        }
    }

    pub fn binds_tighter_than(&self, other: JoinKind) -> bool {
        self.priority() < other.priority()
    }

    pub fn operator(&self) -> &'static str {
        match self {
            JoinKind::And => "AND",
            JoinKind::Or => "OR",
        }
    }
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operator())
    }
}

/// An AND or OR over an ordered list of children.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    kind: JoinKind,
    children: Vec<Criteria>,
}

impl Join {
    pub fn new(kind: JoinKind, children: Vec<Criteria>) -> Self {
        Self { kind, children }
    }

    pub fn empty(kind: JoinKind) -> Self {
        Self::new(kind, Vec::new())
    }

    pub fn kind(&self) -> JoinKind {
        self.kind
    }

    pub fn children(&self) -> &[Criteria] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn add(&mut self, criteria: Criteria) {
        self.children.push(criteria);
    }

    pub fn peek(&self) -> Result<&Criteria, CriteriaError> {
        self.children
            .last()
            .ok_or_else(|| CriteriaError::missing("There are no joined criteria"))
    }

    pub fn pop(&mut self) -> Result<Criteria, CriteriaError> {
        self.children
            .pop()
            .ok_or_else(|| CriteriaError::missing("There are no joined criteria"))
    }

    pub(crate) fn into_children(self) -> Vec<Criteria> {
        self.children
    }
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, child) in self.children.iter().enumerate() {
            if i > 0 {
                write!(f, " {} ", self.kind)?;
            }
            match child {
                Criteria::Join(_) => write!(f, "({child})")?,
                _ => write!(f, "{child}")?,
            }
        }
        Ok(())
    }
}
