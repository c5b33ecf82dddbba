//! Fluent assembly of criteria trees with operator precedence.
//!
//! The builder reads a token stream (`compare`, `and`, `or`, `not`, ...) and
//! assembles it the way an expression parser would: AND binds tighter than
//! OR, and NOT applies to the next criteria added.
//!
//! ```rust,ignore
//! // owner.id = 7 OR public = true AND archived = false
//! let criteria = CriteriaBuilder::new::<Document>()
//!     .compare("owner.id", Operation::Equals, 7)?
//!     .or()?
//!     .compare("public", Operation::Equals, true)?
//!     .and()?
//!     .compare("archived", Operation::Equals, false)?
//!     .build()?;
//! // => OR(owner.id = 7, AND(public = true, archived = false))
//! ```
//!
//! Nodes live in an arena while the tree is under construction. Open joins
//! are a stack of arena indices, innermost last, so the node that the next
//! criteria attaches to is always explicit.

use std::mem;

use super::{
    comparison::{Comparison, Operation},
    criteria::{Criteria, Join, JoinKind},
    error::CriteriaError,
    resource::{Resource, Schema},
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRef {
    Leaf(usize),
    Join(usize),
}

#[derive(Debug)]
struct JoinNode {
    kind: JoinKind,
    children: Vec<NodeRef>,
}

#[derive(Debug, Default)]
struct State {
    leaves: Vec<Criteria>,
    joins: Vec<JoinNode>,
    root: Option<NodeRef>,
    /// Indices into `joins`, innermost last.
    open: Vec<usize>,
    last: Option<NodeRef>,
    negate_next: bool,
}

/// Builds a verified [`Criteria`] for one resource type.
///
/// Not shareable across threads while building; `build` resets it for reuse.
#[derive(Debug)]
pub struct CriteriaBuilder {
    schema: &'static Schema,
    state: State,
}

impl CriteriaBuilder {
    pub fn new<R: Resource>() -> Self {
        Self::for_schema(R::schema())
    }

    pub fn for_schema(schema: &'static Schema) -> Self {
        Self {
            schema,
            state: State::default(),
        }
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    /// Append a criteria that matches everything.
    pub fn accept(&mut self) -> Result<&mut Self, CriteriaError> {
        self.add(Criteria::True)
    }

    /// Append a criteria that matches nothing.
    pub fn reject(&mut self) -> Result<&mut Self, CriteriaError> {
        self.add(Criteria::False)
    }

    /// Negate the next criteria added.
    pub fn not(&mut self) -> &mut Self {
        self.state.negate_next = true;
        self
    }

    pub fn compare(
        &mut self,
        field: &str,
        operation: Operation,
        value: impl Into<Value>,
    ) -> Result<&mut Self, CriteriaError> {
        let comparison = Comparison::new(self.schema, field, operation, value)?;
        self.add(comparison.into())
    }

    pub fn and(&mut self) -> Result<&mut Self, CriteriaError> {
        self.join(JoinKind::And)
    }

    pub fn or(&mut self) -> Result<&mut Self, CriteriaError> {
        self.join(JoinKind::Or)
    }

    /// Append a criteria to the innermost open join.
    ///
    /// The first criteria becomes the root; an un-negated AND/OR root stays
    /// open so later criteria append to it. Any later criteria needs an open
    /// join to attach to.
    pub fn add(&mut self, criteria: Criteria) -> Result<&mut Self, CriteriaError> {
        let negate = mem::take(&mut self.state.negate_next);
        let criteria = if negate { Criteria::not(criteria) } else { criteria };

        let state = &mut self.state;
        match (state.root, state.open.last().copied()) {
            (None, _) => {
                let node = match criteria {
                    Criteria::Join(join) => {
                        let kind = join.kind();
                        let children = join
                            .into_children()
                            .into_iter()
                            .map(|child| state.leaf(child))
                            .collect();
                        let id = state.join_node(kind, children);
                        state.open.push(id);
                        NodeRef::Join(id)
                    }
                    other => state.leaf(other),
                };
                state.root = Some(node);
                state.last = Some(node);
            }
            (Some(root), None) => {
                state.negate_next = negate;
                let inner = match criteria {
                    Criteria::Not(inner) if negate => *inner,
                    other => other,
                };
                return Err(CriteriaError::malformed(format!(
                    "Cannot add {inner} to {}",
                    state.render(root)
                )));
            }
            (Some(_), Some(top)) => {
                let node = state.leaf(criteria);
                state.joins[top].children.push(node);
                state.last = Some(node);
            }
        }

        Ok(self)
    }

    fn join(&mut self, kind: JoinKind) -> Result<&mut Self, CriteriaError> {
        let state = &mut self.state;
        let Some(last) = state.last else {
            return Err(CriteriaError::missing(format!(
                "{kind} needs an existing criteria to bind"
            )));
        };

        match state.open.last().copied() {
            None => state.wrap_root(kind)?,
            Some(top) if last == NodeRef::Join(top) => {
                return Err(CriteriaError::malformed(format!(
                    "Cannot bind {kind} to {}",
                    state.joins[top].kind
                )));
            }
            Some(top) => {
                let top_kind = state.joins[top].kind;
                if top_kind == kind {
                    // The next criteria appends to the open join.
                } else if kind.binds_tighter_than(top_kind) {
                    // `a OR b AND` takes `b` into a new AND under the OR.
                    let operand = state.joins[top].children.pop().ok_or_else(|| {
                        CriteriaError::missing(format!("{top_kind} has no criteria to bind {kind} to"))
                    })?;
                    let id = state.join_node(kind, vec![operand]);
                    state.joins[top].children.push(NodeRef::Join(id));
                    state.open.push(id);
                } else {
                    // `a AND b OR` closes every tighter join before widening.
                    while let Some(&open) = state.open.last() {
                        if !state.joins[open].kind.binds_tighter_than(kind) {
                            break;
                        }
                        state.open.pop();
                    }
                    if state.open.is_empty() {
                        state.wrap_root(kind)?;
                    }
                }
            }
        }

        state.last = state.open.last().map(|&id| NodeRef::Join(id));
        Ok(self)
    }

    /// Verify and return the finished tree, then reset the builder.
    ///
    /// On failure the builder keeps its state.
    pub fn build(&mut self) -> Result<Criteria, CriteriaError> {
        if self.state.negate_next {
            return Err(CriteriaError::missing(
                "A NOT criteria requires a child to invert",
            ));
        }
        let Some(root) = self.state.root else {
            return Err(CriteriaError::missing("There is no criteria to be built"));
        };

        let criteria = self.state.materialize(root);
        criteria.verify(self.schema)?;
        self.state = State::default();
        Ok(criteria)
    }
}

impl State {
    fn leaf(&mut self, criteria: Criteria) -> NodeRef {
        self.leaves.push(criteria);
        NodeRef::Leaf(self.leaves.len() - 1)
    }

    fn join_node(&mut self, kind: JoinKind, children: Vec<NodeRef>) -> usize {
        self.joins.push(JoinNode { kind, children });
        self.joins.len() - 1
    }

    /// Make a new join of `kind` the root, holding the old root.
    fn wrap_root(&mut self, kind: JoinKind) -> Result<(), CriteriaError> {
        let root = self.root.ok_or_else(|| {
            CriteriaError::missing(format!("{kind} needs an existing criteria to bind"))
        })?;
        let id = self.join_node(kind, vec![root]);
        self.root = Some(NodeRef::Join(id));
        self.open.clear();
        self.open.push(id);
        Ok(())
    }

    /// Copy a subtree out of the arena.
    fn materialize(&self, node: NodeRef) -> Criteria {
        match node {
            NodeRef::Leaf(id) => self.leaves[id].clone(),
            NodeRef::Join(id) => {
                let join = &self.joins[id];
                Criteria::Join(Join::new(
                    join.kind,
                    join.children.iter().map(|child| self.materialize(*child)).collect(),
                ))
            }
        }
    }

    fn render(&self, node: NodeRef) -> String {
        match node {
            NodeRef::Leaf(id) => self.leaves[id].to_string(),
            NodeRef::Join(id) => {
                let join = &self.joins[id];
                join.children
                    .iter()
                    .map(|child| self.render(*child))
                    .collect::<Vec<_>>()
                    .join(&format!(" {} ", join.kind))
            }
        }
    }
}
