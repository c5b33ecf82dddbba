//! Field comparisons: the leaf criteria.
//!
//! A comparison names a field path on its resource type, an operation and a
//! literal. Paths are `.`-separated; each segment is a field name, optionally
//! followed by `[n]` indexes, or a bare `[n]`. Walking a to-many relationship
//! with path left over fans out across every related resource and flattens
//! the results into a list, so `children.name` yields every child's name.
//! The rest of the path applies to each related resource on its own, so
//! `children.parent[0]` indexes a single parent and is rejected. Indexing a
//! value that is not a list leaves the value unchanged.
//!
//! Matching a list against a single literal is existential: `[1, 2, 3] = 2`
//! holds. Two lists compare structurally.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{
    error::CriteriaError,
    predicate::PredicateFactory,
    resource::{Field, Resource, Schema, Shape},
    value::Value,
};

/// Comparison operations.
///
/// Only `Equals` is evaluated; the others are reserved and rejected when a
/// comparison is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Equals)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Field(String),
    Index(usize),
}

/// Compares a field path on a resource to a literal.
#[derive(Debug, Clone)]
pub struct Comparison {
    schema: &'static Schema,
    field: String,
    path: Vec<Segment>,
    operation: Operation,
    value: Value,
}

impl Comparison {
    pub fn new(
        schema: &'static Schema,
        field: impl Into<String>,
        operation: Operation,
        value: impl Into<Value>,
    ) -> Result<Self, CriteriaError> {
        let field = field.into();
        if field.trim().is_empty() {
            return Err(CriteriaError::malformed(
                "A field name must be provided for the comparison",
            ));
        }
        if !operation.is_supported() {
            return Err(CriteriaError::UnrecognizedOperation(format!(
                "{operation:?} is not recognized"
            )));
        }
        let path = parse_path(&field)?;

        Ok(Self {
            schema,
            field,
            path,
            operation,
            value: value.into(),
        })
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub(crate) fn matches(&self, object: &dyn Resource, schema: &Schema) -> Result<bool, CriteriaError> {
        if !self.schema.is(schema) {
            return Err(CriteriaError::malformed(format!(
                "Cannot retrieve {} from a {schema}; it is not a {}",
                self.field, self.schema
            )));
        }
        let resolved = resolve(Node::One(object, self.schema), &self.path, &self.field)?;

        match self.operation {
            Operation::Equals => Ok(matches_equals(&resolved, &self.value)),
            other => Err(CriteriaError::UnrecognizedOperation(format!(
                "{other:?} is not recognized"
            ))),
        }
    }

    /// Check the field path against a resource type without an instance.
    pub(crate) fn verify(&self, schema: &Schema) -> Result<(), CriteriaError> {
        if !self.schema.is(schema) {
            return Err(CriteriaError::malformed(format!(
                "Cannot verify for {schema}; it is not a {}",
                self.schema
            )));
        }

        let mut state = TypeNode::One(self.schema);
        for segment in &self.path {
            state = match (state, segment) {
                (TypeNode::One(s) | TypeNode::Many(s), Segment::Field(name)) => {
                    let def = s.field(name).ok_or_else(|| {
                        CriteriaError::malformed(format!("Cannot find field {name} for {s}"))
                    })?;
                    match def.shape {
                        Shape::Value => TypeNode::Value,
                        Shape::One(target) => TypeNode::One(target()),
                        Shape::Many(target) => TypeNode::Many(target()),
                    }
                }
                (TypeNode::Many(s), Segment::Index(_)) => TypeNode::One(s),
                (TypeNode::Value, Segment::Index(_)) => TypeNode::Value,
                (TypeNode::One(s), Segment::Index(i)) => {
                    return Err(CriteriaError::malformed(format!(
                        "Cannot index [{i}] into a single {s} in {}",
                        self.field
                    )));
                }
                (TypeNode::Value, Segment::Field(name)) => {
                    return Err(CriteriaError::malformed(format!(
                        "Cannot find field {name} in {}; it follows a value field",
                        self.field
                    )));
                }
            };
        }

        match state {
            TypeNode::Value => Ok(()),
            TypeNode::One(s) | TypeNode::Many(s) => Err(CriteriaError::malformed(format!(
                "Field {} of {} refers to a {s}, not a value",
                self.field, self.schema
            ))),
        }
    }

    pub(crate) fn to_predicate<F: PredicateFactory>(
        &self,
        factory: &mut F,
        scope: &F::Scope,
    ) -> Result<F::Predicate, CriteriaError> {
        let Some((last, joins)) = self.path.split_last() else {
            return Err(CriteriaError::malformed("Empty field path"));
        };

        let mut schema = self.schema;
        let mut joined: Option<F::Scope> = None;
        for segment in joins {
            let Segment::Field(name) = segment else {
                return Err(self.unsupported_offset());
            };
            let def = schema.field(name).ok_or_else(|| {
                CriteriaError::malformed(format!("Cannot find field {name} for {schema}"))
            })?;
            let target = def.shape.target().ok_or_else(|| {
                CriteriaError::malformed(format!("Cannot join through value field {name}"))
            })?;
            let next = factory.join(joined.as_ref().unwrap_or(scope), def.name);
            joined = Some(next);
            schema = target;
        }

        let Segment::Field(name) = last else {
            return Err(self.unsupported_offset());
        };
        let def = schema.field(name).ok_or_else(|| {
            CriteriaError::malformed(format!("Cannot find field {name} for {schema}"))
        })?;
        let scope = joined.as_ref().unwrap_or(scope);

        match self.operation {
            Operation::Equals if self.value.is_null() => Ok(factory.is_null(scope, def.name)),
            Operation::Equals => Ok(factory.equals(scope, def.name, &self.value)),
            other => Err(CriteriaError::UnsupportedPredicate(format!(
                "{other:?} is not implemented"
            ))),
        }
    }

    fn unsupported_offset(&self) -> CriteriaError {
        CriteriaError::UnsupportedPredicate(format!(
            "Searching by offset is not supported for {}",
            self.field
        ))
    }
}

impl PartialEq for Comparison {
    fn eq(&self, other: &Self) -> bool {
        self.schema.is(other.schema)
            && self.field == other.field
            && self.operation == other.operation
            && self.value == other.value
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operation, self.value)
    }
}

fn matches_equals(field: &Value, value: &Value) -> bool {
    match (field, value) {
        (Value::Null, value) => value.is_null(),
        (Value::List(_), Value::List(_)) => field == value,
        (Value::List(items), value) => items.iter().any(|item| item == value),
        (field, value) => field == value,
    }
}

pub(crate) fn parse_path(field: &str) -> Result<Vec<Segment>, CriteriaError> {
    let mut segments = Vec::new();

    for part in field.split('.') {
        let part = part.trim();
        let (name, mut rest) = match part.find('[') {
            Some(open) => (&part[..open], &part[open..]),
            None => (part, ""),
        };
        if name.is_empty() && rest.is_empty() {
            return Err(CriteriaError::malformed(format!(
                "Empty segment in field path {field}"
            )));
        }
        if !name.is_empty() {
            segments.push(Segment::Field(name.to_string()));
        }

        while !rest.is_empty() {
            let index = rest
                .strip_prefix('[')
                .and_then(|r| r.split_once(']'))
                .and_then(|(digits, tail)| digits.trim().parse::<usize>().ok().map(|i| (i, tail)));
            let Some((index, tail)) = index else {
                return Err(CriteriaError::malformed(format!(
                    "Malformed index {rest} in field path {field}"
                )));
            };
            segments.push(Segment::Index(index));
            rest = tail;
        }
    }

    Ok(segments)
}

#[derive(Clone, Copy)]
enum TypeNode {
    One(&'static Schema),
    Many(&'static Schema),
    Value,
}

enum Node<'a> {
    One(&'a dyn Resource, &'static Schema),
    Many(Vec<&'a dyn Resource>, &'static Schema),
    Value(Value),
}

fn resolve(node: Node<'_>, segments: &[Segment], field: &str) -> Result<Value, CriteriaError> {
    let Some((segment, rest)) = segments.split_first() else {
        return match node {
            Node::Value(value) => Ok(value),
            Node::One(_, schema) | Node::Many(_, schema) => Err(CriteriaError::malformed(
                format!("Field {field} refers to a {schema}, not a value"),
            )),
        };
    };

    match (node, segment) {
        (Node::Value(Value::Null), _) => Ok(Value::Null),
        (Node::Value(Value::List(mut items)), Segment::Index(i)) => {
            if *i >= items.len() {
                return Err(out_of_bounds(field, *i, items.len()));
            }
            resolve(Node::Value(items.swap_remove(*i)), rest, field)
        }
        (Node::Value(value), Segment::Index(_)) => resolve(Node::Value(value), rest, field),
        (Node::Value(_), Segment::Field(name)) => Err(CriteriaError::malformed(format!(
            "Cannot find field {name} in {field}; it follows a value field"
        ))),
        (Node::One(_, schema), Segment::Index(i)) => Err(CriteriaError::malformed(format!(
            "Cannot index [{i}] into a single {schema} in {field}"
        ))),
        (Node::Many(items, schema), Segment::Index(i)) => match items.get(*i) {
            Some(item) => resolve(Node::One(*item, schema), rest, field),
            None => Err(out_of_bounds(field, *i, items.len())),
        },
        (Node::Many(items, schema), Segment::Field(_)) => {
            let mut values = Vec::new();
            for item in items {
                match resolve(Node::One(item, schema), segments, field)? {
                    Value::List(inner) => values.extend(inner),
                    value => values.push(value),
                }
            }
            Ok(Value::List(values))
        }
        (Node::One(object, schema), Segment::Field(name)) => {
            let def = schema.field(name).ok_or_else(|| {
                CriteriaError::malformed(format!("Cannot find field {name} for {schema}"))
            })?;
            let value = object.get(def.name).map_err(|source| CriteriaError::Access {
                path: format!("{schema}.{}", def.name),
                source,
            })?;
            let next = match (value, def.shape.target()) {
                (Field::Value(value), _) => Node::Value(value),
                (Field::One(None), _) => return Ok(Value::Null),
                (Field::One(Some(related)), Some(target)) => Node::One(related, target),
                (Field::Many(related), Some(target)) => Node::Many(related, target),
                (Field::One(_) | Field::Many(_), None) => {
                    return Err(CriteriaError::malformed(format!(
                        "Field {name} of {schema} is declared as a value but holds a resource"
                    )));
                }
            };
            resolve(next, rest, field)
        }
    }
}

fn out_of_bounds(field: &str, index: usize, len: usize) -> CriteriaError {
    CriteriaError::Access {
        path: field.to_string(),
        source: super::resource::FieldAccessError::failed(format!(
            "index {index} is out of bounds for {len} elements"
        )),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::tests::fixtures::{Child, Parent, child, parent};

    fn compare(field: &str, value: impl Into<Value>) -> Comparison {
        Comparison::new(Parent::schema(), field, Operation::Equals, value).unwrap()
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("children[1].name").unwrap(),
            vec![
                Segment::Field("children".into()),
                Segment::Index(1),
                Segment::Field("name".into()),
            ]
        );
        assert_eq!(
            parse_path("scores.[0]").unwrap(),
            vec![Segment::Field("scores".into()), Segment::Index(0)]
        );
        assert_eq!(
            parse_path("grid[1][2]").unwrap(),
            vec![
                Segment::Field("grid".into()),
                Segment::Index(1),
                Segment::Index(2)
            ]
        );
    }

    #[rstest]
    #[case("a..b")]
    #[case("a[x]")]
    #[case("a[1")]
    #[case("a[-1]")]
    #[case(".a")]
    fn test_parse_path_rejects(#[case] path: &str) {
        assert!(matches!(
            parse_path(path),
            Err(CriteriaError::MalformedCriteria(_))
        ));
    }

    #[test]
    fn test_empty_field_rejected_at_construction() {
        let err = Comparison::new(Parent::schema(), "  ", Operation::Equals, 1).unwrap_err();
        assert!(matches!(err, CriteriaError::MalformedCriteria(_)));
    }

    #[rstest]
    #[case(Operation::NotEquals)]
    #[case(Operation::LessThan)]
    #[case(Operation::GreaterThanOrEqual)]
    fn test_reserved_operations_rejected_at_construction(#[case] op: Operation) {
        let err = Comparison::new(Parent::schema(), "id", op, 1).unwrap_err();
        assert!(matches!(err, CriteriaError::UnrecognizedOperation(_)));
    }

    #[test]
    fn test_plain_equality() {
        let p = parent(7).with_label("alpha");
        assert!(compare("id", 7).matches(&p, Parent::schema()).unwrap());
        assert!(!compare("id", 8).matches(&p, Parent::schema()).unwrap());
        assert!(compare("label", "alpha").matches(&p, Parent::schema()).unwrap());
        assert!(compare("Label", "alpha").matches(&p, Parent::schema()).unwrap());
    }

    #[test]
    fn test_null_semantics() {
        let p = parent(1);
        assert!(compare("label", Value::Null).matches(&p, Parent::schema()).unwrap());
        assert!(!compare("label", "x").matches(&p, Parent::schema()).unwrap());
        assert!(!compare("id", Value::Null).matches(&p, Parent::schema()).unwrap());
    }

    #[rstest]
    #[case(2, true)]
    #[case(5, false)]
    fn test_list_field_existential(#[case] literal: i64, #[case] expected: bool) {
        let p = parent(1).with_scores(vec![1, 2, 3]);
        assert_eq!(
            compare("scores", literal).matches(&p, Parent::schema()).unwrap(),
            expected
        );
    }

    #[test]
    fn test_list_literal_compares_structurally() {
        let p = parent(1).with_scores(vec![1, 2, 3]);
        assert!(compare("scores", vec![1, 2, 3]).matches(&p, Parent::schema()).unwrap());
        assert!(!compare("scores", vec![1, 2]).matches(&p, Parent::schema()).unwrap());
    }

    #[test]
    fn test_index_segment() {
        let p = parent(1).with_scores(vec![4, 5, 6]);
        assert!(compare("scores[1]", 5).matches(&p, Parent::schema()).unwrap());
        assert!(!compare("scores[1]", 4).matches(&p, Parent::schema()).unwrap());

        let err = compare("scores[9]", 4).matches(&p, Parent::schema()).unwrap_err();
        assert!(matches!(err, CriteriaError::Access { .. }));
    }

    #[rstest]
    #[case("id[0]", Value::from(7), true)]
    #[case("id[0][1]", Value::from(7), true)]
    #[case("label[0]", Value::from("alpha"), true)]
    #[case("id[0]", Value::from(8), false)]
    fn test_index_on_non_list_keeps_value(
        #[case] field: &str,
        #[case] literal: Value,
        #[case] expected: bool,
    ) {
        let p = parent(7).with_label("alpha");
        let comparison = compare(field, literal);
        comparison.verify(Parent::schema()).unwrap();
        assert_eq!(comparison.matches(&p, Parent::schema()).unwrap(), expected);
    }

    #[test]
    fn test_index_after_fan_out_applies_per_item() {
        let p = parent(1).with_children(vec![
            child(10, "ann").with_tags(vec!["red", "blue"]),
            child(11, "bob").with_tags(vec!["green"]),
        ]);
        let first_tags = compare("children.tags[0]", "green");
        first_tags.verify(Parent::schema()).unwrap();
        assert!(first_tags.matches(&p, Parent::schema()).unwrap());
        assert!(!compare("children.tags[0]", "blue").matches(&p, Parent::schema()).unwrap());
    }

    #[test]
    fn test_fan_out_through_many() {
        let p = parent(1).with_children(vec![child(10, "ann"), child(11, "bob")]);
        assert!(compare("children.name", "bob").matches(&p, Parent::schema()).unwrap());
        assert!(!compare("children.name", "cat").matches(&p, Parent::schema()).unwrap());
        assert!(compare("children[0].name", "ann").matches(&p, Parent::schema()).unwrap());
        assert!(!compare("children[0].name", "bob").matches(&p, Parent::schema()).unwrap());
    }

    #[test]
    fn test_fan_out_flattens_nested_lists() {
        let p = parent(1).with_children(vec![
            child(10, "ann").with_tags(vec!["red", "blue"]),
            child(11, "bob").with_tags(vec!["green"]),
        ]);
        assert!(compare("children.tags", "green").matches(&p, Parent::schema()).unwrap());
        assert!(compare("children.tags", vec!["red", "blue", "green"])
            .matches(&p, Parent::schema())
            .unwrap());
    }

    #[test]
    fn test_absent_relationship_resolves_to_null() {
        let c = child(3, "orphan");
        let by_parent = Comparison::new(Child::schema(), "parent.id", Operation::Equals, 1).unwrap();
        assert!(!by_parent.matches(&c, Child::schema()).unwrap());

        let no_parent =
            Comparison::new(Child::schema(), "parent.id", Operation::Equals, Value::Null).unwrap();
        assert!(no_parent.matches(&c, Child::schema()).unwrap());
    }

    #[test]
    fn test_accessor_failure_is_wrapped() {
        let p = parent(1);
        let err = compare("secret", "x").matches(&p, Parent::schema()).unwrap_err();
        match err {
            CriteriaError::Access { path, .. } => assert_eq!(path, "Parent.secret"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_wrong_resource_type() {
        let c = child(1, "x");
        let err = compare("id", 1).matches(&c, Child::schema()).unwrap_err();
        assert!(matches!(err, CriteriaError::MalformedCriteria(_)));
    }

    #[rstest]
    #[case("id")]
    #[case("children.name")]
    #[case("children[0].parent.id")]
    #[case("scores[2]")]
    #[case("Children.Name")]
    fn test_verify_accepts(#[case] field: &str) {
        compare(field, 1).verify(Parent::schema()).unwrap();
    }

    #[rstest]
    #[case("nope")]
    #[case("children.nope")]
    #[case("id.name")]
    #[case("children")]
    #[case("label[0].x")]
    #[case("children.parent[0].id")]
    #[case("children[0].parent[0].id")]
    #[case("children[0][1].id")]
    fn test_verify_rejects(#[case] field: &str) {
        let err = compare(field, 1).verify(Parent::schema()).unwrap_err();
        assert!(matches!(err, CriteriaError::MalformedCriteria(_)), "{field}: {err}");
    }

    #[test]
    fn test_verify_rejects_other_type() {
        let err = compare("id", 1).verify(Child::schema()).unwrap_err();
        assert!(err.to_string().contains("Cannot verify for Child"));
    }

    #[test]
    fn test_display() {
        assert_eq!(compare("children.name", "bob").to_string(), "children.name = 'bob'");
    }
}
