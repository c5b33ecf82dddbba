//! Resource types and their field accessor tables.
//!
//! A resource type describes itself once through a static [`Schema`]: its
//! name and the fields a criteria may walk. Instances expose field values
//! through [`Resource::get`]. Criteria verify field paths against the schema
//! and read values through `get` at evaluation time.
//!
//! ```rust,ignore
//! static DOCUMENT: Schema = Schema::new(
//!     "Document",
//!     &[
//!         FieldDef::value("id"),
//!         FieldDef::one("owner", User::schema),
//!         FieldDef::many("tags", Tag::schema),
//!     ],
//! );
//!
//! impl Resource for Document {
//!     fn schema() -> &'static Schema {
//!         &DOCUMENT
//!     }
//!
//!     fn get(&self, field: &str) -> Result<Field<'_>, FieldAccessError> {
//!         match field {
//!             "id" => Ok(Field::Value(self.id.into())),
//!             "owner" => Ok(Field::One(self.owner.as_ref().map(|o| o as &dyn Resource))),
//!             "tags" => Ok(Field::many(&self.tags)),
//!             _ => Err(FieldAccessError::unknown(field)),
//!         }
//!     }
//! }
//! ```

use std::{collections::BTreeMap, fmt};

use thiserror::Error;

use super::value::Value;

/// A type whose instances can be checked against criteria.
pub trait Resource: Send + Sync + fmt::Debug {
    /// The accessor table for this type.
    fn schema() -> &'static Schema
    where
        Self: Sized;

    /// Read a field by its canonical (schema) name.
    fn get(&self, field: &str) -> Result<Field<'_>, FieldAccessError>;
}

/// The value of a single field on a resource instance.
#[derive(Debug)]
pub enum Field<'a> {
    Value(Value),
    /// A to-one relationship; `None` when unset.
    One(Option<&'a dyn Resource>),
    /// A to-many relationship.
    Many(Vec<&'a dyn Resource>),
}

impl<'a> Field<'a> {
    /// Build a to-many field from a slice of resources.
    pub fn many<R: Resource>(items: &'a [R]) -> Self {
        Field::Many(items.iter().map(|r| r as &dyn Resource).collect())
    }

    /// Build a to-one field from an optional resource.
    pub fn one<R: Resource>(item: Option<&'a R>) -> Self {
        Field::One(item.map(|r| r as &dyn Resource))
    }
}

#[derive(Debug, Error)]
pub enum FieldAccessError {
    #[error("no field named '{0}'")]
    Unknown(String),

    #[error("{0}")]
    Failed(String),
}

impl FieldAccessError {
    pub fn unknown(field: impl Into<String>) -> Self {
        Self::Unknown(field.into())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// What a field holds, at the type level.
#[derive(Clone, Copy)]
pub enum Shape {
    /// A literal value or a list of literal values.
    Value,
    /// A to-one relationship to another resource type.
    One(fn() -> &'static Schema),
    /// A to-many relationship to another resource type.
    Many(fn() -> &'static Schema),
}

impl Shape {
    /// The related schema, for relationship fields.
    pub fn target(&self) -> Option<&'static Schema> {
        match self {
            Shape::Value => None,
            Shape::One(schema) | Shape::Many(schema) => Some(schema()),
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Value => write!(f, "Value"),
            Shape::One(schema) => write!(f, "One({})", schema().name),
            Shape::Many(schema) => write!(f, "Many({})", schema().name),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub shape: Shape,
}

impl FieldDef {
    pub const fn value(name: &'static str) -> Self {
        Self {
            name,
            shape: Shape::Value,
        }
    }

    pub const fn one(name: &'static str, target: fn() -> &'static Schema) -> Self {
        Self {
            name,
            shape: Shape::One(target),
        }
    }

    pub const fn many(name: &'static str, target: fn() -> &'static Schema) -> Self {
        Self {
            name,
            shape: Shape::Many(target),
        }
    }
}

/// The accessor table of a resource type.
#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [FieldDef],
}

impl Schema {
    pub const fn new(name: &'static str, fields: &'static [FieldDef]) -> Self {
        Self { name, fields }
    }

    /// Find a field by name.
    ///
    /// The exact name is tried first, then the name with the case of its
    /// first letter flipped (`Name` finds `name`).
    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        if let Some(def) = self.fields.iter().find(|f| f.name == name) {
            return Some(def);
        }
        let flipped = flip_first(name)?;
        self.fields.iter().find(|f| f.name == flipped)
    }

    /// Two schemas describe the same type when their names match.
    pub fn is(&self, other: &Schema) -> bool {
        std::ptr::eq(self, other) || self.name == other.name
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

fn flip_first(name: &str) -> Option<String> {
    let mut chars = name.chars();
    let first = chars.next()?;
    let flipped: String = if first.is_uppercase() {
        first.to_lowercase().collect()
    } else {
        first.to_uppercase().collect()
    };
    Some(flipped + chars.as_str())
}

/// Resource schemas addressable by name.
///
/// Policy files name resource types as strings; the catalog maps those
/// names back to the accessor tables registered by the application.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    schemas: BTreeMap<&'static str, &'static Schema>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R: Resource>(mut self) -> Self {
        self.register::<R>();
        self
    }

    pub fn register<R: Resource>(&mut self) {
        self.register_schema(R::schema());
    }

    pub fn register_schema(&mut self, schema: &'static Schema) {
        self.schemas.insert(schema.name, schema);
    }

    pub fn get(&self, name: &str) -> Option<&'static Schema> {
        self.schemas.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.schemas.keys().copied()
    }
}
