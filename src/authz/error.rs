//! Authorization errors.

use thiserror::Error;

use super::resource::FieldAccessError;

#[derive(Debug, Error)]
pub enum CriteriaError {
    /// The comparison operation is outside the supported set.
    #[error("Unrecognized operation: {0}")]
    UnrecognizedOperation(String),

    /// The criteria tree or one of its field paths is structurally wrong.
    #[error("Malformed criteria: {0}")]
    MalformedCriteria(String),

    /// A join, negation or build step has nothing to work on.
    #[error("Missing criteria: {0}")]
    MissingCriteria(String),

    #[error("Cannot register action: {0}")]
    RegisterAction(String),

    /// A criteria cannot be expressed in predicate form.
    #[error("Unsupported predicate: {0}")]
    UnsupportedPredicate(String),

    /// A field accessor failed while evaluating a criteria.
    #[error("Cannot retrieve {path}: {source}")]
    Access {
        path: String,
        #[source]
        source: FieldAccessError,
    },

    #[error("Access denied: {0}")]
    AccessDenied(String),
}

impl CriteriaError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedCriteria(reason.into())
    }

    pub fn missing(reason: impl Into<String>) -> Self {
        Self::MissingCriteria(reason.into())
    }

    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied(reason.into())
    }
}
