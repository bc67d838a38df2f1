use thiserror::Error;

use super::types::FilterOp;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Malformed parameter name, operator suffix, group syntax or paging value.
    #[error("Invalid filter syntax in '{param}': {reason}")]
    Syntax { param: String, reason: String },

    #[error("Filter too complex: {0}")]
    TooComplex(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Operator '{op}' is not allowed on field '{field}'")]
    OperatorNotAllowed { field: String, op: FilterOp },

    #[error("Value '{value}' for field '{field}' is not a valid {expected}")]
    TypeMismatch {
        field: String,
        expected: String,
        value: String,
    },
}

impl FilterError {
    pub fn syntax(param: impl Into<String>, reason: impl Into<String>) -> Self {
        FilterError::Syntax {
            param: param.into(),
            reason: reason.into(),
        }
    }

    /// The client-supplied field this error refers to, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            FilterError::UnknownField(field)
            | FilterError::OperatorNotAllowed { field, .. }
            | FilterError::TypeMismatch { field, .. } => Some(field),
            FilterError::Syntax { .. } | FilterError::TooComplex(_) => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.field().is_some()
    }
}
