pub mod compiler;
pub mod error;
pub mod params;
pub mod parser;
pub mod schema;
pub mod sql;
pub mod types;

pub use compiler::{compile, Comparison, CompiledPredicate, OrderColumn, Predicate};
pub use error::FilterError;
pub use params::ListParams;
pub use parser::parse;
pub use schema::{FieldSchema, FieldSpec, FieldType, OwnerPolicy, ParentLink, Related, TypedValue};
pub use types::*;
