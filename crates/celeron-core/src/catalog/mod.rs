//! Model catalog.
//!
//! The catalog stores metadata about models, their columns and relations.

mod column;
mod model;
mod registry;
mod relation;
mod types;

pub use column::{ColumnDef, DefaultValue};
pub use model::{ModelDef, IMPLICIT_COLUMNS};
pub use registry::Registry;
pub use relation::{RelationDef, RelationKind};
pub use types::ColumnType;
