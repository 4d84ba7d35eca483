//! Active-record data mapper.
//!
//! [`Orm`] carries the registry, connection, hooks and validation rules;
//! [`Model`] issues class-level queries and [`Record`] is one row.

mod hooks;
mod orm;
mod record;
mod validation;

pub use hooks::{Hook, HookPoint, HookRegistry};
pub use orm::{Model, Orm, Page};
pub use record::{Record, Related};
pub use validation::{Predicate, Rule, ValidationErrors, Validators};
