//! Query building.
//!
//! The builders here are pure: they produce [`Statement`]s from conditions and
//! options and can be tested without a database.

pub mod builder;
mod options;

pub use builder::{JoinTable, Statement};
pub use options::{Conditions, Direction, QueryOptions, Search, SearchMode};
