//! Statement building, execution and row mapping.
//!
//! - [`Filter`]: the structured `WHERE` language
//! - [`SqlBuilder`]: the fluent statement compiler
//! - [`Repository`]: `find` / `create` / `save` / `delete` for one entity

pub mod builder;
pub mod filter;
pub(crate) mod hydrate;
pub mod repository;
pub mod statement;

#[doc(inline)]
pub use builder::SqlBuilder;
#[doc(inline)]
pub use filter::{Condition, Filter, Op};
#[doc(inline)]
pub use repository::{FindOptions, Repository};
#[doc(inline)]
pub use statement::{
    flatten_order, Direction, JoinStatement, SelectJoin, Statement, StatementKind, Strategy,
};
