//! # Cheetah ORM
//!
//! Entity mapper, SQL statement compiler and schema migration engine for PostgreSQL,
//! running on the `may` coroutine runtime.
//!
//! - [`entity`]: entity descriptors, the [`EntityStorage`] registry and [`Record`]s
//! - [`query`]: the [`SqlBuilder`] statement compiler and [`Repository`] finders
//! - [`migration`]: schema diffing, migration files and the [`Migrator`]
//! - [`driver`]: the [`Driver`] contract, the Postgres driver and an in-memory mock

pub mod config;
pub mod connection;
pub mod driver;
pub mod entity;
pub mod error;
pub mod logger;
pub mod migration;
pub mod orm;
pub mod query;
pub mod schema;
pub mod transaction;
pub mod value;

pub use driver::{Driver, PgDriver, Row};
pub use entity::{EntityDescriptor, EntityStorage, PropertyDescriptor, Record, RelationDescriptor};
pub use error::{DriverError, OrmError};
pub use migration::{MigrationError, Migrator};
pub use orm::Orm;
pub use query::{Filter, FindOptions, Repository, SqlBuilder};
pub use value::{Value, ValueMap};
