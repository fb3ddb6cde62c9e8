//! Schema migrations for registered entities
//!
//! This module provides:
//! - [`DiffCalculator`], comparing live tables with entity tables
//! - [`MigrationWriter`], rendering the resulting diffs as SQL
//! - [`Migrator`], writing migration files and applying pending ones
//! - the `cheetah_migrations` bookkeeping table
//!
//! # Example
//!
//! ```rust,no_run
//! use cheetah_orm::config::OrmConfig;
//! use cheetah_orm::entity::{ColumnType, EntityDescriptor, EntityStorage, PropertyDescriptor};
//! use cheetah_orm::migration::Migrator;
//!
//! let config = OrmConfig::load()?;
//! let mut storage = EntityStorage::new();
//! storage.add(
//!     EntityDescriptor::new("User")
//!         .property(PropertyDescriptor::new("id", ColumnType::Int).primary().auto_increment())
//!         .property(PropertyDescriptor::new("email", ColumnType::Varchar).unique()),
//! )?;
//!
//! let migrator = Migrator::from_config(&config, storage)?;
//! migrator.orm().connect()?;
//! migrator.create_migration(None)?;
//! migrator.migrate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod diff;
pub mod error;
pub mod file;
pub mod migrator;
pub mod state_table;
pub mod status;
pub mod writer;

pub use diff::DiffCalculator;
pub use error::MigrationError;
pub use file::{discover_migrations, split_statements, MigrationFile};
pub use migrator::Migrator;
pub use state_table::{initialize_state_table, STATE_TABLE};
pub use status::MigrationStatus;
pub use writer::MigrationWriter;
