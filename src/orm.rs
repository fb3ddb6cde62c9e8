//! Entry point tying a driver, the entity registry and a logger together.

use std::sync::Arc;

use crate::config::OrmConfig;
use crate::connection::ConnectionError;
use crate::driver::{Driver, ExecutionResult, PgDriver};
use crate::entity::EntityStorage;
use crate::error::{DriverError, OrmError};
use crate::logger::{LogAdapter, LoggerAdapter};
use crate::query::{Repository, SqlBuilder};

/// Shared handle to one database and the entities mapped onto it.
///
/// Cloning is cheap; every clone talks to the same driver.
///
/// ```
/// use std::sync::Arc;
/// use cheetah_orm::driver::mock::MockDriver;
/// use cheetah_orm::entity::{ColumnType, EntityDescriptor, EntityStorage, PropertyDescriptor};
/// use cheetah_orm::query::{Filter, FindOptions};
/// use cheetah_orm::Orm;
///
/// let mut storage = EntityStorage::new();
/// storage.add(
///     EntityDescriptor::new("User").property(PropertyDescriptor::new("id", ColumnType::Int).primary()),
/// ).unwrap();
///
/// let orm = Orm::new(Arc::new(MockDriver::new()), storage);
/// orm.connect().unwrap();
/// let users = orm.repository("User").unwrap().find(Filter::new(), FindOptions::new()).unwrap();
/// assert!(users.is_empty());
/// ```
#[derive(Clone)]
pub struct Orm {
    driver: Arc<dyn Driver>,
    storage: Arc<EntityStorage>,
    logger: Arc<dyn LoggerAdapter>,
}

impl Orm {
    pub fn new(driver: Arc<dyn Driver>, storage: EntityStorage) -> Self {
        Self {
            driver,
            storage: Arc::new(storage),
            logger: Arc::new(LogAdapter),
        }
    }

    /// A Postgres-backed ORM for the `[database]` settings. Does not connect yet.
    pub fn from_config(config: &OrmConfig, storage: EntityStorage) -> Result<Self, ConnectionError> {
        let driver = PgDriver::from_settings(&config.database)?;
        Ok(Self::new(Arc::new(driver), storage))
    }

    pub fn with_logger(mut self, logger: Arc<dyn LoggerAdapter>) -> Self {
        self.logger = logger;
        self
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn storage(&self) -> &Arc<EntityStorage> {
        &self.storage
    }

    pub fn logger(&self) -> &Arc<dyn LoggerAdapter> {
        &self.logger
    }

    pub fn connect(&self) -> Result<(), DriverError> {
        self.driver.connect()?;
        self.logger.info("Database connected");
        Ok(())
    }

    pub fn disconnect(&self) -> Result<(), DriverError> {
        self.driver.disconnect()
    }

    pub fn create_query_builder(&self, entity: &str) -> Result<SqlBuilder, OrmError> {
        SqlBuilder::new(
            Arc::clone(&self.driver),
            Arc::clone(&self.storage),
            Arc::clone(&self.logger),
            entity,
        )
    }

    pub fn repository(&self, entity: &str) -> Result<Repository, OrmError> {
        Repository::new(
            Arc::clone(&self.driver),
            Arc::clone(&self.storage),
            Arc::clone(&self.logger),
            entity,
        )
    }

    /// Run raw SQL through the driver, logging it like compiled statements.
    pub fn execute_sql(&self, sql: &str) -> Result<ExecutionResult, DriverError> {
        let result = self.driver.execute_sql(sql)?;
        self.logger
            .debug(&format!("SQL: {} [{}ms]", result.sql, result.elapsed_ms()));
        Ok(result)
    }

    /// Run `f` inside a transaction: commit on `Ok`, rollback on `Err`.
    pub fn in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Orm) -> Result<T, E>,
        E: From<DriverError>,
    {
        crate::transaction::in_transaction(self.driver.as_ref(), || f(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::entity::{ColumnType, EntityDescriptor, PropertyDescriptor};
    use crate::logger::{LogLevel, MemoryLogger};
    use crate::value::ValueMap;

    fn orm(driver: &Arc<MockDriver>, logger: &Arc<MemoryLogger>) -> Orm {
        let mut storage = EntityStorage::new();
        storage
            .add(
                EntityDescriptor::new("User")
                    .property(PropertyDescriptor::new("id", ColumnType::Int).primary())
                    .property(PropertyDescriptor::new("email", ColumnType::Varchar)),
            )
            .unwrap();
        Orm::new(driver.clone(), storage).with_logger(logger.clone())
    }

    #[test]
    fn test_transaction_wraps_statements() {
        let driver = Arc::new(MockDriver::new());
        let logger = Arc::new(MemoryLogger::new());
        let orm = orm(&driver, &logger);

        let created = orm.in_transaction(|orm| {
            orm.repository("User")?
                .create(ValueMap::new().with("id", 1).with("email", "a@b.com"))
        });
        assert!(created.is_ok());
        let executed = driver.executed();
        assert_eq!(executed.first().map(String::as_str), Some("BEGIN"));
        assert_eq!(executed.last().map(String::as_str), Some("COMMIT"));
        assert_eq!(logger.messages(LogLevel::Debug).len(), 1);
    }

    #[test]
    fn test_unknown_entity_is_fatal() {
        let driver = Arc::new(MockDriver::new());
        let logger = Arc::new(MemoryLogger::new());
        let orm = orm(&driver, &logger);
        assert!(matches!(orm.create_query_builder("Ghost"), Err(OrmError::EntityNotFound(_))));
        assert!(matches!(orm.repository("Ghost"), Err(OrmError::EntityNotFound(_))));
    }

    #[test]
    fn test_from_config_composes_connection_string() {
        let mut config = OrmConfig::default();
        config.database.password = "secret".to_string();
        let orm = Orm::from_config(&config, EntityStorage::new()).unwrap();
        assert!(orm.storage().is_empty());
    }
}
