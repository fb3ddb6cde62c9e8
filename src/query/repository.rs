//! Entity-level convenience API on top of [`SqlBuilder`].

use std::sync::Arc;

use super::builder::SqlBuilder;
use super::filter::Filter;
use super::statement::{Direction, Strategy};
use crate::driver::Driver;
use crate::entity::{EntityStorage, Record};
use crate::error::OrmError;
use crate::logger::LoggerAdapter;
use crate::value::{Value, ValueMap};

/// Shape of a `find*` query.
///
/// ```
/// use cheetah_orm::query::{Direction, FindOptions, Strategy};
///
/// let options = FindOptions::new()
///     .load(["addresses"])
///     .load_strategy(Strategy::Select)
///     .order_by("email", Direction::Desc)
///     .limit(10);
/// assert_eq!(options.load, vec!["addresses"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub fields: Option<Vec<String>>,
    pub load: Vec<String>,
    pub load_strategy: Strategy,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn load<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.load.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn load_strategy(mut self, strategy: Strategy) -> Self {
        self.load_strategy = strategy;
        self
    }

    pub fn order_by(mut self, path: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((path.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Finder and persistence methods for one entity.
#[derive(Clone)]
pub struct Repository {
    driver: Arc<dyn Driver>,
    storage: Arc<EntityStorage>,
    logger: Arc<dyn LoggerAdapter>,
    entity: String,
}

impl Repository {
    pub fn new(
        driver: Arc<dyn Driver>,
        storage: Arc<EntityStorage>,
        logger: Arc<dyn LoggerAdapter>,
        entity: &str,
    ) -> Result<Self, OrmError> {
        storage.require(entity)?;
        Ok(Self {
            driver,
            storage,
            logger,
            entity: entity.to_string(),
        })
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// A fresh builder for this entity.
    pub fn query_builder(&self) -> Result<SqlBuilder, OrmError> {
        SqlBuilder::new(
            Arc::clone(&self.driver),
            Arc::clone(&self.storage),
            Arc::clone(&self.logger),
            &self.entity,
        )
    }

    fn prepared(&self, filter: Filter, options: FindOptions) -> Result<SqlBuilder, OrmError> {
        let mut builder = self
            .query_builder()?
            .select(options.fields)
            .set_strategy(options.load_strategy)?
            .load(&options.load)?
            .filter(filter)?;
        for (path, direction) in options.order_by {
            builder = builder.order_by(path, direction);
        }
        if let Some(limit) = options.limit {
            builder = builder.limit(limit);
        }
        if let Some(offset) = options.offset {
            builder = builder.offset(offset);
        }
        Ok(builder)
    }

    pub fn find(&self, filter: Filter, options: FindOptions) -> Result<Vec<Record>, OrmError> {
        self.prepared(filter, options)?.execute_and_return_all()
    }

    pub fn find_one(&self, filter: Filter, options: FindOptions) -> Result<Option<Record>, OrmError> {
        self.prepared(filter, options)?.execute_and_return_first()
    }

    pub fn find_one_or_fail(&self, filter: Filter, options: FindOptions) -> Result<Record, OrmError> {
        self.prepared(filter, options)?.execute_and_return_first_or_fail()
    }

    pub fn find_all(&self, options: FindOptions) -> Result<Vec<Record>, OrmError> {
        self.find(Filter::new(), options)
    }

    /// Insert a row and return it as persisted, database-filled columns included.
    pub fn create(&self, values: ValueMap) -> Result<Record, OrmError> {
        self.query_builder()?
            .insert(values)
            .execute_and_return_first_or_fail()
    }

    /// Insert a fresh record, or update the changed fields of a loaded one.
    ///
    /// A loaded record without changes is left alone. The record is replaced by the
    /// persisted instance, hooks applied.
    pub fn save(&self, record: &mut Record) -> Result<(), OrmError> {
        if record.entity() != self.entity {
            return Err(OrmError::InvalidValue(format!(
                "{} record passed to the {} repository",
                record.entity(),
                self.entity
            )));
        }

        let mut builder = if record.is_persisted() {
            if !record.is_dirty() {
                return Ok(());
            }
            let descriptor = self.storage.require(&self.entity)?;
            let pk = descriptor
                .primary_key()
                .ok_or_else(|| OrmError::MissingPrimaryKey(descriptor.table_name()))?;
            let key = record
                .snapshot()
                .get(&pk.name)
                .cloned()
                .unwrap_or(Value::Null);
            self.query_builder()?
                .update_instance(record.clone())
                .filter(Filter::new().eq(pk.name.clone(), key))?
        } else {
            self.query_builder()?.insert_instance(record.clone())
        };

        let (_, instance) = builder.execute_instance()?;
        if let Some(instance) = instance {
            *record = instance;
        }
        Ok(())
    }

    pub fn delete(&self, filter: Filter) -> Result<(), OrmError> {
        self.query_builder()?.delete().filter(filter)?.execute()?;
        Ok(())
    }
}
