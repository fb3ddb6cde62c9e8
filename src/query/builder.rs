//! Fluent statement compiler.
//!
//! A [`SqlBuilder`] is bound to one entity and one unit of work. Chain methods shape the
//! statement; a terminal (`execute*`) compiles it through the driver's dialect, runs it
//! and maps the rows back onto [`Record`]s.
//!
//! ```
//! use std::sync::Arc;
//! use cheetah_orm::driver::mock::MockDriver;
//! use cheetah_orm::entity::{ColumnType, EntityDescriptor, EntityStorage, PropertyDescriptor};
//! use cheetah_orm::logger::LogAdapter;
//! use cheetah_orm::query::{Filter, SqlBuilder};
//!
//! let mut storage = EntityStorage::new();
//! storage.add(
//!     EntityDescriptor::new("User")
//!         .property(PropertyDescriptor::new("id", ColumnType::Int).primary())
//!         .property(PropertyDescriptor::new("email", ColumnType::Varchar)),
//! ).unwrap();
//!
//! let driver = Arc::new(MockDriver::new());
//! let builder = SqlBuilder::new(driver.clone(), Arc::new(storage), Arc::new(LogAdapter), "User").unwrap();
//! builder.select(None).filter(Filter::new().eq("id", 1)).unwrap().execute().unwrap();
//! assert_eq!(
//!     driver.last_sql().unwrap(),
//!     r#"SELECT u1."id" as "u1_id", u1."email" as "u1_email" FROM "public"."user" u1 WHERE (u1.id = 1)"#
//! );
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use super::filter::{Condition, Filter, Op};
use super::hydrate::Hydrator;
use super::statement::{
    flatten_order, Direction, JoinStatement, SelectJoin, Statement, StatementKind, Strategy,
};
use crate::driver::{Driver, ExecutionResult};
use crate::entity::{EntityDescriptor, EntityStorage, HookPhase, Record, RelationDescriptor, RelationKind, Related};
use crate::error::{DriverError, OrmError};
use crate::logger::LoggerAdapter;
use crate::value::{Value, ValueMap};

pub struct SqlBuilder {
    driver: Arc<dyn Driver>,
    storage: Arc<EntityStorage>,
    logger: Arc<dyn LoggerAdapter>,
    entity: String,
    statement: Statement,
    strategy: Strategy,
    select_joins: Vec<SelectJoin>,
    aliases: HashSet<String>,
    fields: Option<Vec<String>>,
    order: Vec<(String, Direction)>,
    /// Field most recently named by a non-operator filter key
    last_key_not_operator: String,
    /// Record being inserted or updated
    pending: Option<Record>,
}

impl SqlBuilder {
    /// Builder for `entity`. The root table alias is allocated here.
    pub fn new(
        driver: Arc<dyn Driver>,
        storage: Arc<EntityStorage>,
        logger: Arc<dyn LoggerAdapter>,
        entity: &str,
    ) -> Result<Self, OrmError> {
        let descriptor = storage.require(entity)?;
        let table = descriptor.table_name();
        let schema = descriptor.schema.clone();

        let mut builder = Self {
            driver,
            storage: Arc::clone(&storage),
            logger,
            entity: entity.to_string(),
            statement: Statement::default(),
            strategy: Strategy::default(),
            select_joins: Vec::new(),
            aliases: HashSet::new(),
            fields: None,
            order: Vec::new(),
            last_key_not_operator: String::new(),
            pending: None,
        };
        let alias = builder.allocate_alias(&table);
        builder.statement = Statement::new(StatementKind::Select, schema, table, alias);
        Ok(builder)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn alias(&self) -> &str {
        &self.statement.alias
    }

    /// The statement as built so far.
    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Render the statement without running it.
    pub fn to_sql(mut self) -> Result<String, OrmError> {
        self.finalize()?;
        Ok(self.driver.dialect().compile_statement(&self.statement))
    }

    /// `SELECT` the given fields, or every column of the entity and its joins.
    ///
    /// Dotted fields (`address.city`) select from a loaded relation.
    pub fn select(mut self, fields: Option<Vec<String>>) -> Self {
        self.statement.kind = StatementKind::Select;
        self.fields = fields;
        self
    }

    /// `INSERT` a new row built from `values`.
    ///
    /// Defaults fill unset fields; `on_insert` and `on_update` providers always apply.
    pub fn insert(self, values: ValueMap) -> Self {
        let record = Record::with_values(self.entity.clone(), values);
        self.insert_instance(record)
    }

    /// `UPDATE` the filtered rows with `values` (plus `on_update` providers).
    pub fn update(self, values: ValueMap) -> Self {
        let mut record = Record::new(self.entity.clone());
        record.mark_persisted();
        for (field, value) in values {
            record.set(field, value);
        }
        self.update_instance(record)
    }

    pub fn delete(mut self) -> Self {
        self.statement.kind = StatementKind::Delete;
        self
    }

    pub(crate) fn insert_instance(mut self, mut record: Record) -> Self {
        self.statement.kind = StatementKind::Insert;
        if let Some(descriptor) = self.storage.get(&self.entity) {
            for property in &descriptor.properties {
                if record.get(&property.name).is_some() {
                    continue;
                }
                if let Some(value) = property.default.as_ref().and_then(|d| d.evaluate()) {
                    record.set(property.name.as_str(), value);
                }
            }
            for property in &descriptor.properties {
                if let Some(provider) = property.on_insert {
                    record.set(property.name.as_str(), provider());
                }
            }
            apply_on_update(descriptor, &mut record);
        }
        self.pending = Some(record);
        self
    }

    pub(crate) fn update_instance(mut self, mut record: Record) -> Self {
        self.statement.kind = StatementKind::Update;
        if let Some(descriptor) = self.storage.get(&self.entity) {
            apply_on_update(descriptor, &mut record);
        }
        self.pending = Some(record);
        self
    }

    /// How relations are fetched. Once a relation is loaded or filtered on, the
    /// strategy is fixed; switching it then is [`OrmError::InvalidQuery`].
    pub fn set_strategy(mut self, strategy: Strategy) -> Result<Self, OrmError> {
        let placed = !self.statement.joins.is_empty() || !self.select_joins.is_empty();
        if placed && strategy != self.strategy {
            return Err(OrmError::InvalidQuery(format!(
                "cannot switch to {strategy:?} loading after relations were added with {:?}",
                self.strategy
            )));
        }
        self.strategy = strategy;
        Ok(self)
    }

    /// Add a `WHERE` condition, `AND`ed with any earlier one. An empty filter is a no-op.
    pub fn filter(mut self, filter: Filter) -> Result<Self, OrmError> {
        if filter.is_empty() {
            return Ok(self);
        }
        let alias = self.statement.alias.clone();
        let entity = self.entity.clone();
        let compiled = self.compile_filter(&filter, &alias, &entity)?;
        if !compiled.is_empty() {
            self.statement.where_clause = Some(match self.statement.where_clause.take() {
                Some(existing) => format!("{existing} AND {compiled}"),
                None => compiled,
            });
        }
        Ok(self)
    }

    /// [`filter`](Self::filter) with the JSON form of a filter.
    pub fn filter_json(self, json: &serde_json::Value) -> Result<Self, OrmError> {
        let filter = Filter::from_json(json)?;
        self.filter(filter)
    }

    /// Order by a field; dotted paths order by a joined relation's column.
    pub fn order_by(mut self, path: impl Into<String>, direction: Direction) -> Self {
        self.order.push((path.into(), direction));
        self
    }

    /// Order by a nested map such as `{"name": "ASC", "address": {"city": "DESC"}}`.
    pub fn order_by_map(mut self, json: &serde_json::Value) -> Result<Self, OrmError> {
        self.order.extend(flatten_order(json)?);
        Ok(self)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.statement.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.statement.offset = Some(offset);
        self
    }

    /// Fetch relations along dotted paths (`"address.user"`), reusing shared prefixes.
    pub fn load<S: AsRef<str>>(mut self, paths: &[S]) -> Result<Self, OrmError> {
        for path in paths {
            self.resolve_path(path.as_ref())?;
        }
        Ok(self)
    }

    /// Run the statement and report what came back.
    pub fn execute(mut self) -> Result<ExecutionResult, OrmError> {
        let (result, _) = self.execute_instance()?;
        Ok(result)
    }

    /// First mapped record, if any. Selects are limited to one row.
    pub fn execute_and_return_first(mut self) -> Result<Option<Record>, OrmError> {
        if self.statement.kind == StatementKind::Select {
            self.statement.limit = Some(1);
        }
        Ok(self.execute_and_return_all()?.into_iter().next())
    }

    /// Like [`execute_and_return_first`](Self::execute_and_return_first), but an empty
    /// result is [`OrmError::NotFound`].
    pub fn execute_and_return_first_or_fail(self) -> Result<Record, OrmError> {
        self.execute_and_return_first()?.ok_or(OrmError::NotFound)
    }

    /// Every mapped record. Inserts and updates return the written instance.
    pub fn execute_and_return_all(mut self) -> Result<Vec<Record>, OrmError> {
        let (result, instance) = self.execute_instance()?;
        match self.statement.kind {
            StatementKind::Select => {
                let storage = Arc::clone(&self.storage);
                let hydrator = Hydrator::new(
                    &storage,
                    &self.statement.alias,
                    &self.entity,
                    &self.statement.joins,
                );
                let mut records = hydrator.map_rows(&result.rows)?;
                let root_alias = self.statement.alias.clone();
                self.resolve_select_joins(&mut records, &root_alias)?;
                Ok(records)
            }
            StatementKind::Insert | StatementKind::Update => Ok(instance.into_iter().collect()),
            StatementKind::Delete => Ok(Vec::new()),
        }
    }

    /// Run `f` with this builder inside a transaction; see
    /// [`transaction::in_transaction`](crate::transaction::in_transaction).
    pub fn in_transaction<T, E, F>(self, f: F) -> Result<T, E>
    where
        F: FnOnce(Self) -> Result<T, E>,
        E: From<DriverError>,
    {
        let driver = Arc::clone(&self.driver);
        crate::transaction::in_transaction(driver.as_ref(), || f(self))
    }

    /// Execute and hand back the written record for inserts and updates.
    pub(crate) fn execute_instance(&mut self) -> Result<(ExecutionResult, Option<Record>), OrmError> {
        self.finalize()?;
        let result = self.run(&self.statement)?;

        let storage = Arc::clone(&self.storage);
        let descriptor = storage.require(&self.entity)?;
        let instance = match (self.statement.kind, self.pending.take()) {
            (StatementKind::Insert, Some(mut record)) => {
                if let Some(row) = result.rows.first() {
                    let returned = Hydrator::new(&storage, &self.statement.alias, &self.entity, &[]).map_row(row)?;
                    for (field, value) in returned.values().iter() {
                        record.set(field, value.clone());
                    }
                }
                record.mark_persisted();
                run_hooks(descriptor, HookPhase::AfterCreate, &mut record);
                Some(record)
            }
            (StatementKind::Update, Some(mut record)) => {
                record.mark_persisted();
                run_hooks(descriptor, HookPhase::AfterUpdate, &mut record);
                Some(record)
            }
            _ => None,
        };
        Ok((result, instance))
    }

    fn run(&self, statement: &Statement) -> Result<ExecutionResult, OrmError> {
        let result = self.driver.execute_statement(statement)?;
        self.logger
            .debug(&format!("SQL: {} [{}ms]", result.sql, result.elapsed_ms()));
        Ok(result)
    }

    /// First letter of the table plus the first free counter for that letter.
    fn allocate_alias(&mut self, table: &str) -> String {
        let prefix = table
            .chars()
            .next()
            .filter(char::is_ascii_alphabetic)
            .map_or('t', |c| c.to_ascii_lowercase());
        let mut counter = 1;
        loop {
            let alias = format!("{prefix}{counter}");
            if self.aliases.insert(alias.clone()) {
                return alias;
            }
            counter += 1;
        }
    }

    /// Dotted relation path of the table behind `alias`; empty for the root.
    fn path_of(&self, alias: &str) -> String {
        self.statement
            .joins
            .iter()
            .find(|j| j.alias == alias)
            .map(|j| j.path.clone())
            .or_else(|| {
                self.select_joins
                    .iter()
                    .find(|j| j.alias == alias)
                    .map(|j| j.path.clone())
            })
            .unwrap_or_default()
    }

    fn is_select_join(&self, alias: &str) -> bool {
        self.select_joins.iter().any(|j| j.alias == alias)
    }

    /// Walk a dotted relation path from the root, joining as needed.
    /// Returns the alias and entity at the end of the path.
    fn resolve_path(&mut self, path: &str) -> Result<(String, String), OrmError> {
        let storage = Arc::clone(&self.storage);
        let mut alias = self.statement.alias.clone();
        let mut entity = self.entity.clone();
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            let owner = storage.require(&entity)?;
            let relation = owner.get_relation(segment).ok_or_else(|| OrmError::UnknownRelation {
                entity: entity.clone(),
                relation: segment.to_string(),
            })?;
            alias = self.ensure_join(&storage, owner, relation, &alias)?;
            entity = relation.target.clone();
        }
        Ok((alias, entity))
    }

    /// Alias of the join for `relation` hanging off `origin_alias`, creating it if needed.
    fn ensure_join(
        &mut self,
        storage: &EntityStorage,
        owner: &EntityDescriptor,
        relation: &RelationDescriptor,
        origin_alias: &str,
    ) -> Result<String, OrmError> {
        let same = |origin: &str, property: &str| origin == origin_alias && property == relation.property;
        if let Some(join) = self.statement.joins.iter().find(|j| same(&j.origin_alias, &j.property)) {
            return Ok(join.alias.clone());
        }
        if let Some(join) = self.select_joins.iter().find(|j| same(&j.origin_alias, &j.property)) {
            return Ok(join.alias.clone());
        }

        let target = storage.target(relation)?;
        let table = target.table_name();
        let fk_column = storage.fk_column(owner, relation)?;
        let parent_path = self.path_of(origin_alias);
        let path = if parent_path.is_empty() {
            relation.property.clone()
        } else {
            format!("{parent_path}.{}", relation.property)
        };
        let many = relation.kind == RelationKind::OneToMany;
        let owner_pk = || {
            owner
                .primary_key()
                .ok_or_else(|| OrmError::MissingPrimaryKey(owner.table_name()))
        };

        let alias = self.allocate_alias(&table);
        match self.strategy {
            Strategy::Joined => {
                let on = if many {
                    format!("{alias}.\"{fk_column}\" = {origin_alias}.\"{}\"", owner_pk()?.column_name)
                } else {
                    format!("{origin_alias}.\"{}\" = {alias}.\"{fk_column}\"", relation.column_name)
                };
                self.statement.joins.push(JoinStatement {
                    path,
                    origin_alias: origin_alias.to_string(),
                    property: relation.property.clone(),
                    entity: target.name.clone(),
                    schema: target.schema.clone(),
                    table,
                    alias: alias.clone(),
                    on,
                    many,
                });
            }
            Strategy::Select => {
                let child_key = storage.fk_key(owner, relation)?;
                let parent_key = if many {
                    owner_pk()?.name.clone()
                } else {
                    relation.property.clone()
                };
                self.select_joins.push(SelectJoin {
                    path,
                    origin_alias: origin_alias.to_string(),
                    property: relation.property.clone(),
                    entity: target.name.clone(),
                    schema: target.schema.clone(),
                    table,
                    alias: alias.clone(),
                    fields: Vec::new(),
                    where_clause: None,
                    match_column: fk_column,
                    parent_key,
                    child_key,
                    many,
                });
            }
        }
        Ok(alias)
    }

    /// Compile `filter` against the table behind `alias`.
    ///
    /// Entries are `AND`ed and wrapped in one pair of parentheses; an empty result
    /// means the filter contributed nothing to this table.
    fn compile_filter(&mut self, filter: &Filter, alias: &str, entity: &str) -> Result<String, OrmError> {
        let storage = Arc::clone(&self.storage);
        let descriptor = storage.require(entity)?;
        let mut parts = Vec::new();

        for (key, condition) in filter.entries() {
            if let Some(op) = Op::from_key(key) {
                parts.push(self.compile_top_operator(op, condition, alias, entity, descriptor)?);
                continue;
            }
            self.last_key_not_operator = key.to_string();

            if let Some(relation) = descriptor.get_relation(key) {
                match condition {
                    Condition::Nested(sub) => {
                        let join_alias = self.ensure_join(&storage, descriptor, relation, alias)?;
                        let compiled = self.compile_filter(sub, &join_alias, &relation.target)?;
                        if compiled.is_empty() {
                            continue;
                        }
                        if self.is_select_join(&join_alias) {
                            if let Some(join) = self.select_joins.iter_mut().find(|j| j.alias == join_alias) {
                                join.where_clause = Some(match join.where_clause.take() {
                                    Some(existing) => format!("{existing} AND {compiled}"),
                                    None => compiled,
                                });
                            }
                        } else {
                            parts.push(compiled);
                        }
                        continue;
                    }
                    Condition::Value(_) | Condition::List(_) if relation.kind == RelationKind::ManyToOne => {}
                    _ => {
                        return Err(OrmError::InvalidFilter(format!(
                            "relation '{key}' of {entity} expects a filter object"
                        )))
                    }
                }
            }

            let column = descriptor.require_column(key)?;
            match condition {
                Condition::Value(value) => parts.push(self.compare(alias, column, Op::Eq, value)),
                Condition::List(values) => parts.push(self.membership(alias, column, Op::In, values)),
                Condition::Nested(ops) => {
                    if let Some((unknown, _)) = ops.entries().find(|(k, _)| !Op::is_operator(k)) {
                        return Err(OrmError::InvalidFilter(format!(
                            "unknown operator '{unknown}' on {key}"
                        )));
                    }
                    for op in Op::ALL {
                        if let Some(operand) = ops.get(op.key()) {
                            parts.push(self.compile_operator(op, operand, alias, column, entity, key)?);
                        }
                    }
                }
                Condition::Group(_) => {
                    return Err(OrmError::InvalidFilter(format!(
                        "{key} cannot take a list of filters"
                    )))
                }
            }
        }

        parts.retain(|p| !p.is_empty());
        if parts.is_empty() {
            return Ok(String::new());
        }
        Ok(format!("({})", parts.join(" AND ")))
    }

    /// An operator used as a filter key.
    fn compile_top_operator(
        &mut self,
        op: Op,
        condition: &Condition,
        alias: &str,
        entity: &str,
        descriptor: &EntityDescriptor,
    ) -> Result<String, OrmError> {
        match (op, condition) {
            (Op::And | Op::Or, Condition::Group(filters)) => self.compile_group(op, filters, alias, entity),
            // `{"$eq": v}` binds to the field named most recently.
            (Op::Eq, Condition::Value(value)) if !self.last_key_not_operator.is_empty() => {
                let field = self.last_key_not_operator.clone();
                let column = descriptor.require_column(&field)?.to_string();
                Ok(self.compare(alias, &column, Op::Eq, value))
            }
            _ => Err(OrmError::InvalidFilter(format!(
                "operator {op} needs a field to apply to"
            ))),
        }
    }

    /// One operator of a field's operator map.
    fn compile_operator(
        &mut self,
        op: Op,
        operand: &Condition,
        alias: &str,
        column: &str,
        entity: &str,
        field: &str,
    ) -> Result<String, OrmError> {
        match (op, operand) {
            (Op::In | Op::Nin, Condition::List(values)) => Ok(self.membership(alias, column, op, values)),
            (Op::In | Op::Nin, Condition::Value(value)) => {
                Ok(self.membership(alias, column, op, std::slice::from_ref(value)))
            }
            (Op::And | Op::Or, Condition::Group(filters)) => {
                self.last_key_not_operator = field.to_string();
                self.compile_group(op, filters, alias, entity)
            }
            (Op::Eq | Op::Ne | Op::Like | Op::Gt | Op::Gte | Op::Lt | Op::Lte, Condition::Value(value)) => {
                Ok(self.compare(alias, column, op, value))
            }
            _ => Err(OrmError::InvalidFilter(format!(
                "operator {op} on {field} has an operand of the wrong shape"
            ))),
        }
    }

    fn compile_group(&mut self, op: Op, filters: &[Filter], alias: &str, entity: &str) -> Result<String, OrmError> {
        let mut compiled = Vec::with_capacity(filters.len());
        for filter in filters {
            let part = self.compile_filter(filter, alias, entity)?;
            if !part.is_empty() {
                compiled.push(part);
            }
        }
        if compiled.is_empty() {
            return Ok(String::new());
        }
        let glue = if op == Op::Or { " OR " } else { " AND " };
        Ok(format!("({})", compiled.join(glue)))
    }

    fn compare(&self, alias: &str, column: &str, op: Op, value: &Value) -> String {
        let sql_op = match op {
            Op::Eq if value.is_null() => return format!("{alias}.{column} IS NULL"),
            Op::Ne if value.is_null() => return format!("{alias}.{column} IS NOT NULL"),
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Like => "LIKE",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            _ => "<=",
        };
        let literal = self.driver.dialect().quote_value(value);
        format!("{alias}.{column} {sql_op} {literal}")
    }

    fn membership(&self, alias: &str, column: &str, op: Op, values: &[Value]) -> String {
        if values.is_empty() {
            return if op == Op::Nin { "TRUE" } else { "FALSE" }.to_string();
        }
        let dialect = self.driver.dialect();
        let list: Vec<String> = values.iter().map(|v| dialect.quote_value(v)).collect();
        let keyword = if op == Op::Nin { "NOT IN" } else { "IN" };
        format!("{alias}.{column} {keyword} ({})", list.join(", "))
    }

    /// Fill in columns, order and values right before execution.
    fn finalize(&mut self) -> Result<(), OrmError> {
        let storage = Arc::clone(&self.storage);
        let descriptor = storage.require(&self.entity)?;
        let alias = self.statement.alias.clone();

        match self.statement.kind {
            StatementKind::Select => {
                self.finalize_columns(&storage, descriptor, &alias)?;
                self.finalize_order()?;
            }
            StatementKind::Insert => {
                self.statement.columns = generated_columns(&alias, descriptor);
                if let Some(record) = self.pending.as_mut() {
                    run_hooks(descriptor, HookPhase::BeforeCreate, record);
                    let values = record.values().clone();
                    self.statement.values = write_values(descriptor, record, values)?;
                }
            }
            StatementKind::Update => {
                self.statement.columns.clear();
                if let Some(record) = self.pending.as_mut() {
                    run_hooks(descriptor, HookPhase::BeforeUpdate, record);
                    let changed = record.changed();
                    self.statement.values = write_values(descriptor, record, changed)?;
                }
            }
            StatementKind::Delete => self.statement.columns.clear(),
        }
        Ok(())
    }

    fn finalize_columns(
        &mut self,
        storage: &EntityStorage,
        descriptor: &EntityDescriptor,
        alias: &str,
    ) -> Result<(), OrmError> {
        let mut columns = Vec::new();
        match self.fields.take() {
            None => {
                columns.extend(generated_columns(alias, descriptor));
                for join in &self.statement.joins {
                    columns.extend(generated_columns(&join.alias, storage.require(&join.entity)?));
                }
            }
            Some(fields) => {
                for field in fields {
                    let (column_alias, entity, name) = match field.rsplit_once('.') {
                        None => (alias.to_string(), self.entity.clone(), field.clone()),
                        Some((prefix, name)) => {
                            let (join_alias, entity) = self.resolve_path(prefix)?;
                            (join_alias, entity, name.to_string())
                        }
                    };
                    let target = storage.require(&entity)?;
                    let column = target.require_column(&name)?;
                    if let Some(join) = self.select_joins.iter_mut().find(|j| j.alias == column_alias) {
                        join.fields.push(name);
                        continue;
                    }
                    columns.push(format!("{column_alias}.\"{column}\" as {column_alias}_{column}"));
                }
            }
        }

        // Follow-up queries need the parent keys, selected or not.
        for join in self.select_joins.iter().filter(|j| j.origin_alias == alias) {
            let column = descriptor.require_column(&join.parent_key)?;
            if !has_label(&columns, &format!("{alias}_{column}")) {
                columns.push(format!("{alias}.\"{column}\" as \"{alias}_{column}\""));
            }
        }
        self.statement.columns = columns;
        Ok(())
    }

    fn finalize_order(&mut self) -> Result<(), OrmError> {
        let order = std::mem::take(&mut self.order);
        let mut rendered = Vec::with_capacity(order.len());
        for (path, direction) in order {
            let (alias, entity, field) = match path.rsplit_once('.') {
                None => (self.statement.alias.clone(), self.entity.clone(), path.clone()),
                Some((prefix, field)) => {
                    let (alias, entity) = self.resolve_path(prefix)?;
                    if self.is_select_join(&alias) {
                        return Err(OrmError::JoinNotFound(path.clone()));
                    }
                    (alias, entity, field.to_string())
                }
            };
            let descriptor = self.storage.require(&entity)?;
            let column = descriptor.require_column(&field)?;
            rendered.push(format!("{alias}.\"{column}\" {}", direction.as_sql()));
        }
        self.statement.order_by = rendered;
        Ok(())
    }

    /// Run the follow-up queries of every select join hanging off `origin_alias` and
    /// attach the children to `parents`.
    fn resolve_select_joins(&self, parents: &mut [Record], origin_alias: &str) -> Result<(), OrmError> {
        let joins: Vec<&SelectJoin> = self
            .select_joins
            .iter()
            .filter(|j| j.origin_alias == origin_alias)
            .collect();

        for join in joins {
            let mut keys: Vec<Value> = Vec::new();
            for parent in parents.iter() {
                if let Some(key) = parent.get(&join.parent_key).filter(|v| !v.is_null()) {
                    if !keys.iter().any(|k| k.loosely_eq(key)) {
                        keys.push(key.clone());
                    }
                }
            }

            let mut children = if keys.is_empty() {
                Vec::new()
            } else {
                let statement = self.select_join_statement(join, &keys)?;
                let result = self.run(&statement)?;
                Hydrator::new(&self.storage, &join.alias, &join.entity, &[]).map_rows(&result.rows)?
            };
            self.resolve_select_joins(&mut children, &join.alias)?;

            for parent in parents.iter_mut() {
                let key = parent.get(&join.parent_key).cloned().unwrap_or(Value::Null);
                let matches = |child: &&Record| {
                    !key.is_null() && child.get(&join.child_key).is_some_and(|v| v.loosely_eq(&key))
                };
                if join.many {
                    let matched: Vec<Record> = children.iter().filter(matches).cloned().collect();
                    parent.set_relation(join.property.as_str(), Related::Many(matched));
                } else if let Some(child) = children.iter().find(matches) {
                    parent.set_relation(join.property.as_str(), Related::One(Box::new(child.clone())));
                }
            }
        }
        Ok(())
    }

    fn select_join_statement(&self, join: &SelectJoin, keys: &[Value]) -> Result<Statement, OrmError> {
        let target = self.storage.require(&join.entity)?;
        let mut columns: Vec<String> = if join.fields.is_empty() {
            target.selectable_columns().into_iter().map(str::to_string).collect()
        } else {
            join.fields
                .iter()
                .map(|f| target.require_column(f).map(str::to_string))
                .collect::<Result<_, _>>()?
        };
        let mut required = vec![join.match_column.clone()];
        for nested in self.select_joins.iter().filter(|j| j.origin_alias == join.alias) {
            required.push(target.require_column(&nested.parent_key)?.to_string());
        }
        for column in required {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }

        let alias = &join.alias;
        let mut statement = Statement::new(StatementKind::Select, &join.schema, &join.table, alias);
        statement.columns = columns
            .iter()
            .map(|c| format!("{alias}.\"{c}\" as \"{alias}_{c}\""))
            .collect();

        let dialect = self.driver.dialect();
        let list: Vec<String> = keys.iter().map(|k| dialect.quote_value(k)).collect();
        let in_clause = format!("{alias}.\"{}\" IN ({})", join.match_column, list.join(", "));
        statement.where_clause = Some(match &join.where_clause {
            Some(existing) => format!("{existing} AND {in_clause}"),
            None => in_clause,
        });
        Ok(statement)
    }
}

fn apply_on_update(descriptor: &EntityDescriptor, record: &mut Record) {
    for property in &descriptor.properties {
        if let Some(provider) = property.on_update {
            record.set(property.name.as_str(), provider());
        }
    }
}

fn run_hooks(descriptor: &EntityDescriptor, phase: HookPhase, record: &mut Record) {
    for hook in descriptor.hooks_for(phase) {
        log::trace!(target: "cheetah_orm", "running {:?} hook {} on {}", phase, hook.name, descriptor.name);
        (hook.callback)(record);
    }
}

/// `alias."column" as "alias_column"` for every selectable column.
fn generated_columns(alias: &str, descriptor: &EntityDescriptor) -> Vec<String> {
    descriptor
        .selectable_columns()
        .into_iter()
        .map(|c| format!("{alias}.\"{c}\" as \"{alias}_{c}\""))
        .collect()
}

fn has_label(columns: &[String], label: &str) -> bool {
    let quoted = format!(" as \"{label}\"");
    let bare = format!(" as {label}");
    columns.iter().any(|c| c.ends_with(&quoted) || c.ends_with(&bare))
}

/// Column-keyed payload for `fields`, validating value objects and writing the
/// normalized values back onto the record. One-to-many relation slots are skipped.
fn write_values(descriptor: &EntityDescriptor, record: &mut Record, fields: ValueMap) -> Result<ValueMap, OrmError> {
    let mut out = ValueMap::new();
    for (field, value) in fields {
        if descriptor
            .get_relation(&field)
            .is_some_and(|r| r.kind == RelationKind::OneToMany)
        {
            continue;
        }
        let value = match descriptor.get_property(&field).and_then(|p| p.value_object.as_ref()) {
            Some(handle) => {
                let normalized = handle.normalize(value)?;
                record.set(field.as_str(), normalized.clone());
                normalized
            }
            None => value,
        };
        let column = descriptor.require_column(&field)?.to_string();
        out.insert(column, value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::driver::Row;
    use crate::entity::{ColumnType, PropertyDescriptor};
    use crate::logger::MemoryLogger;

    fn storage() -> Arc<EntityStorage> {
        let mut storage = EntityStorage::new();
        storage
            .add(
                EntityDescriptor::new("User")
                    .property(PropertyDescriptor::new("id", ColumnType::Int).primary())
                    .property(PropertyDescriptor::new("email", ColumnType::Varchar))
                    .relation(RelationDescriptor::one_to_many("address", "Address", "user")),
            )
            .unwrap();
        storage
            .add(
                EntityDescriptor::new("Address")
                    .property(PropertyDescriptor::new("id", ColumnType::Int).primary())
                    .relation(RelationDescriptor::many_to_one("user", "User").column("user_owner")),
            )
            .unwrap();
        Arc::new(storage)
    }

    fn builder(driver: &Arc<MockDriver>) -> SqlBuilder {
        SqlBuilder::new(driver.clone(), storage(), Arc::new(MemoryLogger::new()), "User").unwrap()
    }

    fn where_of(filter: serde_json::Value) -> String {
        let driver = Arc::new(MockDriver::new());
        builder(&driver)
            .filter_json(&filter)
            .unwrap()
            .statement()
            .where_clause
            .clone()
            .unwrap_or_default()
    }

    #[test]
    fn test_alias_counter_per_letter() {
        let driver = Arc::new(MockDriver::new());
        let mut b = builder(&driver);
        assert_eq!(b.alias(), "u1");
        assert_eq!(b.allocate_alias("user"), "u2");
        assert_eq!(b.allocate_alias("address"), "a1");
        assert_eq!(b.allocate_alias("_hidden"), "t1");
    }

    #[test]
    fn test_range_operators() {
        assert_eq!(
            where_of(serde_json::json!({"id": {"$gte": 1, "$lte": 1}})),
            "(u1.id >= 1 AND u1.id <= 1)"
        );
    }

    #[test]
    fn test_list_operators() {
        assert_eq!(where_of(serde_json::json!({"id": [1, 2]})), "(u1.id IN (1, 2))");
        assert_eq!(where_of(serde_json::json!({"id": {"$nin": [2]}})), "(u1.id NOT IN (2))");
    }

    #[test]
    fn test_logical_groups() {
        assert_eq!(
            where_of(serde_json::json!({"$or": [{"id": 1}, {"email": "x"}]})),
            "(((u1.id = 1) OR (u1.email = 'x')))"
        );
        assert_eq!(where_of(serde_json::json!({"$and": [{"id": 1}]})), "(((u1.id = 1)))");
    }

    #[test]
    fn test_null_comparisons() {
        assert_eq!(where_of(serde_json::json!({"email": null})), "(u1.email IS NULL)");
        assert_eq!(
            where_of(serde_json::json!({"email": {"$ne": null}})),
            "(u1.email IS NOT NULL)"
        );
    }

    #[test]
    fn test_eq_binds_to_last_field() {
        assert_eq!(
            where_of(serde_json::json!({"id": {"$or": [{"$eq": 1}, {"$eq": 2}]}})),
            "(((u1.id = 1) OR (u1.id = 2)))"
        );
    }

    #[test]
    fn test_invalid_filters() {
        let driver = Arc::new(MockDriver::new());
        let err = builder(&driver)
            .filter_json(&serde_json::json!({"id": {"$between": 1}}))
            .err()
            .unwrap();
        assert!(matches!(err, OrmError::InvalidFilter(_)));

        let err = builder(&driver)
            .filter_json(&serde_json::json!({"$gt": 1}))
            .err()
            .unwrap();
        assert!(matches!(err, OrmError::InvalidFilter(_)));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let driver = Arc::new(MockDriver::new());
        let err = builder(&driver)
            .filter_json(&serde_json::json!({"id = id OR 1=1 --": 1}))
            .err()
            .unwrap();
        assert!(matches!(err, OrmError::UnknownProperty { ref field, .. } if field == "id = id OR 1=1 --"));

        let err = builder(&driver)
            .filter_json(&serde_json::json!({"nickname": {"$gt": 1}}))
            .err()
            .unwrap();
        assert!(matches!(err, OrmError::UnknownProperty { .. }));

        let err = builder(&driver)
            .select(None)
            .order_by("email DESC, (SELECT 1)", Direction::Asc)
            .to_sql()
            .unwrap_err();
        assert!(matches!(err, OrmError::UnknownProperty { ref entity, .. } if entity == "User"));

        let err = builder(&driver)
            .select(Some(vec!["id".to_string(), "address.zip".to_string()]))
            .to_sql()
            .unwrap_err();
        assert!(matches!(err, OrmError::UnknownProperty { ref entity, .. } if entity == "Address"));

        let err = builder(&driver)
            .insert(ValueMap::new().with("email", "a@b.com").with("nickname", "ana"))
            .execute()
            .unwrap_err();
        assert!(matches!(err, OrmError::UnknownProperty { .. }));
        assert!(driver.executed().is_empty());
    }

    #[test]
    fn test_strategy_fixed_once_relations_exist() {
        let driver = Arc::new(MockDriver::new());
        let err = builder(&driver)
            .load(&["address"])
            .unwrap()
            .set_strategy(Strategy::Select)
            .err()
            .unwrap();
        assert!(matches!(err, OrmError::InvalidQuery(_)));

        let b = builder(&driver)
            .set_strategy(Strategy::Select)
            .unwrap()
            .load(&["address"])
            .unwrap()
            .set_strategy(Strategy::Select)
            .unwrap();
        assert!(b.statement().joins.is_empty());
        assert_eq!(b.strategy(), Strategy::Select);
    }

    #[test]
    fn test_relation_filter_adds_join() {
        let driver = Arc::new(MockDriver::new());
        let sql = builder(&driver)
            .select(Some(vec!["id".to_string(), "address.id".to_string()]))
            .filter_json(&serde_json::json!({"address": {"id": 1}}))
            .unwrap()
            .limit(1)
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            r#"SELECT u1."id" as u1_id, a1."id" as a1_id FROM "public"."user" u1 LEFT JOIN "public"."address" a1 ON a1."user_owner" = u1."id" WHERE ((a1.id = 1)) LIMIT 1"#
        );
    }

    #[test]
    fn test_load_reuses_joins() {
        let driver = Arc::new(MockDriver::new());
        let b = builder(&driver).load(&["address", "address.user"]).unwrap();
        let aliases: Vec<&str> = b.statement().joins.iter().map(|j| j.alias.as_str()).collect();
        assert_eq!(aliases, vec!["a1", "u2"]);
        assert_eq!(b.statement().joins[1].path, "address.user");
        assert_eq!(b.statement().joins[1].on, r#"a1."user_owner" = u2."id""#);

        let err = builder(&driver).load(&["posts"]).err().unwrap();
        assert!(matches!(err, OrmError::UnknownRelation { .. }));
    }

    #[test]
    fn test_order_and_paging() {
        let driver = Arc::new(MockDriver::new());
        let sql = builder(&driver)
            .select(None)
            .order_by("id", Direction::Asc)
            .offset(1)
            .limit(1)
            .to_sql()
            .unwrap();
        assert!(sql.ends_with(r#"ORDER BY u1."id" ASC OFFSET 1 LIMIT 1"#));
    }

    #[test]
    fn test_execute_logs_sql() {
        let driver = Arc::new(MockDriver::new());
        let logger = Arc::new(MemoryLogger::new());
        let b = SqlBuilder::new(driver.clone(), storage(), logger.clone(), "User").unwrap();
        b.delete().filter(Filter::new().eq("id", 3)).unwrap().execute().unwrap();
        let logged = logger.messages(crate::logger::LogLevel::Debug);
        assert_eq!(logged.len(), 1);
        assert!(logged[0].starts_with(r#"SQL: DELETE FROM "public"."user" u1 WHERE (u1.id = 3) ["#));
    }

    #[test]
    fn test_insert_merges_returned_row() {
        let driver = Arc::new(MockDriver::new());
        driver.push_rows(vec![Row::new().with("u1_id", 9).with("u1_email", "a@b.com")]);
        let record = builder(&driver)
            .insert(ValueMap::new().with("email", "a@b.com"))
            .execute_and_return_first_or_fail()
            .unwrap();
        assert_eq!(record.get("id"), Some(&Value::Int(9)));
        assert!(record.is_persisted());
        assert!(!record.is_dirty());
    }

    #[test]
    fn test_missing_entity() {
        let driver = Arc::new(MockDriver::new());
        let err = SqlBuilder::new(driver, storage(), Arc::new(MemoryLogger::new()), "Ghost")
            .err()
            .unwrap();
        assert!(matches!(err, OrmError::EntityNotFound(_)));
    }
}
