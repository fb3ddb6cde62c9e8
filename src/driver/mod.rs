//! Driver contract between the ORM core and a database.
//!
//! The core only ever produces SQL text. A [`Driver`] executes it, reports rows back as
//! [`Row`]s of [`Value`]s, reads live table snapshots for the differ, and exposes the
//! [`SqlDialect`] that turns statements and column diffs into dialect-specific SQL.

use std::time::{Duration, Instant};

use crate::error::DriverError;
use crate::query::statement::Statement;
use crate::schema::{ColDiff, ForeignKeyInfo, SnapshotTable};
use crate::value::Value;

#[cfg(feature = "mock")]
pub mod mock;
pub mod postgres;

pub use postgres::{PgDriver, PostgresDialect};

/// One result row: labels in select order, each with its decoded value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(label, value);
        self
    }

    pub fn push(&mut self, label: impl Into<String>, value: impl Into<Value>) {
        self.columns.push((label.into(), value.into()));
    }

    pub fn get(&self, label: &str) -> Option<&Value> {
        self.columns.iter().find(|(l, _)| l == label).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(l, v)| (l.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// What came back from one executed statement.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub rows: Vec<Row>,
    pub sql: String,
    pub started_at: Instant,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn new(sql: impl Into<String>, rows: Vec<Row>, started_at: Instant) -> Self {
        Self {
            rows,
            sql: sql.into(),
            started_at,
            elapsed: started_at.elapsed(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.as_millis()
    }
}

/// Wire-level access to one database.
///
/// Implementations must be safe to share between coroutines; the core holds them as
/// `Arc<dyn Driver>` and issues calls sequentially per unit of work.
pub trait Driver: Send + Sync {
    fn connect(&self) -> Result<(), DriverError>;

    fn disconnect(&self) -> Result<(), DriverError>;

    /// Run raw SQL and decode whatever rows it returns.
    fn execute_sql(&self, sql: &str) -> Result<ExecutionResult, DriverError>;

    /// Compile a statement with this driver's dialect and run it.
    fn execute_statement(&self, statement: &Statement) -> Result<ExecutionResult, DriverError> {
        let sql = self.dialect().compile_statement(statement);
        self.execute_sql(&sql)
    }

    /// Live description of `schema.table`, or `None` when the table does not exist.
    fn snapshot(&self, table: &str, schema: &str) -> Result<Option<SnapshotTable>, DriverError>;

    fn start_transaction(&self) -> Result<(), DriverError>;

    fn commit_transaction(&self) -> Result<(), DriverError>;

    fn rollback_transaction(&self) -> Result<(), DriverError>;

    fn dialect(&self) -> &dyn SqlDialect;
}

/// SQL text generation for one database flavour.
///
/// Every instruction is returned complete, terminated with `;` where it is DDL.
pub trait SqlDialect: Send + Sync {
    /// Render a statement as SQL text.
    fn compile_statement(&self, statement: &Statement) -> String;

    /// Inline literal for a value. All literal quoting goes through here.
    fn quote_value(&self, value: &Value) -> String {
        value.to_sql_literal()
    }

    /// Column type as it appears in DDL, length included.
    fn column_type(&self, schema: &str, table: &str, diff: &ColDiff) -> String;

    fn create_table(&self, schema: &str, table: &str, creates: &[ColDiff]) -> String;

    fn drop_table(&self, schema: &str, table: &str) -> String;

    /// `ALTER TABLE ... ADD COLUMN`, followed by the column's foreign keys.
    fn add_column(&self, schema: &str, table: &str, diff: &ColDiff) -> Vec<String>;

    fn drop_column(&self, schema: &str, table: &str, column: &str) -> String;

    fn alter_column_type(&self, schema: &str, table: &str, diff: &ColDiff) -> String;

    /// `SET DEFAULT` for `Some`, `DROP DEFAULT` for `None`.
    fn alter_column_default(&self, schema: &str, table: &str, column: &str, default: Option<&str>) -> String;

    fn add_primary_key(&self, schema: &str, table: &str, column: &str) -> String;

    fn drop_constraint(&self, schema: &str, table: &str, name: &str) -> String;

    fn add_unique(&self, schema: &str, table: &str, column: &str) -> String;

    fn drop_not_null(&self, schema: &str, table: &str, column: &str) -> String;

    fn set_not_null(&self, schema: &str, table: &str, column: &str) -> String;

    fn add_foreign_key(&self, schema: &str, table: &str, column: &str, fk: &ForeignKeyInfo) -> String;

    fn create_enum_type(&self, type_name: &str, items: &[String]) -> String;

    fn drop_enum_type(&self, type_name: &str) -> String;

    /// Replace an enum column's type with one carrying `items`, keeping stored labels.
    fn alter_enum(&self, schema: &str, table: &str, column: &str, type_name: &str, items: &[String]) -> String;

    fn create_index(&self, schema: &str, table: &str, name: &str, columns: &[String]) -> String;

    fn drop_index(&self, schema: &str, name: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup_keeps_order() {
        let row = Row::new().with("u1_id", 1).with("u1_email", "a@b.com");
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("u1_email"), Some(&Value::from("a@b.com")));
        let labels: Vec<&str> = row.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["u1_id", "u1_email"]);
        assert!(row.get("missing").is_none());
    }
}
