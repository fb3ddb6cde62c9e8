//! In-memory driver for exercising the ORM without a database.
//!
//! [`MockDriver`] records every SQL string it is handed (transaction commands included,
//! as `BEGIN` / `COMMIT` / `ROLLBACK`), answers statements from a queue of canned row
//! sets, and serves snapshots registered up front.
//!
//! ```
//! use cheetah_orm::driver::mock::MockDriver;
//! use cheetah_orm::driver::{Driver, Row};
//!
//! let driver = MockDriver::new();
//! driver.push_rows(vec![Row::new().with("u1_id", 1)]);
//! let result = driver.execute_sql("SELECT 1").unwrap();
//! assert_eq!(result.rows.len(), 1);
//! assert_eq!(driver.executed(), vec!["SELECT 1"]);
//! ```

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::{Driver, ExecutionResult, PostgresDialect, Row, SqlDialect};
use crate::error::DriverError;
use crate::schema::SnapshotTable;

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    executed: Vec<String>,
    results: VecDeque<Vec<Row>>,
    snapshots: Vec<SnapshotTable>,
    failures: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MockDriver {
    state: Mutex<MockState>,
    dialect: PostgresDialect,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the rows returned by the next executed statement.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.state().results.push_back(rows);
    }

    /// Serve `table` from [`snapshot`](Driver::snapshot).
    pub fn add_snapshot(&self, table: SnapshotTable) {
        let mut state = self.state();
        state
            .snapshots
            .retain(|t| !(t.table_name == table.table_name && t.schema == table.schema));
        state.snapshots.push(table);
    }

    /// Fail every statement containing `fragment`.
    pub fn fail_when(&self, fragment: impl Into<String>) {
        self.state().failures.push(fragment.into());
    }

    /// Every SQL string received so far, oldest first.
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    pub fn last_sql(&self) -> Option<String> {
        self.state().executed.last().cloned()
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.executed.clear();
        state.results.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn record(&self, sql: &str) -> Result<Vec<Row>, DriverError> {
        let mut state = self.state();
        state.executed.push(sql.to_string());
        if state.failures.iter().any(|fragment| sql.contains(fragment.as_str())) {
            return Err(DriverError::Query(format!("forced failure: {sql}")));
        }
        Ok(state.results.pop_front().unwrap_or_default())
    }
}

impl Driver for MockDriver {
    fn connect(&self) -> Result<(), DriverError> {
        self.state().connected = true;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), DriverError> {
        self.state().connected = false;
        Ok(())
    }

    fn execute_sql(&self, sql: &str) -> Result<ExecutionResult, DriverError> {
        let started_at = Instant::now();
        let rows = self.record(sql)?;
        Ok(ExecutionResult::new(sql, rows, started_at))
    }

    fn snapshot(&self, table: &str, schema: &str) -> Result<Option<SnapshotTable>, DriverError> {
        Ok(self
            .state()
            .snapshots
            .iter()
            .find(|t| t.table_name == table && t.schema == schema)
            .cloned())
    }

    fn start_transaction(&self) -> Result<(), DriverError> {
        self.record("BEGIN").map(|_| ())
    }

    fn commit_transaction(&self) -> Result<(), DriverError> {
        self.record("COMMIT").map(|_| ())
    }

    fn rollback_transaction(&self) -> Result<(), DriverError> {
        self.record("ROLLBACK").map(|_| ())
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_are_replayed_in_order() {
        let driver = MockDriver::new();
        driver.push_rows(vec![Row::new().with("a", 1)]);
        driver.push_rows(vec![]);
        assert_eq!(driver.execute_sql("first").unwrap().rows.len(), 1);
        assert!(driver.execute_sql("second").unwrap().rows.is_empty());
        assert!(driver.execute_sql("third").unwrap().rows.is_empty());
        assert_eq!(driver.executed(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_forced_failure_is_still_recorded() {
        let driver = MockDriver::new();
        driver.fail_when("DROP");
        assert!(matches!(driver.execute_sql("DROP TABLE x"), Err(DriverError::Query(_))));
        assert_eq!(driver.last_sql().as_deref(), Some("DROP TABLE x"));
    }

    #[test]
    fn test_snapshots_by_schema_and_table() {
        let driver = MockDriver::new();
        driver.add_snapshot(SnapshotTable {
            table_name: "user".to_string(),
            schema: "public".to_string(),
            columns: vec![],
            indexes: vec![],
        });
        assert!(driver.snapshot("user", "public").unwrap().is_some());
        assert!(driver.snapshot("user", "audit").unwrap().is_none());
    }
}
