//! Migration state table management

use crate::driver::Driver;
use crate::migration::MigrationError;
use crate::value::Value;
use sea_query::{ColumnDef, Expr, Order, PostgresQueryBuilder, Query, Table};

/// Bookkeeping table holding one row per applied migration file
pub const STATE_TABLE: &str = "cheetah_migrations";
pub const FILE_COLUMN: &str = "migration_file";

/// `CREATE TABLE IF NOT EXISTS cheetah_migrations (migration_file varchar(255) PRIMARY KEY)`
pub fn create_state_table() -> String {
    Table::create()
        .table(STATE_TABLE)
        .if_not_exists()
        .col(
            ColumnDef::new(FILE_COLUMN)
                .string_len(255)
                .not_null()
                .primary_key(),
        )
        .build(PostgresQueryBuilder)
}

pub fn select_applied() -> String {
    Query::select()
        .column(FILE_COLUMN)
        .from(STATE_TABLE)
        .order_by(FILE_COLUMN, Order::Asc)
        .to_string(PostgresQueryBuilder)
}

pub fn insert_applied(file: &str) -> Result<String, MigrationError> {
    Ok(Query::insert()
        .into_table(STATE_TABLE)
        .columns([FILE_COLUMN])
        .values([Expr::val(file.to_string()).into()])
        .map_err(|e| MigrationError::InvalidFormat(format!("Invalid bookkeeping insert: {}", e)))?
        .to_string(PostgresQueryBuilder))
}

/// Create the bookkeeping table if it does not exist yet.
pub fn initialize_state_table(driver: &dyn Driver) -> Result<(), MigrationError> {
    driver.execute_sql(&create_state_table())?;
    Ok(())
}

/// Applied file names, sorted.
pub fn applied_migrations(driver: &dyn Driver) -> Result<Vec<String>, MigrationError> {
    let result = driver.execute_sql(&select_applied())?;
    Ok(result
        .rows
        .iter()
        .filter_map(|row| row.get(FILE_COLUMN).and_then(Value::as_str).map(str::to_string))
        .collect())
}

pub fn record_migration(driver: &dyn Driver, file: &str) -> Result<(), MigrationError> {
    driver.execute_sql(&insert_applied(file)?)?;
    Ok(())
}
