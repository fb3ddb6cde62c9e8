//! Dialect-neutral table descriptions used for diffing.
//!
//! A [`SnapshotTable`] is produced either from registered entities
//! ([`EntityStorage::snapshot`](crate::entity::EntityStorage::snapshot)) or from a live
//! database ([`Driver::snapshot`](crate::driver::Driver::snapshot)). The differ turns two
//! lists of them into [`TableDiff`]s.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTable {
    pub table_name: String,
    pub schema: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
}

impl SnapshotTable {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// SQL type as Postgres reports it (`character varying`, `numeric`, `USER-DEFINED`, ...)
    pub col_type: String,
    pub length: Option<u32>,
    pub scale: Option<u32>,
    pub nullable: bool,
    /// Default as a SQL expression
    pub default: Option<String>,
    pub primary: bool,
    /// `None` means the column never declared uniqueness either way
    pub unique: Option<bool>,
    pub auto_increment: bool,
    pub enum_items: Option<Vec<String>>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub referenced_table_name: String,
    pub referenced_column_name: String,
}

impl ForeignKeyInfo {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            referenced_table_name: table.into(),
            referenced_column_name: column.into(),
        }
    }

    pub(crate) fn key(&self) -> String {
        format!("{}.{}", self.referenced_table_name, self.referenced_column_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub table: String,
    pub index_name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlAction {
    Create,
    Delete,
    Alter,
    Index,
}

/// One index to create (`properties` set) or drop (`properties` empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexTable {
    pub name: String,
    pub properties: Option<Vec<String>>,
}

/// Requested column attribute changes. Only the `Some` fields apply.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColChanges {
    /// `Some(None)` drops the default
    pub default: Option<Option<String>>,
    pub primary: Option<bool>,
    pub unique: Option<bool>,
    pub nullable: Option<bool>,
    pub auto_increment: Option<bool>,
    pub enum_items: Option<Vec<String>>,
    pub foreign_keys: Option<Vec<ForeignKeyInfo>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColDiff {
    pub action: SqlAction,
    pub col_name: String,
    pub col_type: Option<String>,
    pub col_length: Option<u32>,
    pub col_scale: Option<u32>,
    pub index_tables: Vec<IndexTable>,
    pub changes: Option<ColChanges>,
}

impl ColDiff {
    pub fn new(action: SqlAction, col_name: impl Into<String>) -> Self {
        Self {
            action,
            col_name: col_name.into(),
            col_type: None,
            col_length: None,
            col_scale: None,
            index_tables: Vec::new(),
            changes: None,
        }
    }

    pub fn with_changes(mut self, changes: ColChanges) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn changes(&self) -> ColChanges {
        self.changes.clone().unwrap_or_default()
    }

    pub fn is_enum(&self) -> bool {
        self.changes
            .as_ref()
            .and_then(|c| c.enum_items.as_ref())
            .is_some_and(|items| !items.is_empty())
    }
}

/// Column name standing for the whole table in table-level diffs.
pub const ALL_COLUMNS: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDiff {
    pub table_name: String,
    pub schema: String,
    pub new_table: bool,
    pub col_diffs: Vec<ColDiff>,
}

impl TableDiff {
    /// The table exists only in the database and is dropped as a whole.
    pub fn drops_table(&self) -> bool {
        !self.new_table
            && matches!(
                self.col_diffs.as_slice(),
                [only] if only.action == SqlAction::Delete && only.col_name == ALL_COLUMNS
            )
    }
}

/// Postgres enum type name for an enum column.
pub fn enum_type_name(schema: &str, table: &str, column: &str) -> String {
    format!("{schema}_{table}_{column}_enum")
}

/// Types whose length/precision participates in DDL and diffing.
pub fn is_length_bearing(col_type: &str) -> bool {
    matches!(col_type, "character varying" | "varchar" | "numeric" | "decimal" | "timestamp")
}
