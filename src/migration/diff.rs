//! Schema differ: live tables against entity tables.
//!
//! [`DiffCalculator::diff`] never touches a connection. It compares two lists of
//! [`SnapshotTable`]s by table name and emits one [`TableDiff`] per table that needs
//! work. Column rules are independent: one column may collect several [`ColDiff`]s, in
//! the order foreign keys, enum, type, default, primary, unique, nullable.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::entity::types::DEFAULT_NUMERIC_LENGTH;
use crate::schema::{
    ColChanges, ColDiff, ColumnInfo, IndexTable, SnapshotTable, SqlAction, TableDiff, ALL_COLUMNS,
};

/// Trailing `::type` casts Postgres adds to stored defaults (`'a'::character varying`).
static CAST_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"::"?[A-Za-z_][A-Za-z0-9_ ]*"?(?:\(\d+(?:,\s*\d+)?\))?(?:\[\])?$"#)
        .expect("cast suffix pattern compiles")
});

const ENUM_TYPE: &str = "USER-DEFINED";

/// Computes the changes that bring a live schema in line with the entities.
///
/// ```
/// use cheetah_orm::migration::DiffCalculator;
/// use cheetah_orm::schema::{ColumnInfo, SnapshotTable};
///
/// let users = SnapshotTable {
///     table_name: "user".to_string(),
///     schema: "public".to_string(),
///     columns: vec![ColumnInfo {
///         name: "id".to_string(),
///         col_type: "numeric".to_string(),
///         length: Some(11),
///         primary: true,
///         unique: Some(true),
///         ..ColumnInfo::default()
///     }],
///     indexes: vec![],
/// };
///
/// let diffs = DiffCalculator::new().diff(&[], &[users.clone()]);
/// assert!(diffs[0].new_table);
/// assert!(DiffCalculator::new().diff(&[users.clone()], &[users]).is_empty());
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffCalculator;

impl DiffCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn diff(&self, live: &[SnapshotTable], entities: &[SnapshotTable]) -> Vec<TableDiff> {
        let mut names: Vec<&str> = Vec::new();
        for table in live.iter().chain(entities) {
            if !names.contains(&table.table_name.as_str()) {
                names.push(&table.table_name);
            }
        }

        let mut diffs = Vec::new();
        for name in names {
            let live_table = live.iter().find(|t| t.table_name == name);
            let entity_table = entities.iter().find(|t| t.table_name == name);

            match (live_table, entity_table) {
                (Some(live_table), None) => diffs.push(TableDiff {
                    table_name: name.to_string(),
                    schema: live_table.schema.clone(),
                    new_table: false,
                    col_diffs: vec![ColDiff::new(SqlAction::Delete, ALL_COLUMNS)],
                }),
                (None, Some(entity_table)) => {
                    let mut col_diffs: Vec<ColDiff> = entity_table.columns.iter().map(create_column).collect();
                    col_diffs.extend(index_diffs(None, entity_table));
                    diffs.push(TableDiff {
                        table_name: name.to_string(),
                        schema: entity_table.schema.clone(),
                        new_table: true,
                        col_diffs,
                    });
                }
                (Some(live_table), Some(entity_table)) => {
                    let col_diffs = table_changes(live_table, entity_table);
                    if !col_diffs.is_empty() {
                        diffs.push(TableDiff {
                            table_name: name.to_string(),
                            schema: entity_table.schema.clone(),
                            new_table: false,
                            col_diffs,
                        });
                    }
                }
                (None, None) => {}
            }
        }

        log::debug!(target: "cheetah_orm", "schema diff: {} table(s) changed", diffs.len());
        diffs
    }
}

fn table_changes(live: &SnapshotTable, entity: &SnapshotTable) -> Vec<ColDiff> {
    let mut names: Vec<&str> = Vec::new();
    for column in live.columns.iter().chain(&entity.columns) {
        if !names.contains(&column.name.as_str()) {
            names.push(&column.name);
        }
    }

    let mut col_diffs = Vec::new();
    for name in names {
        match (live.column(name), entity.column(name)) {
            (Some(_), None) => col_diffs.push(ColDiff::new(SqlAction::Delete, name)),
            (None, Some(entity_col)) => col_diffs.push(create_column(entity_col)),
            (Some(live_col), Some(entity_col)) => diff_column(live_col, entity_col, &mut col_diffs),
            (None, None) => {}
        }
    }

    col_diffs.extend(index_diffs(Some(live), entity));
    col_diffs
}

fn create_column(column: &ColumnInfo) -> ColDiff {
    ColDiff {
        col_type: Some(column.col_type.clone()),
        col_length: column.length,
        col_scale: column.scale,
        ..ColDiff::new(SqlAction::Create, column.name.as_str())
    }
    .with_changes(ColChanges {
        default: column.default.clone().map(Some),
        primary: Some(column.primary),
        unique: column.unique,
        nullable: Some(column.nullable),
        auto_increment: Some(column.auto_increment),
        enum_items: column.enum_items.clone(),
        foreign_keys: Some(column.foreign_keys.clone()),
    })
}

fn alter(column: &str, changes: ColChanges) -> ColDiff {
    ColDiff::new(SqlAction::Alter, column).with_changes(changes)
}

fn diff_column(live: &ColumnInfo, entity: &ColumnInfo, out: &mut Vec<ColDiff>) {
    diff_foreign_keys(live, entity, out);
    diff_enum(live, entity, out);
    diff_type(live, entity, out);
    diff_default(live, entity, out);

    if live.primary != entity.primary {
        out.push(alter(&entity.name, ColChanges {
            primary: Some(entity.primary),
            ..ColChanges::default()
        }));
    }

    // An explicit `false` in the database and an undeclared flag mean the same thing.
    if live.unique != entity.unique && !(live.unique == Some(false) && entity.unique.is_none()) {
        out.push(alter(&entity.name, ColChanges {
            unique: Some(entity.unique.unwrap_or(false)),
            ..ColChanges::default()
        }));
    }

    if live.nullable != entity.nullable {
        out.push(alter(&entity.name, ColChanges {
            nullable: Some(entity.nullable),
            ..ColChanges::default()
        }));
    }
}

/// Only foreign keys that disappeared are reported; new ones on an existing column are not.
fn diff_foreign_keys(live: &ColumnInfo, entity: &ColumnInfo, out: &mut Vec<ColDiff>) {
    for dropped in live
        .foreign_keys
        .iter()
        .filter(|fk| !entity.foreign_keys.iter().any(|e| e.key() == fk.key()))
    {
        let remaining = live
            .foreign_keys
            .iter()
            .filter(|fk| fk.key() != dropped.key())
            .cloned()
            .collect();
        out.push(alter(&live.name, ColChanges {
            foreign_keys: Some(remaining),
            ..ColChanges::default()
        }));
    }
}

fn diff_enum(live: &ColumnInfo, entity: &ColumnInfo, out: &mut Vec<ColDiff>) {
    match (&live.enum_items, &entity.enum_items) {
        (Some(live_items), Some(entity_items)) => {
            let changed = live_items.iter().any(|item| !entity_items.contains(item))
                || entity_items.iter().any(|item| !live_items.contains(item));
            if changed {
                out.push(alter(&entity.name, ColChanges {
                    enum_items: Some(entity_items.clone()),
                    ..ColChanges::default()
                }));
            }
        }
        (Some(_), None) => out.push(ColDiff::new(SqlAction::Delete, live.name.as_str()).with_changes(ColChanges {
            enum_items: Some(Vec::new()),
            ..ColChanges::default()
        })),
        // The type rule drops the old column; this re-adds it with the new enum type.
        (None, Some(_)) => out.push(create_column(entity)),
        (None, None) => {}
    }
}

fn diff_type(live: &ColumnInfo, entity: &ColumnInfo, out: &mut Vec<ColDiff>) {
    // A serial key reads back as `integer`; entities declare it as numeric(11).
    let (live_type, live_length) = if live.primary && live.col_type == "integer" {
        ("numeric", Some(DEFAULT_NUMERIC_LENGTH))
    } else {
        (live.col_type.as_str(), live.length)
    };
    let entity_is_enum = entity.enum_items.is_some();
    let (entity_type, entity_length) = if entity_is_enum {
        (ENUM_TYPE, None)
    } else {
        (entity.col_type.as_str(), entity.length)
    };

    let scale_changed = !entity_is_enum && entity_type == "numeric" && live.scale != entity.scale;
    if live_type == entity_type && live_length == entity_length && !scale_changed {
        return;
    }

    if entity_is_enum {
        out.push(ColDiff::new(SqlAction::Delete, entity.name.as_str()));
        return;
    }
    out.push(ColDiff {
        col_type: Some(entity_type.to_string()),
        col_length: entity_length,
        col_scale: entity.scale,
        ..ColDiff::new(SqlAction::Alter, entity.name.as_str())
    });
}

fn diff_default(live: &ColumnInfo, entity: &ColumnInfo, out: &mut Vec<ColDiff>) {
    if live.auto_increment && entity.auto_increment {
        return;
    }
    let live_default = live.default.as_deref().map(normalize_default);
    let entity_default = entity.default.as_deref().map(normalize_default);
    if live_default != entity_default {
        out.push(alter(&entity.name, ColChanges {
            default: Some(entity.default.clone()),
            ..ColChanges::default()
        }));
    }
}

/// Strip the casts Postgres appends to stored default expressions.
pub(crate) fn normalize_default(expression: &str) -> String {
    let mut normalized = expression.trim().to_string();
    while let Some(cast) = CAST_SUFFIX.find(&normalized) {
        normalized.truncate(cast.start());
    }
    normalized
}

fn index_diffs(live: Option<&SnapshotTable>, entity: &SnapshotTable) -> Vec<ColDiff> {
    let Some(live) = live else {
        if entity.indexes.is_empty() {
            return Vec::new();
        }
        return vec![ColDiff {
            index_tables: entity
                .indexes
                .iter()
                .map(|index| IndexTable {
                    name: index.index_name.clone(),
                    properties: Some(index.columns.clone()),
                })
                .collect(),
            ..ColDiff::new(SqlAction::Index, ALL_COLUMNS)
        }];
    };

    let mut out = Vec::new();
    for index in &live.indexes {
        if !entity.indexes.iter().any(|e| e.index_name == index.index_name) {
            out.push(ColDiff {
                index_tables: vec![IndexTable {
                    name: index.index_name.clone(),
                    properties: None,
                }],
                ..ColDiff::new(SqlAction::Index, index.columns.join(","))
            });
        }
    }
    for index in &entity.indexes {
        if !live.indexes.iter().any(|l| l.index_name == index.index_name) {
            out.push(ColDiff {
                index_tables: vec![IndexTable {
                    name: index.index_name.clone(),
                    properties: Some(index.columns.clone()),
                }],
                ..ColDiff::new(SqlAction::Index, index.columns.join(","))
            });
        }
    }
    out
}
