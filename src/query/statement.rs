//! The in-progress shape of one SQL operation.
//!
//! [`SqlBuilder`](super::SqlBuilder) fills a [`Statement`]; a
//! [`SqlDialect`](crate::driver::SqlDialect) renders it.

use crate::error::OrmError;
use crate::value::ValueMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementKind {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
}

/// How relations named in `load` or in a filter are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// One query with `LEFT JOIN`s
    #[default]
    Joined,
    /// One follow-up query per relation, keyed by the parents' values
    Select,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    pub fn parse(raw: &str) -> Option<Direction> {
        match raw.to_ascii_uppercase().as_str() {
            "ASC" => Some(Direction::Asc),
            "DESC" => Some(Direction::Desc),
            _ => None,
        }
    }
}

/// Flatten a nested ordering map into `(dotted path, direction)` pairs.
///
/// `{"name": "ASC", "address": {"city": "DESC"}}` becomes
/// `[("name", Asc), ("address.city", Desc)]`.
pub fn flatten_order(json: &serde_json::Value) -> Result<Vec<(String, Direction)>, OrmError> {
    fn walk(prefix: &str, json: &serde_json::Value, out: &mut Vec<(String, Direction)>) -> Result<(), OrmError> {
        let object = json
            .as_object()
            .ok_or_else(|| OrmError::InvalidFilter(format!("order map expected, got {json}")))?;
        for (key, value) in object {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match value {
                serde_json::Value::String(raw) => {
                    let direction = Direction::parse(raw)
                        .ok_or_else(|| OrmError::InvalidFilter(format!("unknown direction '{raw}' for {path}")))?;
                    out.push((path, direction));
                }
                nested => walk(&path, nested, out)?,
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk("", json, &mut out)?;
    Ok(out)
}

/// A relation fetched through `LEFT JOIN`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStatement {
    /// Dotted relation path from the root entity
    pub path: String,
    /// Alias of the table the relation hangs off
    pub origin_alias: String,
    /// Relation property on the origin entity
    pub property: String,
    /// Registered name of the joined entity
    pub entity: String,
    pub schema: String,
    pub table: String,
    pub alias: String,
    pub on: String,
    /// One-to-many: children are pushed into a list
    pub many: bool,
}

/// A relation fetched by a follow-up query.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectJoin {
    pub path: String,
    pub origin_alias: String,
    pub property: String,
    pub entity: String,
    pub schema: String,
    pub table: String,
    pub alias: String,
    /// Columns requested through dotted field paths; empty means every column
    pub fields: Vec<String>,
    /// Condition compiled from a filter on the relation
    pub where_clause: Option<String>,
    /// Child column compared against the collected parent keys
    pub match_column: String,
    /// Parent field whose values are collected
    pub parent_key: String,
    /// Child field holding the value that pairs it with a parent
    pub child_key: String,
    pub many: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub schema: String,
    pub table: String,
    pub alias: String,
    /// Rendered select list entries (`u1."id" as "u1_id"`)
    pub columns: Vec<String>,
    /// Insert/update payload keyed by column name
    pub values: ValueMap,
    pub joins: Vec<JoinStatement>,
    pub where_clause: Option<String>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Statement {
    pub fn new(kind: StatementKind, schema: impl Into<String>, table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            kind,
            schema: schema.into(),
            table: table.into(),
            alias: alias.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_nested_order() {
        let order = flatten_order(&serde_json::json!({"name": "asc", "address": {"city": "DESC"}})).unwrap();
        assert_eq!(
            order,
            vec![
                ("name".to_string(), Direction::Asc),
                ("address.city".to_string(), Direction::Desc)
            ]
        );
        assert!(flatten_order(&serde_json::json!({"name": "sideways"})).is_err());
    }
}
