//! PostgreSQL dialect and the `may_postgres` driver.

use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use may::sync::Mutex;
use may_postgres::Client;
use once_cell::sync::Lazy;
use postgres_types::{FromSql, Type};
use regex::Regex;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{Driver, ExecutionResult, Row, SqlDialect};
use crate::config::ConnectionSettings;
use crate::connection::{self, ConnectionError};
use crate::error::DriverError;
use crate::query::statement::{Statement, StatementKind};
use crate::schema::{
    enum_type_name, is_length_bearing, ColDiff, ColumnInfo, ForeignKeyInfo, IndexInfo, SnapshotTable,
};
use crate::value::Value;

static FOREIGN_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"FOREIGN KEY \(([^)]+)\) REFERENCES (?:"?([^"\s.(]+)"?\.)?"?([^"\s(]+)"?\s*\(([^)]+)\)"#)
        .expect("foreign key pattern compiles")
});

static PARENTHESIZED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^)]*)\)").expect("column list pattern compiles"));

#[cfg(feature = "tracing")]
mod tracing_helpers {
    pub(super) fn statement_span(sql: &str) -> tracing::Span {
        tracing::info_span!("cheetah.execute_sql", db.system = "postgresql", db.statement = sql)
    }

    pub(super) fn transaction_span(command: &'static str) -> tracing::Span {
        tracing::info_span!("cheetah.transaction", db.system = "postgresql", command = command)
    }
}

/// SQL text generation for PostgreSQL.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl PostgresDialect {
    fn column_definition(&self, schema: &str, table: &str, diff: &ColDiff) -> String {
        let changes = diff.changes();
        let mut sql = if changes.auto_increment == Some(true) {
            format!("\"{}\" SERIAL", diff.col_name)
        } else {
            let mut sql = format!("\"{}\" {}", diff.col_name, self.column_type(schema, table, diff));
            if changes.nullable != Some(true) {
                sql.push_str(" NOT NULL");
            }
            sql
        };
        if changes.primary == Some(true) {
            sql.push_str(" PRIMARY KEY");
        }
        if changes.unique == Some(true) {
            sql.push_str(" UNIQUE");
        }
        if changes.auto_increment != Some(true) {
            if let Some(Some(default)) = &changes.default {
                sql.push_str(&format!(" DEFAULT {default}"));
            }
        }
        sql
    }

    fn alter_table(schema: &str, table: &str) -> String {
        format!("ALTER TABLE \"{schema}\".\"{table}\"")
    }
}

impl SqlDialect for PostgresDialect {
    fn compile_statement(&self, statement: &Statement) -> String {
        let Statement {
            schema, table, alias, ..
        } = statement;
        let columns = if statement.columns.is_empty() {
            "*".to_string()
        } else {
            statement.columns.join(", ")
        };

        let mut sql = match statement.kind {
            StatementKind::Select => format!("SELECT {columns} FROM \"{schema}\".\"{table}\" {alias}"),
            StatementKind::Insert => {
                let fields: Vec<String> = statement.values.keys().map(|k| format!("\"{k}\"")).collect();
                let values: Vec<String> = statement.values.iter().map(|(_, v)| self.quote_value(v)).collect();
                let mut sql = format!(
                    "INSERT INTO \"{schema}\".\"{table}\" ({}) VALUES ({})",
                    fields.join(", "),
                    values.join(", ")
                );
                if !statement.columns.is_empty() {
                    sql.push_str(" RETURNING ");
                    sql.push_str(&columns.replace(&format!("{alias}."), ""));
                }
                sql
            }
            StatementKind::Update => {
                let assignments: Vec<String> = statement
                    .values
                    .iter()
                    .map(|(column, value)| format!("\"{column}\" = {}", self.quote_value(value)))
                    .collect();
                format!("UPDATE \"{schema}\".\"{table}\" as {alias} SET {}", assignments.join(", "))
            }
            StatementKind::Delete => format!("DELETE FROM \"{schema}\".\"{table}\" {alias}"),
        };

        for join in &statement.joins {
            sql.push_str(&format!(
                " LEFT JOIN \"{}\".\"{}\" {} ON {}",
                join.schema,
                join.table,
                join.alias,
                join.on
            ));
        }

        if statement.kind != StatementKind::Insert {
            if let Some(where_clause) = statement.where_clause.as_deref().filter(|w| !w.is_empty()) {
                sql.push_str(&format!(" WHERE {where_clause}"));
            }
            if !statement.order_by.is_empty() {
                sql.push_str(&format!(" ORDER BY {}", statement.order_by.join(", ")));
            }
            if let Some(offset) = statement.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
            if let Some(limit) = statement.limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }
        }
        sql
    }

    fn column_type(&self, schema: &str, table: &str, diff: &ColDiff) -> String {
        if diff.is_enum() {
            return format!("\"{}\"", enum_type_name(schema, table, &diff.col_name));
        }
        let col_type = diff.col_type.as_deref().unwrap_or("text");
        match (diff.col_length, diff.col_scale) {
            (Some(length), Some(scale)) => format!("{col_type}({length},{scale})"),
            (Some(length), None) => format!("{col_type}({length})"),
            _ => col_type.to_string(),
        }
    }

    fn create_table(&self, schema: &str, table: &str, creates: &[ColDiff]) -> String {
        let columns: Vec<String> = creates
            .iter()
            .map(|diff| self.column_definition(schema, table, diff))
            .collect();
        format!("CREATE TABLE \"{schema}\".\"{table}\" ({});", columns.join(","))
    }

    fn drop_table(&self, schema: &str, table: &str) -> String {
        format!("DROP TABLE IF EXISTS \"{schema}\".\"{table}\";")
    }

    fn add_column(&self, schema: &str, table: &str, diff: &ColDiff) -> Vec<String> {
        let mut instructions = vec![format!(
            "{} ADD COLUMN {};",
            Self::alter_table(schema, table),
            self.column_definition(schema, table, diff)
        )];
        for fk in diff.changes().foreign_keys.unwrap_or_default() {
            instructions.push(self.add_foreign_key(schema, table, &diff.col_name, &fk));
        }
        instructions
    }

    fn drop_column(&self, schema: &str, table: &str, column: &str) -> String {
        format!("{} DROP COLUMN IF EXISTS \"{column}\";", Self::alter_table(schema, table))
    }

    fn alter_column_type(&self, schema: &str, table: &str, diff: &ColDiff) -> String {
        format!(
            "{} ALTER COLUMN \"{}\" TYPE {};",
            Self::alter_table(schema, table),
            diff.col_name,
            self.column_type(schema, table, diff)
        )
    }

    fn alter_column_default(&self, schema: &str, table: &str, column: &str, default: Option<&str>) -> String {
        match default {
            Some(default) => format!(
                "{} ALTER COLUMN \"{column}\" SET DEFAULT {default};",
                Self::alter_table(schema, table)
            ),
            None => format!("{} ALTER COLUMN \"{column}\" DROP DEFAULT;", Self::alter_table(schema, table)),
        }
    }

    fn add_primary_key(&self, schema: &str, table: &str, column: &str) -> String {
        format!("{} ADD PRIMARY KEY (\"{column}\");", Self::alter_table(schema, table))
    }

    fn drop_constraint(&self, schema: &str, table: &str, name: &str) -> String {
        format!("{} DROP CONSTRAINT \"{name}\";", Self::alter_table(schema, table))
    }

    fn add_unique(&self, schema: &str, table: &str, column: &str) -> String {
        format!("{} ADD UNIQUE (\"{column}\");", Self::alter_table(schema, table))
    }

    fn drop_not_null(&self, schema: &str, table: &str, column: &str) -> String {
        format!("{} ALTER COLUMN \"{column}\" DROP NOT NULL;", Self::alter_table(schema, table))
    }

    fn set_not_null(&self, schema: &str, table: &str, column: &str) -> String {
        format!("{} ALTER COLUMN \"{column}\" SET NOT NULL;", Self::alter_table(schema, table))
    }

    fn add_foreign_key(&self, schema: &str, table: &str, column: &str, fk: &ForeignKeyInfo) -> String {
        format!(
            "{} ADD CONSTRAINT \"{table}_{column}_fk\" FOREIGN KEY (\"{column}\") REFERENCES \"{}\" (\"{}\");",
            Self::alter_table(schema, table),
            fk.referenced_table_name,
            fk.referenced_column_name
        )
    }

    fn create_enum_type(&self, type_name: &str, items: &[String]) -> String {
        let labels: Vec<String> = items
            .iter()
            .map(|item| self.quote_value(&Value::Text(item.clone())))
            .collect();
        format!("CREATE TYPE \"{type_name}\" AS ENUM ({});", labels.join(", "))
    }

    fn drop_enum_type(&self, type_name: &str) -> String {
        format!("DROP TYPE IF EXISTS \"{type_name}\";")
    }

    fn alter_enum(&self, schema: &str, table: &str, column: &str, type_name: &str, items: &[String]) -> String {
        let alter = Self::alter_table(schema, table);
        format!(
            "{alter} ALTER COLUMN \"{column}\" TYPE varchar(255);{}{}{alter} ALTER COLUMN \"{column}\" TYPE \"{type_name}\" USING \"{column}\"::text::\"{type_name}\";",
            self.drop_enum_type(type_name),
            self.create_enum_type(type_name, items)
        )
    }

    fn create_index(&self, schema: &str, table: &str, name: &str, columns: &[String]) -> String {
        let columns: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
        format!("CREATE INDEX \"{name}\" ON \"{schema}\".\"{table}\" ({});", columns.join(", "))
    }

    fn drop_index(&self, schema: &str, name: &str) -> String {
        format!("DROP INDEX \"{schema}\".\"{name}\";")
    }
}

/// Driver over a single `may_postgres` connection.
///
/// The client is opened by [`connect`](Driver::connect) and shared by every statement;
/// concurrent callers are serialized by PostgreSQL on that one connection.
pub struct PgDriver {
    connection_string: String,
    client: Mutex<Option<Client>>,
    dialect: PostgresDialect,
}

impl PgDriver {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            client: Mutex::new(None),
            dialect: PostgresDialect,
        }
    }

    pub fn from_settings(settings: &ConnectionSettings) -> Result<Self, ConnectionError> {
        Ok(Self::new(settings.connection_string()?))
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn is_connected(&self) -> bool {
        self.client.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    fn client(&self) -> Result<Client, DriverError> {
        let guard = self
            .client
            .lock()
            .map_err(|e| DriverError::Other(format!("client lock poisoned: {e}")))?;
        guard.as_ref().cloned().ok_or(DriverError::NotConnected)
    }

    fn run_command(&self, command: &'static str) -> Result<(), DriverError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::transaction_span(command).entered();

        self.client()?.execute(command, &[])?;
        Ok(())
    }

    fn text_rows(&self, sql: &str) -> Result<Vec<Row>, DriverError> {
        Ok(self.execute_sql(sql)?.rows)
    }

    fn constraints(&self, table: &str, schema: &str) -> Result<Vec<Constraint>, DriverError> {
        let sql = format!(
            "SELECT con.conname::text AS name, con.contype::text AS kind, \
             pg_get_constraintdef(con.oid)::text AS definition \
             FROM pg_constraint con \
             JOIN pg_class rel ON rel.oid = con.conrelid \
             JOIN pg_namespace nsp ON nsp.oid = rel.relnamespace \
             WHERE rel.relname = {} AND nsp.nspname = {}",
            self.dialect.quote_value(&Value::from(table)),
            self.dialect.quote_value(&Value::from(schema)),
        );
        self.text_rows(&sql)?
            .iter()
            .map(|row| {
                Ok(Constraint {
                    name: text(row, "name"),
                    kind: text(row, "kind"),
                    definition: text(row, "definition"),
                })
            })
            .collect()
    }

    fn indexes(&self, table: &str, schema: &str, constraints: &[Constraint]) -> Result<Vec<IndexInfo>, DriverError> {
        let sql = format!(
            "SELECT indexname::text AS index_name, indexdef::text AS definition \
             FROM pg_indexes WHERE tablename = {} AND schemaname = {}",
            self.dialect.quote_value(&Value::from(table)),
            self.dialect.quote_value(&Value::from(schema)),
        );
        Ok(self
            .text_rows(&sql)?
            .iter()
            .map(|row| (text(row, "index_name"), text(row, "definition")))
            .filter(|(name, _)| !constraints.iter().any(|c| c.kind == "u" && &c.name == name))
            .map(|(index_name, definition)| IndexInfo {
                table: table.to_string(),
                index_name,
                columns: parse_index_columns(&definition),
            })
            .collect())
    }

    fn enum_labels(&self, udt_name: &str) -> Result<Vec<String>, DriverError> {
        let sql = format!(
            "SELECT e.enumlabel::text AS label FROM pg_type t \
             JOIN pg_enum e ON e.enumtypid = t.oid \
             WHERE t.typname = {} ORDER BY e.enumsortorder",
            self.dialect.quote_value(&Value::from(udt_name)),
        );
        Ok(self.text_rows(&sql)?.iter().map(|row| text(row, "label")).collect())
    }
}

impl Driver for PgDriver {
    fn connect(&self) -> Result<(), DriverError> {
        let client = connection::connect(&self.connection_string)?;
        let mut guard = self
            .client
            .lock()
            .map_err(|e| DriverError::Other(format!("client lock poisoned: {e}")))?;
        *guard = Some(client);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), DriverError> {
        let mut guard = self
            .client
            .lock()
            .map_err(|e| DriverError::Other(format!("client lock poisoned: {e}")))?;
        guard.take();
        Ok(())
    }

    fn execute_sql(&self, sql: &str) -> Result<ExecutionResult, DriverError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::statement_span(sql).entered();

        let client = self.client()?;
        let started_at = Instant::now();
        let rows = client.query(sql, &[])?;
        let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        Ok(ExecutionResult::new(sql, rows, started_at))
    }

    fn snapshot(&self, table: &str, schema: &str) -> Result<Option<SnapshotTable>, DriverError> {
        let sql = format!(
            "SELECT column_name::text AS name, data_type::text AS data_type, udt_name::text AS udt_name, \
             is_nullable::text AS is_nullable, column_default::text AS column_default, \
             character_maximum_length::int4 AS char_length, numeric_precision::int4 AS numeric_precision, \
             numeric_scale::int4 AS numeric_scale, datetime_precision::int4 AS datetime_precision \
             FROM information_schema.columns WHERE table_name = {} AND table_schema = {} \
             ORDER BY ordinal_position",
            self.dialect.quote_value(&Value::from(table)),
            self.dialect.quote_value(&Value::from(schema)),
        );
        let rows = self.text_rows(&sql)?;
        if rows.is_empty() {
            return Ok(None);
        }

        let constraints = self.constraints(table, schema)?;
        let indexes = self.indexes(table, schema, &constraints)?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = text(row, "name");
            let col_type = normalize_type(&text(row, "data_type"));
            let length = if is_length_bearing(&col_type) {
                int(row, "char_length")
                    .or_else(|| int(row, "numeric_precision"))
                    .or_else(|| int(row, "datetime_precision"))
            } else {
                None
            };
            let scale = if col_type == "numeric" {
                int(row, "numeric_scale").filter(|s| *s > 0)
            } else {
                None
            };
            let default = row.get("column_default").and_then(Value::as_str).map(str::to_string);
            let enum_items = if col_type == "USER-DEFINED" {
                Some(self.enum_labels(&text(row, "udt_name"))?)
            } else {
                None
            };

            let covered_by = |kind: &str| {
                constraints
                    .iter()
                    .filter(|c| c.kind == kind)
                    .any(|c| constraint_columns(&c.definition).iter().any(|col| *col == name))
            };
            let primary = covered_by("p");
            let unique = primary || covered_by("u");

            let foreign_keys = constraints
                .iter()
                .filter(|c| c.kind == "f")
                .map(|c| parse_foreign_key(&c.definition))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .filter(|(column, _)| *column == name)
                .map(|(_, fk)| fk)
                .collect();

            columns.push(ColumnInfo {
                auto_increment: default.as_deref().is_some_and(|d| d.starts_with("nextval(")),
                name,
                col_type,
                length,
                scale,
                nullable: text(row, "is_nullable") == "YES",
                default,
                primary,
                unique: Some(unique),
                enum_items,
                foreign_keys,
            });
        }

        Ok(Some(SnapshotTable {
            table_name: table.to_string(),
            schema: schema.to_string(),
            columns,
            indexes,
        }))
    }

    fn start_transaction(&self) -> Result<(), DriverError> {
        self.run_command("BEGIN")
    }

    fn commit_transaction(&self) -> Result<(), DriverError> {
        self.run_command("COMMIT")
    }

    fn rollback_transaction(&self) -> Result<(), DriverError> {
        self.run_command("ROLLBACK")
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }
}

struct Constraint {
    name: String,
    kind: String,
    definition: String,
}

/// Text form of any column type; user-defined enum labels travel as plain text.
struct RawText(String);

impl<'a> FromSql<'a> for RawText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawText(String::from_utf8_lossy(raw).into_owned()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn decode_row(row: &may_postgres::Row) -> Result<Row, DriverError> {
    let mut decoded = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        decoded.push(column.name(), decode_column(row, idx, column.type_())?);
    }
    Ok(decoded)
}

fn decode_column(row: &may_postgres::Row, idx: usize, ty: &Type) -> Result<Value, DriverError> {
    fn get<'a, T: FromSql<'a>>(row: &'a may_postgres::Row, idx: usize) -> Result<Option<T>, DriverError> {
        row.try_get::<_, Option<T>>(idx)
            .map_err(|e| DriverError::Parse(format!("column {idx}: {e}")))
    }

    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| Value::Int(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::Int),
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(Value::Float),
        Type::NUMERIC => get::<Decimal>(row, idx)?.map(Value::Decimal),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => get::<String>(row, idx)?.map(Value::Text),
        Type::DATE => get::<NaiveDate>(row, idx)?.map(Value::Date),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?.map(Value::Timestamp),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?.map(Value::TimestampTz),
        Type::UUID => get::<Uuid>(row, idx)?.map(Value::Uuid),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx)?.map(Value::Json),
        _ => get::<RawText>(row, idx)?.map(|raw| Value::Text(raw.0)),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn text(row: &Row, label: &str) -> String {
    row.get(label)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn int(row: &Row, label: &str) -> Option<u32> {
    row.get(label)
        .and_then(Value::as_i64)
        .and_then(|v| u32::try_from(v).ok())
}

/// Map `information_schema` type names onto the names entities resolve to.
pub(crate) fn normalize_type(data_type: &str) -> String {
    match data_type {
        "timestamp without time zone" => "timestamp",
        "real" => "float4",
        "double precision" => "float8",
        other => other,
    }
    .to_string()
}

/// Unquoted column names of the first parenthesized list in a definition.
fn constraint_columns(definition: &str) -> Vec<String> {
    PARENTHESIZED_RE
        .captures(definition)
        .map(|caps| split_identifiers(&caps[1]))
        .unwrap_or_default()
}

fn parse_index_columns(definition: &str) -> Vec<String> {
    let tail = definition
        .split_once(" USING ")
        .map_or(definition, |(_, tail)| tail);
    constraint_columns(tail)
}

fn split_identifiers(list: &str) -> Vec<String> {
    list.split(',')
        .map(|part| part.trim().trim_matches('"').to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

/// `(local column, referenced table.column)` from a foreign key definition.
pub(crate) fn parse_foreign_key(definition: &str) -> Result<(String, ForeignKeyInfo), DriverError> {
    let caps = FOREIGN_KEY_RE
        .captures(definition)
        .ok_or_else(|| DriverError::Parse(format!("Invalid constraint definition: {definition}")))?;
    let local = split_identifiers(&caps[1]).into_iter().next().unwrap_or_default();
    let referenced = split_identifiers(&caps[4]).into_iter().next().unwrap_or_default();
    Ok((local, ForeignKeyInfo::new(&caps[3], referenced)))
}
