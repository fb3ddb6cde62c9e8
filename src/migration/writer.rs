//! Rendering [`TableDiff`]s as migration file text.
//!
//! One instruction per line. Every new table is created first, then their foreign
//! keys, then their indexes, so entities may reference each other in any registration
//! order. Existing tables follow: column diffs are replayed newest first and grouped by
//! column, with index changes after the column work of the table. A constraint or index
//! name is dropped or created at most once per file.

use std::collections::HashSet;

use crate::driver::SqlDialect;
use crate::schema::{enum_type_name, ColDiff, SqlAction, TableDiff};

pub struct MigrationWriter<'a> {
    dialect: &'a dyn SqlDialect,
}

/// Schema-qualified constraint and index names already in the file.
type Emitted = HashSet<(String, String)>;

impl<'a> MigrationWriter<'a> {
    pub fn new(dialect: &'a dyn SqlDialect) -> Self {
        Self { dialect }
    }

    /// The migration file content for `diffs`; empty when nothing needs to run.
    pub fn render(&self, diffs: &[TableDiff]) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut emitted = Emitted::new();

        let created: Vec<&TableDiff> = diffs.iter().filter(|d| d.new_table).collect();
        for diff in &created {
            lines.push(self.create_table(diff));
        }
        for diff in &created {
            for create in diff.col_diffs.iter().filter(|d| d.action == SqlAction::Create) {
                for fk in create.changes().foreign_keys.unwrap_or_default() {
                    lines.push(
                        self.dialect
                            .add_foreign_key(&diff.schema, &diff.table_name, &create.col_name, &fk),
                    );
                }
            }
        }
        for diff in &created {
            for index in diff.col_diffs.iter().filter(|d| d.action == SqlAction::Index) {
                self.index(diff, index, &mut emitted, &mut lines);
            }
        }

        for diff in diffs.iter().filter(|d| !d.new_table) {
            if diff.drops_table() {
                lines.push(self.dialect.drop_table(&diff.schema, &diff.table_name));
            } else {
                self.alter_table(diff, &mut emitted, &mut lines);
            }
        }
        lines.join("\n")
    }

    fn create_table(&self, diff: &TableDiff) -> String {
        let (schema, table) = (diff.schema.as_str(), diff.table_name.as_str());
        let creates: Vec<ColDiff> = diff
            .col_diffs
            .iter()
            .filter(|d| d.action == SqlAction::Create)
            .cloned()
            .collect();

        // Enum types must exist before the table that uses them; same line.
        let mut statement: String = creates
            .iter()
            .filter(|d| d.is_enum())
            .map(|d| self.create_enum_type(schema, table, d))
            .collect();
        statement.push_str(&self.dialect.create_table(schema, table, &creates));
        statement
    }

    fn alter_table(&self, diff: &TableDiff, emitted: &mut Emitted, lines: &mut Vec<String>) {
        let mut groups: Vec<(&str, Vec<&ColDiff>)> = Vec::new();
        for col_diff in diff.col_diffs.iter().rev() {
            match groups.iter_mut().find(|(name, _)| *name == col_diff.col_name) {
                Some((_, group)) => group.push(col_diff),
                None => groups.push((col_diff.col_name.as_str(), vec![col_diff])),
            }
        }

        let (schema, table) = (diff.schema.as_str(), diff.table_name.as_str());
        // An index may cover a column added in this same file.
        let mut index_instructions = Vec::new();
        for (_, group) in groups {
            let mut instructions = Vec::new();
            for col_diff in group {
                match col_diff.action {
                    SqlAction::Create => {
                        if col_diff.is_enum() {
                            instructions.push(self.create_enum_type(schema, table, col_diff));
                        }
                        instructions.extend(self.dialect.add_column(schema, table, col_diff));
                    }
                    SqlAction::Delete => {
                        let drops_enum = col_diff
                            .changes
                            .as_ref()
                            .is_some_and(|c| c.enum_items.is_some());
                        if drops_enum {
                            instructions.push(
                                self.dialect
                                    .drop_enum_type(&enum_type_name(schema, table, &col_diff.col_name)),
                            );
                        } else {
                            instructions.push(self.dialect.drop_column(schema, table, &col_diff.col_name));
                        }
                    }
                    SqlAction::Alter => self.alter_column(diff, col_diff, emitted, &mut instructions),
                    SqlAction::Index => self.index(diff, col_diff, emitted, &mut index_instructions),
                }
            }
            lines.extend(instructions);
        }
        lines.extend(index_instructions);
    }

    fn alter_column(&self, diff: &TableDiff, col_diff: &ColDiff, emitted: &mut Emitted, instructions: &mut Vec<String>) {
        let (schema, table, column) = (
            diff.schema.as_str(),
            diff.table_name.as_str(),
            col_diff.col_name.as_str(),
        );
        let changes = col_diff.changes();

        if col_diff.col_type.is_some() {
            instructions.push(self.dialect.alter_column_type(schema, table, col_diff));
        }
        if let Some(items) = changes.enum_items.as_ref().filter(|items| !items.is_empty()) {
            let type_name = enum_type_name(schema, table, column);
            instructions.push(self.dialect.alter_enum(schema, table, column, &type_name, items));
        }
        if let Some(default) = &changes.default {
            instructions.push(self.dialect.alter_column_default(schema, table, column, default.as_deref()));
        }
        match changes.primary {
            Some(true) => instructions.push(self.dialect.add_primary_key(schema, table, column)),
            Some(false) => self.drop_constraint(diff, &format!("{table}_pkey"), emitted, instructions),
            None => {}
        }
        match changes.unique {
            Some(true) => instructions.push(self.dialect.add_unique(schema, table, column)),
            Some(false) => self.drop_constraint(diff, &format!("{table}_{column}_key"), emitted, instructions),
            None => {}
        }
        match changes.nullable {
            Some(true) => instructions.push(self.dialect.drop_not_null(schema, table, column)),
            Some(false) => instructions.push(self.dialect.set_not_null(schema, table, column)),
            None => {}
        }
        if changes.foreign_keys.as_ref().is_some_and(Vec::is_empty) {
            self.drop_constraint(diff, &format!("{table}_{column}_fk"), emitted, instructions);
        }
    }

    fn index(&self, diff: &TableDiff, col_diff: &ColDiff, emitted: &mut Emitted, instructions: &mut Vec<String>) {
        // Backed by the PRIMARY KEY constraint.
        let primary_index = format!("{}_pkey", diff.table_name);
        for index in &col_diff.index_tables {
            if index.name == primary_index || !emitted.insert((diff.schema.clone(), index.name.clone())) {
                continue;
            }
            let sql = match &index.properties {
                Some(columns) => self
                    .dialect
                    .create_index(&diff.schema, &diff.table_name, &index.name, columns),
                None => self.dialect.drop_index(&diff.schema, &index.name),
            };
            instructions.push(sql);
        }
    }

    fn drop_constraint(&self, diff: &TableDiff, name: &str, emitted: &mut Emitted, instructions: &mut Vec<String>) {
        if emitted.insert((diff.schema.clone(), name.to_string())) {
            instructions.push(self.dialect.drop_constraint(&diff.schema, &diff.table_name, name));
        }
    }

    fn create_enum_type(&self, schema: &str, table: &str, col_diff: &ColDiff) -> String {
        let items = col_diff.changes().enum_items.unwrap_or_default();
        self.dialect
            .create_enum_type(&enum_type_name(schema, table, &col_diff.col_name), &items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::PostgresDialect;
    use crate::schema::{ColChanges, ForeignKeyInfo, IndexTable, ALL_COLUMNS};

    fn create(name: &str, col_type: &str, length: Option<u32>, changes: ColChanges) -> ColDiff {
        ColDiff {
            col_type: Some(col_type.to_string()),
            col_length: length,
            ..ColDiff::new(SqlAction::Create, name)
        }
        .with_changes(changes)
    }

    fn table_diff(table: &str, new_table: bool, col_diffs: Vec<ColDiff>) -> TableDiff {
        TableDiff {
            table_name: table.to_string(),
            schema: "public".to_string(),
            new_table,
            col_diffs,
        }
    }

    fn render(diffs: &[TableDiff]) -> String {
        MigrationWriter::new(&PostgresDialect).render(diffs)
    }

    #[test]
    fn test_new_table_with_foreign_key_and_indexes() {
        let sql = render(&[table_diff(
            "address",
            true,
            vec![
                create("id", "numeric", Some(11), ColChanges {
                    primary: Some(true),
                    unique: Some(true),
                    ..ColChanges::default()
                }),
                create("user", "numeric", Some(11), ColChanges {
                    foreign_keys: Some(vec![ForeignKeyInfo::new("user", "id")]),
                    ..ColChanges::default()
                }),
                ColDiff {
                    index_tables: vec![
                        IndexTable {
                            name: "address_pkey".to_string(),
                            properties: Some(vec!["id".to_string()]),
                        },
                        IndexTable {
                            name: "user_index".to_string(),
                            properties: Some(vec!["user".to_string()]),
                        },
                    ],
                    ..ColDiff::new(SqlAction::Index, ALL_COLUMNS)
                },
            ],
        )]);

        let lines: Vec<&str> = sql.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"CREATE TABLE "public"."address" ("id" numeric(11) NOT NULL PRIMARY KEY UNIQUE,"user" numeric(11) NOT NULL);"#,
                r#"ALTER TABLE "public"."address" ADD CONSTRAINT "address_user_fk" FOREIGN KEY ("user") REFERENCES "user" ("id");"#,
                r#"CREATE INDEX "user_index" ON "public"."address" ("user");"#,
            ]
        );
    }

    #[test]
    fn test_foreign_keys_follow_every_new_table() {
        let id = || {
            create("id", "numeric", Some(11), ColChanges {
                primary: Some(true),
                unique: Some(true),
                ..ColChanges::default()
            })
        };
        // address is registered before the user table it references
        let sql = render(&[
            table_diff(
                "address",
                true,
                vec![
                    id(),
                    create("user", "numeric", Some(11), ColChanges {
                        foreign_keys: Some(vec![ForeignKeyInfo::new("user", "id")]),
                        ..ColChanges::default()
                    }),
                    ColDiff {
                        index_tables: vec![IndexTable {
                            name: "user_index".to_string(),
                            properties: Some(vec!["user".to_string()]),
                        }],
                        ..ColDiff::new(SqlAction::Index, ALL_COLUMNS)
                    },
                ],
            ),
            table_diff("user", true, vec![id()]),
        ]);

        let lines: Vec<&str> = sql.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"CREATE TABLE "public"."address" ("id" numeric(11) NOT NULL PRIMARY KEY UNIQUE,"user" numeric(11) NOT NULL);"#,
                r#"CREATE TABLE "public"."user" ("id" numeric(11) NOT NULL PRIMARY KEY UNIQUE);"#,
                r#"ALTER TABLE "public"."address" ADD CONSTRAINT "address_user_fk" FOREIGN KEY ("user") REFERENCES "user" ("id");"#,
                r#"CREATE INDEX "user_index" ON "public"."address" ("user");"#,
            ]
        );
    }

    #[test]
    fn test_index_named_like_a_column_is_created_after_it() {
        let sql = render(&[table_diff(
            "user",
            false,
            vec![
                create("email", "character varying", Some(255), ColChanges {
                    nullable: Some(true),
                    ..ColChanges::default()
                }),
                ColDiff {
                    index_tables: vec![IndexTable {
                        name: "email".to_string(),
                        properties: Some(vec!["email".to_string()]),
                    }],
                    ..ColDiff::new(SqlAction::Index, "email")
                },
            ],
        )]);
        let lines: Vec<&str> = sql.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"ALTER TABLE "public"."user" ADD COLUMN "email" character varying(255);"#,
                r#"CREATE INDEX "email" ON "public"."user" ("email");"#,
            ]
        );
    }

    #[test]
    fn test_enum_type_precedes_table_on_same_line() {
        let sql = render(&[table_diff(
            "user",
            true,
            vec![
                create("id", "numeric", Some(11), ColChanges {
                    primary: Some(true),
                    unique: Some(true),
                    auto_increment: Some(true),
                    ..ColChanges::default()
                }),
                create("role", "USER-DEFINED", None, ColChanges {
                    enum_items: Some(vec!["admin".to_string(), "user".to_string()]),
                    ..ColChanges::default()
                }),
            ],
        )]);
        assert_eq!(
            sql,
            concat!(
                r#"CREATE TYPE "public_user_role_enum" AS ENUM ('admin', 'user');"#,
                r#"CREATE TABLE "public"."user" ("id" SERIAL PRIMARY KEY UNIQUE,"role" "public_user_role_enum" NOT NULL);"#
            )
        );
    }

    #[test]
    fn test_alterations_are_grouped_per_column_newest_first() {
        let sql = render(&[table_diff(
            "address",
            false,
            vec![
                ColDiff::new(SqlAction::Alter, "user").with_changes(ColChanges {
                    foreign_keys: Some(vec![]),
                    ..ColChanges::default()
                }),
                ColDiff::new(SqlAction::Alter, "street").with_changes(ColChanges {
                    default: Some(Some("'unknown'".to_string())),
                    ..ColChanges::default()
                }),
                ColDiff::new(SqlAction::Alter, "user").with_changes(ColChanges {
                    nullable: Some(true),
                    ..ColChanges::default()
                }),
            ],
        )]);
        let lines: Vec<&str> = sql.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"ALTER TABLE "public"."address" ALTER COLUMN "user" DROP NOT NULL;"#,
                r#"ALTER TABLE "public"."address" DROP CONSTRAINT "address_user_fk";"#,
                r#"ALTER TABLE "public"."address" ALTER COLUMN "street" SET DEFAULT 'unknown';"#,
            ]
        );
    }

    #[test]
    fn test_column_turning_into_enum() {
        // Differ output order: enum create, type delete, unique drop.
        let sql = render(&[table_diff(
            "user",
            false,
            vec![
                create("role", "USER-DEFINED", None, ColChanges {
                    enum_items: Some(vec!["admin".to_string(), "user".to_string()]),
                    nullable: Some(false),
                    ..ColChanges::default()
                }),
                ColDiff::new(SqlAction::Delete, "role"),
                ColDiff::new(SqlAction::Alter, "role").with_changes(ColChanges {
                    unique: Some(false),
                    ..ColChanges::default()
                }),
            ],
        )]);
        let lines: Vec<&str> = sql.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"ALTER TABLE "public"."user" DROP CONSTRAINT "user_role_key";"#,
                r#"ALTER TABLE "public"."user" DROP COLUMN IF EXISTS "role";"#,
                r#"CREATE TYPE "public_user_role_enum" AS ENUM ('admin', 'user');"#,
                r#"ALTER TABLE "public"."user" ADD COLUMN "role" "public_user_role_enum" NOT NULL;"#,
            ]
        );
    }

    #[test]
    fn test_enum_back_to_varchar() {
        let sql = render(&[table_diff(
            "user",
            false,
            vec![
                ColDiff::new(SqlAction::Delete, "role").with_changes(ColChanges {
                    enum_items: Some(vec![]),
                    ..ColChanges::default()
                }),
                ColDiff {
                    col_type: Some("character varying".to_string()),
                    col_length: Some(255),
                    ..ColDiff::new(SqlAction::Alter, "role")
                },
            ],
        )]);
        assert_eq!(
            sql,
            "ALTER TABLE \"public\".\"user\" ALTER COLUMN \"role\" TYPE character varying(255);\n\
             DROP TYPE IF EXISTS \"public_user_role_enum\";"
        );
    }

    #[test]
    fn test_constraint_dropped_once_per_file() {
        let drop_primary = || {
            ColDiff::new(SqlAction::Alter, "id").with_changes(ColChanges {
                primary: Some(false),
                ..ColChanges::default()
            })
        };
        let sql = render(&[table_diff("user", false, vec![drop_primary(), drop_primary()])]);
        assert_eq!(sql, r#"ALTER TABLE "public"."user" DROP CONSTRAINT "user_pkey";"#);
    }

    #[test]
    fn test_index_changes_and_table_drop() {
        let sql = render(&[
            table_diff(
                "user",
                false,
                vec![
                    ColDiff {
                        index_tables: vec![IndexTable {
                            name: "email_index".to_string(),
                            properties: None,
                        }],
                        ..ColDiff::new(SqlAction::Index, "email")
                    },
                    ColDiff {
                        index_tables: vec![IndexTable {
                            name: "user_pkey".to_string(),
                            properties: Some(vec!["id".to_string()]),
                        }],
                        ..ColDiff::new(SqlAction::Index, "id")
                    },
                ],
            ),
            table_diff("legacy", false, vec![ColDiff::new(SqlAction::Delete, ALL_COLUMNS)]),
        ]);
        let lines: Vec<&str> = sql.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"DROP INDEX "public"."email_index";"#,
                r#"DROP TABLE IF EXISTS "public"."legacy";"#,
            ]
        );
    }

    #[test]
    fn test_nothing_to_render() {
        assert!(render(&[]).is_empty());
    }
}
