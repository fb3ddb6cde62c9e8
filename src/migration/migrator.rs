//! Migrator - generates migration files from entity changes and applies them

use crate::config::{MigrationSettings, OrmConfig};
use crate::entity::EntityStorage;
use crate::migration::diff::DiffCalculator;
use crate::migration::file::{discover_migrations, MigrationFile};
use crate::migration::state_table::{applied_migrations, initialize_state_table, record_migration};
use crate::migration::status::{pending_files, MigrationStatus};
use crate::migration::writer::MigrationWriter;
use crate::migration::MigrationError;
use crate::orm::Orm;
use crate::schema::{SnapshotTable, TableDiff};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

/// Core migration engine
///
/// Compares the registered entities with the live database to write migration
/// files, and runs pending files in name order, recording each in
/// `cheetah_migrations`. The ORM must be connected before any of these calls.
pub struct Migrator {
    orm: Orm,
    settings: MigrationSettings,
}

impl Migrator {
    pub fn new(orm: Orm, settings: MigrationSettings) -> Self {
        Self { orm, settings }
    }

    /// A Postgres-backed migrator for `config`, with `storage` as the entity set.
    pub fn from_config(config: &OrmConfig, storage: EntityStorage) -> Result<Self, MigrationError> {
        let orm = Orm::from_config(config, storage).map_err(|e| MigrationError::Driver(e.into()))?;
        Ok(Self::new(orm, config.migrations.clone()))
    }

    pub fn orm(&self) -> &Orm {
        &self.orm
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.settings.path
    }

    /// Live and entity snapshots of every registered table, in registration order.
    pub fn snapshots(&self) -> Result<(Vec<SnapshotTable>, Vec<SnapshotTable>), MigrationError> {
        let storage = self.orm.storage();
        let mut live = Vec::new();
        let mut entities = Vec::with_capacity(storage.len());
        for descriptor in storage.entries() {
            let snapshot = storage.snapshot(descriptor)?;
            if let Some(table) = self
                .orm
                .driver()
                .snapshot(&snapshot.table_name, &snapshot.schema)?
            {
                live.push(table);
            }
            entities.push(snapshot);
        }
        Ok((live, entities))
    }

    pub fn diff(&self) -> Result<Vec<TableDiff>, MigrationError> {
        let (live, entities) = self.snapshots()?;
        Ok(DiffCalculator::new().diff(&live, &entities))
    }

    /// SQL that brings the database in line with the entities; empty when in sync.
    pub fn generate_sql(&self) -> Result<String, MigrationError> {
        let diffs = self.diff()?;
        Ok(MigrationWriter::new(self.orm.driver().dialect()).render(&diffs))
    }

    /// Write the pending schema changes to a new file.
    ///
    /// The file is `<name>.sql` when a name is given, `migration_<timestamp>.sql`
    /// otherwise. Returns `None` without writing when nothing changed.
    pub fn create_migration(&self, name: Option<&str>) -> Result<Option<PathBuf>, MigrationError> {
        let sql = self.generate_sql()?;
        if sql.is_empty() {
            self.orm.logger().info("No changes detected");
            return Ok(None);
        }

        fs::create_dir_all(&self.settings.path)?;
        let file_name = match name {
            Some(name) => format!("{name}.sql"),
            None => MigrationFile::generated_name(Utc::now()),
        };
        let path = self.settings.path.join(file_name);
        fs::write(&path, sql)?;

        self.orm
            .logger()
            .info(&format!("Migration file created: {}", path.display()));
        Ok(Some(path))
    }

    /// Applied and pending files.
    pub fn status(&self) -> Result<MigrationStatus, MigrationError> {
        let driver = self.orm.driver().as_ref();
        initialize_state_table(driver)?;
        let applied = applied_migrations(driver)?;
        let files = discover_migrations(&self.settings.path)?;
        let pending = pending_files(&files, &applied);
        Ok(MigrationStatus::new(applied, pending))
    }

    /// Run every file after the last applied one.
    ///
    /// Files run in name order and stop at the first failing statement. With
    /// `transactional` set, each file and its bookkeeping row commit together.
    /// Returns the names of the files applied by this call.
    pub fn migrate(&self) -> Result<Vec<String>, MigrationError> {
        let files = discover_migrations(&self.settings.path)?;
        if files.is_empty() {
            self.orm.logger().info("No migration files found");
            return Ok(Vec::new());
        }

        let driver = self.orm.driver().as_ref();
        initialize_state_table(driver)?;
        let applied = applied_migrations(driver)?;
        let pending = pending_files(&files, &applied);
        if pending.is_empty() {
            self.orm.logger().info("Database is up to date");
            return Ok(Vec::new());
        }

        let mut executed = Vec::with_capacity(pending.len());
        for file in pending {
            self.apply(&file)?;
            self.orm
                .logger()
                .info(&format!("Migration executed: {}", file.name));
            executed.push(file.name);
        }
        Ok(executed)
    }

    fn apply(&self, file: &MigrationFile) -> Result<(), MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("cheetah.migration", file = %file.name).entered();

        let statements = file.statements()?;
        let run = || -> Result<(), MigrationError> {
            for statement in &statements {
                self.orm
                    .execute_sql(statement)
                    .map_err(|e| MigrationError::ExecutionFailed {
                        file: file.name.clone(),
                        statement: statement.clone(),
                        error: e.to_string(),
                    })?;
            }
            record_migration(self.orm.driver().as_ref(), &file.name)
        };

        if self.settings.transactional {
            crate::transaction::in_transaction(self.orm.driver().as_ref(), run)
        } else {
            run()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::driver::Row;
    use crate::entity::{ColumnType, EntityDescriptor, PropertyDescriptor};
    use crate::logger::{LogLevel, MemoryLogger};
    use crate::migration::state_table::{create_state_table, insert_applied, select_applied, FILE_COLUMN};
    use std::sync::Arc;

    fn migrator(dir: &Path, transactional: bool) -> (Migrator, Arc<MockDriver>, Arc<MemoryLogger>) {
        let mut storage = EntityStorage::new();
        storage
            .add(
                EntityDescriptor::new("User")
                    .property(PropertyDescriptor::new("id", ColumnType::Int).primary())
                    .property(PropertyDescriptor::new("email", ColumnType::Varchar).unique()),
            )
            .unwrap();
        let driver = Arc::new(MockDriver::new());
        let logger = Arc::new(MemoryLogger::new());
        let orm = Orm::new(driver.clone(), storage).with_logger(logger.clone());
        let settings = MigrationSettings {
            path: dir.to_path_buf(),
            transactional,
        };
        (Migrator::new(orm, settings), driver, logger)
    }

    #[test]
    fn test_create_migration_writes_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let (migrator, _, logger) = migrator(dir.path(), true);

        let path = migrator.create_migration(Some("init")).unwrap().unwrap();
        assert_eq!(path, dir.path().join("init.sql"));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            r#"CREATE TABLE "public"."user" ("id" numeric(11) NOT NULL PRIMARY KEY UNIQUE,"email" character varying(255) NOT NULL UNIQUE);"#
        );
        assert!(logger.messages(LogLevel::Info)[0].starts_with("Migration file created: "));
    }

    #[test]
    fn test_in_sync_schema_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (migrator, driver, logger) = migrator(dir.path(), true);
        let storage = migrator.orm().storage().clone();
        driver.add_snapshot(storage.snapshot(storage.require("User").unwrap()).unwrap());

        assert!(migrator.create_migration(None).unwrap().is_none());
        assert_eq!(logger.messages(LogLevel::Info), vec!["No changes detected"]);
        assert!(discover_migrations(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_migrate_runs_files_after_last_applied() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("migration_20240101000000000.sql"), "CREATE TABLE a (id int);").unwrap();
        fs::write(
            dir.path().join("migration_20240102000000000.sql"),
            "CREATE TABLE b (id int);\nCREATE TABLE c (id int);",
        )
        .unwrap();
        let (migrator, driver, logger) = migrator(dir.path(), true);

        driver.push_rows(vec![]);
        driver.push_rows(vec![Row::new().with(FILE_COLUMN, "migration_20240101000000000.sql")]);

        let executed = migrator.migrate().unwrap();
        assert_eq!(executed, vec!["migration_20240102000000000.sql"]);
        assert_eq!(
            driver.executed(),
            vec![
                create_state_table(),
                select_applied(),
                "BEGIN".to_string(),
                "CREATE TABLE b (id int)".to_string(),
                "CREATE TABLE c (id int)".to_string(),
                insert_applied("migration_20240102000000000.sql").unwrap(),
                "COMMIT".to_string(),
            ]
        );
        assert_eq!(
            logger.messages(LogLevel::Info),
            vec!["Migration executed: migration_20240102000000000.sql"]
        );
    }

    #[test]
    fn test_failing_statement_rolls_back_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("migration_20240101000000000.sql"), "CREATE TABLE a (id int);\nBROKEN;").unwrap();
        let (migrator, driver, _) = migrator(dir.path(), true);
        driver.fail_when("BROKEN");

        let err = migrator.migrate().unwrap_err();
        match err {
            MigrationError::ExecutionFailed { file, statement, .. } => {
                assert_eq!(file, "migration_20240101000000000.sql");
                assert_eq!(statement, "BROKEN");
            }
            other => panic!("unexpected error: {other}"),
        }
        let executed = driver.executed();
        assert_eq!(executed.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!executed.iter().any(|sql| sql.starts_with("INSERT INTO")));
    }

    #[test]
    fn test_non_transactional_files_run_bare() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("init.sql"), "CREATE TABLE a (id int);").unwrap();
        let (migrator, driver, _) = migrator(dir.path(), false);

        migrator.migrate().unwrap();
        assert!(!driver.executed().iter().any(|sql| sql == "BEGIN"));
    }

    #[test]
    fn test_migrate_messages_without_work() {
        let dir = tempfile::tempdir().unwrap();
        let (migrator, driver, logger) = migrator(dir.path(), true);
        assert!(migrator.migrate().unwrap().is_empty());
        assert_eq!(logger.messages(LogLevel::Info), vec!["No migration files found"]);
        assert!(driver.executed().is_empty());

        fs::write(dir.path().join("init.sql"), "SELECT 1;").unwrap();
        driver.push_rows(vec![]);
        driver.push_rows(vec![Row::new().with(FILE_COLUMN, "init.sql")]);
        assert!(migrator.migrate().unwrap().is_empty());
        assert_eq!(logger.messages(LogLevel::Info).last().unwrap(), "Database is up to date");
    }

    #[test]
    fn test_status_lists_pending_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("migration_20240101000000000.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("migration_20240102000000000.sql"), "SELECT 2;").unwrap();
        let (migrator, driver, _) = migrator(dir.path(), true);
        driver.push_rows(vec![]);
        driver.push_rows(vec![Row::new().with(FILE_COLUMN, "migration_20240101000000000.sql")]);

        let status = migrator.status().unwrap();
        assert_eq!(status.latest_applied(), Some("migration_20240101000000000.sql"));
        assert_eq!(status.pending.len(), 1);
        assert!(status.pending[0].created_at().is_some());
    }
}
