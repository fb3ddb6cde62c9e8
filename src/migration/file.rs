//! Migration file discovery, naming and parsing

use crate::migration::MigrationError;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// `migration_<YYYYMMDDHHMMSSmmm>.sql`
static GENERATED_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^migration_(\d{14})(\d{3})\.sql$").expect("migration file pattern compiles"));

/// A `.sql` file in the migrations directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Path to the migration file
    pub path: PathBuf,

    /// File name, also the key stored in the bookkeeping table
    pub name: String,
}

impl MigrationFile {
    pub fn new(path: PathBuf) -> Result<Self, MigrationError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MigrationError::InvalidFormat(format!("Invalid filename: {}", path.display())))?
            .to_string();
        Ok(Self { path, name })
    }

    /// Name of a migration generated at `now`.
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use cheetah_orm::migration::MigrationFile;
    ///
    /// let now = Utc.with_ymd_and_hms(2024, 1, 20, 12, 30, 5).unwrap();
    /// assert_eq!(MigrationFile::generated_name(now), "migration_20240120123005000.sql");
    /// ```
    pub fn generated_name(now: DateTime<Utc>) -> String {
        format!("migration_{}.sql", now.format("%Y%m%d%H%M%S%3f"))
    }

    /// Creation time encoded in a generated name; `None` for explicitly named files.
    pub fn created_at(&self) -> Option<NaiveDateTime> {
        let caps = GENERATED_NAME_RE.captures(&self.name)?;
        let seconds = NaiveDateTime::parse_from_str(&caps[1], "%Y%m%d%H%M%S").ok()?;
        let millis = caps[2].parse::<i64>().ok()?;
        seconds.checked_add_signed(TimeDelta::try_milliseconds(millis)?)
    }

    pub fn read(&self) -> Result<String, MigrationError> {
        Ok(fs::read_to_string(&self.path)?)
    }

    /// The file's statements, in order.
    pub fn statements(&self) -> Result<Vec<String>, MigrationError> {
        Ok(split_statements(&self.read()?))
    }
}

/// Discover all migration files in a directory
///
/// Returns the `.sql` files sorted by name (oldest first for generated names). A
/// missing directory holds no migrations.
pub fn discover_migrations(migrations_dir: &Path) -> Result<Vec<MigrationFile>, MigrationError> {
    if !migrations_dir.exists() {
        return Ok(Vec::new());
    }

    if !migrations_dir.is_dir() {
        return Err(MigrationError::InvalidFormat(format!(
            "Path is not a directory: {}",
            migrations_dir.display()
        )));
    }

    let mut migrations = Vec::new();
    for entry in fs::read_dir(migrations_dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("sql") {
            continue;
        }
        migrations.push(MigrationFile::new(path)?);
    }

    migrations.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(migrations)
}

/// Split SQL text on `;`, ignoring semicolons inside quoted literals and identifiers.
///
/// ```
/// use cheetah_orm::migration::split_statements;
///
/// let sql = "CREATE TYPE \"t\" AS ENUM ('a;b');\nDROP TABLE x;";
/// assert_eq!(split_statements(sql), vec!["CREATE TYPE \"t\" AS ENUM ('a;b')", "DROP TABLE x"]);
/// ```
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in sql.chars() {
        match (quote, ch) {
            (None, ';') => {
                push_statement(&mut statements, &current);
                current.clear();
                continue;
            }
            (None, '\'' | '"') => quote = Some(ch),
            // A doubled quote reopens immediately on the next char.
            (Some(open), _) if open == ch => quote = None,
            _ => {}
        }
        current.push(ch);
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, statement: &str) {
    let statement = statement.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_generated_name_round_trips_timestamp() {
        let file = MigrationFile::new(PathBuf::from("db/migration_20240120123005042.sql")).unwrap();
        let created = file.created_at().unwrap();
        assert_eq!(created.format("%Y-%m-%d %H:%M:%S%.3f").to_string(), "2024-01-20 12:30:05.042");

        let named = MigrationFile::new(PathBuf::from("db/add_users.sql")).unwrap();
        assert_eq!(named.name, "add_users.sql");
        assert!(named.created_at().is_none());
    }

    #[test]
    fn test_split_keeps_quoted_semicolons_and_doubled_quotes() {
        let sql = "INSERT INTO t VALUES ('it''s; fine');\n\n  UPDATE t SET a = 1 ;";
        assert_eq!(
            split_statements(sql),
            vec!["INSERT INTO t VALUES ('it''s; fine')", "UPDATE t SET a = 1"]
        );
        assert!(split_statements(" ; \n").is_empty());
    }

    #[test]
    fn test_discover_sorts_sql_files_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "migration_20240201000000000.sql",
            "migration_20240101000000000.sql",
            "notes.txt",
        ] {
            let mut file = fs::File::create(dir.path().join(name)).unwrap();
            writeln!(file, "SELECT 1;").unwrap();
        }
        fs::create_dir(dir.path().join("archive.sql")).unwrap();

        let files = discover_migrations(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["migration_20240101000000000.sql", "migration_20240201000000000.sql"]
        );
        assert_eq!(files[0].statements().unwrap(), vec!["SELECT 1"]);
    }

    #[test]
    fn test_missing_directory_has_no_migrations() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_migrations(&dir.path().join("missing")).unwrap().is_empty());
    }
}
