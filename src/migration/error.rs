//! Migration-specific error types

use crate::error::{DriverError, OrmError};
use config::ConfigError;

/// Migration-specific errors
#[derive(Debug)]
pub enum MigrationError {
    /// Driver failure outside of a migration file (snapshot, bookkeeping table)
    Driver(DriverError),
    /// Entity registry failure while building the entity snapshot
    Orm(OrmError),
    /// Reading or writing the migration directory failed
    Io(std::io::Error),
    /// Project configuration could not be loaded
    Config(ConfigError),
    /// Malformed migration file name or bookkeeping statement
    InvalidFormat(String),
    /// A statement of a migration file failed during execution
    ExecutionFailed {
        file: String,
        statement: String,
        error: String,
    },
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Driver(e) => write!(f, "Database error: {}", e),
            MigrationError::Orm(e) => write!(f, "Entity error: {}", e),
            MigrationError::Io(e) => write!(f, "Migration directory error: {}", e),
            MigrationError::Config(e) => write!(f, "Configuration error: {}", e),
            MigrationError::InvalidFormat(msg) => write!(f, "Invalid migration format: {}", msg),
            MigrationError::ExecutionFailed {
                file,
                statement,
                error,
            } => {
                write!(
                    f,
                    "Migration '{}' failed during execution: {}\n\
                     Statement: {}\n\
                     The file was not recorded as applied.",
                    file, error, statement
                )
            }
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::Driver(e) => Some(e),
            MigrationError::Orm(e) => Some(e),
            MigrationError::Io(e) => Some(e),
            MigrationError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DriverError> for MigrationError {
    fn from(error: DriverError) -> Self {
        MigrationError::Driver(error)
    }
}

impl From<OrmError> for MigrationError {
    fn from(error: OrmError) -> Self {
        MigrationError::Orm(error)
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(error: std::io::Error) -> Self {
        MigrationError::Io(error)
    }
}

impl From<ConfigError> for MigrationError {
    fn from(error: ConfigError) -> Self {
        MigrationError::Config(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_failure_names_file_and_statement() {
        let err = MigrationError::ExecutionFailed {
            file: "migration_20240101120000000.sql".to_string(),
            statement: "DROP TABLE x".to_string(),
            error: "relation does not exist".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("migration_20240101120000000.sql"));
        assert!(message.contains("DROP TABLE x"));
        assert!(message.contains("relation does not exist"));
    }

    #[test]
    fn test_driver_error_converts() {
        let err: MigrationError = DriverError::NotConnected.into();
        assert!(matches!(err, MigrationError::Driver(DriverError::NotConnected)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
