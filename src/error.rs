//! Error types shared by the registry, the statement compiler and the drivers.

use crate::connection::ConnectionError;
use may_postgres::Error as PostgresError;
use std::fmt;

/// Transport-level failures reported by a [`Driver`](crate::driver::Driver).
///
/// The core never classifies or retries these; they travel unchanged to the caller.
#[derive(Debug)]
pub enum DriverError {
    /// `PostgreSQL` error from `may_postgres`
    Postgres(PostgresError),
    /// Connection could not be established
    Connection(ConnectionError),
    /// A statement was issued before `connect()` or after `disconnect()`
    NotConnected,
    /// Statement execution failed
    Query(String),
    /// A returned column could not be decoded
    Parse(String),
    /// Anything else the driver wants to surface
    Other(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Postgres(e) => write!(f, "PostgreSQL error: {e}"),
            DriverError::Connection(e) => write!(f, "Connection error: {e}"),
            DriverError::NotConnected => write!(f, "Driver is not connected"),
            DriverError::Query(s) => write!(f, "Query error: {s}"),
            DriverError::Parse(s) => write!(f, "Parse error: {s}"),
            DriverError::Other(s) => write!(f, "Driver error: {s}"),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<PostgresError> for DriverError {
    fn from(err: PostgresError) -> Self {
        DriverError::Postgres(err)
    }
}

impl From<ConnectionError> for DriverError {
    fn from(err: ConnectionError) -> Self {
        DriverError::Connection(err)
    }
}

/// Errors raised while registering entities, building statements or reading results.
#[derive(Debug)]
pub enum OrmError {
    /// No entity registered under this name
    EntityNotFound(String),
    /// A relation name that the entity does not declare
    UnknownRelation { entity: String, relation: String },
    /// A field name that is neither a property nor a many-to-one relation of the entity
    UnknownProperty { entity: String, field: String },
    /// A relation needs the referenced entity's primary key, but it declares none
    MissingPrimaryKey(String),
    /// The descriptor breaks a registry invariant
    InvalidEntity(String),
    /// The filter expression cannot be compiled
    InvalidFilter(String),
    /// A dotted column path does not match any loaded relation
    JoinNotFound(String),
    /// Builder calls that contradict each other
    InvalidQuery(String),
    /// `find_one_or_fail` / `execute_and_return_first_or_fail` on an empty result
    NotFound,
    /// A value failed value-object validation or type conversion
    InvalidValue(String),
    /// Failure reported by the driver
    Driver(DriverError),
}

impl fmt::Display for OrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrmError::EntityNotFound(name) => write!(f, "Entity not found: {name}"),
            OrmError::UnknownRelation { entity, relation } => {
                write!(f, "Entity {entity} has no relation named '{relation}'")
            }
            OrmError::UnknownProperty { entity, field } => {
                write!(f, "Entity {entity} has no property named '{field}'")
            }
            OrmError::MissingPrimaryKey(table) => {
                write!(f, "Entity {table} does not have a primary key")
            }
            OrmError::InvalidEntity(msg) => write!(f, "Invalid entity declaration: {msg}"),
            OrmError::InvalidFilter(msg) => write!(f, "Invalid filter: {msg}"),
            OrmError::JoinNotFound(path) => write!(f, "Join not found for '{path}'"),
            OrmError::InvalidQuery(msg) => write!(f, "Invalid query: {msg}"),
            OrmError::NotFound => write!(f, "Result not found"),
            OrmError::InvalidValue(msg) => write!(f, "Invalid value: {msg}"),
            OrmError::Driver(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for OrmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrmError::Driver(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DriverError> for OrmError {
    fn from(err: DriverError) -> Self {
        OrmError::Driver(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orm_error_display() {
        assert_eq!(OrmError::NotFound.to_string(), "Result not found");
        assert_eq!(
            OrmError::MissingPrimaryKey("user".to_string()).to_string(),
            "Entity user does not have a primary key"
        );
        let err = OrmError::UnknownRelation {
            entity: "User".to_string(),
            relation: "posts".to_string(),
        };
        assert!(err.to_string().contains("posts"));
    }

    #[test]
    fn test_driver_error_wraps_into_orm_error() {
        let err: OrmError = DriverError::Query("syntax error".to_string()).into();
        assert!(matches!(err, OrmError::Driver(DriverError::Query(_))));
        assert_eq!(err.to_string(), "Query error: syntax error");
        assert!(std::error::Error::source(&err).is_some());
    }
}
