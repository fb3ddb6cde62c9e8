//! Scoped transactions over a [`Driver`].
//!
//! Begin, commit and rollback are delegated to the driver. There are no savepoints:
//! nesting `in_transaction` issues a second `BEGIN`, which Postgres ignores with a
//! warning.

use crate::driver::Driver;
use crate::error::DriverError;

/// Run `f` between `BEGIN` and `COMMIT`.
///
/// On `Err` the transaction is rolled back and the closure's error is returned. A
/// failing rollback is logged and does not replace that error.
///
/// ```
/// use cheetah_orm::driver::mock::MockDriver;
/// use cheetah_orm::error::OrmError;
/// use cheetah_orm::transaction::in_transaction;
///
/// let driver = MockDriver::new();
/// let result: Result<(), OrmError> = in_transaction(&driver, || Err(OrmError::NotFound));
/// assert!(result.is_err());
/// assert_eq!(driver.executed(), vec!["BEGIN", "ROLLBACK"]);
/// ```
pub fn in_transaction<T, E, F>(driver: &dyn Driver, f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: From<DriverError>,
{
    driver.start_transaction()?;
    match f() {
        Ok(value) => {
            driver.commit_transaction()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = driver.rollback_transaction() {
                log::warn!(target: "cheetah_orm", "rollback failed: {rollback}");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use crate::error::OrmError;

    #[test]
    fn test_commit_on_success() {
        let driver = MockDriver::new();
        let value: Result<i32, OrmError> = in_transaction(&driver, || {
            driver.execute_sql("INSERT 1")?;
            Ok(7)
        });
        assert_eq!(value.unwrap(), 7);
        assert_eq!(driver.executed(), vec!["BEGIN", "INSERT 1", "COMMIT"]);
    }

    #[test]
    fn test_rollback_keeps_original_error() {
        let driver = MockDriver::new();
        driver.fail_when("ROLLBACK");
        let result: Result<(), OrmError> = in_transaction(&driver, || Err(OrmError::NotFound));
        assert!(matches!(result, Err(OrmError::NotFound)));
        assert_eq!(driver.executed(), vec!["BEGIN", "ROLLBACK"]);
    }

    #[test]
    fn test_failed_begin_skips_closure() {
        let driver = MockDriver::new();
        driver.fail_when("BEGIN");
        let mut called = false;
        let result: Result<(), OrmError> = in_transaction(&driver, || {
            called = true;
            Ok(())
        });
        assert!(matches!(result, Err(OrmError::Driver(_))));
        assert!(!called);
    }
}
