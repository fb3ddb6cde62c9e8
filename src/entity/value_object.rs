//! Value objects: validated wrappers around a single column value.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::error::OrmError;
use crate::value::{FromValue, Value};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z0-9.]+@[a-z0-9]+\.[a-z]+(\.[a-z]+)?$").expect("valid email regex")
});

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-f\d]{8}(-[a-f\d]{4}){4}[a-f\d]{8}$").expect("valid uuid regex")
});

/// Column constraints a value object enforces on top of its own validation.
///
/// For text, `max`/`min` bound the character count. For numbers they bound the value,
/// `precision` caps total digits and `scale` caps digits after the decimal point.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Limits {
    pub max: Option<f64>,
    pub min: Option<f64>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl Limits {
    pub fn check(&self, value: &Value) -> Result<(), OrmError> {
        match value {
            Value::Text(s) => {
                let len = s.chars().count() as f64;
                if let Some(max) = self.max.filter(|m| len > *m) {
                    return Err(OrmError::InvalidValue(format!("Value exceeds maximum length of {max}")));
                }
                if let Some(min) = self.min.filter(|m| len < *m) {
                    return Err(OrmError::InvalidValue(format!(
                        "Value is less than minimum length of {min}"
                    )));
                }
            }
            Value::Int(_) | Value::Float(_) | Value::Decimal(_) => {
                let repr = match value {
                    Value::Int(i) => i.to_string(),
                    Value::Float(f) => f.to_string(),
                    Value::Decimal(d) => d.normalize().to_string(),
                    _ => return Ok(()),
                };
                let number: f64 = repr.parse().unwrap_or_default();
                if let Some(max) = self.max.filter(|m| number > *m) {
                    return Err(OrmError::InvalidValue(format!("Value exceeds maximum value of {max}")));
                }
                if let Some(min) = self.min.filter(|m| number < *m) {
                    return Err(OrmError::InvalidValue(format!("Value is less than minimum value of {min}")));
                }
                let digits = repr.trim_start_matches('-');
                if let Some(precision) = self.precision {
                    if digits.replace('.', "").len() > precision as usize {
                        return Err(OrmError::InvalidValue(format!("Value exceeds precision of {precision}")));
                    }
                }
                if let Some(scale) = self.scale {
                    let decimals = digits.split_once('.').map_or(0, |(_, frac)| frac.len());
                    if decimals > scale as usize {
                        return Err(OrmError::InvalidValue(format!("Value exceeds scale of {scale}")));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// A typed, self-validating column value.
///
/// ```
/// use cheetah_orm::entity::{Email, ValueObject};
///
/// let email = Email::new("ana@example.com".to_string()).unwrap();
/// assert_eq!(email.value(), "ana@example.com");
/// assert!(Email::new("not-an-email".to_string()).is_err());
/// ```
pub trait ValueObject: Sized {
    type Inner: FromValue + Into<Value> + Clone + PartialEq;

    /// Type name used in error messages
    const NAME: &'static str;

    fn validate(value: &Self::Inner) -> bool;

    fn limits() -> Limits {
        Limits::default()
    }

    /// Wrap without validating. Used by [`new`](ValueObject::new) after the checks pass.
    fn wrap(value: Self::Inner) -> Self;

    fn value(&self) -> &Self::Inner;

    fn new(value: Self::Inner) -> Result<Self, OrmError> {
        if !Self::validate(&value) {
            return Err(OrmError::InvalidValue(format!("Invalid value for {}", Self::NAME)));
        }
        Self::limits().check(&value.clone().into())?;
        Ok(Self::wrap(value))
    }

    /// Rebuild from a stored column value, validating it again.
    fn from_value(value: Value) -> Result<Self, OrmError> {
        Self::new(<Self::Inner as FromValue>::from_value(value)?)
    }

    fn into_value(self) -> Value {
        self.value().clone().into()
    }

    fn equals(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

/// Type-erased validator stored on a property bound to a value object.
#[derive(Clone, Copy)]
pub struct ValueObjectHandle {
    pub name: &'static str,
    check: fn(Value) -> Result<Value, OrmError>,
}

impl ValueObjectHandle {
    pub fn of<V: ValueObject>() -> Self {
        Self {
            name: V::NAME,
            check: |value| V::from_value(value).map(V::into_value),
        }
    }

    /// Validate `value`; nulls pass through untouched.
    pub fn normalize(&self, value: Value) -> Result<Value, OrmError> {
        if value.is_null() {
            return Ok(value);
        }
        (self.check)(value)
    }
}

impl fmt::Debug for ValueObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueObjectHandle").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email(String);

impl ValueObject for Email {
    type Inner = String;
    const NAME: &'static str = "Email";

    fn validate(value: &String) -> bool {
        EMAIL_RE.is_match(value)
    }

    fn wrap(value: String) -> Self {
        Email(value)
    }

    fn value(&self) -> &String {
        &self.0
    }
}

/// UUID kept in its textual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidValue(String);

impl ValueObject for UuidValue {
    type Inner = String;
    const NAME: &'static str = "Uuid";

    fn validate(value: &String) -> bool {
        UUID_RE.is_match(value)
    }

    fn wrap(value: String) -> Self {
        UuidValue(value)
    }

    fn value(&self) -> &String {
        &self.0
    }
}

impl UuidValue {
    pub fn generate() -> Self {
        UuidValue(uuid::Uuid::new_v4().to_string())
    }
}
