//! Column type tokens and their Postgres rendering.

use serde::{Deserialize, Serialize};

/// Semantic column type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Whole number stored as `numeric(11)`
    Int,
    BigInt,
    Float,
    Double,
    /// `numeric(precision, scale)`
    Decimal,
    Varchar,
    Text,
    Boolean,
    /// `timestamp(6)`
    Timestamp,
    Json,
    Uuid,
    /// Database enum type, see [`enum_type_name`](crate::schema::enum_type_name)
    Enum,
}

/// Length used when a length-bearing column declares none.
pub const DEFAULT_VARCHAR_LENGTH: u32 = 255;
pub const DEFAULT_NUMERIC_LENGTH: u32 = 11;
pub const DEFAULT_TIMESTAMP_PRECISION: u32 = 6;

impl ColumnType {
    /// The type name Postgres reports in `information_schema.columns.data_type`
    /// (after the driver's normalization) and the default length for it.
    pub fn sql_type(self) -> (&'static str, Option<u32>) {
        match self {
            ColumnType::Int => ("numeric", Some(DEFAULT_NUMERIC_LENGTH)),
            ColumnType::BigInt => ("bigint", None),
            ColumnType::Float => ("float4", None),
            ColumnType::Double => ("float8", None),
            ColumnType::Decimal => ("numeric", None),
            ColumnType::Varchar => ("character varying", Some(DEFAULT_VARCHAR_LENGTH)),
            ColumnType::Text => ("text", None),
            ColumnType::Boolean => ("boolean", None),
            ColumnType::Timestamp => ("timestamp", Some(DEFAULT_TIMESTAMP_PRECISION)),
            ColumnType::Json => ("json", None),
            ColumnType::Uuid => ("uuid", None),
            ColumnType::Enum => ("USER-DEFINED", None),
        }
    }
}

/// `UserOwner` / `userOwner` -> `user_owner`.
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).and_then(|p| chars.get(p));
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("User"), "user");
        assert_eq!(to_snake_case("userOwner"), "user_owner");
        assert_eq!(to_snake_case("OrderItem"), "order_item");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("created_at"), "created_at");
    }

    #[test]
    fn test_type_mapping_table() {
        assert_eq!(ColumnType::Int.sql_type(), ("numeric", Some(11)));
        assert_eq!(ColumnType::Varchar.sql_type(), ("character varying", Some(255)));
        assert_eq!(ColumnType::Timestamp.sql_type(), ("timestamp", Some(6)));
        assert_eq!(ColumnType::Boolean.sql_type(), ("boolean", None));
        assert_eq!(ColumnType::Enum.sql_type().0, "USER-DEFINED");
    }
}
