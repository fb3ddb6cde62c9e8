//! Structured filter expressions.
//!
//! A [`Filter`] is an ordered list of `key -> condition` entries. Keys are field names,
//! relation names or the logical operators `$and` / `$or`:
//!
//! ```
//! use cheetah_orm::query::{Filter, Op};
//!
//! let filter = Filter::new()
//!     .op("id", Op::Gte, 1)
//!     .op("id", Op::Lte, 10)
//!     .relation("address", Filter::new().eq("city", "Lisbon"));
//!
//! let same = Filter::from_json(&serde_json::json!({
//!     "id": {"$gte": 1, "$lte": 10},
//!     "address": {"city": "Lisbon"}
//! })).unwrap();
//! assert_eq!(filter, same);
//! ```

use std::fmt;

use crate::error::OrmError;
use crate::value::Value;

/// Filter operators, in the order the compiler emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Eq,
    Ne,
    In,
    Nin,
    Like,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
}

impl Op {
    pub const ALL: [Op; 11] = [
        Op::Eq,
        Op::Ne,
        Op::In,
        Op::Nin,
        Op::Like,
        Op::Gt,
        Op::Gte,
        Op::Lt,
        Op::Lte,
        Op::And,
        Op::Or,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Op::Eq => "$eq",
            Op::Ne => "$ne",
            Op::In => "$in",
            Op::Nin => "$nin",
            Op::Like => "$like",
            Op::Gt => "$gt",
            Op::Gte => "$gte",
            Op::Lt => "$lt",
            Op::Lte => "$lte",
            Op::And => "$and",
            Op::Or => "$or",
        }
    }

    pub fn from_key(key: &str) -> Option<Op> {
        Op::ALL.into_iter().find(|op| op.key() == key)
    }

    pub fn is_operator(key: &str) -> bool {
        Op::from_key(key).is_some()
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Op::And | Op::Or)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Right-hand side of a filter entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Scalar; `$eq` unless the key is an operator
    Value(Value),
    /// Array; `$in` unless the key is an operator
    List(Vec<Value>),
    /// Operator map, or a sub-filter when the key names a relation
    Nested(Filter),
    /// Operands of `$and` / `$or`
    Group(Vec<Filter>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    entries: Vec<(String, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.entries.iter().map(|(k, c)| (k.as_str(), c))
    }

    pub fn get(&self, key: &str) -> Option<&Condition> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, c)| c)
    }

    /// Append a raw entry, replacing one with the same key.
    pub fn with(mut self, key: impl Into<String>, condition: Condition) -> Self {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = condition,
            None => self.entries.push((key, condition)),
        }
        self
    }

    /// `field = value`
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Condition::Value(value.into()))
    }

    /// `field IN (values)`
    pub fn is_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.with(field, Condition::List(values.into_iter().map(Into::into).collect()))
    }

    /// Add `op value` to the field's operator map.
    pub fn op(self, field: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.merge_operator(field.into(), op, Condition::Value(value.into()))
    }

    /// Add a list operator (`$in`, `$nin`) to the field's operator map.
    pub fn op_list<I, V>(self, field: impl Into<String>, op: Op, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let list = Condition::List(values.into_iter().map(Into::into).collect());
        self.merge_operator(field.into(), op, list)
    }

    /// Condition on a related entity.
    pub fn relation(self, name: impl Into<String>, filter: Filter) -> Self {
        self.with(name, Condition::Nested(filter))
    }

    pub fn or(self, filters: Vec<Filter>) -> Self {
        self.with(Op::Or.key(), Condition::Group(filters))
    }

    pub fn and(self, filters: Vec<Filter>) -> Self {
        self.with(Op::And.key(), Condition::Group(filters))
    }

    fn merge_operator(mut self, field: String, op: Op, condition: Condition) -> Self {
        let position = self.entries.iter().position(|(k, _)| *k == field);
        match position {
            Some(idx) => {
                let (_, existing) = self.entries.remove(idx);
                let nested = match existing {
                    Condition::Nested(map) => map,
                    Condition::Value(v) => Filter::new().with(Op::Eq.key(), Condition::Value(v)),
                    Condition::List(l) => Filter::new().with(Op::In.key(), Condition::List(l)),
                    Condition::Group(_) => Filter::new(),
                };
                self.entries
                    .insert(idx, (field, Condition::Nested(nested.with(op.key(), condition))));
            }
            None => {
                let nested = Filter::new().with(op.key(), condition);
                self.entries.push((field, Condition::Nested(nested)));
            }
        }
        self
    }

    /// Parse the JSON form. Key order is preserved.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, OrmError> {
        let object = json
            .as_object()
            .ok_or_else(|| OrmError::InvalidFilter(format!("expected an object, got {json}")))?;

        let mut filter = Filter::new();
        for (key, value) in object {
            let logical = Op::from_key(key).is_some_and(Op::is_logical);
            let condition = match value {
                serde_json::Value::Array(items) if logical => Condition::Group(
                    items
                        .iter()
                        .map(Filter::from_json)
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                serde_json::Value::Array(items) => Condition::List(items.iter().map(Value::from_json).collect()),
                serde_json::Value::Object(_) => Condition::Nested(Filter::from_json(value)?),
                scalar => Condition::Value(Value::from_json(scalar)),
            };
            filter.entries.push((key.clone(), condition));
        }
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_order() {
        let keys: Vec<&str> = Op::ALL.iter().map(|op| op.key()).collect();
        assert_eq!(
            keys,
            vec!["$eq", "$ne", "$in", "$nin", "$like", "$gt", "$gte", "$lt", "$lte", "$and", "$or"]
        );
        assert!(Op::is_operator("$nin"));
        assert!(!Op::is_operator("id"));
    }

    #[test]
    fn test_op_merges_into_field() {
        let filter = Filter::new().op("id", Op::Gte, 1).op("id", Op::Lte, 5);
        assert_eq!(filter.entries().count(), 1);
        match filter.get("id") {
            Some(Condition::Nested(map)) => {
                assert_eq!(map.get("$gte"), Some(&Condition::Value(Value::Int(1))));
                assert_eq!(map.get("$lte"), Some(&Condition::Value(Value::Int(5))));
            }
            other => panic!("unexpected condition {other:?}"),
        }
    }

    #[test]
    fn test_from_json_shapes() {
        let filter = Filter::from_json(&serde_json::json!({
            "id": [1, 2],
            "$or": [{"email": "a"}, {"email": null}],
            "name": {"$nin": ["x"]}
        }))
        .unwrap();

        assert_eq!(
            filter.get("id"),
            Some(&Condition::List(vec![Value::Int(1), Value::Int(2)]))
        );
        assert!(matches!(filter.get("$or"), Some(Condition::Group(g)) if g.len() == 2));
        let keys: Vec<&str> = filter.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["id", "$or", "name"]);
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        assert!(Filter::from_json(&serde_json::json!([1, 2])).is_err());
        assert!(Filter::from_json(&serde_json::json!({"$and": [1]})).is_err());
    }
}
