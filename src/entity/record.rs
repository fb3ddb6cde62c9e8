//! Dynamic entity instances with change tracking.

use serde_json::Map;

use super::storage::EntityStorage;
use crate::error::OrmError;
use crate::value::{FromValue, Value, ValueMap};

/// Loaded relation slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Box<Record>),
    Many(Vec<Record>),
}

/// One row of an entity, keyed by field name.
///
/// A record keeps a snapshot of the last persisted values next to the current ones.
/// [`changed`](Record::changed) is the difference, which is what an update writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity: String,
    values: ValueMap,
    snapshot: ValueMap,
    persisted: bool,
    relations: Vec<(String, Related)>,
}

impl Record {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            values: ValueMap::new(),
            snapshot: ValueMap::new(),
            persisted: false,
            relations: Vec::new(),
        }
    }

    /// Fresh (not yet persisted) record holding `values`.
    pub fn with_values(entity: impl Into<String>, values: ValueMap) -> Self {
        let mut record = Self::new(entity);
        record.values = values;
        record
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Typed read. Missing fields read as `NULL`.
    pub fn get_as<T: FromValue>(&self, field: &str) -> Result<T, OrmError> {
        T::from_value(self.values.get(field).cloned().unwrap_or(Value::Null))
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field, value);
    }

    pub fn values(&self) -> &ValueMap {
        &self.values
    }

    /// Values as of the last load or save.
    pub fn snapshot(&self) -> &ValueMap {
        &self.snapshot
    }

    /// Fields whose value differs from the snapshot.
    pub fn changed(&self) -> ValueMap {
        self.values
            .iter()
            .filter(|(k, v)| self.snapshot.get(k) != Some(*v))
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.changed().is_empty()
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Accept the current values as the persisted state.
    pub fn mark_persisted(&mut self) {
        self.snapshot = self.values.clone();
        self.persisted = true;
    }

    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub(crate) fn relation_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.relations.iter_mut().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    /// The record loaded through a many-to-one relation.
    pub fn one(&self, name: &str) -> Option<&Record> {
        match self.relation(name) {
            Some(Related::One(r)) => Some(r),
            _ => None,
        }
    }

    /// Records loaded through a one-to-many relation; empty when not loaded.
    pub fn many(&self, name: &str) -> &[Record] {
        match self.relation(name) {
            Some(Related::Many(list)) => list,
            _ => &[],
        }
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &Related)> {
        self.relations.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub(crate) fn take_relations(&mut self) -> Vec<(String, Related)> {
        std::mem::take(&mut self.relations)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) {
        let name = name.into();
        match self.relation_mut(&name) {
            Some(slot) => *slot = related,
            None => self.relations.push((name, related)),
        }
    }

    /// Append to a one-to-many slot, creating it if needed.
    pub fn push_related(&mut self, name: &str, record: Record) {
        match self.relation_mut(name) {
            Some(Related::Many(list)) => list.push(record),
            _ => self.set_relation(name, Related::Many(vec![record])),
        }
    }

    /// JSON view of the record and its loaded relations, without hidden fields.
    pub fn to_json(&self, storage: &EntityStorage) -> Result<serde_json::Value, OrmError> {
        let descriptor = storage.require(&self.entity)?;
        let mut out = Map::new();
        for (field, value) in self.values.iter() {
            if descriptor.is_hidden(field) {
                continue;
            }
            out.insert(field.to_string(), value.to_json());
        }
        for (name, related) in &self.relations {
            let json = match related {
                Related::One(r) => r.to_json(storage)?,
                Related::Many(list) => serde_json::Value::Array(
                    list.iter()
                        .map(|r| r.to_json(storage))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
            };
            out.insert(name.clone(), json);
        }
        Ok(serde_json::Value::Object(out))
    }
}
