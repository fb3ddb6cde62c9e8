//! Turning result rows back into records.
//!
//! Every selected column is labelled `<alias>_<column>`. The alias routes the value to
//! the root record or to one of the joined records; joins then stitch the records
//! together along their relations.

use crate::driver::Row;
use crate::entity::{EntityStorage, Record, Related};
use crate::error::OrmError;
use crate::query::statement::JoinStatement;
use crate::value::Value;

/// Maps rows of one statement onto record graphs.
pub(crate) struct Hydrator<'a> {
    storage: &'a EntityStorage,
    root_alias: &'a str,
    root_entity: &'a str,
    joins: &'a [JoinStatement],
}

impl<'a> Hydrator<'a> {
    pub(crate) fn new(
        storage: &'a EntityStorage,
        root_alias: &'a str,
        root_entity: &'a str,
        joins: &'a [JoinStatement],
    ) -> Self {
        Self {
            storage,
            root_alias,
            root_entity,
            joins,
        }
    }

    /// The root record of `row`, with joined records attached.
    pub(crate) fn map_row(&self, row: &Row) -> Result<Record, OrmError> {
        let mut slots: Vec<(&str, Option<Record>)> = Vec::with_capacity(self.joins.len() + 1);
        slots.push((self.root_alias, Some(Record::new(self.root_entity))));
        for join in self.joins {
            slots.push((join.alias.as_str(), Some(Record::new(join.entity.as_str()))));
        }

        for (label, value) in row.iter() {
            let Some((alias, column)) = label.split_once('_') else {
                continue;
            };
            let Some(record) = slots
                .iter_mut()
                .find(|(a, _)| *a == alias)
                .and_then(|(_, r)| r.as_mut())
            else {
                continue;
            };
            let descriptor = self.storage.require(record.entity())?;
            let Some(field) = descriptor.field_for_column(column) else {
                continue;
            };
            let value = match descriptor.get_property(field).and_then(|p| p.value_object.as_ref()) {
                Some(handle) => handle.normalize(value.clone())?,
                None => value.clone(),
            };
            record.set(field, value);
        }

        // A LEFT JOIN without a match yields a NULL key; there is no record to attach.
        for (alias, slot) in slots.iter_mut().skip(1) {
            if let Some(record) = slot {
                if !self.has_identity(record)? {
                    log::trace!(target: "cheetah_orm", "no joined row for alias {alias}");
                    *slot = None;
                }
            }
        }

        for slot in slots.iter_mut().filter_map(|(_, r)| r.as_mut()) {
            slot.mark_persisted();
        }

        for join in self.joins.iter().rev() {
            let child = slots
                .iter_mut()
                .find(|(a, _)| *a == join.alias)
                .and_then(|(_, r)| r.take());
            let Some(parent) = slots
                .iter_mut()
                .find(|(a, _)| *a == join.origin_alias)
                .and_then(|(_, r)| r.as_mut())
            else {
                continue;
            };
            match (child, join.many) {
                (Some(child), true) => parent.push_related(&join.property, child),
                (Some(child), false) => parent.set_relation(join.property.as_str(), Related::One(Box::new(child))),
                (None, true) if parent.relation(&join.property).is_none() => {
                    parent.set_relation(join.property.as_str(), Related::Many(Vec::new()));
                }
                (None, _) => {}
            }
        }

        slots
            .into_iter()
            .next()
            .and_then(|(_, r)| r)
            .ok_or_else(|| OrmError::InvalidValue("row produced no root record".to_string()))
    }

    /// Map every row, folding rows that repeat a root key into one record.
    pub(crate) fn map_rows(&self, rows: &[Row]) -> Result<Vec<Record>, OrmError> {
        let mut records: Vec<Record> = Vec::with_capacity(rows.len());
        for row in rows {
            let record = self.map_row(row)?;
            let existing = match self.key_of(&record)? {
                Some(key) => records.iter().position(|r| {
                    self.key_of(r)
                        .ok()
                        .flatten()
                        .is_some_and(|k| k.loosely_eq(&key))
                }),
                None => None,
            };
            match existing {
                Some(idx) => merge_records(self.storage, &mut records[idx], record)?,
                None => records.push(record),
            }
        }
        Ok(records)
    }

    fn key_of(&self, record: &Record) -> Result<Option<Value>, OrmError> {
        primary_value(self.storage, record)
    }

    fn has_identity(&self, record: &Record) -> Result<bool, OrmError> {
        let descriptor = self.storage.require(record.entity())?;
        Ok(match descriptor.primary_key() {
            Some(pk) => record.get(&pk.name).is_some_and(|v| !v.is_null()),
            None => record.values().iter().any(|(_, v)| !v.is_null()),
        })
    }
}

/// Value of the record's primary key, if the entity has one and it is set.
pub(crate) fn primary_value(storage: &EntityStorage, record: &Record) -> Result<Option<Value>, OrmError> {
    let descriptor = storage.require(record.entity())?;
    Ok(descriptor
        .primary_key()
        .and_then(|pk| record.get(&pk.name))
        .filter(|v| !v.is_null())
        .cloned())
}

/// Fold `incoming` into `existing`; both describe the same entity row.
fn merge_records(storage: &EntityStorage, existing: &mut Record, mut incoming: Record) -> Result<(), OrmError> {
    for (name, related) in incoming.take_relations() {
        match related {
            Related::One(child) => match existing.relation_mut(&name) {
                Some(Related::One(current)) => {
                    if same_row(storage, current, &child)? {
                        merge_records(storage, current, *child)?;
                    }
                }
                _ => existing.set_relation(name, Related::One(child)),
            },
            Related::Many(children) => {
                if existing.relation(&name).is_none() {
                    existing.set_relation(name.as_str(), Related::Many(Vec::new()));
                }
                for child in children {
                    let Some(Related::Many(list)) = existing.relation_mut(&name) else {
                        break;
                    };
                    let mut target = None;
                    for (idx, current) in list.iter().enumerate() {
                        if same_row(storage, current, &child)? {
                            target = Some(idx);
                            break;
                        }
                    }
                    match target {
                        Some(idx) => merge_records(storage, &mut list[idx], child)?,
                        None => list.push(child),
                    }
                }
            }
        }
    }
    Ok(())
}

fn same_row(storage: &EntityStorage, a: &Record, b: &Record) -> Result<bool, OrmError> {
    if a.entity() != b.entity() {
        return Ok(false);
    }
    Ok(match (primary_value(storage, a)?, primary_value(storage, b)?) {
        (Some(x), Some(y)) => x.loosely_eq(&y),
        _ => a.values() == b.values(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ColumnType, EntityDescriptor, PropertyDescriptor, RelationDescriptor};

    fn storage() -> EntityStorage {
        let mut storage = EntityStorage::new();
        storage
            .add(
                EntityDescriptor::new("User")
                    .property(PropertyDescriptor::new("id", ColumnType::Int).primary())
                    .property(PropertyDescriptor::new("createdAt", ColumnType::Timestamp).nullable())
                    .relation(RelationDescriptor::one_to_many("addresses", "Address", "user")),
            )
            .unwrap();
        storage
            .add(
                EntityDescriptor::new("Address")
                    .property(PropertyDescriptor::new("id", ColumnType::Int).primary())
                    .property(PropertyDescriptor::new("street", ColumnType::Varchar))
                    .relation(RelationDescriptor::many_to_one("user", "User")),
            )
            .unwrap();
        storage
    }

    fn address_join() -> JoinStatement {
        JoinStatement {
            path: "addresses".to_string(),
            origin_alias: "u1".to_string(),
            property: "addresses".to_string(),
            entity: "Address".to_string(),
            schema: "public".to_string(),
            table: "address".to_string(),
            alias: "a1".to_string(),
            on: r#"a1."user" = u1."id""#.to_string(),
            many: true,
        }
    }

    #[test]
    fn test_columns_route_by_alias() {
        let storage = storage();
        let joins = vec![address_join()];
        let hydrator = Hydrator::new(&storage, "u1", "User", &joins);
        let row = Row::new()
            .with("u1_id", 1)
            .with("u1_created_at", Value::Null)
            .with("a1_id", 10)
            .with("a1_street", "Main")
            .with("a1_user", 1);

        let user = hydrator.map_row(&row).unwrap();
        assert_eq!(user.get("id"), Some(&Value::Int(1)));
        assert!(user.values().contains_key("createdAt"));
        assert!(user.is_persisted());
        let addresses = user.many("addresses");
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].get("street"), Some(&Value::from("Main")));
        assert_eq!(addresses[0].get("user"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_null_join_key_creates_no_child() {
        let storage = storage();
        let joins = vec![address_join()];
        let hydrator = Hydrator::new(&storage, "u1", "User", &joins);
        let row = Row::new().with("u1_id", 1).with("a1_id", Value::Null).with("a1_street", Value::Null);
        let user = hydrator.map_row(&row).unwrap();
        assert!(user.many("addresses").is_empty());
        assert!(matches!(user.relation("addresses"), Some(Related::Many(list)) if list.is_empty()));
    }

    #[test]
    fn test_rows_sharing_root_key_are_merged() {
        let storage = storage();
        let joins = vec![address_join()];
        let hydrator = Hydrator::new(&storage, "u1", "User", &joins);
        let rows = vec![
            Row::new().with("u1_id", 1).with("a1_id", 10),
            Row::new().with("u1_id", 1).with("a1_id", 11),
            Row::new().with("u1_id", 2).with("a1_id", Value::Null),
        ];
        let users = hydrator.map_rows(&rows).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].many("addresses").len(), 2);
        assert!(users[1].many("addresses").is_empty());
    }
}
