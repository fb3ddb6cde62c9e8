//! Registry of entity descriptors and the entity side of schema snapshots.

use std::collections::HashSet;

use super::descriptor::{EntityDescriptor, IndexDescriptor, PropertyDescriptor, RelationDescriptor, RelationKind};
use crate::error::OrmError;
use crate::schema::{ColumnInfo, ForeignKeyInfo, IndexInfo, SnapshotTable};

/// Types that describe themselves for registration.
pub trait Entity {
    fn descriptor() -> EntityDescriptor;
}

/// Keyed store of registered entities, in registration order.
///
/// Populated at start-up; afterwards it is shared read-only behind an `Arc`.
#[derive(Debug, Default, Clone)]
pub struct EntityStorage {
    entities: Vec<EntityDescriptor>,
}

impl EntityStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an entity.
    ///
    /// Fills in the table name, expands `[TABLE]` in index names, adds the
    /// `<table>_pkey` and per-property indexes, and validates enum declarations.
    pub fn add(&mut self, descriptor: EntityDescriptor) -> Result<(), OrmError> {
        let descriptor = normalize(descriptor)?;
        match self.entities.iter_mut().find(|e| e.name == descriptor.name) {
            Some(existing) => *existing = descriptor,
            None => self.entities.push(descriptor),
        }
        Ok(())
    }

    pub fn register<E: Entity>(&mut self) -> Result<(), OrmError> {
        self.add(E::descriptor())
    }

    pub fn get(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Like [`get`](Self::get), but a missing entity is an error.
    pub fn require(&self, name: &str) -> Result<&EntityDescriptor, OrmError> {
        self.get(name)
            .ok_or_else(|| OrmError::EntityNotFound(name.to_string()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The related entity's descriptor.
    pub fn target(&self, relation: &RelationDescriptor) -> Result<&EntityDescriptor, OrmError> {
        self.require(&relation.target)
    }

    /// Field on the relation's target that the join matches against.
    ///
    /// An explicit `fk_key` wins. Otherwise a one-to-many relation looks for the
    /// target's many-to-one relation pointing back at `owner`; failing that, and for
    /// many-to-one relations, the target's primary key is used.
    pub fn fk_key(&self, owner: &EntityDescriptor, relation: &RelationDescriptor) -> Result<String, OrmError> {
        if let Some(fk) = &relation.fk_key {
            return Ok(fk.clone());
        }
        let target = self.target(relation)?;
        if relation.kind == RelationKind::OneToMany {
            if let Some(back) = target
                .relations
                .iter()
                .find(|r| r.kind == RelationKind::ManyToOne && r.target == owner.name)
            {
                return Ok(back.property.clone());
            }
        }
        target
            .primary_key()
            .map(|p| p.name.clone())
            .ok_or_else(|| OrmError::MissingPrimaryKey(target.table_name()))
    }

    /// Column on the relation's target that the join matches against.
    pub fn fk_column(&self, owner: &EntityDescriptor, relation: &RelationDescriptor) -> Result<String, OrmError> {
        let key = self.fk_key(owner, relation)?;
        let target = self.target(relation)?;
        Ok(target.require_column(&key)?.to_string())
    }

    /// Project a descriptor into a dialect-neutral table description.
    pub fn snapshot(&self, descriptor: &EntityDescriptor) -> Result<SnapshotTable, OrmError> {
        let table_name = descriptor.table_name();
        let mut columns: Vec<ColumnInfo> = descriptor.properties.iter().map(property_column).collect();

        for relation in descriptor
            .relations
            .iter()
            .filter(|r| r.kind == RelationKind::ManyToOne)
        {
            columns.push(self.relation_column(descriptor, relation)?);
        }

        let indexes = descriptor
            .indexes
            .iter()
            .map(|index| IndexInfo {
                table: table_name.clone(),
                index_name: index.name.clone().unwrap_or_default(),
                columns: index.properties.clone(),
            })
            .collect();

        Ok(SnapshotTable {
            table_name,
            schema: descriptor.schema.clone(),
            columns,
            indexes,
        })
    }

    fn relation_column(&self, owner: &EntityDescriptor, relation: &RelationDescriptor) -> Result<ColumnInfo, OrmError> {
        let target = self.target(relation)?;
        let fk_key = self.fk_key(owner, relation)?;
        let referenced = target.get_property(&fk_key).ok_or_else(|| {
            OrmError::InvalidEntity(format!(
                "{}.{} references unknown field {}.{}",
                owner.name, relation.property, target.name, fk_key
            ))
        })?;

        // A serial key is an `integer` column; the referencing side must not be serial itself.
        let (col_type, length, scale) = if referenced.auto_increment {
            ("integer".to_string(), None, None)
        } else {
            column_type(referenced)
        };

        Ok(ColumnInfo {
            name: relation.column_name.clone(),
            col_type,
            length,
            scale,
            nullable: relation.nullable,
            default: None,
            primary: false,
            unique: relation.unique.then_some(true),
            auto_increment: false,
            enum_items: None,
            foreign_keys: vec![ForeignKeyInfo::new(target.table_name(), referenced.column_name.clone())],
        })
    }
}

/// SQL type, length and scale for a property.
pub(crate) fn column_type(property: &PropertyDescriptor) -> (String, Option<u32>, Option<u32>) {
    let (sql_type, default_length) = property.effective_type().sql_type();
    let length = match sql_type {
        "numeric" if property.precision.is_some() => property.precision,
        "numeric" | "character varying" | "timestamp" => property.length.or(default_length),
        _ => None,
    };
    let scale = if sql_type == "numeric" { property.scale } else { None };
    (sql_type.to_string(), length, scale)
}

fn property_column(property: &PropertyDescriptor) -> ColumnInfo {
    let (col_type, length, scale) = column_type(property);
    ColumnInfo {
        name: property.column_name.clone(),
        col_type,
        length,
        scale,
        nullable: property.nullable,
        default: if property.auto_increment {
            None
        } else {
            property.default.as_ref().and_then(|d| d.to_sql())
        },
        primary: property.primary,
        unique: (property.unique || property.primary).then_some(true),
        auto_increment: property.auto_increment,
        enum_items: property.is_enum().then(|| property.enum_items.clone()),
        foreign_keys: Vec::new(),
    }
}

fn normalize(mut descriptor: EntityDescriptor) -> Result<EntityDescriptor, OrmError> {
    let table = descriptor.table_name();
    descriptor.table_name = Some(table.clone());

    let mut seen = HashSet::new();
    for property in &descriptor.properties {
        if !seen.insert(property.name.as_str()) {
            return Err(OrmError::InvalidEntity(format!(
                "{} declares property '{}' twice",
                descriptor.name, property.name
            )));
        }
        if property.is_enum() && property.enum_items.is_empty() {
            return Err(OrmError::InvalidEntity(format!(
                "{}.{} is an enum without items",
                descriptor.name, property.name
            )));
        }
        if !property.enum_items.is_empty() && !property.is_enum() {
            return Err(OrmError::InvalidEntity(format!(
                "{}.{} has enum items but is not an enum column",
                descriptor.name, property.name
            )));
        }
    }

    let mut indexes: Vec<IndexDescriptor> = descriptor
        .properties
        .iter()
        .filter(|p| p.primary)
        .map(|p| IndexDescriptor::new([p.column_name.clone()]).named(format!("{table}_pkey")))
        .collect();

    for index in &descriptor.indexes {
        let name = match &index.name {
            Some(name) => name.replace("[TABLE]", &table),
            None => format!("{}_index", index.properties.join("_")),
        };
        let columns = index
            .properties
            .iter()
            .map(|p| descriptor.require_column(p).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;
        indexes.push(IndexDescriptor::new(columns).named(name));
    }

    for property in descriptor.properties.iter().filter(|p| p.index) {
        indexes.push(
            IndexDescriptor::new([property.column_name.clone()]).named(format!("{}_index", property.name)),
        );
    }

    let mut names = HashSet::new();
    indexes.retain(|index| names.insert(index.name.clone()));
    descriptor.indexes = indexes;
    Ok(descriptor)
}
