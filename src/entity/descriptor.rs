//! Declarative entity metadata: properties, relations, indexes and hooks.
//!
//! Descriptors are plain values built once at start-up and handed to
//! [`EntityStorage`](super::EntityStorage).
//!
//! ```
//! use cheetah_orm::entity::{ColumnType, EntityDescriptor, PropertyDescriptor, RelationDescriptor};
//!
//! let address = EntityDescriptor::new("Address")
//!     .property(PropertyDescriptor::new("id", ColumnType::Int).primary())
//!     .property(PropertyDescriptor::new("street", ColumnType::Varchar))
//!     .relation(RelationDescriptor::many_to_one("user", "User"));
//! assert_eq!(address.table_name(), "address");
//! ```

use std::fmt;

use super::record::Record;
use super::types::{to_snake_case, ColumnType};
use super::value_object::{ValueObject, ValueObjectHandle};
use crate::error::OrmError;
use crate::value::Value;

/// Zero-argument value producer used for defaults and `on_insert` / `on_update`.
pub type ValueProvider = fn() -> Value;

/// Column default.
#[derive(Clone)]
pub enum DefaultValue {
    /// Literal written into inserts and into the DDL
    Value(Value),
    /// Computed in the application at insert time
    Provider(ValueProvider),
    /// Raw SQL expression left to the database (`now()`, `gen_random_uuid()`)
    Expression(String),
}

impl DefaultValue {
    /// The value an insert should carry for an unset field, if the application supplies one.
    pub fn evaluate(&self) -> Option<Value> {
        match self {
            DefaultValue::Value(v) => Some(v.clone()),
            DefaultValue::Provider(f) => Some(f()),
            DefaultValue::Expression(_) => None,
        }
    }

    /// The `DEFAULT` clause body for DDL, if the database owns the default.
    pub fn to_sql(&self) -> Option<String> {
        match self {
            DefaultValue::Value(v) => Some(v.to_sql_literal()),
            DefaultValue::Provider(_) => None,
            DefaultValue::Expression(expr) => Some(expr.clone()),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            DefaultValue::Provider(_) => f.write_str("Provider(..)"),
            DefaultValue::Expression(e) => f.debug_tuple("Expression").field(e).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    pub column_name: String,
    pub column_type: ColumnType,
    /// Explicit database type; wins over `column_type`
    pub db_type: Option<ColumnType>,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub unique: bool,
    pub primary: bool,
    pub auto_increment: bool,
    /// Left out of serialized output
    pub hidden: bool,
    /// Adds a single-column `<property>_index`
    pub index: bool,
    pub enum_items: Vec<String>,
    pub on_insert: Option<ValueProvider>,
    pub on_update: Option<ValueProvider>,
    pub value_object: Option<ValueObjectHandle>,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        Self {
            column_name: to_snake_case(&name),
            name,
            column_type,
            db_type: None,
            nullable: false,
            default: None,
            length: None,
            precision: None,
            scale: None,
            unique: false,
            primary: false,
            auto_increment: false,
            hidden: false,
            index: false,
            enum_items: Vec::new(),
            on_insert: None,
            on_update: None,
            value_object: None,
        }
    }

    /// Primary key; implies `unique`.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.unique = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn column(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = column_name.into();
        self
    }

    pub fn db_type(mut self, db_type: ColumnType) -> Self {
        self.db_type = Some(db_type);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    pub fn default_with(mut self, provider: ValueProvider) -> Self {
        self.default = Some(DefaultValue::Provider(provider));
        self
    }

    pub fn default_sql(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(DefaultValue::Expression(expression.into()));
        self
    }

    /// Database enum column restricted to `items`.
    pub fn enum_items<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_items = items.into_iter().map(Into::into).collect();
        self.db_type = Some(ColumnType::Enum);
        self
    }

    pub fn on_insert(mut self, provider: ValueProvider) -> Self {
        self.on_insert = Some(provider);
        self
    }

    pub fn on_update(mut self, provider: ValueProvider) -> Self {
        self.on_update = Some(provider);
        self
    }

    /// Validate writes and reads of this property through `V`.
    pub fn value_object<V: ValueObject>(mut self) -> Self {
        self.value_object = Some(ValueObjectHandle::of::<V>());
        if let Some(max) = V::limits().max {
            if self.length.is_none() && matches!(self.effective_type(), ColumnType::Varchar) {
                self.length = Some(max as u32);
            }
        }
        self
    }

    pub fn effective_type(&self) -> ColumnType {
        self.db_type.unwrap_or(self.column_type)
    }

    pub fn is_enum(&self) -> bool {
        self.effective_type() == ColumnType::Enum
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToMany,
    ManyToOne,
}

#[derive(Debug, Clone)]
pub struct RelationDescriptor {
    pub kind: RelationKind,
    /// Field on the owning entity that holds the related record(s)
    pub property: String,
    /// Registered name of the related entity, resolved lazily
    pub target: String,
    /// Field on the other side of the join; `None` means the target's primary key
    pub fk_key: Option<String>,
    /// Local foreign-key column (many-to-one only)
    pub column_name: String,
    pub nullable: bool,
    pub unique: bool,
}

impl RelationDescriptor {
    pub fn many_to_one(property: impl Into<String>, target: impl Into<String>) -> Self {
        let property = property.into();
        Self {
            kind: RelationKind::ManyToOne,
            column_name: to_snake_case(&property),
            property,
            target: target.into(),
            fk_key: None,
            nullable: false,
            unique: false,
        }
    }

    /// `fk_key` names the field on `target` that points back at this entity.
    pub fn one_to_many(
        property: impl Into<String>,
        target: impl Into<String>,
        fk_key: impl Into<String>,
    ) -> Self {
        let property = property.into();
        Self {
            kind: RelationKind::OneToMany,
            column_name: to_snake_case(&property),
            property,
            target: target.into(),
            fk_key: Some(fk_key.into()),
            nullable: false,
            unique: false,
        }
    }

    pub fn fk_key(mut self, fk_key: impl Into<String>) -> Self {
        self.fk_key = Some(fk_key.into());
        self
    }

    pub fn column(mut self, column_name: impl Into<String>) -> Self {
        self.column_name = column_name.into();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Composite index. The name defaults to `<a>_<b>_index`; `[TABLE]` in an explicit
/// name expands to the table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: Option<String>,
    pub properties: Vec<String>,
}

impl IndexDescriptor {
    pub fn new<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            properties: properties.into_iter().map(Into::into).collect(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
}

pub type HookFn = fn(&mut Record);

#[derive(Clone)]
pub struct Hook {
    pub phase: HookPhase,
    pub name: String,
    pub callback: HookFn,
}

impl Hook {
    pub fn new(phase: HookPhase, name: impl Into<String>, callback: HookFn) -> Self {
        Self {
            phase,
            name: name.into(),
            callback,
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("phase", &self.phase)
            .field("name", &self.name)
            .finish()
    }
}

/// Everything the ORM knows about one mapped entity.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub name: String,
    pub table_name: Option<String>,
    pub schema: String,
    pub properties: Vec<PropertyDescriptor>,
    pub relations: Vec<RelationDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    pub hooks: Vec<Hook>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            schema: "public".to_string(),
            properties: Vec::new(),
            relations: Vec::new(),
            indexes: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn hook(mut self, phase: HookPhase, name: impl Into<String>, callback: HookFn) -> Self {
        self.hooks.push(Hook::new(phase, name, callback));
        self
    }

    /// Table name, defaulting to the snake-cased entity name.
    pub fn table_name(&self) -> String {
        self.table_name
            .clone()
            .unwrap_or_else(|| to_snake_case(&self.name))
    }

    pub fn get_property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn get_relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.property == name)
    }

    pub fn primary_key(&self) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.primary)
    }

    /// Column for a property, a many-to-one relation, or a raw column name.
    pub fn column_for(&self, field: &str) -> Option<&str> {
        if let Some(p) = self.get_property(field) {
            return Some(&p.column_name);
        }
        if let Some(r) = self
            .get_relation(field)
            .filter(|r| r.kind == RelationKind::ManyToOne)
        {
            return Some(&r.column_name);
        }
        self.properties
            .iter()
            .map(|p| p.column_name.as_str())
            .chain(
                self.relations
                    .iter()
                    .filter(|r| r.kind == RelationKind::ManyToOne)
                    .map(|r| r.column_name.as_str()),
            )
            .find(|c| *c == field)
    }

    /// [`column_for`](Self::column_for), or [`OrmError::UnknownProperty`] for a name the
    /// entity does not declare. Only resolved names ever reach SQL text.
    pub fn require_column(&self, field: &str) -> Result<&str, OrmError> {
        self.column_for(field).ok_or_else(|| OrmError::UnknownProperty {
            entity: self.name.clone(),
            field: field.to_string(),
        })
    }

    /// Field name owning a column; the inverse of [`column_for`](Self::column_for).
    pub fn field_for_column(&self, column: &str) -> Option<&str> {
        let matches = |c: &str| c == column || c.eq_ignore_ascii_case(column);
        self.properties
            .iter()
            .find(|p| matches(&p.column_name))
            .map(|p| p.name.as_str())
            .or_else(|| {
                self.relations
                    .iter()
                    .filter(|r| r.kind == RelationKind::ManyToOne)
                    .find(|r| matches(&r.column_name))
                    .map(|r| r.property.as_str())
            })
    }

    /// Every column selected when no explicit field list is given: properties, then
    /// many-to-one foreign keys.
    pub fn selectable_columns(&self) -> Vec<&str> {
        self.properties
            .iter()
            .map(|p| p.column_name.as_str())
            .chain(
                self.relations
                    .iter()
                    .filter(|r| r.kind == RelationKind::ManyToOne)
                    .map(|r| r.column_name.as_str()),
            )
            .collect()
    }

    pub fn hooks_for(&self, phase: HookPhase) -> impl Iterator<Item = &Hook> {
        self.hooks.iter().filter(move |h| h.phase == phase)
    }

    pub fn is_hidden(&self, field: &str) -> bool {
        self.get_property(field).is_some_and(|p| p.hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> EntityDescriptor {
        EntityDescriptor::new("UserAccount")
            .property(PropertyDescriptor::new("id", ColumnType::Int).primary())
            .property(PropertyDescriptor::new("createdAt", ColumnType::Timestamp))
            .property(PropertyDescriptor::new("password", ColumnType::Varchar).hidden())
            .relation(RelationDescriptor::many_to_one("mainAddress", "Address"))
    }

    #[test]
    fn test_defaults_from_names() {
        let desc = user();
        assert_eq!(desc.table_name(), "user_account");
        assert_eq!(desc.schema, "public");
        assert_eq!(desc.column_for("createdAt"), Some("created_at"));
        assert_eq!(desc.column_for("mainAddress"), Some("main_address"));
        assert_eq!(desc.column_for("created_at"), Some("created_at"));
        assert_eq!(desc.column_for("missing"), None);
    }

    #[test]
    fn test_field_for_column() {
        let desc = user();
        assert_eq!(desc.field_for_column("created_at"), Some("createdAt"));
        assert_eq!(desc.field_for_column("main_address"), Some("mainAddress"));
        assert_eq!(desc.selectable_columns(), vec!["id", "created_at", "password", "main_address"]);
    }

    #[test]
    fn test_primary_implies_unique() {
        let desc = user();
        let pk = desc.primary_key().unwrap();
        assert!(pk.unique);
        assert_eq!(pk.name, "id");
        assert!(desc.is_hidden("password"));
    }

    #[test]
    fn test_enum_items_set_db_type() {
        let prop = PropertyDescriptor::new("role", ColumnType::Varchar).enum_items(["admin", "user"]);
        assert!(prop.is_enum());
        assert_eq!(prop.enum_items, vec!["admin", "user"]);
    }

    #[test]
    fn test_default_value_evaluation() {
        let literal = DefaultValue::Value(Value::from("guest"));
        assert_eq!(literal.evaluate(), Some(Value::from("guest")));
        assert_eq!(literal.to_sql().as_deref(), Some("'guest'"));

        let provided = DefaultValue::Provider(|| Value::Int(7));
        assert_eq!(provided.evaluate(), Some(Value::Int(7)));
        assert_eq!(provided.to_sql(), None);

        let expr = DefaultValue::Expression("now()".to_string());
        assert_eq!(expr.evaluate(), None);
        assert_eq!(expr.to_sql().as_deref(), Some("now()"));
    }
}
