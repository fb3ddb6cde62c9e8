//! Entity registration, value objects and record serialization.

use std::sync::Arc;

use cheetah_orm::driver::mock::MockDriver;
use cheetah_orm::driver::Row;
use cheetah_orm::entity::{
    ColumnType, Email, Entity, EntityDescriptor, EntityStorage, IndexDescriptor, PropertyDescriptor, Record,
    RelationDescriptor, UuidValue, ValueObject,
};
use cheetah_orm::error::OrmError;
use cheetah_orm::query::{Filter, FindOptions};
use cheetah_orm::{Orm, Value, ValueMap};

struct Customer;

impl Entity for Customer {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("Customer")
            .schema("sales")
            .property(PropertyDescriptor::new("id", ColumnType::Uuid).primary().value_object::<UuidValue>())
            .property(PropertyDescriptor::new("email", ColumnType::Varchar).value_object::<Email>())
            .property(PropertyDescriptor::new("passwordHash", ColumnType::Text).hidden())
            .index(IndexDescriptor::new(["email", "passwordHash"]).named("[TABLE]_login"))
    }
}

struct Order;

impl Entity for Order {
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("PurchaseOrder")
            .schema("sales")
            .property(PropertyDescriptor::new("id", ColumnType::Int).primary().auto_increment())
            .relation(RelationDescriptor::many_to_one("customer", "Customer").nullable())
    }
}

fn storage() -> EntityStorage {
    let mut storage = EntityStorage::new();
    storage.register::<Customer>().unwrap();
    storage.register::<Order>().unwrap();
    storage
}

#[test]
fn test_registered_names_and_columns() {
    let storage = storage();
    let names: Vec<&str> = storage.entries().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["Customer", "PurchaseOrder"]);

    let customer = storage.require("Customer").unwrap();
    assert_eq!(customer.table_name(), "customer");
    assert_eq!(customer.column_for("passwordHash"), Some("password_hash"));
    assert_eq!(storage.require("PurchaseOrder").unwrap().table_name(), "purchase_order");
}

#[test]
fn test_composite_index_uses_columns() {
    let storage = storage();
    let snapshot = storage.snapshot(storage.require("Customer").unwrap()).unwrap();
    assert_eq!(snapshot.schema, "sales");
    let login = snapshot
        .indexes
        .iter()
        .find(|i| i.index_name == "customer_login")
        .unwrap();
    assert_eq!(login.columns, vec!["email", "password_hash"]);
}

#[test]
fn test_relation_column_follows_target_key() {
    let storage = storage();
    let snapshot = storage.snapshot(storage.require("PurchaseOrder").unwrap()).unwrap();
    let customer = snapshot.column("customer").unwrap();
    assert_eq!(customer.col_type, "uuid");
    assert!(customer.nullable);
    assert_eq!(customer.foreign_keys[0].referenced_table_name, "customer");
    assert_eq!(customer.foreign_keys[0].referenced_column_name, "id");

    let id = snapshot.column("id").unwrap();
    assert!(id.auto_increment);
    assert_eq!(id.default, None);
}

#[test]
fn test_unknown_relation_target() {
    let mut storage = EntityStorage::new();
    storage
        .add(
            EntityDescriptor::new("Comment")
                .property(PropertyDescriptor::new("id", ColumnType::Int).primary())
                .relation(RelationDescriptor::many_to_one("post", "Post")),
        )
        .unwrap();
    let err = storage.snapshot(storage.require("Comment").unwrap()).unwrap_err();
    assert!(matches!(err, OrmError::EntityNotFound(_)));
}

#[test]
fn test_value_objects() {
    assert!(Email::new("ana@example.com".to_string()).is_ok());
    assert!(Email::new("ana@".to_string()).is_err());

    let id = UuidValue::generate();
    let copy = UuidValue::from_value(id.clone().into_value()).unwrap();
    assert!(id.equals(&copy));
}

#[test]
fn test_invalid_value_object_blocks_insert() {
    let driver = Arc::new(MockDriver::new());
    let orm = Orm::new(driver.clone(), storage());
    let err = orm
        .repository("Customer")
        .unwrap()
        .create(
            ValueMap::new()
                .with("id", UuidValue::generate().into_value())
                .with("email", "not-an-email"),
        )
        .unwrap_err();
    assert!(matches!(err, OrmError::InvalidValue(_)));
    assert!(driver.executed().is_empty());
}

#[test]
fn test_record_json_hides_fields() {
    let storage = storage();
    let driver = Arc::new(MockDriver::new());
    driver.push_rows(vec![Row::new()
        .with("c1_id", "0b8f6fd5-6f2c-4c57-9c1b-0e7e0f3c5e2a")
        .with("c1_email", "ana@example.com")
        .with("c1_password_hash", "secret")]);
    let orm = Orm::new(driver, storage);

    let customer = orm
        .repository("Customer")
        .unwrap()
        .find_one_or_fail(Filter::new().eq("email", "ana@example.com"), FindOptions::new())
        .unwrap();
    assert_eq!(customer.get("passwordHash"), Some(&Value::from("secret")));

    let mut order = Record::new("PurchaseOrder");
    order.set("id", 7);
    order.set_relation("customer", cheetah_orm::entity::Related::One(Box::new(customer)));
    assert_eq!(
        order.to_json(orm.storage()).unwrap(),
        serde_json::json!({
            "id": 7,
            "customer": {
                "id": "0b8f6fd5-6f2c-4c57-9c1b-0e7e0f3c5e2a",
                "email": "ana@example.com"
            }
        })
    );
}
