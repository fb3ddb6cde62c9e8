//! Entity metadata registry, records and value objects.

pub mod descriptor;
pub mod record;
pub mod storage;
pub mod types;
pub mod value_object;

pub use descriptor::{
    DefaultValue, EntityDescriptor, Hook, HookFn, HookPhase, IndexDescriptor, PropertyDescriptor,
    RelationDescriptor, RelationKind, ValueProvider,
};
pub use record::{Record, Related};
pub use storage::{Entity, EntityStorage};
pub use types::{to_snake_case, ColumnType};
pub use value_object::{Email, Limits, UuidValue, ValueObject, ValueObjectHandle};
