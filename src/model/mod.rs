//! Model registration: the `DataModel` trait, named queries, hooks and the per-model descriptor.

mod descriptor;
pub mod hooks;
mod query;

pub use descriptor::{ModelDescriptor, ModelDescriptorBuilder};
pub use hooks::{hook_fn, HookFn, HookPayload, HookRegistry, ModelMethod};
pub use query::{NamedQuery, QueryCondition, ReturnKind};

use crate::error::{AppError, StoreError};
use crate::store::Record;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Identity field used when a model does not declare its own.
pub const DEFAULT_ID_FIELD: &str = "_id";

/// A persistable entity. Serialization must round-trip through a JSON object; fields
/// missing from stored records should carry `#[serde(default)]`.
pub trait DataModel: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    fn table_name() -> &'static str;

    fn id_fields() -> Vec<String> {
        vec![DEFAULT_ID_FIELD.to_string()]
    }

    fn queries() -> Vec<NamedQuery> {
        Vec::new()
    }

    /// Methods with the hook signature. Those named `Kx<Hook>` are registered as implicit hooks.
    fn methods() -> Vec<ModelMethod<Self>> {
        Vec::new()
    }
}

pub fn to_record<M: Serialize>(model: &M) -> Result<Record, AppError> {
    match serde_json::to_value(model)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Input(format!("model must serialize to an object, got {}", other))),
    }
}

pub fn from_record<M: DeserializeOwned>(record: Record) -> Result<M, AppError> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

/// Decodes a row read from a store. A mismatch is a store-side failure, not a client error.
pub fn from_row<M: DeserializeOwned>(row: Record) -> Result<M, StoreError> {
    serde_json::from_value(Value::Object(row)).map_err(|e| StoreError::Decode(e.to_string()))
}

/// A zero-valued model carrying the given identity values, in `id_fields` order.
pub fn with_identity<M: DataModel>(id_fields: &[String], values: &[Value]) -> Result<M, AppError> {
    if values.len() != id_fields.len() {
        return Err(AppError::Input(format!(
            "expected {} identity value(s), got {}",
            id_fields.len(),
            values.len()
        )));
    }
    let mut record = to_record(&M::default())?;
    for (field, value) in id_fields.iter().zip(values) {
        record.insert(field.clone(), value.clone());
    }
    from_record(record)
}
