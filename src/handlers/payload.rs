//! Decoding of dynamic route payloads into the typed handler inputs.

use crate::error::AppError;
use crate::query::{map_to_query_param, Filter, QueryParam};
use crate::store::Record;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `fieldupdate`: the record carrying identity and new values, and the fields to write.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldUpdateRequest {
    pub model: Record,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// `null` decodes to `None`, which handlers reject as a nil model.
pub fn decode_model<M: DeserializeOwned>(payload: Value) -> Result<Option<M>, AppError> {
    if payload.is_null() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(payload)?))
}

/// A structured parameter object, or a loose map read through [`map_to_query_param`].
/// A malformed `where` is a bad request in either form.
pub fn decode_query_param(payload: Value) -> Result<Option<QueryParam>, AppError> {
    match payload {
        Value::Null => Ok(None),
        Value::Object(map) => match serde_json::from_value::<QueryParam>(Value::Object(map.clone())) {
            Ok(param) => Ok(Some(param)),
            Err(e) => {
                tracing::debug!(error = %e, "payload is not a query parameter, reading it as a loose map");
                Ok(Some(map_to_query_param(&map)?))
            }
        },
        other => Err(AppError::BadRequest(format!("expected a query parameter object, got {}", other))),
    }
}

/// `get` keys: an array of identity values, or one scalar for single-field identities.
pub fn decode_keys(payload: Value) -> Result<Vec<Value>, AppError> {
    match payload {
        Value::Array(keys) => Ok(keys),
        Value::Null => Err(AppError::Input("keys are required".into())),
        Value::Object(_) => Err(AppError::BadRequest("keys must be an array or a scalar".into())),
        scalar => Ok(vec![scalar]),
    }
}

/// `deletemany` keys: an array whose items are key arrays, or scalars for single-field identities.
pub fn decode_key_list(payload: Value) -> Result<Vec<Vec<Value>>, AppError> {
    match payload {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Array(keys) => Ok(keys),
                Value::Object(_) | Value::Null => {
                    Err(AppError::BadRequest("each key must be an array or a scalar".into()))
                }
                scalar => Ok(vec![scalar]),
            })
            .collect(),
        _ => Err(AppError::BadRequest("expected an array of keys".into())),
    }
}

/// `null` and `{}` mean no filter.
pub fn decode_filter(payload: Value) -> Result<Option<Filter>, AppError> {
    match payload {
        Value::Null => Ok(None),
        Value::Object(ref map) if map.is_empty() => Ok(None),
        other => Ok(Some(serde_json::from_value(other)?)),
    }
}

/// Named-query parameters.
pub fn decode_params(payload: Value) -> Result<Record, AppError> {
    match payload {
        Value::Null => Ok(Record::new()),
        Value::Object(map) => Ok(map),
        other => Err(AppError::BadRequest(format!("expected a parameter object, got {}", other))),
    }
}

pub fn decode_field_update(payload: Value) -> Result<Option<FieldUpdateRequest>, AppError> {
    decode_model(payload)
}
