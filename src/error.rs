//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised by a store gateway. Propagated to callers unchanged in meaning; never retried here.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("transaction already closed")]
    TxClosed,
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// A stored row that does not fit the model type.
    #[error("row decode: {0}")]
    Decode(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

/// Errors raised while building the route registry.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duplicate route path: {0}")]
    DuplicatePath(String),
    #[error("invalid {key}: {message}")]
    InvalidSetting { key: String, message: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    /// Nil/empty model or malformed identity supplied to a route.
    #[error("input: {0}")]
    Input(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("hook {hook}: {source}")]
    Hook {
        hook: String,
        #[source]
        source: Box<AppError>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code used in the HTTP error body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Input(_) => "input_error",
            AppError::Validation(_) => "validation_error",
            AppError::Hook { .. } => "hook_error",
            AppError::Store(StoreError::NotFound(_)) => "not_found",
            AppError::Store(StoreError::Conflict(_)) => "conflict",
            AppError::Store(StoreError::InvalidQuery(_)) => "invalid_query",
            AppError::Store(_) => "store_error",
            AppError::Config(_) => "config_error",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Input(_) | AppError::BadRequest(_) | AppError::Store(StoreError::InvalidQuery(_)) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) | AppError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Store(StoreError::Db(sqlx::Error::RowNotFound)) => StatusCode::NOT_FOUND,
            AppError::Hook { .. } | AppError::Store(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Client payloads that fail to decode. Server-side encoding and row decoding map to other variants.
impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let details = match &self {
            AppError::Hook { hook, .. } => Some(serde_json::json!({ "hook": hook })),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_error_names_the_hook() {
        let e = AppError::Hook {
            hook: "PostSave".into(),
            source: Box::new(AppError::Validation("bad total".into())),
        };
        assert_eq!(e.to_string(), "hook PostSave: validation: bad total");
        assert_eq!(e.code(), "hook_error");
    }

    #[test]
    fn store_not_found_maps_to_404() {
        let e = AppError::from(StoreError::NotFound("customer".into()));
        assert_eq!(e.status(), StatusCode::NOT_FOUND);
        assert_eq!(e.code(), "not_found");
    }

    #[test]
    fn server_side_decode_failures_are_not_client_errors() {
        let row = AppError::from(StoreError::Decode("invalid type".into()));
        assert_eq!(row.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(row.code(), "store_error");
        let encode = AppError::Internal("response encoding".into());
        assert_eq!(encode.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(encode.code(), "internal_error");
    }
}
