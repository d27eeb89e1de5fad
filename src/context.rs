//! Request-scoped state bag. Created at request entry, filled by middleware, read by route handlers, dropped at completion.

use crate::store::Store;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Externally supplied [`QueryParam`](crate::query::QueryParam) merged into every query.
pub const QUERY_PARAM_KEY: &str = "mdb-query-parm";
/// Enables the validation gate (bool).
pub const VALIDATE_KEY: &str = "mdb-validate";
/// Validation predicate ([`ValidateFn`](crate::service::ValidateFn)).
pub const VALIDATE_FN_KEY: &str = "mdb-validate-fn";
/// Mandatory filters (`Vec<Filter>`) ANDed into reads and scoped writes.
pub const FILTER_KEY: &str = "DBModFilter";
/// Partial field list (`Vec<String>`) for save/update.
pub const FIELDS_KEY: &str = "Fields";
/// Default select list (`Vec<String>`) for gets/find.
pub const SELECT_KEY: &str = "DbModSelect";
/// Raw query-string pairs (`Vec<(String, String)>`) from the HTTP transport.
pub const HTTP_QUERY_KEY: &str = "http_query";

#[derive(Default)]
pub struct RequestContext {
    data: HashMap<String, Box<dyn Any + Send + Sync>>,
    default_store: Option<Arc<dyn Store>>,
}

impl RequestContext {
    pub fn new() -> Self {
        RequestContext::default()
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        RequestContext {
            data: HashMap::new(),
            default_store: Some(store),
        }
    }

    /// Value under `key` when present with type `T`, otherwise `default`.
    pub fn get<T: Clone + 'static>(&self, key: &str, default: T) -> T {
        self.get_ref::<T>(key).cloned().unwrap_or(default)
    }

    pub fn get_ref<T: 'static>(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) -> &mut Self {
        self.data.insert(key.into(), Box::new(value));
        self
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    pub fn default_store(&self) -> Option<Arc<dyn Store>> {
        self.default_store.clone()
    }

    pub fn set_default_store(&mut self, store: Arc<dyn Store>) {
        self.default_store = Some(store);
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.data.keys().collect();
        keys.sort();
        f.debug_struct("RequestContext")
            .field("keys", &keys)
            .field("has_store", &self.default_store.is_some())
            .finish()
    }
}
