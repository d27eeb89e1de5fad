//! Shared application state for the HTTP transport.

use crate::routes::RouteRegistry;
use crate::store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RouteRegistry>,
    /// Default store bound to every request context.
    pub store: Arc<dyn Store>,
}

impl AppState {
    pub fn new(registry: RouteRegistry, store: Arc<dyn Store>) -> Self {
        AppState {
            registry: Arc::new(registry),
            store,
        }
    }
}
