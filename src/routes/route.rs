//! Route objects, the immutable registry dispatching them by path, and the service collecting them.

use crate::context::RequestContext;
use crate::error::{AppError, ConfigError};
use crate::handlers::{default_store_accessor, StoreAccessor};
use crate::middleware::MwFn;
use crate::model::{DataModel, ModelDescriptor};
use crate::routes::model::model_routes;
use crate::store::Store;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type RouteHandler = Arc<dyn Fn(RequestContext, Value) -> BoxFuture<'static, Result<Value, AppError>> + Send + Sync>;

/// Declared payload or result shape of a route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    None,
    Model,
    Models,
    Counted,
    QueryParam,
    Keys,
    KeyList,
    Filter,
    Params,
    FieldUpdate,
    Record,
    Count,
}

#[derive(Clone)]
pub struct Route {
    pub path: String,
    pub request: Shape,
    pub response: Shape,
    pub handler: RouteHandler,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("request", &self.request)
            .field("response", &self.response)
            .finish()
    }
}

/// `<base>/<alias>/<action>` with single forward slashes and a leading slash.
pub fn route_path(base: &str, alias: &str, action: &str) -> String {
    let segments: Vec<&str> = [base, alias, action]
        .iter()
        .flat_map(|s| s.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Built once before serving; read-only afterwards.
pub struct RouteRegistry {
    routes: HashMap<String, Route>,
    middlewares: Vec<MwFn>,
}

impl RouteRegistry {
    pub fn new(routes: Vec<Route>, middlewares: Vec<MwFn>) -> Result<Self, ConfigError> {
        let mut by_path = HashMap::with_capacity(routes.len());
        for route in routes {
            if by_path.contains_key(&route.path) {
                return Err(ConfigError::DuplicatePath(route.path));
            }
            by_path.insert(route.path.clone(), route);
        }
        Ok(RouteRegistry {
            routes: by_path,
            middlewares,
        })
    }

    pub fn get(&self, path: &str) -> Option<&Route> {
        self.routes.get(path)
    }

    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Runs the middleware chain, then the route handler.
    pub async fn dispatch(&self, path: &str, mut ctx: RequestContext, payload: Value) -> Result<Value, AppError> {
        let route = self
            .get(path)
            .ok_or_else(|| AppError::NotFound(format!("no route {}", path)))?;
        for mw in &self.middlewares {
            if !mw(&mut ctx, &payload)? {
                tracing::debug!(path = %path, "middleware stopped the call");
                return Ok(Value::Null);
            }
        }
        (route.handler)(ctx, payload).await
    }
}

/// Module name the model routes are published under.
pub const DB_MOD_NAME: &str = "sbr-mod-db";

/// Synthesizes model routes. Without a store accessor, handlers use the request context's default store.
#[derive(Clone, Default)]
pub struct DbMod {
    store: Option<StoreAccessor>,
}

impl DbMod {
    pub fn new() -> Self {
        DbMod::default()
    }

    pub fn name(&self) -> &'static str {
        DB_MOD_NAME
    }

    pub fn with_store_fn(mut self, f: StoreAccessor) -> Self {
        self.store = Some(f);
        self
    }

    pub fn with_store(self, store: Arc<dyn Store>) -> Self {
        self.with_store_fn(Arc::new(move |_: &RequestContext| Ok::<_, AppError>(store.clone())))
    }

    pub fn model_routes<M: DataModel>(&self, base_point: &str, desc: ModelDescriptor<M>) -> Vec<Route> {
        let store = self.store.clone().unwrap_or_else(default_store_accessor);
        model_routes(base_point, desc, store)
    }
}

/// Collects model routes and middleware under one base point.
pub struct Service {
    base_point: String,
    module: DbMod,
    routes: Vec<Route>,
    middlewares: Vec<MwFn>,
}

impl Service {
    pub fn new(base_point: impl Into<String>) -> Self {
        Service {
            base_point: base_point.into(),
            module: DbMod::new(),
            routes: Vec::new(),
            middlewares: Vec::new(),
        }
    }

    pub fn base_point(&self) -> &str {
        &self.base_point
    }

    pub fn module(mut self, module: DbMod) -> Self {
        self.module = module;
        self
    }

    pub fn model<M: DataModel>(mut self, desc: ModelDescriptor<M>) -> Self {
        let routes = self.module.model_routes(&self.base_point, desc);
        self.routes.extend(routes);
        self
    }

    pub fn middleware(mut self, mw: MwFn) -> Self {
        self.middlewares.push(mw);
        self
    }

    pub fn build(self) -> Result<RouteRegistry, ConfigError> {
        let registry = RouteRegistry::new(self.routes, self.middlewares)?;
        tracing::info!(module = DB_MOD_NAME, base = %self.base_point, routes = registry.len(), "route registry built");
        Ok(registry)
    }
}
