//! Architect DbMod: model-driven CRUD and query route synthesis over a pluggable store gateway.

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod model;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::ServiceConfig;
pub use context::RequestContext;
pub use error::{AppError, ConfigError, StoreError};
pub use handlers::{ModelHandlers, StoreAccessor};
pub use middleware::{pre_fields, pre_filters, pre_query_param, pre_select_fields, pre_validate, MwFn};
pub use model::{hook_fn, DataModel, HookPayload, ModelDescriptor, ModelMethod, NamedQuery, ReturnKind};
pub use query::{combine_filter, combine_query_param, Filter, FilterOp, FilterValue, QueryParam, SortField};
pub use response::Counted;
pub use routes::{app_router, common_routes, dbmod_routes, DbMod, Route, RouteRegistry, Service};
pub use service::{run_in_tx, FieldRules};
pub use state::AppState;
pub use store::{open_store, MemoryStore, PgStore, Record, Store};
