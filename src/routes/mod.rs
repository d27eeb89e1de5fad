//! Route synthesis, the route registry, and the axum transport serving it.

pub mod common;
pub mod http;
mod model;
mod route;

pub use common::common_routes;
pub use http::dbmod_routes;
pub use model::model_routes;
pub use route::{route_path, DbMod, Route, RouteHandler, RouteRegistry, Service, Shape, DB_MOD_NAME};

use crate::state::AppState;
use axum::Router;

/// Common routes plus every registered model route.
pub fn app_router(state: AppState, body_limit: usize) -> Router {
    common_routes(state.clone()).merge(dbmod_routes(state, body_limit))
}
