//! HTTP transport: one wildcard route dispatching every model route by exact path.

use crate::context::{RequestContext, HTTP_QUERY_KEY};
use crate::error::AppError;
use crate::response::{success_one_ok, SuccessOne};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::any,
    Json, Router,
};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

/// POST (or GET) `/<base>/<alias>/<action>` with an optional JSON body; an empty body is `null`.
async fn dispatch(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Result<(StatusCode, Json<SuccessOne<Value>>), AppError> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)?
    };
    let mut ctx = RequestContext::with_store(state.store.clone());
    if !query.is_empty() {
        ctx.set(HTTP_QUERY_KEY, query);
    }
    let path = format!("/{}", path.trim_start_matches('/'));
    let data = state.registry.dispatch(&path, ctx, payload).await?;
    Ok(success_one_ok(data))
}

pub fn dbmod_routes(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/*path", any(dispatch))
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(body_limit)))
        .with_state(state)
}
