//! Route synthesis for one registered model: the fixed action table plus named-query routes.

use crate::context::RequestContext;
use crate::error::AppError;
use crate::handlers::payload::{
    decode_field_update, decode_filter, decode_key_list, decode_keys, decode_model, decode_params, decode_query_param,
};
use crate::handlers::{ModelHandlers, StoreAccessor};
use crate::model::{DataModel, ModelDescriptor, NamedQuery};
use crate::routes::route::{route_path, Route, RouteHandler, Shape};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

fn to_json<T: Serialize>(out: T) -> Result<Value, AppError> {
    serde_json::to_value(out).map_err(|e| AppError::Internal(format!("response encoding: {}", e)))
}

fn handler<M, F, Fut>(handlers: &Arc<ModelHandlers<M>>, f: F) -> RouteHandler
where
    M: DataModel,
    F: Fn(Arc<ModelHandlers<M>>, RequestContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, AppError>> + Send + 'static,
{
    let handlers = handlers.clone();
    Arc::new(move |ctx, payload| f(handlers.clone(), ctx, payload).boxed())
}

fn query_handler<M, F, Fut>(handlers: &Arc<ModelHandlers<M>>, query: &NamedQuery, f: F) -> RouteHandler
where
    M: DataModel,
    F: Fn(Arc<ModelHandlers<M>>, RequestContext, NamedQuery, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, AppError>> + Send + 'static,
{
    let query = query.clone();
    handler(handlers, move |h, ctx, payload| f(h, ctx, query.clone(), payload))
}

struct RouteSet<'a, M: DataModel> {
    base: &'a str,
    handlers: &'a Arc<ModelHandlers<M>>,
    routes: Vec<Route>,
}

impl<M: DataModel> RouteSet<'_, M> {
    fn add(&mut self, action: &str, request: Shape, response: Shape, handler: RouteHandler) {
        let desc = self.handlers.descriptor();
        if desc.is_route_disabled(action) {
            return;
        }
        self.routes.push(Route {
            path: route_path(self.base, desc.alias(), action),
            request,
            response,
            handler,
        });
    }
}

/// Every route of `desc` not listed in its disabled set, named queries in name order.
pub fn model_routes<M: DataModel>(base: &str, desc: ModelDescriptor<M>, store: StoreAccessor) -> Vec<Route> {
    let h = Arc::new(ModelHandlers::new(desc, store));
    let mut set = RouteSet {
        base,
        handlers: &h,
        routes: Vec::new(),
    };

    set.add(
        "new",
        Shape::None,
        Shape::Model,
        handler(&h, |h, ctx, _| async move { to_json(h.new_model(&ctx).await?) }),
    );
    set.add(
        "gets",
        Shape::QueryParam,
        Shape::Counted,
        handler(&h, |h, ctx, payload| async move {
            to_json(h.gets(&ctx, decode_query_param(payload)?).await?)
        }),
    );
    set.add(
        "find",
        Shape::QueryParam,
        Shape::Models,
        handler(&h, |h, ctx, payload| async move {
            to_json(h.find(&ctx, decode_query_param(payload)?).await?)
        }),
    );
    set.add(
        "get",
        Shape::Keys,
        Shape::Model,
        handler(&h, |h, ctx, payload| async move { to_json(h.get(&ctx, decode_keys(payload)?).await?) }),
    );
    set.add(
        "save",
        Shape::Model,
        Shape::Model,
        handler(&h, |h, ctx, payload| async move { to_json(h.save(&ctx, decode_model(payload)?).await?) }),
    );
    set.add(
        "insert",
        Shape::Model,
        Shape::Model,
        handler(&h, |h, ctx, payload| async move {
            to_json(h.insert(&ctx, decode_model(payload)?).await?)
        }),
    );
    set.add(
        "update",
        Shape::Model,
        Shape::Model,
        handler(&h, |h, ctx, payload| async move {
            to_json(h.update(&ctx, decode_model(payload)?).await?)
        }),
    );
    set.add(
        "fieldupdate",
        Shape::FieldUpdate,
        Shape::Record,
        handler(&h, |h, ctx, payload| async move {
            to_json(h.field_update(&ctx, decode_field_update(payload)?).await?)
        }),
    );
    set.add(
        "delete",
        Shape::Model,
        Shape::Count,
        handler(&h, |h, ctx, payload| async move {
            to_json(h.delete(&ctx, decode_model(payload)?).await?)
        }),
    );
    set.add(
        "deletequery",
        Shape::Filter,
        Shape::Count,
        handler(&h, |h, ctx, payload| async move {
            to_json(h.delete_query(&ctx, decode_filter(payload)?).await?)
        }),
    );
    set.add(
        "deletemany",
        Shape::KeyList,
        Shape::Count,
        handler(&h, |h, ctx, payload| async move {
            to_json(h.delete_many(&ctx, decode_key_list(payload)?).await?)
        }),
    );

    let queries: Vec<NamedQuery> = h.descriptor().queries().cloned().collect();
    for query in &queries {
        if query.return_kind.allows_single() {
            set.add(
                &format!("GetBy{}", query.name),
                Shape::Params,
                Shape::Model,
                query_handler(&h, query, |h, ctx, q, payload| async move {
                    to_json(h.get_by(&ctx, &q, decode_params(payload)?).await?)
                }),
            );
        }
        if query.return_kind.allows_multi() {
            set.add(
                &format!("GetsBy{}", query.name),
                Shape::Params,
                Shape::Counted,
                query_handler(&h, query, |h, ctx, q, payload| async move {
                    to_json(h.gets_by(&ctx, &q, decode_params(payload)?).await?)
                }),
            );
            set.add(
                &format!("FindBy{}", query.name),
                Shape::Params,
                Shape::Models,
                query_handler(&h, query, |h, ctx, q, payload| async move {
                    to_json(h.find_by(&ctx, &q, decode_params(payload)?).await?)
                }),
            );
        }
    }

    let routes = set.routes;
    tracing::info!(
        model = %h.descriptor().alias(),
        table = %h.descriptor().table_name(),
        routes = routes.len(),
        "model routes synthesized"
    );
    routes
}
