//! Pre-handler middleware: functions that prime the request context before a route handler runs.

use crate::context::{RequestContext, FIELDS_KEY, FILTER_KEY, QUERY_PARAM_KEY, SELECT_KEY, VALIDATE_FN_KEY, VALIDATE_KEY};
use crate::error::AppError;
use crate::query::{Filter, QueryParam};
use crate::service::ValidateFn;
use serde_json::Value;
use std::sync::Arc;

/// Returns `Ok(false)` to stop the call; the route then answers `null`.
pub type MwFn = Arc<dyn Fn(&mut RequestContext, &Value) -> Result<bool, AppError> + Send + Sync>;

pub fn middleware<F>(f: F) -> MwFn
where
    F: Fn(&mut RequestContext, &Value) -> Result<bool, AppError> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Default select list for `gets`/`find` when the payload selects nothing.
pub fn pre_select_fields<I, S>(fields: I) -> MwFn
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let fields = strings(fields);
    middleware(move |ctx, _| {
        ctx.set(SELECT_KEY, fields.clone());
        Ok(true)
    })
}

/// Appends mandatory filters ANDed into reads, `get`, `fieldupdate` and `deletequery`.
pub fn pre_filters(filters: Vec<Filter>) -> MwFn {
    middleware(move |ctx, _| {
        let mut all: Vec<Filter> = ctx.get(FILTER_KEY, Vec::new());
        all.extend(filters.iter().cloned());
        ctx.set(FILTER_KEY, all);
        Ok(true)
    })
}

/// Query parameter merged into every `gets`/`find` and whose filter joins `deletequery`.
pub fn pre_query_param(param: QueryParam) -> MwFn {
    middleware(move |ctx, _| {
        ctx.set(QUERY_PARAM_KEY, param.clone());
        Ok(true)
    })
}

/// Partial field list for `save` and `update`.
pub fn pre_fields<I, S>(fields: I) -> MwFn
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let fields = strings(fields);
    middleware(move |ctx, _| {
        ctx.set(FIELDS_KEY, fields.clone());
        Ok(true)
    })
}

/// Enables the validation gate with `f` as predicate.
pub fn pre_validate(f: ValidateFn) -> MwFn {
    middleware(move |ctx, _| {
        ctx.set(VALIDATE_KEY, true).set(VALIDATE_FN_KEY, f.clone());
        Ok(true)
    })
}
