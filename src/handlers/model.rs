//! Per-model route handlers: one typed method per synthesized action.

use crate::context::{RequestContext, FIELDS_KEY, FILTER_KEY, HTTP_QUERY_KEY, SELECT_KEY};
use crate::error::AppError;
use crate::handlers::payload::FieldUpdateRequest;
use crate::model::hooks::{
    POST_DELETE, POST_DELETE_MANY, POST_DELETE_QUERY, POST_FIND, POST_GET, POST_GETS, POST_SAVE, PRE_DELETE,
    PRE_DELETE_QUERY, PRE_NEW, PRE_SAVE,
};
use crate::model::{from_row, to_record, with_identity, DataModel, HookPayload, ModelDescriptor, NamedQuery};
use crate::query::{combine_filter, combine_filter_from_ctx, combine_query_param_from_ctx, Filter, QueryParam, NO_COUNT_PARAM};
use crate::response::Counted;
use crate::service::{run_in_tx, validate_model};
use crate::store::{ConnectionGuard, CountCommand, Record, Store};
use std::collections::HashSet;
use std::sync::Arc;

/// Resolves the store gateway for one request.
pub type StoreAccessor = Arc<dyn Fn(&RequestContext) -> Result<Arc<dyn Store>, AppError> + Send + Sync>;

/// Uses the request context's default store.
pub fn default_store_accessor() -> StoreAccessor {
    Arc::new(|ctx: &RequestContext| {
        ctx.default_store()
            .ok_or_else(|| AppError::Input("no store bound to the request".into()))
    })
}

fn nil_model() -> AppError {
    AppError::Input("data is nil".into())
}

fn decode_rows<M: DataModel>(rows: Vec<Record>) -> Result<Vec<M>, AppError> {
    rows.into_iter().map(|row| from_row(row).map_err(AppError::from)).collect()
}

/// Mandatory filters placed in the context by middleware.
fn scoped_filters(ctx: &RequestContext) -> Option<Filter> {
    Filter::and_all(ctx.get::<Vec<Filter>>(FILTER_KEY, Vec::new()))
}

pub struct ModelHandlers<M: DataModel> {
    desc: Arc<ModelDescriptor<M>>,
    store: StoreAccessor,
}

impl<M: DataModel> ModelHandlers<M> {
    pub fn new(desc: ModelDescriptor<M>, store: StoreAccessor) -> Self {
        ModelHandlers {
            desc: Arc::new(desc),
            store,
        }
    }

    pub fn descriptor(&self) -> &ModelDescriptor<M> {
        &self.desc
    }

    fn store(&self, ctx: &RequestContext) -> Result<Arc<dyn Store>, AppError> {
        (self.store)(ctx)
    }

    /// Payload ⊕ context parameter ⊕ mandatory filters ⊕ query-string equalities, plus the default select list.
    fn read_param(&self, ctx: &RequestContext, payload: Option<QueryParam>) -> QueryParam {
        let mut param = combine_query_param_from_ctx(payload, ctx);
        let mut scoped: Vec<Filter> = ctx.get(FILTER_KEY, Vec::new());
        if let Some(pairs) = ctx.get_ref::<Vec<(String, String)>>(HTTP_QUERY_KEY) {
            let mut seen = HashSet::new();
            for (key, value) in pairs {
                if seen.insert(key.as_str()) {
                    scoped.push(Filter::eq(key.clone(), value.clone()));
                }
            }
        }
        param.where_ = combine_filter(param.where_.take(), Filter::and_all(scoped));
        if param.select.is_empty() {
            param.select = ctx.get(SELECT_KEY, Vec::new());
        }
        param
    }

    /// Count over a scoped connection. A connection that cannot be acquired counts as zero.
    async fn count(&self, store: &dyn Store, filter: Option<Filter>) -> Result<u64, AppError> {
        let guard = match ConnectionGuard::acquire(store).await {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(model = %self.desc.alias(), error = %e, "count connection unavailable");
                return Ok(0);
            }
        };
        let cmd = CountCommand::new(self.desc.table_name(), filter);
        Ok(guard.count(&cmd).await?)
    }

    pub async fn new_model(&self, ctx: &RequestContext) -> Result<M, AppError> {
        let mut model = M::default();
        self.desc.call_hook(PRE_NEW, ctx, HookPayload::Model(&mut model))?;
        Ok(model)
    }

    pub async fn gets(&self, ctx: &RequestContext, payload: Option<QueryParam>) -> Result<Counted<M>, AppError> {
        let param = self.read_param(ctx, payload);
        let store = self.store(ctx)?;
        let mut data: Vec<M> = decode_rows(store.gets(self.desc.table_name(), &param).await?)?;
        let mut count = if param.param_bool(NO_COUNT_PARAM) {
            0
        } else {
            self.count(store.as_ref(), param.where_.clone()).await?
        };
        self.desc.call_hook(
            POST_GETS,
            ctx,
            HookPayload::Counted {
                data: &mut data,
                count: &mut count,
            },
        )?;
        Ok(Counted { data, count })
    }

    pub async fn find(&self, ctx: &RequestContext, payload: Option<QueryParam>) -> Result<Vec<M>, AppError> {
        let param = self.read_param(ctx, payload);
        let store = self.store(ctx)?;
        let mut data: Vec<M> = decode_rows(store.gets(self.desc.table_name(), &param).await?)?;
        self.desc.call_hook(POST_FIND, ctx, HookPayload::Many(&mut data))?;
        Ok(data)
    }

    pub async fn get(&self, ctx: &RequestContext, keys: Vec<serde_json::Value>) -> Result<M, AppError> {
        let ids = self.desc.id_fields();
        if keys.len() < ids.len() {
            return Err(AppError::Input(format!(
                "expected {} key value(s), got {}",
                ids.len(),
                keys.len()
            )));
        }
        let identity = Filter::and_all(ids.iter().zip(keys).map(|(f, k)| Filter::eq(f.clone(), k)).collect())
            .ok_or_else(|| AppError::Input(format!("model {} has no identity fields", self.desc.alias())))?;
        let filter = combine_filter(Some(identity), scoped_filters(ctx))
            .ok_or_else(|| AppError::Input("empty identity filter".into()))?;
        let store = self.store(ctx)?;
        let mut model: M = from_row(store.get_by_filter(self.desc.table_name(), &filter).await?)?;
        validate_model(ctx, &mut model, false)?;
        self.desc.call_hook(POST_GET, ctx, HookPayload::Model(&mut model))?;
        Ok(model)
    }

    pub async fn save(&self, ctx: &RequestContext, model: Option<M>) -> Result<M, AppError> {
        let mut model = model.ok_or_else(nil_model)?;
        validate_model(ctx, &mut model, true)?;
        let fields: Vec<String> = ctx.get(FIELDS_KEY, Vec::new());
        let desc = &self.desc;
        let mut saved = run_in_tx(self.store(ctx)?, |store| async move {
            desc.call_hook(PRE_SAVE, ctx, HookPayload::Model(&mut model))?;
            let record = to_record(&model)?;
            let row = store.save(desc.table_name(), desc.id_fields(), &record, &fields).await?;
            from_row::<M>(row).map_err(AppError::from)
        })
        .await?;
        self.desc.call_hook(POST_SAVE, ctx, HookPayload::Model(&mut saved))?;
        Ok(saved)
    }

    pub async fn insert(&self, ctx: &RequestContext, model: Option<M>) -> Result<M, AppError> {
        let mut model = model.ok_or_else(nil_model)?;
        let desc = &self.desc;
        let mut inserted = run_in_tx(self.store(ctx)?, |store| async move {
            desc.call_hook(PRE_SAVE, ctx, HookPayload::Model(&mut model))?;
            let record = to_record(&model)?;
            let row = store.insert(desc.table_name(), desc.id_fields(), &record).await?;
            from_row::<M>(row).map_err(AppError::from)
        })
        .await?;
        self.desc.call_hook(POST_SAVE, ctx, HookPayload::Model(&mut inserted))?;
        Ok(inserted)
    }

    pub async fn update(&self, ctx: &RequestContext, model: Option<M>) -> Result<M, AppError> {
        let mut model = model.ok_or_else(nil_model)?;
        let fields: Vec<String> = ctx.get(FIELDS_KEY, Vec::new());
        let desc = &self.desc;
        let mut updated = run_in_tx(self.store(ctx)?, |store| async move {
            desc.call_hook(PRE_SAVE, ctx, HookPayload::Model(&mut model))?;
            let record = to_record(&model)?;
            let row = store.update(desc.table_name(), desc.id_fields(), &record, &fields).await?;
            from_row::<M>(row).map_err(AppError::from)
        })
        .await?;
        self.desc.call_hook(POST_SAVE, ctx, HookPayload::Model(&mut updated))?;
        Ok(updated)
    }

    /// Writes `fields` of the request record onto the record it identifies. No transaction and no hooks.
    pub async fn field_update(&self, ctx: &RequestContext, req: Option<FieldUpdateRequest>) -> Result<Record, AppError> {
        let req = req.ok_or_else(nil_model)?;
        let mut filters = Vec::with_capacity(self.desc.id_fields().len());
        for field in self.desc.id_fields() {
            match req.model.get(field) {
                Some(v) if !v.is_null() => filters.push(Filter::eq(field.clone(), v.clone())),
                _ => return Err(AppError::Input(format!("identity field {} is missing", field))),
            }
        }
        let filter = combine_filter(Filter::and_all(filters), scoped_filters(ctx))
            .ok_or_else(|| AppError::Input(format!("model {} has no identity fields", self.desc.alias())))?;
        let store = self.store(ctx)?;
        let affected = store
            .update_any(self.desc.table_name(), &filter, &req.model, &req.fields)
            .await?;
        tracing::debug!(model = %self.desc.alias(), affected, "field update applied");
        Ok(req.model)
    }

    pub async fn delete(&self, ctx: &RequestContext, model: Option<M>) -> Result<u64, AppError> {
        let mut model = model.ok_or_else(nil_model)?;
        validate_model(ctx, &mut model, false)?;
        let desc = &self.desc;
        let (deleted, mut model) = run_in_tx(self.store(ctx)?, |store| async move {
            desc.call_hook(PRE_DELETE, ctx, HookPayload::Model(&mut model))?;
            let record = to_record(&model)?;
            let n = store.delete(desc.table_name(), desc.id_fields(), &record).await?;
            Ok((n, model))
        })
        .await?;
        self.desc.call_hook(POST_DELETE, ctx, HookPayload::Model(&mut model))?;
        Ok(deleted)
    }

    /// Deletes every match of payload ⊕ context filter ⊕ mandatory filters. No filter at all deletes every record.
    pub async fn delete_query(&self, ctx: &RequestContext, filter: Option<Filter>) -> Result<u64, AppError> {
        let filter = combine_filter(combine_filter_from_ctx(filter, ctx), scoped_filters(ctx));
        let desc = &self.desc;
        let (deleted, mut filter) = run_in_tx(self.store(ctx)?, |store| async move {
            let mut filter = filter;
            desc.call_hook(PRE_DELETE_QUERY, ctx, HookPayload::Filter(&mut filter))?;
            let n = store.delete_query(desc.table_name(), filter.as_ref()).await?;
            Ok((n, filter))
        })
        .await?;
        self.desc.call_hook(POST_DELETE_QUERY, ctx, HookPayload::Filter(&mut filter))?;
        Ok(deleted)
    }

    /// One transaction per key tuple. Stops at the first failure, leaving earlier deletions committed.
    /// `PostDeleteMany` always sees the tuples actually deleted. An item error is returned in preference to a hook error.
    pub async fn delete_many(&self, ctx: &RequestContext, keys: Vec<Vec<serde_json::Value>>) -> Result<u64, AppError> {
        let store = self.store(ctx)?;
        let desc = &self.desc;
        let mut deleted = Vec::with_capacity(keys.len());
        let mut failure = None;
        for key in keys {
            let outcome = match with_identity::<M>(desc.id_fields(), &key).and_then(|m| to_record(&m)) {
                Ok(record) => {
                    run_in_tx(store.clone(), |tx| async move {
                        Ok(tx.delete(desc.table_name(), desc.id_fields(), &record).await?)
                    })
                    .await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(_) => deleted.push(key),
                Err(e) => {
                    tracing::debug!(model = %desc.alias(), key = ?key, error = %e, "deletemany stopped");
                    failure = Some(e);
                    break;
                }
            }
        }
        let hooked = desc.call_hook(POST_DELETE_MANY, ctx, HookPayload::Keys(&deleted));
        if let Some(e) = failure {
            return Err(e);
        }
        hooked?;
        Ok(deleted.len() as u64)
    }

    pub async fn get_by(&self, ctx: &RequestContext, query: &NamedQuery, params: Record) -> Result<M, AppError> {
        let store = self.store(ctx)?;
        let mut model: M = from_row(store.get_by_query(self.desc.table_name(), query, &params).await?)?;
        self.desc.call_hook(POST_GET, ctx, HookPayload::Model(&mut model))?;
        Ok(model)
    }

    pub async fn gets_by(&self, ctx: &RequestContext, query: &NamedQuery, params: Record) -> Result<Counted<M>, AppError> {
        let store = self.store(ctx)?;
        let mut data: Vec<M> = decode_rows(store.gets_by_query(self.desc.table_name(), query, &params).await?)?;
        let mut count = self.count(store.as_ref(), query.to_filter(&params)?).await?;
        self.desc.call_hook(
            POST_GETS,
            ctx,
            HookPayload::Counted {
                data: &mut data,
                count: &mut count,
            },
        )?;
        Ok(Counted { data, count })
    }

    pub async fn find_by(&self, ctx: &RequestContext, query: &NamedQuery, params: Record) -> Result<Vec<M>, AppError> {
        let store = self.store(ctx)?;
        let mut data: Vec<M> = decode_rows(store.gets_by_query(self.desc.table_name(), query, &params).await?)?;
        self.desc.call_hook(POST_FIND, ctx, HookPayload::Many(&mut data))?;
        Ok(data)
    }
}
