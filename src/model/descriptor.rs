//! Per-model registration record, read-only once built.

use crate::model::hooks::{hook_fn, HookPayload, HookRegistry};
use crate::model::{DataModel, NamedQuery};
use crate::context::RequestContext;
use crate::error::AppError;
use std::collections::BTreeMap;

pub struct ModelDescriptor<M> {
    alias: String,
    table_name: String,
    id_fields: Vec<String>,
    queries: BTreeMap<String, NamedQuery>,
    hooks: HookRegistry<M>,
    disabled_routes: Vec<String>,
}

impl<M: DataModel> ModelDescriptor<M> {
    /// Starts a descriptor whose routes live under `<base>/<alias>/...`.
    pub fn builder(alias: impl Into<String>) -> ModelDescriptorBuilder<M> {
        ModelDescriptorBuilder {
            alias: alias.into(),
            table_name: None,
            hooks: HookRegistry::new(),
            extra_queries: Vec::new(),
            disabled_routes: Vec::new(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn id_fields(&self) -> &[String] {
        &self.id_fields
    }

    pub fn queries(&self) -> impl Iterator<Item = &NamedQuery> {
        self.queries.values()
    }

    pub fn hooks(&self) -> &HookRegistry<M> {
        &self.hooks
    }

    pub fn call_hook(&self, name: &str, ctx: &RequestContext, payload: HookPayload<'_, M>) -> Result<(), AppError> {
        self.hooks.call(name, ctx, payload)
    }

    /// Case-sensitive.
    pub fn is_route_disabled(&self, action: &str) -> bool {
        self.disabled_routes.iter().any(|r| r == action)
    }

    pub fn disabled_routes(&self) -> &[String] {
        &self.disabled_routes
    }
}

pub struct ModelDescriptorBuilder<M> {
    alias: String,
    table_name: Option<String>,
    hooks: HookRegistry<M>,
    extra_queries: Vec<NamedQuery>,
    disabled_routes: Vec<String>,
}

impl<M: DataModel> ModelDescriptorBuilder<M> {
    /// Overrides `M::table_name()`.
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    pub fn hook<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RequestContext, HookPayload<'_, M>) -> Result<(), AppError> + Send + Sync + 'static,
    {
        let name = name.into();
        if !self.hooks.register(name.clone(), hook_fn(f)) {
            tracing::debug!(model = %self.alias, hook = %name, "hook already registered, ignoring");
        }
        self
    }

    pub fn query(mut self, query: NamedQuery) -> Self {
        self.extra_queries.push(query);
        self
    }

    pub fn disable_routes<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled_routes.extend(actions.into_iter().map(Into::into));
        self
    }

    /// Freezes the descriptor. Implicit `Kx*` hooks are discovered here and never replace explicit ones.
    pub fn build(mut self) -> ModelDescriptor<M> {
        let discovered = self.hooks.discover(M::methods());
        if !discovered.is_empty() {
            tracing::debug!(model = %self.alias, hooks = ?discovered, "implicit hooks registered");
        }
        let queries = M::queries()
            .into_iter()
            .chain(self.extra_queries)
            .map(|q| (q.name.clone(), q))
            .collect();
        ModelDescriptor {
            table_name: self.table_name.unwrap_or_else(|| M::table_name().to_string()),
            alias: self.alias,
            id_fields: M::id_fields(),
            queries,
            hooks: self.hooks,
            disabled_routes: self.disabled_routes,
        }
    }
}
