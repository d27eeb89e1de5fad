//! Lifecycle hooks: explicit registration plus convention-based discovery of `Kx*` model methods.

use crate::context::RequestContext;
use crate::error::AppError;
use crate::query::Filter;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const PRE_NEW: &str = "PreNew";
pub const PRE_SAVE: &str = "PreSave";
pub const POST_SAVE: &str = "PostSave";
pub const PRE_DELETE: &str = "PreDelete";
pub const POST_DELETE: &str = "PostDelete";
pub const PRE_DELETE_QUERY: &str = "PreDeleteQuery";
pub const POST_DELETE_QUERY: &str = "PostDeleteQuery";
pub const POST_GETS: &str = "PostGets";
pub const POST_FIND: &str = "PostFind";
pub const POST_GET: &str = "PostGet";
pub const POST_DELETE_MANY: &str = "PostDeleteMany";

/// Method-name prefix marking a model method as an implicit hook.
pub const HOOK_METHOD_PREFIX: &str = "Kx";

/// What a hook receives, depending on the lifecycle event.
pub enum HookPayload<'a, M> {
    /// PreNew, PreSave, PostSave, PreDelete, PostDelete, PostGet.
    Model(&'a mut M),
    /// PostFind.
    Many(&'a mut Vec<M>),
    /// PostGets.
    Counted { data: &'a mut Vec<M>, count: &'a mut u64 },
    /// PreDeleteQuery, PostDeleteQuery.
    Filter(&'a mut Option<Filter>),
    /// PostDeleteMany: the identity tuples that were deleted.
    Keys(&'a [Vec<Value>]),
}

pub type HookFn<M> = Arc<dyn Fn(&RequestContext, HookPayload<'_, M>) -> Result<(), AppError> + Send + Sync>;

/// Boxes a closure as a [`HookFn`], fixing its signature for every payload lifetime.
pub fn hook_fn<M, F>(f: F) -> HookFn<M>
where
    F: Fn(&RequestContext, HookPayload<'_, M>) -> Result<(), AppError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A method a model type exposes with the hook signature `(ctx, payload) -> Result<()>`.
pub struct ModelMethod<M> {
    pub name: &'static str,
    pub call: HookFn<M>,
}

impl<M> ModelMethod<M> {
    pub fn new<F>(name: &'static str, f: F) -> Self
    where
        F: Fn(&RequestContext, HookPayload<'_, M>) -> Result<(), AppError> + Send + Sync + 'static,
    {
        ModelMethod { name, call: hook_fn(f) }
    }
}

pub struct HookRegistry<M> {
    hooks: HashMap<String, HookFn<M>>,
}

impl<M> Default for HookRegistry<M> {
    fn default() -> Self {
        HookRegistry { hooks: HashMap::new() }
    }
}

impl<M> HookRegistry<M> {
    pub fn new() -> Self {
        HookRegistry::default()
    }

    pub fn has(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    /// First registration wins; returns false when `name` was already taken.
    pub fn register(&mut self, name: impl Into<String>, hook: HookFn<M>) -> bool {
        let name = name.into();
        if self.hooks.contains_key(&name) {
            return false;
        }
        self.hooks.insert(name, hook);
        true
    }

    /// Registers every `Kx`-prefixed method under its name minus the prefix. Returns the names added.
    pub fn discover(&mut self, methods: Vec<ModelMethod<M>>) -> Vec<String> {
        let mut added = Vec::new();
        for method in methods {
            let Some(hook_name) = method.name.strip_prefix(HOOK_METHOD_PREFIX) else {
                continue;
            };
            if hook_name.is_empty() {
                continue;
            }
            if self.register(hook_name, method.call) {
                added.push(hook_name.to_string());
            }
        }
        added
    }

    /// Runs the hook if registered. An error comes back wrapped with the hook name.
    pub fn call(&self, name: &str, ctx: &RequestContext, payload: HookPayload<'_, M>) -> Result<(), AppError> {
        let Some(hook) = self.hooks.get(name) else {
            return Ok(());
        };
        hook(ctx, payload).map_err(|e| {
            tracing::debug!(hook = %name, error = %e, "hook failed");
            AppError::Hook {
                hook: name.to_string(),
                source: Box::new(e),
            }
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.hooks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Note {
        text: String,
    }

    fn upper() -> HookFn<Note> {
        hook_fn::<Note, _>(|_, payload| {
            if let HookPayload::Model(n) = payload {
                n.text = n.text.to_uppercase();
            }
            Ok(())
        })
    }

    #[test]
    fn first_registration_wins() {
        let mut reg = HookRegistry::<Note>::new();
        assert!(reg.register(PRE_SAVE, upper()));
        assert!(!reg.register(PRE_SAVE, hook_fn(|_, _| Err(AppError::Validation("never".into())))));
        let mut n = Note { text: "hi".into() };
        reg.call(PRE_SAVE, &RequestContext::new(), HookPayload::Model(&mut n)).unwrap();
        assert_eq!(n.text, "HI");
    }

    #[test]
    fn discovery_strips_prefix_and_skips_taken_names() {
        let mut reg = HookRegistry::<Note>::new();
        reg.register(POST_SAVE, upper());
        let added = reg.discover(vec![
            ModelMethod::new("KxPreSave", |_, _| Ok(())),
            ModelMethod::new("KxPostSave", |_, _| Err(AppError::Validation("shadowed".into()))),
            ModelMethod::new("Describe", |_, _| Ok(())),
            ModelMethod::new("Kx", |_, _| Ok(())),
        ]);
        assert_eq!(added, vec![PRE_SAVE.to_string()]);
        assert_eq!(reg.names(), vec![POST_SAVE, PRE_SAVE]);
        let mut n = Note::default();
        assert!(reg.call(POST_SAVE, &RequestContext::new(), HookPayload::Model(&mut n)).is_ok());
    }

    #[test]
    fn failing_hook_is_wrapped_with_its_name() {
        let mut reg = HookRegistry::<Note>::new();
        reg.register(PRE_DELETE, hook_fn(|_, _| Err(AppError::Validation("locked".into()))));
        let mut n = Note::default();
        let err = reg
            .call(PRE_DELETE, &RequestContext::new(), HookPayload::Model(&mut n))
            .unwrap_err();
        assert!(matches!(err, AppError::Hook { ref hook, .. } if hook == PRE_DELETE));
    }

    #[test]
    fn missing_hook_is_a_no_op() {
        let reg = HookRegistry::<Note>::new();
        let mut n = Note::default();
        assert!(reg.call(PRE_NEW, &RequestContext::new(), HookPayload::Model(&mut n)).is_ok());
    }
}
