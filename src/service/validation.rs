//! Request-scoped validation gate and a rule-based predicate builder.

use crate::context::{RequestContext, VALIDATE_FN_KEY, VALIDATE_KEY};
use crate::error::AppError;
use crate::model::{from_record, to_record, DataModel};
use crate::store::Record;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

/// Predicate over the generic record form. May rewrite the record; `save` reads the rewrite back.
pub type ValidateFn = Arc<dyn Fn(&mut Record) -> bool + Send + Sync>;

pub const VALIDATION_FAILED: &str = "validate data error";

pub fn validate_fn<F>(f: F) -> ValidateFn
where
    F: Fn(&mut Record) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Runs the gate when the context enables it. Without a predicate every record is rejected.
/// With `rematerialize`, the possibly corrected record replaces `model`.
pub fn validate_model<M: DataModel>(ctx: &RequestContext, model: &mut M, rematerialize: bool) -> Result<(), AppError> {
    if !ctx.get(VALIDATE_KEY, false) {
        return Ok(());
    }
    let mut record = to_record(model)?;
    let passed = ctx
        .get_ref::<ValidateFn>(VALIDATE_FN_KEY)
        .map(|f| f(&mut record))
        .unwrap_or(false);
    if !passed {
        return Err(AppError::Validation(VALIDATION_FAILED.into()));
    }
    if rematerialize {
        *model = from_record(record)?;
    }
    Ok(())
}

#[derive(Clone, Debug)]
enum Rule {
    Required,
    Trim,
    MinLength(usize),
    MaxLength(usize),
    Pattern(Regex),
    Allowed(Vec<Value>),
    Minimum(f64),
    Maximum(f64),
}

/// Declarative per-field rules compiled into a [`ValidateFn`]. Rules run in declaration order.
#[derive(Clone, Debug, Default)]
pub struct FieldRules {
    rules: Vec<(String, Rule)>,
}

impl FieldRules {
    pub fn new() -> Self {
        FieldRules::default()
    }

    fn push(mut self, field: impl Into<String>, rule: Rule) -> Self {
        self.rules.push((field.into(), rule));
        self
    }

    pub fn required(self, field: impl Into<String>) -> Self {
        self.push(field, Rule::Required)
    }

    /// Corrective: trims surrounding whitespace from a string field.
    pub fn trim(self, field: impl Into<String>) -> Self {
        self.push(field, Rule::Trim)
    }

    pub fn min_length(self, field: impl Into<String>, n: usize) -> Self {
        self.push(field, Rule::MinLength(n))
    }

    pub fn max_length(self, field: impl Into<String>, n: usize) -> Self {
        self.push(field, Rule::MaxLength(n))
    }

    pub fn pattern(self, field: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        let re = Regex::new(pattern)?;
        Ok(self.push(field, Rule::Pattern(re)))
    }

    pub fn allowed<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push(field, Rule::Allowed(values.into_iter().map(Into::into).collect()))
    }

    pub fn minimum(self, field: impl Into<String>, n: f64) -> Self {
        self.push(field, Rule::Minimum(n))
    }

    pub fn maximum(self, field: impl Into<String>, n: f64) -> Self {
        self.push(field, Rule::Maximum(n))
    }

    /// Applies every rule to `record`. Null or missing values only fail `required`.
    pub fn check(&self, record: &mut Record) -> bool {
        for (field, rule) in &self.rules {
            if let Rule::Trim = rule {
                if let Some(Value::String(s)) = record.get_mut(field) {
                    *s = s.trim().to_string();
                }
                continue;
            }
            let v = record.get(field).unwrap_or(&Value::Null);
            let ok = match rule {
                Rule::Required => match v {
                    Value::Null => false,
                    Value::String(s) => !s.is_empty(),
                    _ => true,
                },
                _ if v.is_null() => true,
                Rule::MinLength(n) => v.as_str().map_or(true, |s| s.chars().count() >= *n),
                Rule::MaxLength(n) => v.as_str().map_or(true, |s| s.chars().count() <= *n),
                Rule::Pattern(re) => v.as_str().map_or(true, |s| re.is_match(s)),
                Rule::Allowed(values) => values.iter().any(|a| value_eq(v, a)),
                Rule::Minimum(n) => v.as_f64().map_or(true, |x| x >= *n),
                Rule::Maximum(n) => v.as_f64().map_or(true, |x| x <= *n),
                Rule::Trim => true,
            };
            if !ok {
                tracing::debug!(field = %field, rule = ?rule, "validation rule failed");
                return false;
            }
        }
        true
    }

    pub fn into_validate_fn(self) -> ValidateFn {
        validate_fn(move |record| self.check(record))
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}
