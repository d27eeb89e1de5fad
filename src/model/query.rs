//! Named queries: parameterized filters a model publishes as `GetBy*`/`GetsBy*`/`FindBy*` routes.

use crate::error::StoreError;
use crate::query::{Filter, FilterOp, FilterValue, QueryParam, SortField};
use crate::store::Record;

/// Declared result cardinality of a named query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnKind {
    Single,
    Multi,
    Both,
}

impl ReturnKind {
    pub fn allows_single(&self) -> bool {
        !matches!(self, ReturnKind::Multi)
    }

    pub fn allows_multi(&self) -> bool {
        !matches!(self, ReturnKind::Single)
    }
}

/// `field <op> params[param]`.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryCondition {
    pub field: String,
    pub op: FilterOp,
    pub param: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NamedQuery {
    pub name: String,
    pub return_kind: ReturnKind,
    pub conditions: Vec<QueryCondition>,
    pub sort: Vec<SortField>,
}

impl NamedQuery {
    pub fn new(name: impl Into<String>, return_kind: ReturnKind) -> Self {
        NamedQuery {
            name: name.into(),
            return_kind,
            conditions: Vec::new(),
            sort: Vec::new(),
        }
    }

    /// Adds a condition whose value is read from the request parameter of the same name.
    pub fn condition(self, field: impl Into<String>, op: FilterOp) -> Self {
        let field = field.into();
        let param = field.clone();
        self.condition_with_param(field, op, param)
    }

    pub fn condition_with_param(mut self, field: impl Into<String>, op: FilterOp, param: impl Into<String>) -> Self {
        self.conditions.push(QueryCondition {
            field: field.into(),
            op,
            param: param.into(),
        });
        self
    }

    pub fn sort_by(mut self, sort: SortField) -> Self {
        self.sort.push(sort);
        self
    }

    /// Filter with every condition bound from `params`, normalized.
    pub fn to_filter(&self, params: &Record) -> Result<Option<Filter>, StoreError> {
        let mut leaves = Vec::with_capacity(self.conditions.len());
        for cond in &self.conditions {
            let value = params.get(&cond.param).ok_or_else(|| {
                StoreError::InvalidQuery(format!("query {} requires parameter {}", self.name, cond.param))
            })?;
            leaves.push(Filter::leaf(cond.field.clone(), cond.op, FilterValue::from(value.clone())));
        }
        Ok(Filter::and_all(leaves).map(Filter::normalized))
    }

    pub fn to_query_param(&self, params: &Record) -> Result<QueryParam, StoreError> {
        let mut param = QueryParam::new().with_sort(self.sort.clone());
        param.where_ = self.to_filter(params)?;
        Ok(param)
    }
}
