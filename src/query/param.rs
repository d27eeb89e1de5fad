//! Query parameter bundle: filter root, selection, grouping, sort, paging, aggregates.

use crate::query::filter::Filter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload flag that skips the count query of `gets`.
pub const NO_COUNT_PARAM: &str = "NoCount";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort key. Wire form is the field name, prefixed with `-` for descending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        SortField {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortField {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

impl From<String> for SortField {
    fn from(s: String) -> Self {
        match s.strip_prefix('-') {
            Some(field) => SortField::desc(field),
            None => SortField::asc(s.trim_start_matches('+')),
        }
    }
}

impl From<SortField> for String {
    fn from(s: SortField) -> Self {
        match s.direction {
            SortDirection::Asc => s.field,
            SortDirection::Desc => format!("-{}", s.field),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggrOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggrOp {
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggrOp::Sum => "SUM",
            AggrOp::Avg => "AVG",
            AggrOp::Min => "MIN",
            AggrOp::Max => "MAX",
            AggrOp::Count => "COUNT",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggrItem {
    pub field: String,
    pub op: AggrOp,
    /// Output key; defaults to the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl AggrItem {
    pub fn new(op: AggrOp, field: impl Into<String>) -> Self {
        AggrItem {
            field: field.into(),
            op,
            alias: None,
        }
    }

    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field)
    }
}

/// `skip`/`take` use overwrite semantics with 0 meaning unset; the sequences accumulate on merge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryParam {
    pub select: Vec<String>,
    #[serde(rename = "groupBy", alias = "group")]
    pub group_by: Vec<String>,
    pub sort: Vec<SortField>,
    pub skip: usize,
    pub take: usize,
    #[serde(rename = "aggr")]
    pub aggregates: Vec<AggrItem>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_: Option<Filter>,
    /// Free-form request flags (e.g. `NoCount`).
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub param: Map<String, Value>,
}

impl QueryParam {
    pub fn new() -> Self {
        QueryParam::default()
    }

    pub fn with_where(mut self, filter: Filter) -> Self {
        self.where_ = Some(filter);
        self
    }

    pub fn with_select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortField>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_take(mut self, take: usize) -> Self {
        self.take = take;
        self
    }

    /// Reads a boolean request flag from `param`; strings "true"/"1" count as set.
    pub fn param_bool(&self, key: &str) -> bool {
        match self.param.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
            Some(Value::Number(n)) => n.as_i64().map(|n| n != 0).unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sort_wire_format_uses_minus_for_descending() {
        let p: QueryParam = serde_json::from_value(json!({"sort": ["name", "-created"]})).unwrap();
        assert_eq!(p.sort, vec![SortField::asc("name"), SortField::desc("created")]);
        assert_eq!(serde_json::to_value(&p).unwrap()["sort"], json!(["name", "-created"]));
    }

    #[test]
    fn structured_payload_decodes() {
        let p: QueryParam = serde_json::from_value(json!({
            "select": ["a"],
            "group": ["b"],
            "take": 20,
            "aggr": [{"field": "total", "op": "sum", "alias": "sum_total"}],
            "where": {"field": "status", "op": "$eq", "value": "open"},
            "param": {"NoCount": true}
        }))
        .unwrap();
        assert_eq!(p.group_by, vec!["b".to_string()]);
        assert_eq!(p.take, 20);
        assert_eq!(p.aggregates[0].output_name(), "sum_total");
        assert_eq!(p.where_, Some(Filter::eq("status", "open")));
        assert!(p.param_bool(NO_COUNT_PARAM));
    }

    #[test]
    fn unknown_keys_are_rejected_by_structured_decoding() {
        assert!(serde_json::from_value::<QueryParam>(json!({"status": "open"})).is_err());
    }
}
