//! Filter tree: leaf conditions and AND/OR composites, with the string-to-timestamp normalization pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Dynamic leaf value. Strings stay strings until [`Filter::normalize`] coerces RFC-3339 text into `Timestamp`.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<FilterValue>),
}

impl FilterValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FilterValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// JSON form. Timestamps are written as RFC-3339 strings.
    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Null => Value::Null,
            FilterValue::Bool(b) => Value::Bool(*b),
            FilterValue::Int(n) => Value::Number((*n).into()),
            FilterValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FilterValue::Text(s) => Value::String(s.clone()),
            FilterValue::Timestamp(t) => Value::String(t.to_rfc3339()),
            FilterValue::List(items) => Value::Array(items.iter().map(FilterValue::to_json).collect()),
        }
    }
}

impl From<Value> for FilterValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => FilterValue::Null,
            Value::Bool(b) => FilterValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FilterValue::Int(i),
                None => FilterValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => FilterValue::Text(s),
            Value::Array(items) => FilterValue::List(items.into_iter().map(FilterValue::from).collect()),
            // Objects are not singular values; keep their JSON text so equality still round-trips.
            Value::Object(_) => FilterValue::Text(v.to_string()),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Text(s)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        FilterValue::Int(n)
    }
}

impl From<i32> for FilterValue {
    fn from(n: i32) -> Self {
        FilterValue::Int(n as i64)
    }
}

impl From<f64> for FilterValue {
    fn from(f: f64) -> Self {
        FilterValue::Float(f)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        FilterValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(t: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(t)
    }
}

impl Serialize for FilterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FilterValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(FilterValue::from)
    }
}

/// Comparison operator of a leaf condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Contains,
    StartWith,
    EndWith,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "$eq",
            FilterOp::Ne => "$ne",
            FilterOp::Gt => "$gt",
            FilterOp::Gte => "$gte",
            FilterOp::Lt => "$lt",
            FilterOp::Lte => "$lte",
            FilterOp::In => "$in",
            FilterOp::Nin => "$nin",
            FilterOp::Contains => "$contains",
            FilterOp::StartWith => "$startwith",
            FilterOp::EndWith => "$endwith",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s.trim_start_matches('$').to_ascii_lowercase().as_str() {
            "eq" => FilterOp::Eq,
            "ne" => FilterOp::Ne,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "in" => FilterOp::In,
            "nin" => FilterOp::Nin,
            "contains" => FilterOp::Contains,
            "startwith" => FilterOp::StartWith,
            "endwith" => FilterOp::EndWith,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

/// A predicate tree. A composite with no children means "no constraint", same as an absent filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FilterWire", into = "FilterWire")]
pub enum Filter {
    Leaf(Condition),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn leaf(field: impl Into<String>, op: FilterOp, value: impl Into<FilterValue>) -> Self {
        Filter::Leaf(Condition {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Filter::leaf(field, FilterOp::Eq, value)
    }

    pub fn and(items: Vec<Filter>) -> Self {
        Filter::And(items)
    }

    pub fn or(items: Vec<Filter>) -> Self {
        Filter::Or(items)
    }

    /// None for no filters, the filter itself for one, AND over all of them otherwise.
    pub fn and_all(mut items: Vec<Filter>) -> Option<Filter> {
        match items.len() {
            0 => None,
            1 => items.pop(),
            _ => Some(Filter::And(items)),
        }
    }

    /// True when the tree holds no leaf at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Filter::Leaf(_) => false,
            Filter::And(items) | Filter::Or(items) => items.iter().all(Filter::is_empty),
        }
    }

    /// Rewrites string leaf values that parse as RFC-3339 timestamps into typed timestamps, in place.
    pub fn normalize(&mut self) {
        match self {
            Filter::Leaf(cond) => {
                if let FilterValue::Text(s) = &cond.value {
                    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                        cond.value = FilterValue::Timestamp(t.with_timezone(&Utc));
                    }
                }
            }
            Filter::And(items) | Filter::Or(items) => items.iter_mut().for_each(Filter::normalize),
        }
    }

    /// Consuming form of [`Filter::normalize`].
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }
}

/// Wire form: `{"field": "age", "op": "$gte", "value": 18}` or `{"op": "$and", "items": [...]}`.
#[derive(Serialize, Deserialize)]
struct FilterWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<FilterValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    items: Vec<FilterWire>,
}

impl TryFrom<FilterWire> for Filter {
    type Error = String;

    fn try_from(w: FilterWire) -> Result<Self, Self::Error> {
        let op = w.op.trim_start_matches('$').to_ascii_lowercase();
        match op.as_str() {
            "and" | "or" => {
                let items = w
                    .items
                    .into_iter()
                    .map(Filter::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if op == "and" { Filter::And(items) } else { Filter::Or(items) })
            }
            _ => {
                let op = FilterOp::parse(&w.op).ok_or_else(|| format!("unknown filter op: {}", w.op))?;
                let field = w.field.ok_or_else(|| format!("filter op {} requires a field", w.op))?;
                Ok(Filter::Leaf(Condition {
                    field,
                    op,
                    value: w.value.unwrap_or(FilterValue::Null),
                }))
            }
        }
    }
}

impl From<Filter> for FilterWire {
    fn from(f: Filter) -> Self {
        match f {
            Filter::Leaf(c) => FilterWire {
                field: Some(c.field),
                op: c.op.as_str().to_string(),
                value: Some(c.value),
                items: Vec::new(),
            },
            Filter::And(items) => FilterWire {
                field: None,
                op: "$and".into(),
                value: None,
                items: items.into_iter().map(FilterWire::from).collect(),
            },
            Filter::Or(items) => FilterWire {
                field: None,
                op: "$or".into(),
                value: None,
                items: items.into_iter().map(FilterWire::from).collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalize_coerces_rfc3339_strings() {
        let mut f = Filter::eq("created", "2023-05-01T00:00:00Z");
        f.normalize();
        let expected = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(f, Filter::eq("created", expected));
    }

    #[test]
    fn normalize_leaves_plain_strings() {
        let f = Filter::eq("name", "hello").normalized();
        assert_eq!(f, Filter::eq("name", "hello"));
    }

    #[test]
    fn normalize_recurses_and_is_idempotent() {
        let f = Filter::or(vec![
            Filter::and(vec![Filter::leaf("at", FilterOp::Gte, "2024-01-01T10:00:00+02:00")]),
            Filter::eq("n", 3),
        ]);
        let once = f.normalized();
        let twice = once.clone().normalized();
        assert_eq!(once, twice);
        match &once {
            Filter::Or(items) => match &items[0] {
                Filter::And(inner) => match &inner[0] {
                    Filter::Leaf(c) => assert!(matches!(c.value, FilterValue::Timestamp(_))),
                    other => panic!("unexpected {other:?}"),
                },
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_composites_are_empty() {
        assert!(Filter::and(vec![]).is_empty());
        assert!(Filter::or(vec![Filter::and(vec![])]).is_empty());
        assert!(!Filter::and(vec![Filter::eq("a", 1)]).is_empty());
    }

    #[test]
    fn wire_format_round_trips() {
        let json = serde_json::json!({
            "op": "$and",
            "items": [
                {"field": "status", "op": "$eq", "value": "active"},
                {"field": "age", "op": "$gte", "value": 18}
            ]
        });
        let f: Filter = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(
            f,
            Filter::and(vec![Filter::eq("status", "active"), Filter::leaf("age", FilterOp::Gte, 18)])
        );
        assert_eq!(serde_json::to_value(&f).unwrap(), json);
    }

    #[test]
    fn wire_format_rejects_unknown_ops() {
        let json = serde_json::json!({"field": "a", "op": "$like", "value": "x"});
        assert!(serde_json::from_value::<Filter>(json).is_err());
    }

    #[test]
    fn and_all_collapses_single_filters() {
        assert_eq!(Filter::and_all(vec![]), None);
        assert_eq!(Filter::and_all(vec![Filter::eq("a", 1)]), Some(Filter::eq("a", 1)));
        assert!(matches!(
            Filter::and_all(vec![Filter::eq("a", 1), Filter::eq("b", 2)]),
            Some(Filter::And(items)) if items.len() == 2
        ));
    }
}
