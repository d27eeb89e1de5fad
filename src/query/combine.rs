//! Composition algebra: merging query parameters and filters from payload, request context and raw maps.

use crate::context::{RequestContext, QUERY_PARAM_KEY};
use crate::query::filter::Filter;
use crate::query::param::{AggrItem, QueryParam, SortField};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Normalizes both sides, then returns the present one, or `AND(origin, other)` when both are present.
pub fn combine_filter(origin: Option<Filter>, other: Option<Filter>) -> Option<Filter> {
    match (origin.map(Filter::normalized), other.map(Filter::normalized)) {
        (None, None) => None,
        (Some(f), None) | (None, Some(f)) => Some(f),
        (Some(a), Some(b)) => Some(Filter::And(vec![a, b])),
    }
}

/// Merges `other` into `origin`. A missing `origin` yields `None` even when `other` is present.
pub fn combine_query_param(origin: Option<QueryParam>, other: Option<QueryParam>) -> Option<QueryParam> {
    let mut origin = origin?;
    if let Some(other) = other {
        merge_into(&mut origin, other);
    }
    Some(origin)
}

pub(crate) fn merge_into(origin: &mut QueryParam, other: QueryParam) {
    origin.aggregates.extend(other.aggregates);
    origin.group_by.extend(other.group_by);
    origin.select.extend(other.select);
    origin.sort.extend(other.sort);
    if other.skip > 0 {
        origin.skip = other.skip;
    }
    if other.take > 0 {
        origin.take = other.take;
    }
    origin.where_ = combine_filter(origin.where_.take(), other.where_);
}

/// Starts from `origin` (or an empty parameter), normalizes its filter and merges the context's query parameter if any.
pub fn combine_query_param_from_ctx(origin: Option<QueryParam>, ctx: &RequestContext) -> QueryParam {
    let mut origin = origin.unwrap_or_default();
    if let Some(w) = origin.where_.as_mut() {
        w.normalize();
    }
    if let Some(other) = ctx.get_ref::<QueryParam>(QUERY_PARAM_KEY) {
        merge_into(&mut origin, other.clone());
    }
    origin
}

/// Combines `origin` with the filter of the context's query parameter, if any.
pub fn combine_filter_from_ctx(origin: Option<Filter>, ctx: &RequestContext) -> Option<Filter> {
    match ctx.get_ref::<QueryParam>(QUERY_PARAM_KEY) {
        Some(other) => combine_filter(origin, other.where_.clone()),
        None => origin,
    }
}

/// Builds a parameter from a loose map. Keys `select`, `group`, `sort`, `skip`, `take`, `where`, `aggr`
/// and `param` (any case) fill the matching field when the value has the right shape; any other key
/// becomes an equality filter on that field. An explicit `where` is ANDed with those equalities.
/// A `where` value that is not a filter is an error rather than being dropped.
pub fn map_to_query_param(kv: &Map<String, Value>) -> Result<QueryParam, serde_json::Error> {
    let mut param = QueryParam::default();
    let mut equals = Vec::new();
    for (key, value) in kv {
        match key.to_ascii_lowercase().as_str() {
            "select" => assign(&mut param.select, value, key),
            "group" => assign(&mut param.group_by, value, key),
            "sort" => assign::<Vec<SortField>>(&mut param.sort, value, key),
            "aggr" => assign::<Vec<AggrItem>>(&mut param.aggregates, value, key),
            "param" => assign(&mut param.param, value, key),
            "skip" => {
                if let Some(n) = value.as_u64() {
                    param.skip = n as usize;
                }
            }
            "take" => {
                if let Some(n) = value.as_u64() {
                    param.take = n as usize;
                }
            }
            "where" if value.is_null() => {}
            "where" => param.where_ = Some(serde_json::from_value::<Filter>(value.clone())?),
            _ => equals.push(Filter::eq(key.clone(), value.clone())),
        }
    }
    let mut parts: Vec<Filter> = param.where_.take().into_iter().collect();
    parts.extend(equals);
    param.where_ = Filter::and_all(parts);
    Ok(param)
}

fn assign<T: DeserializeOwned>(slot: &mut T, value: &Value, key: &str) {
    match serde_json::from_value::<T>(value.clone()) {
        Ok(v) => *slot = v,
        Err(e) => tracing::debug!(key = %key, error = %e, "ignoring mistyped query key"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::FilterValue;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn date_leaf() -> Filter {
        Filter::eq("created", "2023-05-01T00:00:00Z")
    }

    #[test]
    fn combine_filter_nil_cases() {
        assert_eq!(combine_filter(None, None), None);
        let b = Filter::eq("status", "active");
        assert_eq!(combine_filter(None, Some(b.clone())), Some(b.clone()));
        assert_eq!(combine_filter(Some(b.clone()), None), Some(b));
    }

    #[test]
    fn combine_filter_normalizes_the_lone_side() {
        let expected = Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(combine_filter(Some(date_leaf()), None), Some(Filter::eq("created", expected)));
        assert_eq!(combine_filter(None, Some(date_leaf())), Some(Filter::eq("created", expected)));
    }

    #[test]
    fn combine_filter_ands_origin_first() {
        let a = Filter::eq("a", 1);
        let b = date_leaf();
        let combined = combine_filter(Some(a.clone()), Some(b.clone()));
        assert_eq!(combined, Some(Filter::And(vec![a.normalized(), b.normalized()])));
    }

    #[test]
    fn combine_query_param_accumulates_sequences() {
        let origin = QueryParam::new().with_select(["a"]).with_sort(vec![SortField::asc("x")]);
        let other = QueryParam::new().with_select(["b"]).with_sort(vec![SortField::desc("y")]);
        let merged = combine_query_param(Some(origin), Some(other)).unwrap();
        assert_eq!(merged.select, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(merged.sort, vec![SortField::asc("x"), SortField::desc("y")]);
    }

    #[test]
    fn combine_query_param_keeps_duplicates() {
        let merged = combine_query_param(
            Some(QueryParam::new().with_select(["a"])),
            Some(QueryParam::new().with_select(["a"])),
        )
        .unwrap();
        assert_eq!(merged.select, vec!["a".to_string(), "a".to_string()]);
    }

    #[test]
    fn combine_query_param_overwrites_paging_only_when_set() {
        let kept = combine_query_param(Some(QueryParam::new().with_skip(5)), Some(QueryParam::new())).unwrap();
        assert_eq!(kept.skip, 5);
        let replaced =
            combine_query_param(Some(QueryParam::new().with_skip(5)), Some(QueryParam::new().with_skip(10))).unwrap();
        assert_eq!(replaced.skip, 10);
        let take = combine_query_param(Some(QueryParam::new()), Some(QueryParam::new().with_take(3))).unwrap();
        assert_eq!(take.take, 3);
    }

    #[test]
    fn combine_query_param_with_missing_origin_discards_other() {
        // Long-standing behavior: a missing origin wins over a present `other`.
        let other = QueryParam::new().with_where(Filter::eq("a", 1));
        assert_eq!(combine_query_param(None, Some(other)), None);
        assert_eq!(combine_query_param(None, None), None);
    }

    #[test]
    fn combine_query_param_with_missing_other_returns_origin() {
        let origin = QueryParam::new().with_take(7);
        assert_eq!(combine_query_param(Some(origin.clone()), None), Some(origin));
    }

    #[test]
    fn from_ctx_builds_fresh_param_and_merges_context() {
        let ctx = RequestContext::new();
        let p = combine_query_param_from_ctx(None, &ctx);
        assert_eq!(p, QueryParam::default());

        let mut ctx = RequestContext::new();
        ctx.set(QUERY_PARAM_KEY, QueryParam::new().with_where(Filter::eq("tenant", "t1")).with_take(50));
        let p = combine_query_param_from_ctx(Some(QueryParam::new().with_where(date_leaf())), &ctx);
        assert_eq!(p.take, 50);
        match p.where_ {
            Some(Filter::And(items)) => {
                assert!(matches!(&items[0], Filter::Leaf(c) if matches!(c.value, FilterValue::Timestamp(_))));
                assert_eq!(items[1], Filter::eq("tenant", "t1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn from_ctx_normalizes_origin_without_context_param() {
        let ctx = RequestContext::new();
        let p = combine_query_param_from_ctx(Some(QueryParam::new().with_where(date_leaf())), &ctx);
        assert!(matches!(p.where_, Some(Filter::Leaf(c)) if matches!(c.value, FilterValue::Timestamp(_))));
    }

    #[test]
    fn filter_from_ctx_uses_context_where() {
        let mut ctx = RequestContext::new();
        assert_eq!(combine_filter_from_ctx(Some(Filter::eq("a", 1)), &ctx), Some(Filter::eq("a", 1)));
        ctx.set(QUERY_PARAM_KEY, QueryParam::new().with_where(Filter::eq("b", 2)));
        assert_eq!(
            combine_filter_from_ctx(Some(Filter::eq("a", 1)), &ctx),
            Some(Filter::And(vec![Filter::eq("a", 1), Filter::eq("b", 2)]))
        );
    }

    #[test]
    fn map_to_query_param_splits_known_keys_from_equalities() {
        let kv = json!({"status": "active", "skip": 10});
        let p = map_to_query_param(kv.as_object().unwrap()).unwrap();
        assert_eq!(p.skip, 10);
        assert_eq!(p.where_, Some(Filter::eq("status", "active")));
    }

    #[test]
    fn map_to_query_param_matches_keys_case_insensitively() {
        let kv = json!({"Select": ["a", "b"], "TAKE": 5, "Sort": ["-a"], "Group": ["g"]});
        let p = map_to_query_param(kv.as_object().unwrap()).unwrap();
        assert_eq!(p.select, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(p.take, 5);
        assert_eq!(p.sort, vec![SortField::desc("a")]);
        assert_eq!(p.group_by, vec!["g".to_string()]);
        assert_eq!(p.where_, None);
    }

    #[test]
    fn map_to_query_param_ands_multiple_equalities() {
        let kv = json!({"a": 1, "b": "x"});
        let p = map_to_query_param(kv.as_object().unwrap()).unwrap();
        match p.where_ {
            Some(Filter::And(items)) => {
                assert_eq!(items.len(), 2);
                assert!(items.contains(&Filter::eq("a", 1)));
                assert!(items.contains(&Filter::eq("b", "x")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn map_to_query_param_ignores_mistyped_known_keys() {
        let kv = json!({"skip": "ten", "select": "a"});
        let p = map_to_query_param(kv.as_object().unwrap()).unwrap();
        assert_eq!(p, QueryParam::default());
    }

    #[test]
    fn map_to_query_param_accepts_where_filter() {
        let kv = json!({"where": {"field": "n", "op": "$gt", "value": 3}});
        let p = map_to_query_param(kv.as_object().unwrap()).unwrap();
        assert_eq!(
            p.where_,
            Some(Filter::leaf("n", crate::query::filter::FilterOp::Gt, 3))
        );
    }

    #[test]
    fn map_to_query_param_ands_explicit_where_with_equalities() {
        let kv = json!({"where": {"field": "n", "op": "$gt", "value": 3}, "status": "active"});
        let p = map_to_query_param(kv.as_object().unwrap()).unwrap();
        assert_eq!(
            p.where_,
            Some(Filter::And(vec![
                Filter::leaf("n", crate::query::filter::FilterOp::Gt, 3),
                Filter::eq("status", "active"),
            ]))
        );
    }

    #[test]
    fn map_to_query_param_rejects_a_malformed_where() {
        let kv = json!({"where": {"field": "tier", "op": "$like", "value": "gold"}});
        assert!(map_to_query_param(kv.as_object().unwrap()).is_err());
        let kv = json!({"where": null, "tier": "gold"});
        let p = map_to_query_param(kv.as_object().unwrap()).unwrap();
        assert_eq!(p.where_, Some(Filter::eq("tier", "gold")));
    }

    #[test]
    fn map_to_query_param_reads_param_as_flags() {
        let kv = json!({"tier": "gold", "param": {"NoCount": true}});
        let p = map_to_query_param(kv.as_object().unwrap()).unwrap();
        assert_eq!(p.where_, Some(Filter::eq("tier", "gold")));
        assert!(p.param_bool(crate::query::NO_COUNT_PARAM));
    }
}
