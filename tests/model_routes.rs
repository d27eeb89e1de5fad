//! End-to-end behavior of synthesized model routes over the in-memory store.

use architect_dbmod::context::{FIELDS_KEY, FILTER_KEY, HTTP_QUERY_KEY, SELECT_KEY};
use architect_dbmod::{
    pre_validate, AppError, DataModel, FieldRules, Filter, FilterOp, HookPayload, MemoryStore, ModelDescriptor,
    ModelMethod, NamedQuery, Record, RequestContext, ReturnKind, RouteRegistry, Service, StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
struct Customer {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    tier: String,
    #[serde(default)]
    region: String,
}

impl Customer {
    fn kx_pre_new(_: &RequestContext, payload: HookPayload<'_, Customer>) -> Result<(), AppError> {
        if let HookPayload::Model(c) = payload {
            c.tier = "bronze".into();
        }
        Ok(())
    }
}

impl DataModel for Customer {
    fn table_name() -> &'static str {
        "customers"
    }

    fn queries() -> Vec<NamedQuery> {
        vec![
            NamedQuery::new("Name", ReturnKind::Single).condition("name", FilterOp::Eq),
            NamedQuery::new("Tier", ReturnKind::Both).condition("tier", FilterOp::Eq),
        ]
    }

    fn methods() -> Vec<ModelMethod<Self>> {
        vec![ModelMethod::new("KxPreNew", Customer::kx_pre_new)]
    }
}

fn rec(v: Value) -> Record {
    v.as_object().cloned().unwrap()
}

fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    store.seed(
        "customers",
        vec![
            rec(json!({"_id": "c1", "name": "Acme", "tier": "gold", "region": "eu"})),
            rec(json!({"_id": "c2", "name": "Globex", "tier": "silver", "region": "us"})),
            rec(json!({"_id": "c3", "name": "Initech", "tier": "gold", "region": "us"})),
        ],
    );
    store
}

fn registry(desc: ModelDescriptor<Customer>) -> RouteRegistry {
    Service::new("/api").model(desc).build().unwrap()
}

fn plain() -> RouteRegistry {
    registry(ModelDescriptor::<Customer>::builder("customer").build())
}

fn ctx(store: &MemoryStore) -> RequestContext {
    RequestContext::with_store(Arc::new(store.clone()))
}

async fn call(reg: &RouteRegistry, store: &MemoryStore, action: &str, payload: Value) -> Result<Value, AppError> {
    reg.dispatch(&format!("/api/customer/{}", action), ctx(store), payload).await
}

fn ids(v: &Value) -> Vec<String> {
    v.as_array()
        .unwrap()
        .iter()
        .map(|c| c["_id"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn disabled_route_is_absent_from_the_registry() {
    let reg = registry(
        ModelDescriptor::<Customer>::builder("customer")
            .disable_routes(["delete"])
            .build(),
    );
    let paths = reg.paths();
    for action in ["save", "get", "gets", "find", "insert", "update", "fieldupdate", "deletequery", "deletemany"] {
        assert!(paths.contains(&format!("/api/customer/{}", action).as_str()), "missing {}", action);
    }
    assert!(!paths.contains(&"/api/customer/delete"));
}

#[test]
fn registering_a_model_twice_is_a_config_error() {
    let err = Service::new("/api")
        .model(ModelDescriptor::<Customer>::builder("customer").build())
        .model(ModelDescriptor::<Customer>::builder("customer").build())
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("/api/customer/"));
}

#[tokio::test]
async fn new_runs_the_implicit_pre_new_hook() {
    let store = MemoryStore::new();
    let out = call(&plain(), &store, "new", Value::Null).await.unwrap();
    assert_eq!(out["tier"], "bronze");
    assert!(store.rows("customers").is_empty());
}

#[tokio::test]
async fn save_degrades_without_a_transaction_and_keeps_hook_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (pre, post) = (log.clone(), log.clone());
    let reg = registry(
        ModelDescriptor::<Customer>::builder("customer")
            .hook("PreSave", move |_, _| {
                pre.lock().unwrap().push("PreSave");
                Ok(())
            })
            .hook("PostSave", move |_, _| {
                post.lock().unwrap().push("PostSave");
                Ok(())
            })
            .build(),
    );
    let store = MemoryStore::new();
    store.refuse_transactions(true);

    let out = call(&reg, &store, "save", json!({"_id": "c9", "name": "Hooli"})).await.unwrap();

    assert_eq!(out["name"], "Hooli");
    assert_eq!(*log.lock().unwrap(), vec!["PreSave", "PostSave"]);
    assert_eq!(store.rows("customers").len(), 1);
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn post_save_error_leaves_the_write_committed() {
    let reg = registry(
        ModelDescriptor::<Customer>::builder("customer")
            .hook("PostSave", |_, _| Err(AppError::Validation("audit sink down".into())))
            .build(),
    );
    let store = MemoryStore::new();

    let err = call(&reg, &store, "save", json!({"_id": "c9", "name": "Hooli"})).await.unwrap_err();
    assert!(matches!(err, AppError::Hook { ref hook, .. } if hook == "PostSave"));

    let fetched = call(&reg, &store, "get", json!(["c9"])).await.unwrap();
    assert_eq!(fetched["name"], "Hooli");
    assert_eq!(store.commits(), 1);
}

#[tokio::test]
async fn pre_save_error_rolls_back_and_persists_nothing() {
    let reg = registry(
        ModelDescriptor::<Customer>::builder("customer")
            .hook("PreSave", |_, _| Err(AppError::Validation("frozen".into())))
            .build(),
    );
    let store = MemoryStore::new();
    let err = call(&reg, &store, "insert", json!({"_id": "c9"})).await.unwrap_err();
    assert!(matches!(err, AppError::Hook { .. }));
    assert!(store.rows("customers").is_empty());
    assert_eq!(store.rollbacks(), 1);
}

#[tokio::test]
async fn nil_model_is_rejected_before_any_transaction() {
    let store = MemoryStore::new();
    for action in ["save", "insert", "update", "delete", "fieldupdate"] {
        let err = call(&plain(), &store, action, Value::Null).await.unwrap_err();
        assert!(matches!(err, AppError::Input(ref m) if m == "data is nil"), "{}: {}", action, err);
    }
    assert_eq!((store.commits(), store.rollbacks()), (0, 0));
}

#[tokio::test]
async fn validation_failure_stops_save_before_hooks() {
    let touched = Arc::new(Mutex::new(false));
    let flag = touched.clone();
    let reg = Service::new("/api")
        .model(
            ModelDescriptor::<Customer>::builder("customer")
                .hook("PreSave", move |_, _| {
                    *flag.lock().unwrap() = true;
                    Ok(())
                })
                .build(),
        )
        .middleware(pre_validate(FieldRules::new().trim("name").required("name").into_validate_fn()))
        .build()
        .unwrap();
    let store = MemoryStore::new();

    let err = call(&reg, &store, "save", json!({"_id": "c9", "name": "   "})).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(!*touched.lock().unwrap());
    assert!(store.rows("customers").is_empty());

    let saved = call(&reg, &store, "save", json!({"_id": "c9", "name": "  Hooli "})).await.unwrap();
    assert_eq!(saved["name"], "Hooli");
}

#[tokio::test]
async fn gets_returns_a_page_with_the_total_count() {
    let store = seeded();
    let out = call(&plain(), &store, "gets", json!({"take": 2, "sort": ["name"]})).await.unwrap();
    assert_eq!(ids(&out["data"]), vec!["c1", "c2"]);
    assert_eq!(out["count"], 3);
    assert_eq!(store.open_connections(), 0);

    let out = call(&plain(), &store, "gets", json!({"take": 2, "param": {"NoCount": true}})).await.unwrap();
    assert_eq!(out["data"].as_array().unwrap().len(), 2);
    assert_eq!(out["count"], 0);
}

#[tokio::test]
async fn loose_map_payload_filters_by_equality() {
    let store = seeded();
    let out = call(&plain(), &store, "find", json!({"tier": "gold", "sort": ["-name"]})).await.unwrap();
    assert_eq!(ids(&out), vec!["c3", "c1"]);
}

#[tokio::test]
async fn loose_map_payload_honors_the_no_count_flag() {
    let store = seeded();
    let out = call(&plain(), &store, "gets", json!({"tier": "gold", "param": {"NoCount": true}})).await.unwrap();
    let mut got = ids(&out["data"]);
    got.sort();
    assert_eq!(got, vec!["c1", "c3"]);
    assert_eq!(out["count"], 0);
}

#[tokio::test]
async fn malformed_where_is_rejected_instead_of_widening_the_read() {
    let store = seeded();
    let payload = json!({"where": {"field": "tier", "op": "$like", "value": "gold"}});
    for action in ["find", "gets"] {
        let err = call(&plain(), &store, action, payload.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)), "{action}: {err:?}");
    }
}

#[tokio::test]
async fn undecodable_stored_row_is_a_store_error() {
    let store = MemoryStore::new();
    store.seed("customers", vec![rec(json!({"_id": "c9", "name": "Umbrella", "tier": 5}))]);
    let err = call(&plain(), &store, "find", Value::Null).await.unwrap_err();
    assert!(matches!(err, AppError::Store(StoreError::Decode(_))), "{err:?}");
    let err = call(&plain(), &store, "get", json!(["c9"])).await.unwrap_err();
    assert!(matches!(err, AppError::Store(StoreError::Decode(_))), "{err:?}");
}

#[tokio::test]
async fn context_filters_select_and_query_string_scope_reads() {
    let store = seeded();
    let reg = plain();
    let mut ctx = ctx(&store);
    ctx.set(FILTER_KEY, vec![Filter::eq("region", "us")])
        .set(HTTP_QUERY_KEY, vec![("tier".to_string(), "gold".to_string()), ("tier".to_string(), "silver".to_string())])
        .set(SELECT_KEY, vec!["_id".to_string(), "name".to_string()]);

    let out = reg.dispatch("/api/customer/find", ctx, Value::Null).await.unwrap();
    assert_eq!(out, json!([{"_id": "c3", "name": "Initech", "tier": "", "region": ""}]));
}

#[tokio::test]
async fn get_honors_mandatory_filters() {
    let store = seeded();
    let reg = plain();
    let mut scoped = ctx(&store);
    scoped.set(FILTER_KEY, vec![Filter::eq("region", "us")]);
    let err = reg.dispatch("/api/customer/get", scoped, json!("c1")).await.unwrap_err();
    assert!(matches!(err, AppError::Store(StoreError::NotFound(_))));

    let ok = call(&reg, &store, "get", json!("c2")).await.unwrap();
    assert_eq!(ok["name"], "Globex");
}

#[tokio::test]
async fn partial_save_writes_only_listed_fields() {
    let store = seeded();
    let reg = plain();
    let mut ctx = ctx(&store);
    ctx.set(FIELDS_KEY, vec!["tier".to_string()]);
    let out = reg
        .dispatch("/api/customer/save", ctx, json!({"_id": "c1", "name": "Renamed", "tier": "platinum"}))
        .await
        .unwrap();
    assert_eq!(out["name"], "Acme");
    assert_eq!(out["tier"], "platinum");
}

#[tokio::test]
async fn update_of_a_missing_record_fails_and_rolls_back() {
    let store = seeded();
    let err = call(&plain(), &store, "update", json!({"_id": "nope", "name": "x"})).await.unwrap_err();
    assert!(matches!(err, AppError::Store(StoreError::NotFound(_))));
    assert_eq!(store.rollbacks(), 1);
}

#[tokio::test]
async fn fieldupdate_touches_only_the_given_fields() {
    let store = seeded();
    let out = call(
        &plain(),
        &store,
        "fieldupdate",
        json!({"model": {"_id": "c2", "tier": "gold", "name": "ignored"}, "fields": ["tier"]}),
    )
    .await
    .unwrap();
    assert_eq!(out["tier"], "gold");
    let row = store.rows("customers").into_iter().find(|r| r["_id"] == "c2").unwrap();
    assert_eq!(row["tier"], "gold");
    assert_eq!(row["name"], "Globex");
}

#[tokio::test]
async fn delete_runs_pre_and_post_hooks() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (pre, post) = (log.clone(), log.clone());
    let reg = registry(
        ModelDescriptor::<Customer>::builder("customer")
            .hook("PreDelete", move |_, p| {
                if let HookPayload::Model(c) = p {
                    pre.lock().unwrap().push(format!("pre {}", c.id));
                }
                Ok(())
            })
            .hook("PostDelete", move |_, p| {
                if let HookPayload::Model(c) = p {
                    post.lock().unwrap().push(format!("post {}", c.id));
                }
                Ok(())
            })
            .build(),
    );
    let store = seeded();
    let n = call(&reg, &store, "delete", json!({"_id": "c1"})).await.unwrap();
    assert_eq!(n, 1);
    assert_eq!(*log.lock().unwrap(), vec!["pre c1", "post c1"]);
    assert_eq!(store.rows("customers").len(), 2);
}

#[tokio::test]
async fn deletequery_hook_can_narrow_the_filter() {
    let reg = registry(
        ModelDescriptor::<Customer>::builder("customer")
            .hook("PreDeleteQuery", |_, p| {
                if let HookPayload::Filter(f) = p {
                    *f = Some(Filter::and(vec![f.take().unwrap_or(Filter::and(vec![])), Filter::eq("region", "us")]));
                }
                Ok(())
            })
            .build(),
    );
    let store = seeded();
    let n = call(&reg, &store, "deletequery", json!({"field": "tier", "op": "$eq", "value": "gold"}))
        .await
        .unwrap();
    assert_eq!(n, 1);
    let left: Vec<String> = store.rows("customers").iter().map(|r| r["_id"].as_str().unwrap().to_string()).collect();
    assert_eq!(left, vec!["c1", "c2"]);
}

#[tokio::test]
async fn deletemany_stops_at_the_first_failure_and_still_reports_deleted_keys() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let reg = registry(
        ModelDescriptor::<Customer>::builder("customer")
            .hook("PostDeleteMany", move |_, p| {
                if let HookPayload::Keys(keys) = p {
                    sink.lock().unwrap().extend(keys.iter().cloned());
                }
                Ok(())
            })
            .build(),
    );
    let store = seeded();

    let err = call(&reg, &store, "deletemany", json!(["c1", ["c2", "extra"], "c3"])).await.unwrap_err();

    assert!(matches!(err, AppError::Input(_)));
    assert_eq!(*seen.lock().unwrap(), vec![vec![json!("c1")]]);
    let left: Vec<String> = store.rows("customers").iter().map(|r| r["_id"].as_str().unwrap().to_string()).collect();
    assert_eq!(left, vec!["c2", "c3"]);
    assert_eq!(store.commits(), 1);
}

#[tokio::test]
async fn named_queries_respect_cardinality() {
    let store = seeded();
    let reg = plain();

    let one = call(&reg, &store, "GetByName", json!({"name": "Globex"})).await.unwrap();
    assert_eq!(one["_id"], "c2");

    let page = call(&reg, &store, "GetsByTier", json!({"tier": "gold"})).await.unwrap();
    assert_eq!(page["count"], 2);
    assert_eq!(page["data"].as_array().unwrap().len(), 2);

    let found = call(&reg, &store, "FindByTier", json!({"tier": "silver"})).await.unwrap();
    assert_eq!(ids(&found), vec!["c2"]);

    let missing = call(&reg, &store, "GetsByName", json!({"name": "Globex"})).await.unwrap_err();
    assert!(matches!(missing, AppError::NotFound(_)));

    let no_param = call(&reg, &store, "GetByName", json!({})).await.unwrap_err();
    assert!(matches!(no_param, AppError::Store(StoreError::InvalidQuery(_))));
}

#[tokio::test]
async fn post_gets_hook_can_rewrite_the_page() {
    let reg = registry(
        ModelDescriptor::<Customer>::builder("customer")
            .hook("PostGets", |_, p| {
                if let HookPayload::Counted { data, count } = p {
                    data.retain(|c| c.tier == "gold");
                    *count = data.len() as u64;
                }
                Ok(())
            })
            .build(),
    );
    let out = call(&reg, &seeded(), "gets", Value::Null).await.unwrap();
    assert_eq!(out["count"], 2);
}

#[tokio::test]
async fn missing_store_is_an_input_error() {
    let err = plain()
        .dispatch("/api/customer/find", RequestContext::new(), Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Input(_)));
}
