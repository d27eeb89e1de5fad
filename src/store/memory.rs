//! In-process gateway. Transactions work on a staged copy and replay their journal onto the live tables at commit.

use crate::error::StoreError;
use crate::query::{AggrItem, AggrOp, Filter, FilterOp, FilterValue, QueryParam, SortDirection};
use crate::store::{ensure_identity, identity_of, Connection, CountCommand, Record, Store, Transaction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type Tables = HashMap<String, Vec<Record>>;

#[derive(Default)]
struct Shared {
    tables: RwLock<Tables>,
    refuse_tx: AtomicBool,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    open_connections: AtomicI64,
}

/// Cloning shares the underlying tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// When set, `begin_tx` fails so callers fall back to the plain gateway.
    pub fn refuse_transactions(&self, refuse: bool) {
        self.shared.refuse_tx.store(refuse, AtomicOrdering::SeqCst);
    }

    pub fn commits(&self) -> u64 {
        self.shared.commits.load(AtomicOrdering::SeqCst)
    }

    pub fn rollbacks(&self) -> u64 {
        self.shared.rollbacks.load(AtomicOrdering::SeqCst)
    }

    /// Connections handed out and not yet closed.
    pub fn open_connections(&self) -> i64 {
        self.shared.open_connections.load(AtomicOrdering::SeqCst)
    }

    pub fn seed(&self, table: &str, records: Vec<Record>) {
        let mut tables = self.shared.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.entry(table.to_string()).or_default().extend(records);
    }

    /// Current committed rows of `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        let tables = self.shared.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table).cloned().unwrap_or_default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let tables = self.shared.tables.read().unwrap_or_else(PoisonError::into_inner);
        f(&tables)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> T {
        let mut tables = self.shared.tables.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut tables)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn gets(&self, table: &str, param: &QueryParam) -> Result<Vec<Record>, StoreError> {
        Ok(self.read(|t| query(t, table, param)))
    }

    async fn get_by_filter(&self, table: &str, filter: &Filter) -> Result<Record, StoreError> {
        self.read(|t| find_one(t, table, filter))
    }

    async fn save(&self, table: &str, id_fields: &[String], record: &Record, fields: &[String])
        -> Result<Record, StoreError> {
        let op = WriteOp::save(table, id_fields, record, fields);
        self.write(|t| op.apply(t)).map(Applied::into_record)
    }

    async fn insert(&self, table: &str, id_fields: &[String], record: &Record) -> Result<Record, StoreError> {
        let op = WriteOp::insert(table, id_fields, record);
        self.write(|t| op.apply(t)).map(Applied::into_record)
    }

    async fn update(&self, table: &str, id_fields: &[String], record: &Record, fields: &[String])
        -> Result<Record, StoreError> {
        let op = WriteOp::update(table, id_fields, record, fields);
        self.write(|t| op.apply(t)).map(Applied::into_record)
    }

    async fn update_any(&self, table: &str, filter: &Filter, record: &Record, fields: &[String])
        -> Result<u64, StoreError> {
        let op = WriteOp::update_any(table, filter, record, fields);
        self.write(|t| op.apply(t)).map(Applied::into_count)
    }

    async fn delete(&self, table: &str, id_fields: &[String], record: &Record) -> Result<u64, StoreError> {
        let op = WriteOp::delete(table, id_fields, record);
        self.write(|t| op.apply(t)).map(Applied::into_count)
    }

    async fn delete_query(&self, table: &str, filter: Option<&Filter>) -> Result<u64, StoreError> {
        let op = WriteOp::delete_query(table, filter);
        self.write(|t| op.apply(t)).map(Applied::into_count)
    }

    async fn begin_tx(&self) -> Result<Arc<dyn Transaction>, StoreError> {
        if self.shared.refuse_tx.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Unsupported("transactions disabled".into()));
        }
        let staged = self.read(Tables::clone);
        Ok(Arc::new(MemoryTx {
            store: self.clone(),
            state: Mutex::new(Some(TxState {
                staged,
                journal: Vec::new(),
            })),
        }))
    }

    async fn get_connection(&self) -> Result<Box<dyn Connection>, StoreError> {
        self.shared.open_connections.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(MemoryConnection { store: self.clone() }))
    }

    fn close_connection(&self, conn: Box<dyn Connection>) {
        self.shared.open_connections.fetch_sub(1, AtomicOrdering::SeqCst);
        drop(conn);
    }
}

struct TxState {
    staged: Tables,
    journal: Vec<WriteOp>,
}

pub struct MemoryTx {
    store: MemoryStore,
    state: Mutex<Option<TxState>>,
}

impl MemoryTx {
    fn with_state<T>(&self, f: impl FnOnce(&mut TxState) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = guard.as_mut().ok_or(StoreError::TxClosed)?;
        f(state)
    }

    /// Applies `op` to the staged copy and journals it with any generated identity filled in.
    fn stage(&self, op: WriteOp) -> Result<Applied, StoreError> {
        self.with_state(|state| {
            let applied = op.apply(&mut state.staged)?;
            state.journal.push(op);
            Ok(applied)
        })
    }

    fn take_state(&self) -> Result<TxState, StoreError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(StoreError::TxClosed)
    }
}

#[async_trait]
impl Store for MemoryTx {
    async fn gets(&self, table: &str, param: &QueryParam) -> Result<Vec<Record>, StoreError> {
        self.with_state(|s| Ok(query(&s.staged, table, param)))
    }

    async fn get_by_filter(&self, table: &str, filter: &Filter) -> Result<Record, StoreError> {
        self.with_state(|s| find_one(&s.staged, table, filter))
    }

    async fn save(&self, table: &str, id_fields: &[String], record: &Record, fields: &[String])
        -> Result<Record, StoreError> {
        self.stage(WriteOp::save(table, id_fields, record, fields)).map(Applied::into_record)
    }

    async fn insert(&self, table: &str, id_fields: &[String], record: &Record) -> Result<Record, StoreError> {
        self.stage(WriteOp::insert(table, id_fields, record)).map(Applied::into_record)
    }

    async fn update(&self, table: &str, id_fields: &[String], record: &Record, fields: &[String])
        -> Result<Record, StoreError> {
        self.stage(WriteOp::update(table, id_fields, record, fields)).map(Applied::into_record)
    }

    async fn update_any(&self, table: &str, filter: &Filter, record: &Record, fields: &[String])
        -> Result<u64, StoreError> {
        self.stage(WriteOp::update_any(table, filter, record, fields)).map(Applied::into_count)
    }

    async fn delete(&self, table: &str, id_fields: &[String], record: &Record) -> Result<u64, StoreError> {
        self.stage(WriteOp::delete(table, id_fields, record)).map(Applied::into_count)
    }

    async fn delete_query(&self, table: &str, filter: Option<&Filter>) -> Result<u64, StoreError> {
        self.stage(WriteOp::delete_query(table, filter)).map(Applied::into_count)
    }

    async fn begin_tx(&self) -> Result<Arc<dyn Transaction>, StoreError> {
        Err(StoreError::Unsupported("nested transactions".into()))
    }

    async fn get_connection(&self) -> Result<Box<dyn Connection>, StoreError> {
        self.store.get_connection().await
    }

    fn close_connection(&self, conn: Box<dyn Connection>) {
        self.store.close_connection(conn)
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(&self) -> Result<(), StoreError> {
        let state = self.take_state()?;
        self.store.write(|live| {
            let mut next = live.clone();
            for op in &state.journal {
                op.apply(&mut next)?;
            }
            *live = next;
            Ok::<_, StoreError>(())
        })?;
        self.store.shared.commits.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        self.take_state()?;
        self.store.shared.rollbacks.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn as_store(self: Arc<Self>) -> Arc<dyn Store> {
        self
    }
}

struct MemoryConnection {
    store: MemoryStore,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn count(&self, cmd: &CountCommand) -> Result<u64, StoreError> {
        Ok(self.store.read(|t| {
            t.get(&cmd.table)
                .map(|rows| rows.iter().filter(|r| matches(r, cmd.filter.as_ref())).count() as u64)
                .unwrap_or(0)
        }))
    }
}

enum Applied {
    Record(Record),
    Count(u64),
}

impl Applied {
    fn into_record(self) -> Record {
        match self {
            Applied::Record(r) => r,
            Applied::Count(_) => Record::new(),
        }
    }

    fn into_count(self) -> u64 {
        match self {
            Applied::Count(n) => n,
            Applied::Record(_) => 1,
        }
    }
}

/// A journaled mutation. Identity is assigned at construction so replay is deterministic.
#[derive(Clone, Debug)]
enum WriteOp {
    Save { table: String, ids: Vec<String>, record: Record, fields: Vec<String> },
    Insert { table: String, ids: Vec<String>, record: Record },
    Update { table: String, ids: Vec<String>, record: Record, fields: Vec<String> },
    UpdateAny { table: String, filter: Filter, record: Record, fields: Vec<String> },
    Delete { table: String, ids: Vec<String>, record: Record },
    DeleteQuery { table: String, filter: Option<Filter> },
}

impl WriteOp {
    fn save(table: &str, ids: &[String], record: &Record, fields: &[String]) -> Self {
        let mut record = record.clone();
        ensure_identity(ids, &mut record);
        WriteOp::Save { table: table.into(), ids: ids.to_vec(), record, fields: fields.to_vec() }
    }

    fn insert(table: &str, ids: &[String], record: &Record) -> Self {
        let mut record = record.clone();
        ensure_identity(ids, &mut record);
        WriteOp::Insert { table: table.into(), ids: ids.to_vec(), record }
    }

    fn update(table: &str, ids: &[String], record: &Record, fields: &[String]) -> Self {
        WriteOp::Update { table: table.into(), ids: ids.to_vec(), record: record.clone(), fields: fields.to_vec() }
    }

    fn update_any(table: &str, filter: &Filter, record: &Record, fields: &[String]) -> Self {
        WriteOp::UpdateAny { table: table.into(), filter: filter.clone(), record: record.clone(), fields: fields.to_vec() }
    }

    fn delete(table: &str, ids: &[String], record: &Record) -> Self {
        WriteOp::Delete { table: table.into(), ids: ids.to_vec(), record: record.clone() }
    }

    fn delete_query(table: &str, filter: Option<&Filter>) -> Self {
        WriteOp::DeleteQuery { table: table.into(), filter: filter.cloned() }
    }

    fn apply(&self, tables: &mut Tables) -> Result<Applied, StoreError> {
        match self {
            WriteOp::Save { table, ids, record, fields } => {
                let rows = tables.entry(table.clone()).or_default();
                let key = identity_of(ids, record);
                match rows.iter_mut().find(|r| identity_of(ids, r) == key) {
                    Some(existing) => {
                        merge_fields(existing, record, fields);
                        Ok(Applied::Record(existing.clone()))
                    }
                    None => {
                        rows.push(record.clone());
                        Ok(Applied::Record(record.clone()))
                    }
                }
            }
            WriteOp::Insert { table, ids, record } => {
                let rows = tables.entry(table.clone()).or_default();
                let key = identity_of(ids, record);
                if rows.iter().any(|r| identity_of(ids, r) == key) {
                    return Err(StoreError::Conflict(format!("{} {:?} already exists", table, key)));
                }
                rows.push(record.clone());
                Ok(Applied::Record(record.clone()))
            }
            WriteOp::Update { table, ids, record, fields } => {
                let key = identity_of(ids, record);
                let existing = tables
                    .get_mut(table)
                    .and_then(|rows| rows.iter_mut().find(|r| identity_of(ids, r) == key))
                    .ok_or_else(|| StoreError::NotFound(format!("{} {:?}", table, key)))?;
                merge_fields(existing, record, fields);
                Ok(Applied::Record(existing.clone()))
            }
            WriteOp::UpdateAny { table, filter, record, fields } => {
                let mut n = 0;
                if let Some(rows) = tables.get_mut(table) {
                    for row in rows.iter_mut().filter(|r| matches(r, Some(filter))) {
                        merge_fields(row, record, fields);
                        n += 1;
                    }
                }
                Ok(Applied::Count(n))
            }
            WriteOp::Delete { table, ids, record } => {
                let key = identity_of(ids, record);
                Ok(Applied::Count(retain_count(tables, table, |r| identity_of(ids, r) != key)))
            }
            WriteOp::DeleteQuery { table, filter } => {
                Ok(Applied::Count(retain_count(tables, table, |r| !matches(r, filter.as_ref()))))
            }
        }
    }
}

/// Copies `fields` of `src` onto `dst`, or every field when `fields` is empty.
fn merge_fields(dst: &mut Record, src: &Record, fields: &[String]) {
    if fields.is_empty() {
        for (k, v) in src {
            dst.insert(k.clone(), v.clone());
        }
    } else {
        for f in fields {
            dst.insert(f.clone(), src.get(f).cloned().unwrap_or(Value::Null));
        }
    }
}

fn retain_count(tables: &mut Tables, table: &str, keep: impl Fn(&Record) -> bool) -> u64 {
    let Some(rows) = tables.get_mut(table) else {
        return 0;
    };
    let before = rows.len();
    rows.retain(|r| keep(r));
    (before - rows.len()) as u64
}

fn find_one(tables: &Tables, table: &str, filter: &Filter) -> Result<Record, StoreError> {
    tables
        .get(table)
        .and_then(|rows| rows.iter().find(|r| matches(r, Some(filter))))
        .cloned()
        .ok_or_else(|| StoreError::NotFound(table.to_string()))
}

/// Filter, group/aggregate, sort, page, project.
fn query(tables: &Tables, table: &str, param: &QueryParam) -> Vec<Record> {
    let Some(rows) = tables.get(table) else {
        return Vec::new();
    };
    let matched: Vec<&Record> = rows.iter().filter(|r| matches(r, param.where_.as_ref())).collect();
    let grouped = !param.group_by.is_empty() || !param.aggregates.is_empty();
    let mut out: Vec<Record> = if grouped {
        aggregate(&matched, &param.group_by, &param.aggregates)
    } else {
        matched.into_iter().cloned().collect()
    };
    if !param.sort.is_empty() {
        out.sort_by(|a, b| {
            for s in &param.sort {
                let ord = cmp_json(a.get(&s.field).unwrap_or(&Value::Null), b.get(&s.field).unwrap_or(&Value::Null));
                let ord = match s.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
    let iter = out.into_iter().skip(param.skip);
    let mut out: Vec<Record> = if param.take > 0 { iter.take(param.take).collect() } else { iter.collect() };
    if !param.select.is_empty() && !grouped {
        for r in out.iter_mut() {
            r.retain(|k, _| param.select.contains(k));
        }
    }
    out
}

fn aggregate(rows: &[&Record], group_by: &[String], aggregates: &[AggrItem]) -> Vec<Record> {
    let mut groups: Vec<(Vec<Value>, Vec<&Record>)> = Vec::new();
    for &r in rows {
        let key: Vec<Value> = group_by.iter().map(|g| r.get(g).cloned().unwrap_or(Value::Null)).collect();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(r),
            None => groups.push((key, vec![r])),
        }
    }
    if groups.is_empty() && group_by.is_empty() {
        groups.push((Vec::new(), Vec::new()));
    }
    groups
        .into_iter()
        .map(|(key, members)| {
            let mut out = Record::new();
            for (g, v) in group_by.iter().zip(key) {
                out.insert(g.clone(), v);
            }
            for a in aggregates {
                out.insert(a.output_name().to_string(), aggregate_one(&members, a));
            }
            out
        })
        .collect()
}

fn aggregate_one(members: &[&Record], item: &AggrItem) -> Value {
    let values: Vec<&Value> = members
        .iter()
        .filter_map(|r| r.get(&item.field))
        .filter(|v| !v.is_null())
        .collect();
    match item.op {
        AggrOp::Count if item.field == "*" => Value::from(members.len() as u64),
        AggrOp::Count => Value::from(values.len() as u64),
        AggrOp::Sum => {
            if values.iter().all(|v| v.is_i64()) {
                Value::from(values.iter().filter_map(|v| v.as_i64()).sum::<i64>())
            } else {
                float(values.iter().filter_map(|v| v.as_f64()).sum())
            }
        }
        AggrOp::Avg => {
            let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                float(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        AggrOp::Min => values.into_iter().min_by(|a, b| cmp_json(a, b)).cloned().unwrap_or(Value::Null),
        AggrOp::Max => values.into_iter().max_by(|a, b| cmp_json(a, b)).cloned().unwrap_or(Value::Null),
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// True when `record` satisfies `filter`; an absent or leafless filter matches everything.
fn matches(record: &Record, filter: Option<&Filter>) -> bool {
    match filter {
        None => true,
        Some(f) => eval(record, f),
    }
}

fn eval(record: &Record, filter: &Filter) -> bool {
    match filter {
        Filter::Leaf(cond) => {
            let field = record.get(&cond.field).unwrap_or(&Value::Null);
            leaf_matches(field, cond.op, &cond.value)
        }
        Filter::And(items) => items.iter().all(|f| f.is_empty() || eval(record, f)),
        Filter::Or(items) => {
            let live: Vec<&Filter> = items.iter().filter(|f| !f.is_empty()).collect();
            live.is_empty() || live.into_iter().any(|f| eval(record, f))
        }
    }
}

fn leaf_matches(field: &Value, op: FilterOp, value: &FilterValue) -> bool {
    match op {
        FilterOp::Eq => cmp_filter(field, value) == Some(Ordering::Equal),
        FilterOp::Ne => cmp_filter(field, value) != Some(Ordering::Equal),
        FilterOp::Gt => cmp_filter(field, value) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(cmp_filter(field, value), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => cmp_filter(field, value) == Some(Ordering::Less),
        FilterOp::Lte => matches!(cmp_filter(field, value), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::In => in_list(field, value),
        FilterOp::Nin => !in_list(field, value),
        FilterOp::Contains | FilterOp::StartWith | FilterOp::EndWith => {
            let (Some(hay), Some(needle)) = (field.as_str(), value.as_str()) else {
                return false;
            };
            match op {
                FilterOp::Contains => hay.contains(needle),
                FilterOp::StartWith => hay.starts_with(needle),
                _ => hay.ends_with(needle),
            }
        }
    }
}

fn in_list(field: &Value, value: &FilterValue) -> bool {
    match value {
        FilterValue::List(items) => items.iter().any(|v| cmp_filter(field, v) == Some(Ordering::Equal)),
        single => cmp_filter(field, single) == Some(Ordering::Equal),
    }
}

/// Compares a stored value with a filter operand. `None` when the two are not comparable.
fn cmp_filter(field: &Value, value: &FilterValue) -> Option<Ordering> {
    match (field, value) {
        (Value::Null, FilterValue::Null) => Some(Ordering::Equal),
        (Value::Bool(a), FilterValue::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), FilterValue::Int(b)) => match a.as_i64() {
            Some(a) => Some(a.cmp(b)),
            None => a.as_f64()?.partial_cmp(&(*b as f64)),
        },
        (Value::Number(a), FilterValue::Float(b)) => a.as_f64()?.partial_cmp(b),
        (Value::String(a), FilterValue::Text(b)) => Some(a.as_str().cmp(b.as_str())),
        (Value::String(a), FilterValue::Timestamp(b)) => Some(parse_ts(a)?.cmp(b)),
        (Value::Array(_) | Value::Object(_), other) => {
            (field == &other.to_json()).then_some(Ordering::Equal)
        }
        _ => None,
    }
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc))
}

/// Total order over JSON values for sorting: null, bool, number, string, then arrays and objects by text.
fn cmp_json(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or_default()
                .partial_cmp(&y.as_f64().unwrap_or_default())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => match (parse_ts(x), parse_ts(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}
