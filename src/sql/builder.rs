//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from the filter tree and query parameters.
//! Identifiers are quoted; every value is a bind parameter.

use crate::query::{AggrOp, Condition, Filter, FilterOp, FilterValue, QueryParam, SortDirection};
use crate::sql::params::PgBindValue;
use crate::store::Record;

/// Quote identifier for PostgreSQL.
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// `schema.table` becomes `"schema"."table"`; a bare name is quoted as-is.
pub fn qualified_table(table: &str) -> String {
    match table.split_once('.') {
        Some((schema, name)) => format!("{}.{}", quoted(schema), quoted(name)),
        None => quoted(table),
    }
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: PgBindValue) -> String {
        self.params.push(v);
        format!("${}", self.params.len())
    }
}

/// Renders `filter` into a boolean expression. `None` when the tree holds no leaf.
fn filter_sql(q: &mut QueryBuf, filter: &Filter) -> Option<String> {
    match filter {
        Filter::Leaf(cond) => Some(condition_sql(q, cond)),
        Filter::And(items) | Filter::Or(items) => {
            let parts: Vec<String> = items.iter().filter_map(|f| filter_sql(q, f)).collect();
            if parts.is_empty() {
                return None;
            }
            let joiner = if matches!(filter, Filter::And(_)) { " AND " } else { " OR " };
            Some(format!("({})", parts.join(joiner)))
        }
    }
}

fn condition_sql(q: &mut QueryBuf, cond: &Condition) -> String {
    let col = quoted(&cond.field);
    match (cond.op, &cond.value) {
        (FilterOp::Eq, FilterValue::Null) => format!("{} IS NULL", col),
        (FilterOp::Ne, FilterValue::Null) => format!("{} IS NOT NULL", col),
        (FilterOp::In | FilterOp::Nin, value) => {
            let items: Vec<&FilterValue> = match value {
                FilterValue::List(items) => items.iter().collect(),
                other => vec![other],
            };
            if items.is_empty() {
                return if cond.op == FilterOp::In { "FALSE".into() } else { "TRUE".into() };
            }
            let placeholders: Vec<String> = items
                .into_iter()
                .map(|v| q.push_param(PgBindValue::from_filter(v)))
                .collect();
            let kw = if cond.op == FilterOp::In { "IN" } else { "NOT IN" };
            format!("{} {} ({})", col, kw, placeholders.join(", "))
        }
        (FilterOp::Contains, v) => format!("{} LIKE '%' || {} || '%'", col, q.push_param(like_param(v))),
        (FilterOp::StartWith, v) => format!("{} LIKE {} || '%'", col, q.push_param(like_param(v))),
        (FilterOp::EndWith, v) => format!("{} LIKE '%' || {}", col, q.push_param(like_param(v))),
        (op, v) => {
            let sym = match op {
                FilterOp::Eq => "=",
                FilterOp::Ne => "<>",
                FilterOp::Gt => ">",
                FilterOp::Gte => ">=",
                FilterOp::Lt => "<",
                _ => "<=",
            };
            format!("{} {} {}", col, sym, q.push_param(PgBindValue::from_filter(v)))
        }
    }
}

/// LIKE operands are text; non-text values are matched on their JSON rendering.
fn like_param(v: &FilterValue) -> PgBindValue {
    match v {
        FilterValue::Text(s) => PgBindValue::String(s.clone()),
        other => PgBindValue::String(other.to_json().to_string()),
    }
}

fn where_clause(q: &mut QueryBuf, filter: Option<&Filter>) -> String {
    filter
        .and_then(|f| filter_sql(q, f))
        .map(|w| format!(" WHERE {}", w))
        .unwrap_or_default()
}

fn identity_filter(id_fields: &[String], record: &Record) -> Filter {
    Filter::And(
        id_fields
            .iter()
            .map(|f| Filter::eq(f.clone(), record.get(f).cloned().unwrap_or_default()))
            .collect(),
    )
}

/// Columns written by an update: `fields` when given, otherwise every record key except the identity.
fn set_columns<'a>(id_fields: &[String], record: &'a Record, fields: &'a [String]) -> Vec<&'a str> {
    if fields.is_empty() {
        record
            .keys()
            .filter(|k| !id_fields.contains(k))
            .map(String::as_str)
            .collect()
    } else {
        fields.iter().map(String::as_str).collect()
    }
}

fn set_list(q: &mut QueryBuf, record: &Record, cols: &[&str]) -> String {
    cols.iter()
        .map(|c| {
            let v = record.get(*c).map(PgBindValue::from_json).unwrap_or(PgBindValue::Null);
            format!("{} = {}", quoted(c), q.push_param(v))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// SELECT with projection, aggregates, WHERE, GROUP BY, ORDER BY, LIMIT and OFFSET from `param`.
pub fn select(table: &str, param: &QueryParam) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols: Vec<String> = if param.select.is_empty() && param.aggregates.is_empty() {
        if param.group_by.is_empty() {
            vec!["*".into()]
        } else {
            param.group_by.iter().map(|c| quoted(c)).collect()
        }
    } else {
        param.select.iter().map(|c| quoted(c)).collect()
    };
    if !param.select.is_empty() || !param.aggregates.is_empty() {
        for g in &param.group_by {
            let g = quoted(g);
            if !cols.contains(&g) {
                cols.push(g);
            }
        }
    }
    for a in &param.aggregates {
        let arg = if a.op == AggrOp::Count && a.field == "*" {
            "*".to_string()
        } else {
            quoted(&a.field)
        };
        cols.push(format!("{}({}) AS {}", a.op.sql_name(), arg, quoted(a.output_name())));
    }
    let where_sql = where_clause(&mut q, param.where_.as_ref());
    let group_sql = if param.group_by.is_empty() {
        String::new()
    } else {
        format!(
            " GROUP BY {}",
            param.group_by.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", ")
        )
    };
    let order_sql = if param.sort.is_empty() {
        String::new()
    } else {
        let keys: Vec<String> = param
            .sort
            .iter()
            .map(|s| match s.direction {
                SortDirection::Asc => format!("{} ASC", quoted(&s.field)),
                SortDirection::Desc => format!("{} DESC", quoted(&s.field)),
            })
            .collect();
        format!(" ORDER BY {}", keys.join(", "))
    };
    let limit_sql = if param.take > 0 { format!(" LIMIT {}", param.take) } else { String::new() };
    let offset_sql = if param.skip > 0 { format!(" OFFSET {}", param.skip) } else { String::new() };
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}{}",
        cols.join(", "),
        qualified_table(table),
        where_sql,
        group_sql,
        order_sql,
        limit_sql,
        offset_sql
    );
    q
}

pub fn count(table: &str, filter: Option<&Filter>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, filter);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", qualified_table(table), where_sql);
    q
}

pub fn insert(table: &str, record: &Record) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::with_capacity(record.len());
    let mut placeholders = Vec::with_capacity(record.len());
    for (k, v) in record {
        cols.push(quoted(k));
        placeholders.push(q.push_param(PgBindValue::from_json(v)));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        qualified_table(table),
        cols.join(", "),
        placeholders.join(", ")
    );
    q
}

/// INSERT ... ON CONFLICT (identity) DO UPDATE. `fields` restricts the columns overwritten on conflict.
pub fn upsert(table: &str, id_fields: &[String], record: &Record, fields: &[String]) -> QueryBuf {
    let mut q = insert(table, record);
    let mut updates: Vec<String> = set_columns(id_fields, record, fields)
        .into_iter()
        .map(|c| format!("{} = EXCLUDED.{}", quoted(c), quoted(c)))
        .collect();
    if updates.is_empty() {
        // Keeps RETURNING populated when only identity columns are present.
        if let Some(first) = id_fields.first() {
            updates.push(format!("{} = EXCLUDED.{}", quoted(first), quoted(first)));
        }
    }
    let conflict: Vec<String> = id_fields.iter().map(|f| quoted(f)).collect();
    q.sql = format!(
        "{} ON CONFLICT ({}) DO UPDATE SET {} RETURNING *",
        q.sql.trim_end_matches(" RETURNING *"),
        conflict.join(", "),
        updates.join(", ")
    );
    q
}

/// UPDATE by identity, returning the row. `None` when there is nothing to set.
pub fn update(table: &str, id_fields: &[String], record: &Record, fields: &[String]) -> Option<QueryBuf> {
    let cols = set_columns(id_fields, record, fields);
    if cols.is_empty() {
        return None;
    }
    let mut q = QueryBuf::new();
    let sets = set_list(&mut q, record, &cols);
    let where_sql = where_clause(&mut q, Some(&identity_filter(id_fields, record)));
    q.sql = format!("UPDATE {} SET {}{} RETURNING *", qualified_table(table), sets, where_sql);
    Some(q)
}

/// UPDATE every row matching `filter`. `None` when there is nothing to set.
pub fn update_where(table: &str, filter: &Filter, record: &Record, fields: &[String]) -> Option<QueryBuf> {
    let cols = set_columns(&[], record, fields);
    if cols.is_empty() {
        return None;
    }
    let mut q = QueryBuf::new();
    let sets = set_list(&mut q, record, &cols);
    let where_sql = where_clause(&mut q, Some(filter));
    q.sql = format!("UPDATE {} SET {}{}", qualified_table(table), sets, where_sql);
    Some(q)
}

pub fn delete(table: &str, id_fields: &[String], record: &Record) -> QueryBuf {
    delete_where(table, Some(&identity_filter(id_fields, record)))
}

pub fn delete_where(table: &str, filter: Option<&Filter>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, filter);
    q.sql = format!("DELETE FROM {}{}", qualified_table(table), where_sql);
    q
}

/// `LIMIT 1` lookup by filter.
pub fn select_one(table: &str, filter: &Filter) -> QueryBuf {
    select(table, &QueryParam::new().with_where(filter.clone()).with_take(1))
}
