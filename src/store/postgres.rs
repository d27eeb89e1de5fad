//! PostgreSQL gateway over a sqlx pool. Records map one-to-one onto table columns.

use crate::error::StoreError;
use crate::query::{Filter, QueryParam};
use crate::sql::{self, QueryBuf};
use crate::store::{ensure_identity, Connection, CountCommand, Record, Store, Transaction};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(PgStore { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn gets(&self, table: &str, param: &QueryParam) -> Result<Vec<Record>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ops::gets(&mut conn, table, param).await
    }

    async fn get_by_filter(&self, table: &str, filter: &Filter) -> Result<Record, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ops::get_by_filter(&mut conn, table, filter).await
    }

    async fn save(&self, table: &str, id_fields: &[String], record: &Record, fields: &[String])
        -> Result<Record, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ops::save(&mut conn, table, id_fields, record, fields).await
    }

    async fn insert(&self, table: &str, id_fields: &[String], record: &Record) -> Result<Record, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ops::insert(&mut conn, table, id_fields, record).await
    }

    async fn update(&self, table: &str, id_fields: &[String], record: &Record, fields: &[String])
        -> Result<Record, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ops::update(&mut conn, table, id_fields, record, fields).await
    }

    async fn update_any(&self, table: &str, filter: &Filter, record: &Record, fields: &[String])
        -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ops::update_any(&mut conn, table, filter, record, fields).await
    }

    async fn delete(&self, table: &str, id_fields: &[String], record: &Record) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ops::execute(&mut conn, &sql::delete(table, id_fields, record)).await
    }

    async fn delete_query(&self, table: &str, filter: Option<&Filter>) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ops::execute(&mut conn, &sql::delete_where(table, filter)).await
    }

    async fn begin_tx(&self) -> Result<Arc<dyn Transaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Arc::new(PgTransaction {
            pool: self.pool.clone(),
            tx: Mutex::new(Some(tx)),
        }))
    }

    async fn get_connection(&self) -> Result<Box<dyn Connection>, StoreError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgCountConnection { conn: Mutex::new(conn) }))
    }

    fn close_connection(&self, conn: Box<dyn Connection>) {
        drop(conn);
    }
}

/// One open PostgreSQL transaction. Taken out of the slot on commit or rollback.
pub struct PgTransaction {
    pool: PgPool,
    tx: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

macro_rules! with_tx {
    ($self:ident, $conn:ident => $body:expr) => {{
        let mut guard = $self.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TxClosed)?;
        let $conn: &mut PgConnection = &mut **tx;
        $body.await
    }};
}

#[async_trait]
impl Store for PgTransaction {
    async fn gets(&self, table: &str, param: &QueryParam) -> Result<Vec<Record>, StoreError> {
        with_tx!(self, conn => ops::gets(conn, table, param))
    }

    async fn get_by_filter(&self, table: &str, filter: &Filter) -> Result<Record, StoreError> {
        with_tx!(self, conn => ops::get_by_filter(conn, table, filter))
    }

    async fn save(&self, table: &str, id_fields: &[String], record: &Record, fields: &[String])
        -> Result<Record, StoreError> {
        with_tx!(self, conn => ops::save(conn, table, id_fields, record, fields))
    }

    async fn insert(&self, table: &str, id_fields: &[String], record: &Record) -> Result<Record, StoreError> {
        with_tx!(self, conn => ops::insert(conn, table, id_fields, record))
    }

    async fn update(&self, table: &str, id_fields: &[String], record: &Record, fields: &[String])
        -> Result<Record, StoreError> {
        with_tx!(self, conn => ops::update(conn, table, id_fields, record, fields))
    }

    async fn update_any(&self, table: &str, filter: &Filter, record: &Record, fields: &[String])
        -> Result<u64, StoreError> {
        with_tx!(self, conn => ops::update_any(conn, table, filter, record, fields))
    }

    async fn delete(&self, table: &str, id_fields: &[String], record: &Record) -> Result<u64, StoreError> {
        let q = sql::delete(table, id_fields, record);
        with_tx!(self, conn => ops::execute(conn, &q))
    }

    async fn delete_query(&self, table: &str, filter: Option<&Filter>) -> Result<u64, StoreError> {
        let q = sql::delete_where(table, filter);
        with_tx!(self, conn => ops::execute(conn, &q))
    }

    async fn begin_tx(&self) -> Result<Arc<dyn Transaction>, StoreError> {
        Err(StoreError::Unsupported("nested transactions".into()))
    }

    async fn get_connection(&self) -> Result<Box<dyn Connection>, StoreError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgCountConnection { conn: Mutex::new(conn) }))
    }

    fn close_connection(&self, conn: Box<dyn Connection>) {
        drop(conn);
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(&self) -> Result<(), StoreError> {
        let tx = self.tx.lock().await.take().ok_or(StoreError::TxClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        let tx = self.tx.lock().await.take().ok_or(StoreError::TxClosed)?;
        tx.rollback().await?;
        Ok(())
    }

    fn as_store(self: Arc<Self>) -> Arc<dyn Store> {
        self
    }
}

/// A pooled connection reserved for count queries; returned to the pool when dropped.
struct PgCountConnection {
    conn: Mutex<PoolConnection<Postgres>>,
}

#[async_trait]
impl Connection for PgCountConnection {
    async fn count(&self, cmd: &CountCommand) -> Result<u64, StoreError> {
        let q = sql::count(&cmd.table, cmd.filter.as_ref());
        let mut conn = self.conn.lock().await;
        tracing::debug!(sql = %q.sql, params = ?q.params, "count");
        let mut query = sqlx::query_scalar::<Postgres, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        let n = query.fetch_one(&mut **conn).await?;
        Ok(n.max(0) as u64)
    }
}

/// Statement execution shared by the pooled gateway and its transactions.
mod ops {
    use super::*;

    pub async fn gets(conn: &mut PgConnection, table: &str, param: &QueryParam) -> Result<Vec<Record>, StoreError> {
        fetch_all(conn, &sql::select(table, param)).await
    }

    pub async fn get_by_filter(conn: &mut PgConnection, table: &str, filter: &Filter) -> Result<Record, StoreError> {
        fetch_optional(conn, &sql::select_one(table, filter))
            .await?
            .ok_or_else(|| StoreError::NotFound(table.to_string()))
    }

    pub async fn save(
        conn: &mut PgConnection,
        table: &str,
        id_fields: &[String],
        record: &Record,
        fields: &[String],
    ) -> Result<Record, StoreError> {
        let mut record = record.clone();
        ensure_identity(id_fields, &mut record);
        fetch_optional(conn, &sql::upsert(table, id_fields, &record, fields))
            .await?
            .ok_or_else(|| StoreError::NotFound(table.to_string()))
    }

    pub async fn insert(
        conn: &mut PgConnection,
        table: &str,
        id_fields: &[String],
        record: &Record,
    ) -> Result<Record, StoreError> {
        let mut record = record.clone();
        ensure_identity(id_fields, &mut record);
        fetch_optional(conn, &sql::insert(table, &record))
            .await?
            .ok_or_else(|| StoreError::NotFound(table.to_string()))
    }

    pub async fn update(
        conn: &mut PgConnection,
        table: &str,
        id_fields: &[String],
        record: &Record,
        fields: &[String],
    ) -> Result<Record, StoreError> {
        let Some(q) = sql::update(table, id_fields, record, fields) else {
            let filter = Filter::and_all(
                id_fields
                    .iter()
                    .map(|f| Filter::eq(f.clone(), record.get(f).cloned().unwrap_or_default()))
                    .collect(),
            );
            return match filter {
                Some(f) => get_by_filter(conn, table, &f).await,
                None => Err(StoreError::InvalidQuery(format!("{} has no identity fields", table))),
            };
        };
        fetch_optional(conn, &q)
            .await?
            .ok_or_else(|| StoreError::NotFound(table.to_string()))
    }

    pub async fn update_any(
        conn: &mut PgConnection,
        table: &str,
        filter: &Filter,
        record: &Record,
        fields: &[String],
    ) -> Result<u64, StoreError> {
        match sql::update_where(table, filter, record, fields) {
            Some(q) => execute(conn, &q).await,
            None => Ok(0),
        }
    }

    fn build(q: &QueryBuf) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        query
    }

    async fn fetch_all(conn: &mut PgConnection, q: &QueryBuf) -> Result<Vec<Record>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = build(q).fetch_all(&mut *conn).await.map_err(map_db_err)?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn fetch_optional(conn: &mut PgConnection, q: &QueryBuf) -> Result<Option<Record>, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = build(q).fetch_optional(&mut *conn).await.map_err(map_db_err)?;
        Ok(row.map(|r| row_to_record(&r)))
    }

    pub async fn execute(conn: &mut PgConnection, q: &QueryBuf) -> Result<u64, StoreError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let done = build(q).execute(&mut *conn).await.map_err(map_db_err)?;
        Ok(done.rows_affected())
    }
}

/// Unique violations surface as conflicts; everything else passes through.
fn map_db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Db(e)
}

fn row_to_record(row: &PgRow) -> Record {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Record::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
