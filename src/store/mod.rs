//! Store gateway: the data-store interface route handlers persist through, plus the in-memory and PostgreSQL gateways.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::StoreError;
use crate::model::NamedQuery;
use crate::query::{Filter, QueryParam};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Generic record representation exchanged with gateways.
pub type Record = Map<String, Value>;

/// Fills a missing or empty single identity field with a fresh v4 uuid. Composite identities are left alone.
pub fn ensure_identity(id_fields: &[String], record: &mut Record) {
    let [field] = id_fields else {
        return;
    };
    let missing = match record.get(field) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    };
    if missing {
        record.insert(field.clone(), Value::String(uuid::Uuid::new_v4().to_string()));
    }
}

/// Identity values of `record`, in `id_fields` order.
pub fn identity_of(id_fields: &[String], record: &Record) -> Vec<Value> {
    id_fields
        .iter()
        .map(|f| record.get(f).cloned().unwrap_or(Value::Null))
        .collect()
}

/// PostgreSQL when a database url is given, otherwise the in-memory store.
pub async fn open_store(database_url: Option<&str>, max_connections: u32) -> Result<Arc<dyn Store>, StoreError> {
    match database_url {
        Some(url) => {
            let store = PgStore::connect(url, max_connections).await?;
            tracing::info!(max_connections, "using postgres store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("no database url configured, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Count-only query: `SELECT count(*) FROM table WHERE filter`.
#[derive(Clone, Debug, PartialEq)]
pub struct CountCommand {
    pub table: String,
    pub filter: Option<Filter>,
}

impl CountCommand {
    pub fn new(table: impl Into<String>, filter: Option<Filter>) -> Self {
        CountCommand {
            table: table.into(),
            filter,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn gets(&self, table: &str, param: &QueryParam) -> Result<Vec<Record>, StoreError>;

    /// First record matching `filter`; `StoreError::NotFound` when none does.
    async fn get_by_filter(&self, table: &str, filter: &Filter) -> Result<Record, StoreError>;

    /// Upsert by identity. An empty `fields` list writes every field.
    async fn save(&self, table: &str, id_fields: &[String], record: &Record, fields: &[String])
        -> Result<Record, StoreError>;

    async fn insert(&self, table: &str, id_fields: &[String], record: &Record) -> Result<Record, StoreError>;

    async fn update(&self, table: &str, id_fields: &[String], record: &Record, fields: &[String])
        -> Result<Record, StoreError>;

    /// Writes `fields` of `record` (all of them when empty) onto every match of `filter`.
    async fn update_any(&self, table: &str, filter: &Filter, record: &Record, fields: &[String])
        -> Result<u64, StoreError>;

    async fn delete(&self, table: &str, id_fields: &[String], record: &Record) -> Result<u64, StoreError>;

    /// Deletes every match; `None` matches all records.
    async fn delete_query(&self, table: &str, filter: Option<&Filter>) -> Result<u64, StoreError>;

    async fn begin_tx(&self) -> Result<Arc<dyn Transaction>, StoreError>;

    async fn get_connection(&self) -> Result<Box<dyn Connection>, StoreError>;

    fn close_connection(&self, conn: Box<dyn Connection>);

    async fn get_by_query(&self, table: &str, query: &NamedQuery, params: &Record) -> Result<Record, StoreError> {
        let mut param = query.to_query_param(params)?;
        param.take = 1;
        self.gets(table, &param)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("{} by {}", table, query.name)))
    }

    async fn gets_by_query(&self, table: &str, query: &NamedQuery, params: &Record) -> Result<Vec<Record>, StoreError> {
        let param = query.to_query_param(params)?;
        self.gets(table, &param).await
    }
}

/// A store handle bound to one open transaction. Commit and rollback close it; later calls fail with `TxClosed`.
#[async_trait]
pub trait Transaction: Store {
    async fn commit(&self) -> Result<(), StoreError>;
    async fn rollback(&self) -> Result<(), StoreError>;
    fn as_store(self: Arc<Self>) -> Arc<dyn Store>;
}

/// A raw connection used for count cursors.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn count(&self, cmd: &CountCommand) -> Result<u64, StoreError>;
}

/// Scoped connection: handed back to its store on drop, whichever way the caller exits.
pub struct ConnectionGuard<'a> {
    store: &'a dyn Store,
    conn: Option<Box<dyn Connection>>,
}

impl<'a> ConnectionGuard<'a> {
    pub async fn acquire(store: &'a dyn Store) -> Result<ConnectionGuard<'a>, StoreError> {
        let conn = store.get_connection().await?;
        Ok(ConnectionGuard {
            store,
            conn: Some(conn),
        })
    }

    pub async fn count(&self, cmd: &CountCommand) -> Result<u64, StoreError> {
        match &self.conn {
            Some(conn) => conn.count(cmd).await,
            None => Err(StoreError::Unsupported("connection already released".into())),
        }
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.store.close_connection(conn);
        }
    }
}
