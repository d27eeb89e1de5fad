//! Best-effort unit of work shared by every mutating handler.

use crate::error::AppError;
use crate::store::Store;
use std::future::Future;
use std::sync::Arc;

/// Runs `work` inside a transaction when the store can open one, otherwise directly on `store`.
/// Commits when `work` succeeds and rolls back when it fails; the decision is taken once, here.
pub async fn run_in_tx<T, F, Fut>(store: Arc<dyn Store>, work: F) -> Result<T, AppError>
where
    F: FnOnce(Arc<dyn Store>) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let tx = match store.begin_tx().await {
        Ok(tx) => tx,
        Err(e) => {
            tracing::warn!(error = %e, "begin transaction failed, continuing without one");
            return work(store).await;
        }
    };
    let result = work(tx.clone().as_store()).await;
    match &result {
        Ok(_) => tx.commit().await?,
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                tracing::error!(error = %rb, cause = %e, "rollback failed");
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Record};
    use serde_json::json;

    fn ids() -> Vec<String> {
        vec!["_id".to_string()]
    }

    fn note(id: &str) -> Record {
        json!({"_id": id, "text": "x"}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn commits_on_success() {
        let mem = MemoryStore::new();
        let store: Arc<dyn Store> = Arc::new(mem.clone());
        let saved = run_in_tx(store, |s| async move {
            Ok(s.save("notes", &ids(), &note("n1"), &[]).await?)
        })
        .await
        .unwrap();
        assert_eq!(saved.get("_id"), Some(&json!("n1")));
        assert_eq!(mem.rows("notes").len(), 1);
        assert_eq!((mem.commits(), mem.rollbacks()), (1, 0));
    }

    #[tokio::test]
    async fn rolls_back_on_error() {
        let mem = MemoryStore::new();
        let store: Arc<dyn Store> = Arc::new(mem.clone());
        let err = run_in_tx(store, |s| async move {
            s.save("notes", &ids(), &note("n1"), &[]).await?;
            Err::<(), _>(AppError::Validation("late failure".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(mem.rows("notes").is_empty());
        assert_eq!((mem.commits(), mem.rollbacks()), (0, 1));
    }

    #[tokio::test]
    async fn degrades_to_plain_store_when_begin_fails() {
        let mem = MemoryStore::new();
        mem.refuse_transactions(true);
        let store: Arc<dyn Store> = Arc::new(mem.clone());
        run_in_tx(store, |s| async move {
            s.save("notes", &ids(), &note("n1"), &[]).await?;
            Ok::<_, AppError>(())
        })
        .await
        .unwrap();
        assert_eq!(mem.rows("notes").len(), 1);
        assert_eq!(mem.commits(), 0);
    }
}
