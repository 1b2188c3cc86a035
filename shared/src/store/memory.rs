use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{apply_write, Backend, DocPath, ReadRecord, Snapshot, StoreError, Write};

#[derive(Debug, Clone)]
struct Document {
    version: u64,
    data: Value,
}

/// In-process backend with the same commit semantics as [`super::PgBackend`].
#[derive(Default)]
pub struct MemoryBackend {
    docs: Mutex<HashMap<DocPath, Document>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a document outside any transaction, bumping its version.
    pub async fn insert(&self, path: DocPath, data: Value) {
        let mut docs = self.docs.lock().await;
        let version = docs.get(&path).map_or(0, |doc| doc.version) + 1;
        docs.insert(path, Document { version, data });
    }

    /// Documents directly under `collection`, in no particular order.
    pub async fn list(&self, collection: &str) -> Vec<Snapshot> {
        self.docs
            .lock()
            .await
            .iter()
            .filter(|(path, _)| path.collection == collection)
            .map(|(path, doc)| Snapshot {
                path: path.clone(),
                version: doc.version,
                data: doc.data.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        let docs = self.docs.lock().await;
        Ok(docs.get(path).map(|doc| Snapshot {
            path: path.clone(),
            version: doc.version,
            data: doc.data.clone(),
        }))
    }

    async fn find_one(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<Snapshot>, StoreError> {
        let docs = self.docs.lock().await;
        let mut matches: Vec<_> = docs
            .iter()
            .filter(|(path, doc)| {
                path.collection == collection && doc.data.get(field).and_then(Value::as_str) == Some(value)
            })
            .collect();
        matches.sort_by(|a, b| a.0.cmp(b.0));
        Ok(matches.first().map(|(path, doc)| Snapshot {
            path: (*path).clone(),
            version: doc.version,
            data: doc.data.clone(),
        }))
    }

    async fn commit(&self, reads: Vec<ReadRecord>, writes: Vec<Write>) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().await;
        for read in &reads {
            let current = docs.get(&read.path).map(|doc| doc.version);
            if current != read.version {
                return Err(StoreError::Conflict);
            }
        }

        let mut staged: HashMap<DocPath, (u64, Option<Value>)> = HashMap::new();
        for write in &writes {
            let entry = staged.entry(write.path().clone()).or_insert_with(|| {
                docs.get(write.path())
                    .map_or((0, None), |doc| (doc.version, Some(doc.data.clone())))
            });
            apply_write(&mut entry.1, write)?;
        }

        for (path, (version, data)) in staged {
            if let Some(data) = data {
                docs.insert(
                    path,
                    Document {
                        version: version + 1,
                        data,
                    },
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FieldOp, Store};
    use serde_json::json;
    use std::sync::Arc;

    fn event_path() -> DocPath {
        DocPath::new("Events/Active/Public", "evt-1")
    }

    #[tokio::test]
    async fn stale_read_is_rejected_at_commit() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert(event_path(), json!({"vacancy": 1})).await;

        let seen = backend.get(&event_path()).await.unwrap().unwrap();
        backend.insert(event_path(), json!({"vacancy": 0})).await;

        let result = backend
            .commit(
                vec![ReadRecord {
                    path: event_path(),
                    version: Some(seen.version),
                }],
                vec![Write::Update {
                    path: event_path(),
                    ops: vec![FieldOp::set("vacancy", 0)],
                }],
            )
            .await;
        assert!(matches!(result, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn failed_write_leaves_documents_untouched() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert(event_path(), json!({"vacancy": 4})).await;

        let result = backend
            .commit(
                vec![],
                vec![
                    Write::Update {
                        path: event_path(),
                        ops: vec![FieldOp::increment("vacancy", -1)],
                    },
                    Write::Update {
                        path: DocPath::new("Orders", "missing"),
                        ops: vec![FieldOp::set("status", "REJECTED")],
                    },
                ],
            )
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        let doc = backend.get(&event_path()).await.unwrap().unwrap();
        assert_eq!(doc.data["vacancy"], 4);
    }

    #[tokio::test]
    async fn run_transaction_retries_after_conflict() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert(event_path(), json!({"vacancy": 5})).await;
        let store = Store::new(backend.clone());

        let mut attempts = 0;
        let result: Result<i64, StoreError> = store
            .run_transaction(|tx| {
                attempts += 1;
                let backend = backend.clone();
                let first_attempt = attempts == 1;
                async move {
                    let snapshot = tx.get(&event_path()).await?.ok_or(StoreError::Conflict)?;
                    let vacancy = snapshot.data["vacancy"].as_i64().unwrap_or(0);
                    if first_attempt {
                        // Concurrent writer sneaks in between read and commit.
                        backend.insert(event_path(), json!({"vacancy": vacancy - 1})).await;
                    }
                    tx.update(event_path(), vec![FieldOp::increment("vacancy", -1)]).await;
                    Ok(vacancy)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(attempts, 2);
        let doc = backend.get(&event_path()).await.unwrap().unwrap();
        assert_eq!(doc.data["vacancy"], 3);
    }

    #[tokio::test]
    async fn run_transaction_gives_up_after_max_attempts() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert(event_path(), json!({"vacancy": 5})).await;
        let store = Store::new(backend.clone()).with_max_attempts(2);

        let result: Result<(), StoreError> = store
            .run_transaction(|tx| {
                let backend = backend.clone();
                async move {
                    tx.get(&event_path()).await?;
                    backend.insert(event_path(), json!({"vacancy": 5})).await;
                    tx.update(event_path(), vec![FieldOp::increment("vacancy", -1)]).await;
                    Ok(())
                }
            })
            .await;
        assert!(matches!(result, Err(StoreError::Contention { attempts: 2 })));
    }

    #[tokio::test]
    async fn read_after_write_is_rejected() {
        let backend = Arc::new(MemoryBackend::new());
        let store = Store::new(backend);
        let result: Result<(), StoreError> = store
            .run_transaction(|tx| async move {
                tx.upsert(event_path(), vec![FieldOp::set("name", "x")]).await;
                tx.get(&event_path()).await?;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::ReadAfterWrite)));
    }
}
