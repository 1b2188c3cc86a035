//! Document store with optimistic, serializable transactions.
//!
//! A transaction body reads documents (recording the version it saw) and
//! buffers writes. On commit the backend re-checks every recorded version and
//! applies the writes atomically, or reports [`StoreError::Conflict`], in which
//! case [`Store::run_transaction`] re-runs the body against fresh reads.

pub mod memory;
pub mod pg;
mod schema;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use memory::MemoryBackend;
pub use pg::PgBackend;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transaction conflict")]
    Conflict,
    #[error("transaction gave up after {attempts} conflicting attempts")]
    Contention { attempts: u32 },
    #[error("document {0} not found")]
    NotFound(DocPath),
    #[error("document {0} already exists")]
    AlreadyExists(DocPath),
    #[error("reads must happen before any write in a transaction")]
    ReadAfterWrite,
    #[error("field {field} of {path} cannot be updated: {reason}")]
    InvalidField {
        path: DocPath,
        field: String,
        reason: &'static str,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: DocPath,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath {
    pub collection: String,
    pub id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn child(&self, collection: &str, id: impl Into<String>) -> Self {
        Self::new(format!("{}/{}/{}", self.collection, self.id, collection), id)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Path to a field inside a document, one segment per nesting level.
///
/// Segments are kept apart so map keys containing dots (attendee names,
/// for instance) never get split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for FieldPath {
    fn from(field: &str) -> Self {
        Self::new(field.split('.'))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(FieldPath, Value),
    Increment(FieldPath, i64),
    ArrayUnion(FieldPath, Vec<Value>),
}

impl FieldOp {
    pub fn set(field: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        Self::Set(field.into(), value.into())
    }

    pub fn increment(field: impl Into<FieldPath>, delta: i64) -> Self {
        Self::Increment(field.into(), delta)
    }

    pub fn array_union(field: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        Self::ArrayUnion(field.into(), vec![value.into()])
    }

    fn field(&self) -> &FieldPath {
        match self {
            Self::Set(field, _) | Self::Increment(field, _) | Self::ArrayUnion(field, _) => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Fails with `AlreadyExists` if the document is present.
    Create { path: DocPath, data: Value },
    Set { path: DocPath, data: Value },
    /// Fails with `NotFound` if the document is absent.
    Update { path: DocPath, ops: Vec<FieldOp> },
    /// Merge semantics: a missing document starts out empty.
    Upsert { path: DocPath, ops: Vec<FieldOp> },
}

impl Write {
    pub fn path(&self) -> &DocPath {
        match self {
            Self::Create { path, .. }
            | Self::Set { path, .. }
            | Self::Update { path, .. }
            | Self::Upsert { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: DocPath,
    pub version: u64,
    pub data: Value,
}

impl Snapshot {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone()).map_err(|source| StoreError::Decode {
            path: self.path.clone(),
            source,
        })
    }
}

/// Version observed for a document during a transaction; `None` means the
/// document did not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRecord {
    pub path: DocPath,
    pub version: Option<u64>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError>;

    /// First document in `collection` whose top-level string `field` equals `value`.
    async fn find_one(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<Snapshot>, StoreError>;

    /// Applies `writes` atomically iff every document in `reads` still has the
    /// recorded version.
    async fn commit(&self, reads: Vec<ReadRecord>, writes: Vec<Write>) -> Result<(), StoreError>;
}

/// Applies one buffered write to the staged contents of a document.
pub(crate) fn apply_write(doc: &mut Option<Value>, write: &Write) -> Result<(), StoreError> {
    match write {
        Write::Create { path, data } => {
            if doc.is_some() {
                return Err(StoreError::AlreadyExists(path.clone()));
            }
            *doc = Some(data.clone());
        }
        Write::Set { data, .. } => *doc = Some(data.clone()),
        Write::Update { path, ops } => {
            let current = doc.as_mut().ok_or_else(|| StoreError::NotFound(path.clone()))?;
            apply_ops(path, current, ops)?;
        }
        Write::Upsert { path, ops } => {
            let current = doc.get_or_insert_with(|| Value::Object(Map::new()));
            apply_ops(path, current, ops)?;
        }
    }
    Ok(())
}

fn apply_ops(path: &DocPath, doc: &mut Value, ops: &[FieldOp]) -> Result<(), StoreError> {
    for op in ops {
        let invalid = |reason| StoreError::InvalidField {
            path: path.clone(),
            field: op.field().to_string(),
            reason,
        };
        let slot = field_slot(doc, op.field()).ok_or_else(|| invalid("parent is not a map"))?;
        match op {
            FieldOp::Set(_, value) => *slot = value.clone(),
            FieldOp::Increment(_, delta) => {
                let current = slot.as_i64().unwrap_or(0);
                *slot = Value::from(current + delta);
            }
            FieldOp::ArrayUnion(_, values) => {
                if !slot.is_array() {
                    *slot = Value::Array(Vec::new());
                }
                if let Value::Array(items) = slot {
                    for value in values {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Walks to the slot for `field`, creating intermediate maps. Missing leaves
/// start as `null`.
fn field_slot<'a>(doc: &'a mut Value, field: &FieldPath) -> Option<&'a mut Value> {
    let mut current = doc;
    for segment in field.segments() {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = current
            .as_object_mut()?
            .entry(segment.clone())
            .or_insert(Value::Null);
    }
    Some(current)
}

#[derive(Default)]
struct TxState {
    reads: HashMap<DocPath, Option<Snapshot>>,
    writes: Vec<Write>,
}

/// Handle passed to a transaction body. Cloning shares the same read set and
/// write buffer.
#[derive(Clone)]
pub struct Transaction {
    backend: Arc<dyn Backend>,
    state: Arc<Mutex<TxState>>,
}

impl Transaction {
    fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: Arc::new(Mutex::new(TxState::default())),
        }
    }

    /// Reads a document. Repeated reads of the same path return the first
    /// snapshot so the body sees one consistent version.
    pub async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        let mut state = self.state.lock().await;
        if !state.writes.is_empty() {
            return Err(StoreError::ReadAfterWrite);
        }
        if let Some(cached) = state.reads.get(path) {
            return Ok(cached.clone());
        }
        let snapshot = self.backend.get(path).await?;
        state.reads.insert(path.clone(), snapshot.clone());
        Ok(snapshot)
    }

    pub async fn get_as<T: DeserializeOwned>(&self, path: &DocPath) -> Result<Option<T>, StoreError> {
        self.get(path).await?.map(|snapshot| snapshot.decode()).transpose()
    }

    pub async fn find_one(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<Snapshot>, StoreError> {
        let mut state = self.state.lock().await;
        if !state.writes.is_empty() {
            return Err(StoreError::ReadAfterWrite);
        }
        let found = self.backend.find_one(collection, field, value).await?;
        if let Some(snapshot) = &found {
            state
                .reads
                .entry(snapshot.path.clone())
                .or_insert_with(|| Some(snapshot.clone()));
        }
        Ok(found)
    }

    pub async fn create<T: Serialize>(&self, path: DocPath, document: &T) -> Result<(), StoreError> {
        let data = serde_json::to_value(document).map_err(StoreError::Encode)?;
        self.push(Write::Create { path, data }).await;
        Ok(())
    }

    pub async fn set<T: Serialize>(&self, path: DocPath, document: &T) -> Result<(), StoreError> {
        let data = serde_json::to_value(document).map_err(StoreError::Encode)?;
        self.push(Write::Set { path, data }).await;
        Ok(())
    }

    pub async fn update(&self, path: DocPath, ops: Vec<FieldOp>) {
        self.push(Write::Update { path, ops }).await;
    }

    pub async fn upsert(&self, path: DocPath, ops: Vec<FieldOp>) {
        self.push(Write::Upsert { path, ops }).await;
    }

    async fn push(&self, write: Write) {
        self.state.lock().await.writes.push(write);
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let state = std::mem::take(&mut *self.state.lock().await);
        if state.writes.is_empty() {
            return Ok(());
        }
        let reads = state
            .reads
            .into_iter()
            .map(|(path, snapshot)| ReadRecord {
                version: snapshot.map(|s| s.version),
                path,
            })
            .collect();
        self.backend.commit(reads, state.writes).await
    }
}

/// Entry point for transactional access to a [`Backend`].
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
    max_attempts: u32,
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Runs `body` in a transaction, re-running it from scratch whenever the
    /// commit detects a conflicting write.
    ///
    /// The body must do all of its reads before its first write and must not
    /// produce external side effects, since it may execute several times.
    pub async fn run_transaction<T, E, F, Fut>(&self, mut body: F) -> Result<T, E>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        for attempt in 1..=self.max_attempts {
            let tx = Transaction::new(self.backend.clone());
            let value = body(tx.clone()).await?;
            match tx.commit().await {
                Ok(()) => return Ok(value),
                Err(StoreError::Conflict) => {
                    debug!("Transaction conflict on attempt {}, retrying", attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!("Transaction abandoned after {} attempts", self.max_attempts);
        Err(StoreError::Contention {
            attempts: self.max_attempts,
        }
        .into())
    }

    /// Single read outside any transaction.
    pub async fn get_as<T: DeserializeOwned>(&self, path: &DocPath) -> Result<Option<T>, StoreError> {
        self.backend
            .get(path)
            .await?
            .map(|snapshot| snapshot.decode())
            .transpose()
    }
}
