// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory backend for coordinator tests.
//!
//! - [`MockSource`]: an append-only oplog; opened streams follow it live and
//!   resume strictly after a given cursor
//! - [`MockTarget`]: a document map that applies insert / `$set` / `$unset` /
//!   delete, with failure injection and write delays
//! - [`MockCheckpoint`]: records every save attempt
//! - [`CallLog`]: shared, ordered record of connects and closes
//!
//! All handles are cheap clones over shared state, so a test keeps its own
//! copy after handing one to the coordinator.
//!
//! # Example
//! ```rust,ignore
//! let backend = MockBackend::new(&["a", "b"]);
//! let mut coordinator = ReplicationCoordinator::new(&backend.config(), backend.clone());
//! coordinator.start().await.unwrap();
//!
//! backend.source.insert("users", doc! { "_id": 1, "name": "A" });
//! backend.source.end_stream();
//! coordinator.run(&ShutdownSignal::new()).await.unwrap();
//!
//! assert_eq!(backend.target("a").doc("users", 1).unwrap().get_str("name").unwrap(), "A");
//! ```

use cdc_forwarder::checkpoint::CheckpointStore;
use cdc_forwarder::config::{ForwarderConfig, SourceConfig, TargetConfig};
use cdc_forwarder::coordinator::Backend;
use cdc_forwarder::error::{ForwarderError, Result};
use cdc_forwarder::event::{ChangeEvent, Cursor, Namespace, OperationType, UpdateDescription};
use cdc_forwarder::target::{BoxFuture, TargetRef, WriteOp};
use cdc_forwarder::watcher::{ChangeSource, EventStream};
use futures::stream::{self, StreamExt};
use mongodb::bson::{doc, Bson, Document};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Database the mock source pretends to watch.
pub const SOURCE_DB: &str = "globalData";

// =============================================================================
// Call log
// =============================================================================

/// Ordered record of lifecycle calls across all mocks.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Entries starting with `prefix`, in order.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

/// Logs `label` when dropped.
struct DropLog {
    log: CallLog,
    label: &'static str,
}

impl Drop for DropLog {
    fn drop(&mut self) {
        self.log.push(self.label);
    }
}

// =============================================================================
// Source
// =============================================================================

/// Cursor for the `seq`-th oplog entry.
pub fn cursor(seq: u64) -> Cursor {
    Cursor::new(Bson::Document(doc! { "_data": format!("{:016X}", seq) }))
}

#[derive(Clone)]
enum OplogEntry {
    Event(ChangeEvent),
    Error(String),
}

struct SourceInner {
    oplog: Mutex<Vec<OplogEntry>>,
    next_seq: AtomicU64,
    ended: AtomicBool,
    opens: Mutex<Vec<Option<Cursor>>>,
    fail_open: AtomicBool,
    stall_open: AtomicBool,
}

/// Append-only in-memory change stream.
#[derive(Clone)]
pub struct MockSource {
    inner: Arc<SourceInner>,
    log: CallLog,
}

impl MockSource {
    fn new(log: CallLog) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                oplog: Mutex::new(Vec::new()),
                next_seq: AtomicU64::new(1),
                ended: AtomicBool::new(false),
                opens: Mutex::new(Vec::new()),
                fail_open: AtomicBool::new(false),
                stall_open: AtomicBool::new(false),
            }),
            log,
        }
    }

    /// Append an event, returning its cursor.
    pub fn push(
        &self,
        operation_type: OperationType,
        collection: &str,
        document_key: Option<Document>,
        full_document: Option<Document>,
        update_description: Option<UpdateDescription>,
    ) -> Cursor {
        let cursor = cursor(self.inner.next_seq.fetch_add(1, Ordering::SeqCst));
        let event = ChangeEvent {
            operation_type,
            namespace: Namespace::new(SOURCE_DB, collection),
            document_key,
            full_document,
            update_description,
            cursor: cursor.clone(),
        };
        self.inner.oplog.lock().unwrap().push(OplogEntry::Event(event));
        cursor
    }

    pub fn insert(&self, collection: &str, document: Document) -> Cursor {
        let key = doc! { "_id": document.get("_id").cloned().unwrap_or(Bson::Null) };
        self.push(OperationType::Insert, collection, Some(key), Some(document), None)
    }

    pub fn update(&self, collection: &str, id: impl Into<Bson>, set: Document, unset: &[&str]) -> Cursor {
        let id: Bson = id.into();
        let desc = UpdateDescription {
            updated_fields: set,
            removed_fields: unset.iter().map(|f| f.to_string()).collect(),
        };
        self.push(
            OperationType::Update,
            collection,
            Some(doc! { "_id": id }),
            None,
            Some(desc),
        )
    }

    pub fn delete(&self, collection: &str, id: impl Into<Bson>) -> Cursor {
        let id: Bson = id.into();
        self.push(
            OperationType::Delete,
            collection,
            Some(doc! { "_id": id }),
            None,
            None,
        )
    }

    /// Append a stream failure (e.g. history lost).
    pub fn push_error(&self, message: &str) {
        self.inner
            .oplog
            .lock()
            .unwrap()
            .push(OplogEntry::Error(message.to_string()));
    }

    /// Open streams end once they have drained the oplog.
    pub fn end_stream(&self) {
        self.inner.ended.store(true, Ordering::SeqCst);
    }

    /// Reject the next opens (e.g. stale resume token).
    pub fn set_fail_open(&self, fail: bool) {
        self.inner.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make `open()` never complete.
    pub fn set_stall_open(&self, stall: bool) {
        self.inner.stall_open.store(stall, Ordering::SeqCst);
    }

    /// `resume_from` of every open, in order.
    pub fn opens(&self) -> Vec<Option<Cursor>> {
        self.inner.opens.lock().unwrap().clone()
    }

    /// Every cursor in the oplog, in order.
    pub fn cursors(&self) -> Vec<Cursor> {
        self.events().into_iter().map(|e| e.cursor).collect()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.inner
            .oplog
            .lock()
            .unwrap()
            .iter()
            .filter_map(|entry| match entry {
                OplogEntry::Event(e) => Some(e.clone()),
                OplogEntry::Error(_) => None,
            })
            .collect()
    }

    fn start_index(&self, resume_from: Option<&Cursor>) -> Result<usize> {
        let oplog = self.inner.oplog.lock().unwrap();
        match resume_from {
            // Only events appended after open
            None => Ok(oplog.len()),
            Some(cursor) => oplog
                .iter()
                .position(|entry| matches!(entry, OplogEntry::Event(e) if &e.cursor == cursor))
                .map(|i| i + 1)
                .ok_or_else(|| {
                    ForwarderError::mongo_msg("watch", format!("resume token {} not found", cursor))
                }),
        }
    }
}

struct StreamState {
    inner: Arc<SourceInner>,
    next: usize,
    _guard: DropLog,
}

impl ChangeSource for MockSource {
    fn open(&self, resume_from: Option<Cursor>) -> BoxFuture<'_, EventStream> {
        Box::pin(async move {
            self.inner.opens.lock().unwrap().push(resume_from.clone());
            self.log.push("source.open");

            if self.inner.fail_open.load(Ordering::SeqCst) {
                return Err(ForwarderError::mongo_msg("watch", "resume token was not found"));
            }
            if self.inner.stall_open.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let next = self.start_index(resume_from.as_ref())?;

            let state = StreamState {
                inner: Arc::clone(&self.inner),
                next,
                _guard: DropLog {
                    log: self.log.clone(),
                    label: "watcher.close",
                },
            };

            let events = stream::unfold(state, |mut state| async move {
                loop {
                    let entry = {
                        let oplog = state.inner.oplog.lock().unwrap();
                        oplog.get(state.next).cloned()
                    };
                    match entry {
                        Some(entry) => {
                            state.next += 1;
                            let item = match entry {
                                OplogEntry::Event(e) => Ok(e),
                                OplogEntry::Error(m) => Err(ForwarderError::mongo_msg("getMore", m)),
                            };
                            return Some((item, state));
                        }
                        None if state.inner.ended.load(Ordering::SeqCst) => return None,
                        None => tokio::time::sleep(Duration::from_millis(2)).await,
                    }
                }
            });
            Ok(events.boxed())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.log.push("source.close");
            Ok(())
        })
    }
}

// =============================================================================
// Target
// =============================================================================

/// Documents keyed by `(collection, _id)`.
pub type DocStore = BTreeMap<(String, String), Document>;

fn id_key(doc: &Document) -> String {
    doc.get("_id").map(|id| id.to_string()).unwrap_or_default()
}

/// Apply a write to an in-memory document store the way a server would.
pub fn apply_write(docs: &mut DocStore, op: &WriteOp) -> std::result::Result<(), String> {
    match op {
        WriteOp::Insert { collection, document } => {
            let key = (collection.clone(), id_key(document));
            if docs.contains_key(&key) {
                return Err(format!("E11000 duplicate key {}", key.1));
            }
            docs.insert(key, document.clone());
        }
        WriteOp::Update {
            collection,
            filter,
            modification,
        } => {
            let key = (collection.clone(), id_key(filter));
            // No match, no upsert: nothing happens
            if let Some(doc) = docs.get_mut(&key) {
                if let Ok(set) = modification.get_document("$set") {
                    for (field, value) in set {
                        doc.insert(field.clone(), value.clone());
                    }
                }
                if let Ok(unset) = modification.get_document("$unset") {
                    for field in unset.keys() {
                        doc.remove(field);
                    }
                }
            }
        }
        WriteOp::Delete { collection, filter } => {
            docs.remove(&(collection.clone(), id_key(filter)));
        }
    }
    Ok(())
}

struct TargetInner {
    name: String,
    docs: Mutex<DocStore>,
    writes: Mutex<Vec<(String, WriteOp)>>,
    failing: AtomicBool,
    delay_ms: AtomicU64,
    closes: AtomicUsize,
}

/// In-memory replica cluster.
#[derive(Clone)]
pub struct MockTarget {
    inner: Arc<TargetInner>,
    log: CallLog,
}

impl MockTarget {
    fn new(name: &str, log: CallLog) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                name: name.to_string(),
                docs: Mutex::new(BTreeMap::new()),
                writes: Mutex::new(Vec::new()),
                failing: AtomicBool::new(false),
                delay_ms: AtomicU64::new(0),
                closes: AtomicUsize::new(0),
            }),
            log,
        }
    }

    /// Fail every write from now on (writes are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold every write for `delay` before applying it.
    pub fn set_delay(&self, delay: Duration) {
        self.inner.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn docs(&self) -> DocStore {
        self.inner.docs.lock().unwrap().clone()
    }

    pub fn doc(&self, collection: &str, id: impl Into<Bson>) -> Option<Document> {
        let id: Bson = id.into();
        let key = (collection.to_string(), id.to_string());
        self.inner.docs.lock().unwrap().get(&key).cloned()
    }

    /// Every write attempt as `(database, op)`, in order.
    pub fn writes(&self) -> Vec<(String, WriteOp)> {
        self.inner.writes.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }
}

impl TargetRef for MockTarget {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn apply<'a>(&'a self, database: &'a str, op: &'a WriteOp) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.inner
                .writes
                .lock()
                .unwrap()
                .push((database.to_string(), op.clone()));

            let delay = self.inner.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            if self.inner.failing.load(Ordering::SeqCst) {
                return Err(ForwarderError::Write {
                    target: self.inner.name.clone(),
                    message: "not primary".to_string(),
                });
            }

            let mut docs = self.inner.docs.lock().unwrap();
            apply_write(&mut docs, op).map_err(|message| ForwarderError::Write {
                target: self.inner.name.clone(),
                message,
            })
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.inner.closes.fetch_add(1, Ordering::SeqCst);
            self.log.push(format!("target.close:{}", self.inner.name));
            Ok(())
        })
    }
}

// =============================================================================
// Checkpoint
// =============================================================================

struct CheckpointInner {
    current: Mutex<Option<Cursor>>,
    attempts: Mutex<Vec<Cursor>>,
    fail_load: AtomicBool,
    fail_save: AtomicBool,
    stall_load: AtomicBool,
}

/// Checkpoint record that remembers every save attempt.
#[derive(Clone)]
pub struct MockCheckpoint {
    inner: Arc<CheckpointInner>,
}

impl MockCheckpoint {
    fn new() -> Self {
        Self {
            inner: Arc::new(CheckpointInner {
                current: Mutex::new(None),
                attempts: Mutex::new(Vec::new()),
                fail_load: AtomicBool::new(false),
                fail_save: AtomicBool::new(false),
                stall_load: AtomicBool::new(false),
            }),
        }
    }

    /// Persisted value.
    pub fn current(&self) -> Option<Cursor> {
        self.inner.current.lock().unwrap().clone()
    }

    /// Every cursor passed to `save()`, failed or not.
    pub fn attempts(&self) -> Vec<Cursor> {
        self.inner.attempts.lock().unwrap().clone()
    }

    pub fn set(&self, cursor: Cursor) {
        *self.inner.current.lock().unwrap() = Some(cursor);
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.inner.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_save(&self, fail: bool) {
        self.inner.fail_save.store(fail, Ordering::SeqCst);
    }

    /// Make `load()` never complete.
    pub fn set_stall_load(&self, stall: bool) {
        self.inner.stall_load.store(stall, Ordering::SeqCst);
    }
}

impl CheckpointStore for MockCheckpoint {
    fn load(&self) -> BoxFuture<'_, Option<Cursor>> {
        Box::pin(async move {
            if self.inner.fail_load.load(Ordering::SeqCst) {
                return Err(ForwarderError::mongo_msg("checkpoint find_one", "not authorized"));
            }
            if self.inner.stall_load.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(self.current())
        })
    }

    fn save(&self, cursor: &Cursor) -> BoxFuture<'_, ()> {
        let cursor = cursor.clone();
        Box::pin(async move {
            self.inner.attempts.lock().unwrap().push(cursor.clone());
            if self.inner.fail_save.load(Ordering::SeqCst) {
                return Err(ForwarderError::mongo_msg("checkpoint upsert", "write concern timeout"));
            }
            *self.inner.current.lock().unwrap() = Some(cursor);
            Ok(())
        })
    }
}

// =============================================================================
// Backend
// =============================================================================

/// Source, checkpoint and named targets sharing one call log.
#[derive(Clone)]
pub struct MockBackend {
    pub source: MockSource,
    pub checkpoint: MockCheckpoint,
    pub log: CallLog,
    targets: Vec<MockTarget>,
    unreachable: Arc<Mutex<HashSet<String>>>,
}

impl MockBackend {
    pub fn new(target_names: &[&str]) -> Self {
        let log = CallLog::default();
        Self {
            source: MockSource::new(log.clone()),
            checkpoint: MockCheckpoint::new(),
            targets: target_names
                .iter()
                .map(|name| MockTarget::new(name, log.clone()))
                .collect(),
            unreachable: Arc::new(Mutex::new(HashSet::new())),
            log,
        }
    }

    /// Config naming this backend's targets.
    pub fn config(&self) -> ForwarderConfig {
        ForwarderConfig {
            source: SourceConfig::new("mongodb://source.test:27017"),
            targets: self
                .targets
                .iter()
                .map(|t| {
                    TargetConfig::new(t.name(), &format!("mongodb://{}.test:27017", t.name()))
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn target(&self, name: &str) -> &MockTarget {
        self.targets
            .iter()
            .find(|t| t.name() == name)
            .unwrap_or_else(|| panic!("no mock target named {}", name))
    }

    pub fn targets(&self) -> &[MockTarget] {
        &self.targets
    }

    /// Make `endpoint` (`"source"` or a target name) refuse connections.
    pub fn set_unreachable(&self, endpoint: &str) {
        self.unreachable.lock().unwrap().insert(endpoint.to_string());
    }

    fn is_unreachable(&self, endpoint: &str) -> bool {
        self.unreachable.lock().unwrap().contains(endpoint)
    }
}

impl Backend for MockBackend {
    type Source = MockSource;
    type Checkpoint = MockCheckpoint;
    type Target = MockTarget;

    fn connect_source<'a>(
        &'a self,
        _config: &'a ForwarderConfig,
    ) -> BoxFuture<'a, (Self::Source, Self::Checkpoint)> {
        Box::pin(async move {
            self.log.push("connect:source");
            if self.is_unreachable("source") {
                return Err(ForwarderError::Connection {
                    endpoint: "source".to_string(),
                    message: "Timed out after 10s".to_string(),
                });
            }
            Ok((self.source.clone(), self.checkpoint.clone()))
        })
    }

    fn connect_target<'a>(
        &'a self,
        target: &'a TargetConfig,
        _connect_timeout: Duration,
    ) -> BoxFuture<'a, Self::Target> {
        Box::pin(async move {
            self.log.push(format!("connect:{}", target.name));
            let endpoint = format!("target:{}", target.name);
            if self.is_unreachable(&target.name) {
                return Err(ForwarderError::Connection {
                    endpoint,
                    message: "Connection refused".to_string(),
                });
            }
            self.targets
                .iter()
                .find(|t| t.name() == target.name)
                .cloned()
                .ok_or_else(|| ForwarderError::Connection {
                    endpoint,
                    message: "Unknown host".to_string(),
                })
        })
    }
}

/// Poll `condition` until it holds, panicking after a few seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
