// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! MongoDB driver bindings.
//!
//! Implements the core seams against real clusters:
//!
//! | Seam | Implementation | Cluster |
//! |------|----------------|---------|
//! | [`Backend`] | [`MongoBackend`] | connects everything at startup |
//! | [`ChangeSource`] | [`MongoSource`] | source (`<source_db>.watch()`) |
//! | [`CheckpointStore`] | [`MongoCheckpointStore`] | source (`globalDataReplication.status`) |
//! | [`TargetRef`] | [`MongoTarget`] | one per target |
//!
//! # Connection Lifecycle
//!
//! ```text
//! with_uri_str ──▶ ping (bounded by connect_timeout) ──▶ Connected ──▶ close() ──▶ Closed
//!      │                      │
//!      └──────────────────────┴──▶ ForwarderError::Connection (fatal)
//! ```
//!
//! Connection strings never appear in logs; endpoints are named `source` or
//! `target:<name>`.

use crate::checkpoint::CheckpointStore;
use crate::config::{CheckpointConfig, ForwarderConfig, TargetConfig};
use crate::coordinator::Backend;
use crate::error::{ForwarderError, Result};
use crate::event::{ChangeEvent, Cursor};
use crate::metrics;
use crate::target::{BoxFuture, TargetRef, WriteOp};
use crate::watcher::{ChangeSource, EventStream};
use futures::StreamExt;
use mongodb::bson::{doc, Bson, DateTime, Document};
use mongodb::{Client, Collection};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Field of the checkpoint record holding the resume token.
const TOKEN_FIELD: &str = "token";

/// Open a client and verify it answers a `ping`.
///
/// Both the handshake and the ping are bounded by `connect_timeout`.
pub async fn connect_client(endpoint: &str, uri: &str, connect_timeout: Duration) -> Result<Client> {
    info!(endpoint, timeout = ?connect_timeout, "Connecting");

    let connect = async {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| ForwarderError::Connection {
                endpoint: endpoint.to_string(),
                message: format!("Invalid connection string: {}", e),
            })?;

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ForwarderError::Connection {
                endpoint: endpoint.to_string(),
                message: format!("Ping failed: {}", e),
            })?;

        Ok(client)
    };

    let result = match timeout(connect_timeout, connect).await {
        Ok(result) => result,
        Err(_) => Err(ForwarderError::Connection {
            endpoint: endpoint.to_string(),
            message: format!("Timed out after {:?}", connect_timeout),
        }),
    };

    metrics::record_connection(endpoint, result.is_ok());
    match &result {
        Ok(_) => info!(endpoint, "Connected"),
        Err(e) => warn!(endpoint, error = %e, "Connection failed"),
    }
    result
}

/// Take the client out of its slot and shut it down. No-op once taken.
async fn shutdown_client(slot: &RwLock<Option<Client>>, endpoint: &str) {
    let client = slot.write().await.take();
    if let Some(client) = client {
        client.shutdown().await;
        debug!(endpoint, "Connection closed");
    }
}

// =============================================================================
// Backend
// =============================================================================

/// Connects the coordinator to real MongoDB clusters.
#[derive(Debug, Default, Clone, Copy)]
pub struct MongoBackend;

impl MongoBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Backend for MongoBackend {
    type Source = MongoSource;
    type Checkpoint = MongoCheckpointStore;
    type Target = MongoTarget;

    fn connect_source<'a>(
        &'a self,
        config: &'a ForwarderConfig,
    ) -> BoxFuture<'a, (Self::Source, Self::Checkpoint)> {
        Box::pin(async move {
            let client = connect_client(
                "source",
                &config.source.uri,
                config.connect_timeout_duration(),
            )
            .await?;

            let checkpoint = MongoCheckpointStore::new(&client, &config.checkpoint);
            let source = MongoSource::new(client, &config.source.database);
            Ok((source, checkpoint))
        })
    }

    fn connect_target<'a>(
        &'a self,
        target: &'a TargetConfig,
        connect_timeout: Duration,
    ) -> BoxFuture<'a, Self::Target> {
        Box::pin(async move {
            let endpoint = format!("target:{}", target.name);
            let client = connect_client(&endpoint, &target.uri, connect_timeout).await?;
            Ok(MongoTarget::new(&target.name, client))
        })
    }
}

// =============================================================================
// Source
// =============================================================================

/// Change stream over one database of the source cluster.
pub struct MongoSource {
    client: RwLock<Option<Client>>,
    database: String,
}

impl MongoSource {
    pub fn new(client: Client, database: &str) -> Self {
        Self {
            client: RwLock::new(Some(client)),
            database: database.to_string(),
        }
    }
}

impl ChangeSource for MongoSource {
    fn open(&self, resume_from: Option<Cursor>) -> BoxFuture<'_, EventStream> {
        Box::pin(async move {
            let client = self
                .client
                .read()
                .await
                .clone()
                .ok_or_else(|| ForwarderError::Stream("Source connection is closed".to_string()))?;
            let db = client.database(&self.database);

            let stream = match resume_from {
                Some(cursor) => db.watch().resume_after(cursor.to_resume_token()?).await,
                None => db.watch().await,
            }
            .map_err(|e| ForwarderError::mongo("watch", e))?;

            info!(database = %self.database, "Change stream opened");

            let events = stream.map(|item| match item {
                Ok(event) => ChangeEvent::from_mongo(event),
                Err(e) => Err(ForwarderError::mongo("getMore", e)),
            });
            Ok(events.boxed())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            shutdown_client(&self.client, "source").await;
            Ok(())
        })
    }
}

// =============================================================================
// Checkpoint
// =============================================================================

/// Single-record checkpoint in a metadata collection on the source.
///
/// Record shape: `{ _id: "resumeToken", token: <resume token>, updatedAt: <date> }`.
pub struct MongoCheckpointStore {
    collection: Collection<Document>,
    key: String,
}

impl MongoCheckpointStore {
    pub fn new(client: &Client, config: &CheckpointConfig) -> Self {
        Self {
            collection: client
                .database(&config.database)
                .collection::<Document>(&config.collection),
            key: config.key.clone(),
        }
    }
}

impl CheckpointStore for MongoCheckpointStore {
    fn load(&self) -> BoxFuture<'_, Option<Cursor>> {
        Box::pin(async move {
            let record = self
                .collection
                .find_one(doc! { "_id": self.key.as_str() })
                .await
                .map_err(|e| ForwarderError::mongo("checkpoint find_one", e))?;

            Ok(record
                .and_then(|mut record| record.remove(TOKEN_FIELD))
                .map(Cursor::new))
        })
    }

    fn save(&self, cursor: &Cursor) -> BoxFuture<'_, ()> {
        let token = cursor.as_bson().clone();
        Box::pin(async move {
            self.collection
                .update_one(
                    doc! { "_id": self.key.as_str() },
                    checkpoint_update(token, DateTime::now()),
                )
                .upsert(true)
                .await
                .map_err(|e| ForwarderError::mongo("checkpoint upsert", e))?;
            Ok(())
        })
    }
}

/// Upsert body for the checkpoint record.
fn checkpoint_update(token: Bson, now: DateTime) -> Document {
    let mut fields = Document::new();
    fields.insert(TOKEN_FIELD, token);
    fields.insert("updatedAt", now);
    doc! { "$set": fields }
}

// =============================================================================
// Target
// =============================================================================

/// One replica cluster.
pub struct MongoTarget {
    name: String,
    client: RwLock<Option<Client>>,
}

impl MongoTarget {
    pub fn new(name: &str, client: Client) -> Self {
        Self {
            name: name.to_string(),
            client: RwLock::new(Some(client)),
        }
    }

    async fn collection(&self, database: &str, name: &str) -> Result<Collection<Document>> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or_else(|| ForwarderError::Write {
            target: self.name.clone(),
            message: "Connection is closed".to_string(),
        })?;
        Ok(client.database(database).collection::<Document>(name))
    }

    fn write_error(&self, e: mongodb::error::Error) -> ForwarderError {
        ForwarderError::Write {
            target: self.name.clone(),
            message: e.to_string(),
        }
    }
}

impl TargetRef for MongoTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply<'a>(&'a self, database: &'a str, op: &'a WriteOp) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let coll = self.collection(database, op.collection()).await?;

            match op {
                WriteOp::Insert { document, .. } => {
                    coll.insert_one(document).await.map_err(|e| self.write_error(e))?;
                }
                WriteOp::Update {
                    filter,
                    modification,
                    ..
                } => {
                    coll.update_one(filter.clone(), modification.clone())
                        .await
                        .map_err(|e| self.write_error(e))?;
                }
                WriteOp::Delete { filter, .. } => {
                    coll.delete_one(filter.clone())
                        .await
                        .map_err(|e| self.write_error(e))?;
                }
            }
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            shutdown_client(&self.client, &format!("target:{}", self.name)).await;
            Ok(())
        })
    }
}
