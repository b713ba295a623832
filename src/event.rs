// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change events observed on the source.
//!
//! A [`ChangeEvent`] is the driver-independent form of one change stream
//! entry. It is created by the watcher for each pulled item and dropped once
//! the fan-out writer has finished with it. Events are never requeued.
//!
//! # Cursor
//!
//! Every event carries the [`Cursor`] that identifies its position in the
//! source stream. The cursor is opaque to the forwarder: it is persisted
//! verbatim and handed back to the source on restart.

use crate::error::{ForwarderError, Result};
use mongodb::bson::{self, Bson, Document};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType as MongoOperationType, ResumeToken};
use std::fmt;

/// Opaque, totally-ordered position in the source stream.
///
/// Wraps the resume token exactly as the source produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor(Bson);

impl Cursor {
    pub fn new(token: Bson) -> Self {
        Self(token)
    }

    /// The raw token, as stored in the checkpoint record.
    pub fn as_bson(&self) -> &Bson {
        &self.0
    }

    /// Convert to a driver resume token.
    pub fn to_resume_token(&self) -> Result<ResumeToken> {
        bson::from_bson(self.0.clone())
            .map_err(|e| ForwarderError::Stream(format!("Invalid resume token: {}", e)))
    }

    /// Build from a driver resume token.
    pub fn from_resume_token(token: &ResumeToken) -> Result<Self> {
        bson::to_bson(token)
            .map(Self)
            .map_err(|e| ForwarderError::Stream(format!("Unserializable resume token: {}", e)))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Resume tokens are `{ _data: "<hex>" }`; show just the hex when we can
        match &self.0 {
            Bson::Document(doc) => match doc.get_str("_data") {
                Ok(data) => write!(f, "{}", data),
                Err(_) => write!(f, "{}", doc),
            },
            other => write!(f, "{}", other),
        }
    }
}

/// Change operation type.
///
/// Only insert, update and delete are forwarded. Everything else is kept
/// as `Other` so it can be logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    Other(String),
}

impl OperationType {
    /// Name as it appears in the change stream.
    pub fn as_str(&self) -> &str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Other(name) => name.as_str(),
        }
    }

    /// Whether events of this type produce writes.
    pub fn is_handled(&self) -> bool {
        !matches!(self, OperationType::Other(_))
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&MongoOperationType> for OperationType {
    fn from(op: &MongoOperationType) -> Self {
        match op {
            MongoOperationType::Insert => OperationType::Insert,
            MongoOperationType::Update => OperationType::Update,
            MongoOperationType::Delete => OperationType::Delete,
            MongoOperationType::Other(name) => OperationType::Other(name.clone()),
            other => OperationType::Other(format!("{:?}", other).to_lowercase()),
        }
    }
}

/// Database and collection the mutation happened in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Namespace {
    pub database: String,
    /// Absent for database-level events.
    pub collection: Option<String>,
}

impl Namespace {
    pub fn new(database: &str, collection: &str) -> Self {
        Self {
            database: database.to_string(),
            collection: Some(collection.to_string()),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.collection {
            Some(coll) => write!(f, "{}.{}", self.database, coll),
            None => f.write_str(&self.database),
        }
    }
}

/// Field-level changes carried by an update event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateDescription {
    /// Field path -> new value.
    pub updated_fields: Document,
    /// Field paths that were removed.
    pub removed_fields: Vec<String>,
}

/// One mutation observed on the source.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operation_type: OperationType,
    pub namespace: Namespace,
    /// `{ _id: ... }` (plus shard key fields on sharded clusters).
    pub document_key: Option<Document>,
    /// Post-image, present for inserts.
    pub full_document: Option<Document>,
    /// Present for updates.
    pub update_description: Option<UpdateDescription>,
    pub cursor: Cursor,
}

impl ChangeEvent {
    /// Collection name, if the event has one.
    pub fn collection(&self) -> Option<&str> {
        self.namespace.collection.as_deref()
    }

    /// `_id` of the affected document, for logging.
    pub fn document_id(&self) -> Option<&Bson> {
        self.document_key
            .as_ref()
            .and_then(|key| key.get("_id"))
            .or_else(|| self.full_document.as_ref().and_then(|doc| doc.get("_id")))
    }

    /// Convert a driver change stream event.
    ///
    /// The cursor is the event's own resume token, so checkpointing it
    /// resumes strictly after this event.
    pub fn from_mongo(event: ChangeStreamEvent<Document>) -> Result<Self> {
        let cursor = Cursor::from_resume_token(&event.id)?;
        let namespace = event
            .ns
            .map(|ns| Namespace {
                database: ns.db,
                collection: ns.coll,
            })
            .unwrap_or_default();

        Ok(Self {
            operation_type: OperationType::from(&event.operation_type),
            namespace,
            document_key: event.document_key,
            full_document: event.full_document,
            update_description: event.update_description.map(|desc| UpdateDescription {
                updated_fields: desc.updated_fields,
                removed_fields: desc.removed_fields,
            }),
            cursor,
        })
    }
}
