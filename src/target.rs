// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Target integration traits and write translation.
//!
//! A target is one replica cluster. The core talks to it only through
//! [`TargetRef`], so tests drive the fan-out with in-memory targets and the
//! binary drives it with [`MongoTarget`](crate::mongo::MongoTarget).
//!
//! # Translation Rules
//!
//! | Event | Write |
//! |-------|-------|
//! | insert | insert `fullDocument` into `<target_db>.<collection>` |
//! | update | one `update_one(documentKey, {$set, $unset})` |
//! | delete | `delete_one(documentKey)` |
//! | other  | nothing |
//!
//! Only the collection name is carried over from the source namespace; the
//! database is always the configured target database.

use crate::error::{ForwarderError, Result};
use crate::event::{ChangeEvent, OperationType, UpdateDescription};
use mongodb::bson::{doc, Bson, Document};
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// What we need from a target cluster.
pub trait TargetRef: Send + Sync + 'static {
    /// Short name for logs and outcomes.
    fn name(&self) -> &str;

    /// Apply one write under `database`.
    fn apply<'a>(&'a self, database: &'a str, op: &'a WriteOp) -> BoxFuture<'a, ()>;

    /// Release the connection. Safe to call more than once.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// A write derived from one change event, ready to send to any target.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert {
        collection: String,
        document: Document,
    },
    Update {
        collection: String,
        filter: Document,
        modification: Document,
    },
    Delete {
        collection: String,
        filter: Document,
    },
}

impl WriteOp {
    /// Translate a change event.
    ///
    /// Returns `Ok(None)` for operation types that are not forwarded, and
    /// [`ForwarderError::MalformedEvent`] when a handled event lacks a field
    /// its write needs.
    pub fn from_event(event: &ChangeEvent) -> Result<Option<WriteOp>> {
        if !event.operation_type.is_handled() {
            return Ok(None);
        }

        let collection = event
            .collection()
            .ok_or_else(|| {
                ForwarderError::MalformedEvent(format!(
                    "{} event on {} has no collection",
                    event.operation_type, event.namespace
                ))
            })?
            .to_string();

        let op = match event.operation_type {
            OperationType::Insert => {
                let document = event.full_document.clone().ok_or_else(|| {
                    ForwarderError::MalformedEvent("insert event has no fullDocument".to_string())
                })?;
                WriteOp::Insert {
                    collection,
                    document,
                }
            }
            OperationType::Update => {
                let filter = require_key(event)?;
                let modification = build_modification(event.update_description.as_ref(), &filter);
                WriteOp::Update {
                    collection,
                    filter,
                    modification,
                }
            }
            OperationType::Delete => WriteOp::Delete {
                collection,
                filter: require_key(event)?,
            },
            OperationType::Other(_) => return Ok(None),
        };

        Ok(Some(op))
    }

    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Insert { collection, .. }
            | WriteOp::Update { collection, .. }
            | WriteOp::Delete { collection, .. } => collection,
        }
    }

    /// Operation name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteOp::Insert { .. } => "insert",
            WriteOp::Update { .. } => "update",
            WriteOp::Delete { .. } => "delete",
        }
    }
}

fn require_key(event: &ChangeEvent) -> Result<Document> {
    event.document_key.clone().ok_or_else(|| {
        ForwarderError::MalformedEvent(format!("{} event has no documentKey", event.operation_type))
    })
}

/// Build the single modification document for an update event.
///
/// - `updatedFields` become `$set`
/// - `removedFields` become `$unset` (value `""`)
/// - both present: one document carrying both operators
/// - neither present: `$set` of the key's own fields, which is a real write
///   that changes nothing
pub fn build_modification(desc: Option<&UpdateDescription>, document_key: &Document) -> Document {
    let mut modification = Document::new();

    if let Some(desc) = desc {
        if !desc.updated_fields.is_empty() {
            modification.insert("$set", desc.updated_fields.clone());
        }

        if !desc.removed_fields.is_empty() {
            let unset: Document = desc
                .removed_fields
                .iter()
                .map(|field| (field.clone(), Bson::String(String::new())))
                .collect();
            modification.insert("$unset", unset);
        }
    }

    if modification.is_empty() {
        return doc! { "$set": document_key.clone() };
    }

    modification
}
