// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resume cursor persistence.
//!
//! Stores the cursor of the most recently attempted event so the watcher can
//! resume after a restart. There is exactly one record per source, kept in a
//! metadata collection on the source cluster itself.
//!
//! # Cursor Semantics
//!
//! The checkpoint tracks **attempted**, not "applied everywhere":
//!
//! ```text
//! pull event 1234 → fan out to targets → persist cursor 1234
//!                   (target failures are absorbed; cursor still advances)
//!                   (crash before persist = event 1234 is redelivered)
//! ```
//!
//! # Failure Policy
//!
//! - `load()` failing at startup is fatal: we cannot decide where to resume.
//! - `save()` failing is logged and the loop continues; the next successful
//!   save covers it. A crash in between replays a few events.

use crate::error::{ForwarderError, Result};
use crate::event::Cursor;
use crate::metrics;
use crate::target::BoxFuture;
use tracing::{debug, warn};

/// Durable storage for the replication cursor.
///
/// Implementations upsert a single record keyed by a fixed identity.
/// `save()` must be safe to call repeatedly with the same or later cursors.
pub trait CheckpointStore: Send + Sync + 'static {
    /// Last persisted cursor, or `None` on a fresh start.
    fn load(&self) -> BoxFuture<'_, Option<Cursor>>;

    /// Upsert the cursor.
    fn save(&self, cursor: &Cursor) -> BoxFuture<'_, ()>;
}

/// Tracks the last saved cursor on top of a [`CheckpointStore`].
///
/// The coordinator owns one of these for the lifetime of the run.
pub struct Checkpointer<C: CheckpointStore> {
    store: C,
    last_saved: Option<Cursor>,
    failures: u64,
}

impl<C: CheckpointStore> Checkpointer<C> {
    pub fn new(store: C) -> Self {
        Self {
            store,
            last_saved: None,
            failures: 0,
        }
    }

    /// Load the persisted cursor.
    ///
    /// Any error is reported as [`ForwarderError::Checkpoint`]; the caller
    /// treats it as fatal.
    pub async fn load(&mut self) -> Result<Option<Cursor>> {
        let cursor = self
            .store
            .load()
            .await
            .map_err(|e| match e {
                ForwarderError::Checkpoint(_) => e,
                other => ForwarderError::Checkpoint(other.to_string()),
            })?;
        self.last_saved = cursor.clone();
        Ok(cursor)
    }

    /// Persist the cursor of an event that was just dispatched.
    ///
    /// Failures are logged and returned but leave the tracker usable.
    pub async fn advance(&mut self, cursor: &Cursor) -> Result<()> {
        if self.last_saved.as_ref() == Some(cursor) {
            return Ok(());
        }

        match self.store.save(cursor).await {
            Ok(()) => {
                metrics::record_checkpoint_save(true);
                debug!(cursor = %cursor, "Checkpoint advanced");
                self.last_saved = Some(cursor.clone());
                Ok(())
            }
            Err(e) => {
                metrics::record_checkpoint_save(false);
                self.failures += 1;
                warn!(
                    cursor = %cursor,
                    error = %e,
                    failures = self.failures,
                    "Failed to persist checkpoint, events may be replayed after restart"
                );
                Err(e)
            }
        }
    }

    /// Cursor most recently persisted (or loaded).
    pub fn last_saved(&self) -> Option<&Cursor> {
        self.last_saved.as_ref()
    }

    /// Number of failed saves during this run.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}
