// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Source watcher: a resumable, ordered stream of change events.
//!
//! [`ChangeSource`] is the seam to the source cluster. It opens a raw event
//! stream, optionally resuming strictly after a persisted cursor.
//! [`SourceWatcher`] wraps that stream with the lifecycle the coordinator
//! relies on:
//!
//! - pulls are lazy and may wait indefinitely for source activity
//! - `close()` is idempotent and drops the underlying cursor
//! - a pull in progress when the watcher is closed fails with
//!   [`ForwarderError::Shutdown`] instead of hanging
//! - any stream error is fatal and surfaces as [`ForwarderError::Stream`];
//!   the watcher never resubscribes on its own
//!
//! # Resume Semantics
//!
//! ```text
//! open(None)        → events occurring after open
//! open(Some(T))     → first event is the one right after T (no gap, no replay)
//! ```

use crate::error::{ForwarderError, Result};
use crate::event::{ChangeEvent, Cursor};
use crate::metrics;
use crate::target::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Raw event stream produced by a [`ChangeSource`].
pub type EventStream = BoxStream<'static, Result<ChangeEvent>>;

/// What we need from the source cluster.
pub trait ChangeSource: Send + Sync + 'static {
    /// Open a live change stream.
    ///
    /// With `resume_from`, the stream must start strictly after that cursor.
    /// Without it, only events occurring after the call are observed.
    fn open(&self, resume_from: Option<Cursor>) -> BoxFuture<'_, EventStream>;

    /// Release the source connection. Safe to call more than once.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Handle that closes a [`SourceWatcher`] from another task.
#[derive(Clone)]
pub struct WatcherCloser {
    closed_tx: Arc<watch::Sender<bool>>,
}

impl WatcherCloser {
    /// Make any in-progress or future pull fail with `Shutdown`.
    pub fn close(&self) {
        self.closed_tx.send_replace(true);
    }
}

/// A live change stream with close semantics.
pub struct SourceWatcher {
    stream: Option<EventStream>,
    closed_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
    resumed_from: Option<Cursor>,
    events_read: u64,
}

impl SourceWatcher {
    /// Open the watcher against a source.
    ///
    /// Open errors (including a rejected resume token) are fatal stream errors.
    pub async fn open<S: ChangeSource>(source: &S, resume_from: Option<Cursor>) -> Result<Self> {
        match &resume_from {
            Some(cursor) => info!(cursor = %cursor, "Opening change stream from checkpoint"),
            None => info!("Opening change stream from now (no checkpoint)"),
        }

        let stream = source
            .open(resume_from.clone())
            .await
            .map_err(into_stream_error)?;

        Ok(Self::from_stream(stream, resume_from))
    }

    /// Wrap an already-open stream.
    pub fn from_stream(stream: EventStream, resumed_from: Option<Cursor>) -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            stream: Some(stream),
            closed_tx: Arc::new(closed_tx),
            closed_rx,
            resumed_from,
            events_read: 0,
        }
    }

    /// Pull the next event.
    ///
    /// - `Ok(Some(event))`: the next event in source order
    /// - `Ok(None)`: the source ended the stream
    /// - `Err(Shutdown)`: the watcher was closed
    /// - `Err(Stream)`: the stream broke (fatal)
    pub async fn next_event(&mut self) -> Result<Option<ChangeEvent>> {
        if *self.closed_rx.borrow() {
            return Err(ForwarderError::Shutdown);
        }

        let closed_rx = self.closed_rx.clone();
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(ForwarderError::Shutdown),
        };

        let item = tokio::select! {
            biased;

            _ = wait_closed(closed_rx) => return Err(ForwarderError::Shutdown),
            item = stream.next() => item,
        };

        match item {
            Some(Ok(event)) => {
                self.events_read += 1;
                metrics::record_event_read(event.operation_type.as_str());
                trace!(
                    op = %event.operation_type,
                    namespace = %event.namespace,
                    cursor = %event.cursor,
                    "Pulled change event"
                );
                Ok(Some(event))
            }
            Some(Err(e)) => Err(into_stream_error(e)),
            None => {
                debug!(events_read = self.events_read, "Change stream ended");
                Ok(None)
            }
        }
    }

    /// Close the stream. Safe to call more than once.
    pub fn close(&mut self) {
        self.closed_tx.send_replace(true);
        if self.stream.take().is_some() {
            debug!(events_read = self.events_read, "Change stream closed");
        }
    }

    /// Handle for closing this watcher from elsewhere.
    pub fn closer(&self) -> WatcherCloser {
        WatcherCloser {
            closed_tx: Arc::clone(&self.closed_tx),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Cursor the stream was opened after, if any.
    pub fn resumed_from(&self) -> Option<&Cursor> {
        self.resumed_from.as_ref()
    }

    pub fn events_read(&self) -> u64 {
        self.events_read
    }
}

async fn wait_closed(mut rx: watch::Receiver<bool>) {
    loop {
        let closed = *rx.borrow_and_update();
        if closed {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nobody can close us any more
            std::future::pending::<()>().await;
        }
    }
}

fn into_stream_error(e: ForwarderError) -> ForwarderError {
    match e {
        ForwarderError::Stream(_) | ForwarderError::Shutdown => e,
        other => ForwarderError::Stream(other.to_string()),
    }
}
