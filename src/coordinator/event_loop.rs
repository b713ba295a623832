// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The consume loop: one event at a time, source order.
//!
//! Each iteration:
//! 1. Checks the stop flag (level-triggered, iteration boundary only)
//! 2. Pulls the next event, racing the pull against the stop flag
//! 3. Fans the event out to every target and waits for all of them
//! 4. Persists the event's cursor
//!
//! # Graceful Shutdown
//!
//! A stop request never interrupts steps 3 and 4. If it arrives while the
//! pull is waiting for source activity, the pull is abandoned before any
//! event is taken, so nothing is left half-applied across targets.
//!
//! # Checkpoint Policy
//!
//! The cursor advances after every attempted event, including one that every
//! target failed. That case is logged at `warn` with the cursor so the
//! targets can be reconciled by hand.

use super::types::{EngineState, RunSummary};
use super::ShutdownSignal;
use crate::checkpoint::{CheckpointStore, Checkpointer};
use crate::error::{ForwarderError, Result};
use crate::event::{ChangeEvent, OperationType};
use crate::fanout::{log_dispatch_report, FanOutWriter};
use crate::metrics;
use crate::target::TargetRef;
use crate::watcher::SourceWatcher;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Why the loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A stop was requested.
    Stopped,
    /// The source closed the change stream.
    StreamEnded,
}

impl std::fmt::Display for LoopExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopExit::Stopped => write!(f, "stop requested"),
            LoopExit::StreamEnded => write!(f, "stream ended"),
        }
    }
}

/// Broadcast a state change.
pub(super) fn set_state(state_tx: &watch::Sender<EngineState>, state: EngineState) {
    state_tx.send_replace(state);
    metrics::set_engine_state(&state.to_string());
}

/// Run until a stop is requested, the stream ends, or the stream fails.
///
/// Stream errors are returned as-is; the caller treats them as fatal.
pub(super) async fn run_loop<C: CheckpointStore, T: TargetRef>(
    watcher: &mut SourceWatcher,
    writer: &FanOutWriter,
    targets: &[T],
    checkpointer: &mut Checkpointer<C>,
    state_tx: &watch::Sender<EngineState>,
    shutdown: &ShutdownSignal,
    summary: &mut RunSummary,
) -> Result<LoopExit> {
    info!(
        targets = targets.len(),
        target_db = %writer.target_database(),
        resumed_from = ?watcher.resumed_from().map(|c| c.to_string()),
        "Watching for changes"
    );

    loop {
        if shutdown.is_triggered() {
            return Ok(LoopExit::Stopped);
        }

        set_state(state_tx, EngineState::Watching);

        let pulled = tokio::select! {
            biased;

            _ = shutdown.wait() => {
                debug!("Stop requested while waiting for the next event");
                return Ok(LoopExit::Stopped);
            }
            pulled = watcher.next_event() => pulled,
        };

        let event = match pulled {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(LoopExit::StreamEnded),
            // Closed underneath us, nothing was taken
            Err(ForwarderError::Shutdown) => return Ok(LoopExit::Stopped),
            Err(e) => return Err(e),
        };

        process_event(event, writer, targets, checkpointer, state_tx, summary).await;
    }
}

/// Dispatch one event, then checkpoint it. Never fails: outcomes are logged
/// and counted.
async fn process_event<C: CheckpointStore, T: TargetRef>(
    event: ChangeEvent,
    writer: &FanOutWriter,
    targets: &[T],
    checkpointer: &mut Checkpointer<C>,
    state_tx: &watch::Sender<EngineState>,
    summary: &mut RunSummary,
) {
    if event.operation_type == OperationType::Update {
        debug!(event = ?event, "Update event received");
    }

    set_state(state_tx, EngineState::Dispatching);
    let report = writer.apply(&event, targets).await;
    log_dispatch_report(&report);

    summary.writes_failed += report.failed() as u64;
    if report.all_failed() {
        metrics::record_error("all_targets_failed");
        warn!(
            op = %report.operation,
            collection = report.collection.as_deref().unwrap_or(""),
            document_id = ?report.document_id.as_ref().map(|id| id.to_string()),
            cursor = %report.cursor,
            "No target applied this event, checkpoint advances past it anyway"
        );
    }

    set_state(state_tx, EngineState::Checkpointing);
    if checkpointer.advance(&event.cursor).await.is_err() {
        metrics::record_error("checkpoint");
    }

    summary.events_processed += 1;
    summary.last_cursor = Some(event.cursor);
}
