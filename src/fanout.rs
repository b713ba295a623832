// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fan-out writer: one change event, every target, concurrently.
//!
//! # Design
//!
//! ```text
//! ChangeEvent ──▶ WriteOp::from_event ──┬──▶ target A ──┐
//!                                       ├──▶ target B ──┼──▶ join ──▶ DispatchReport
//!                                       └──▶ target C ──┘
//! ```
//!
//! Every target write for an event is started at once and awaited jointly.
//! A failing target never cancels the others: each write resolves to its own
//! [`TargetOutcome`], and the report is returned whatever the mix of results.
//! Nothing is retried. A target that fails a write stays behind the source
//! for that document until reconciled out of band.

use crate::event::{ChangeEvent, Cursor, OperationType};
use crate::metrics;
use crate::target::{TargetRef, WriteOp};
use futures::future::join_all;
use mongodb::bson::Bson;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of one write on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    /// The target accepted the write.
    Applied,
    /// No write was issued (operation type not forwarded).
    Skipped,
    /// The write failed or could not be built.
    Failed(String),
}

/// Outcome of an event on a single target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub target: String,
    pub status: WriteStatus,
}

impl TargetOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, WriteStatus::Failed(_))
    }
}

/// Per-target outcomes of dispatching one event.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub cursor: Cursor,
    pub operation: OperationType,
    pub collection: Option<String>,
    /// `_id` of the affected document, for reconciling failed targets.
    pub document_id: Option<Bson>,
    pub outcomes: Vec<TargetOutcome>,
    pub duration: Duration,
}

impl DispatchReport {
    pub fn applied(&self) -> usize {
        self.count(|s| matches!(s, WriteStatus::Applied))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, WriteStatus::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, WriteStatus::Failed(_)))
    }

    /// Every target accepted the write, or none was needed.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// There was at least one target and every one of them failed.
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.failed() == self.outcomes.len()
    }

    /// Outcome for a named target.
    pub fn outcome(&self, target: &str) -> Option<&TargetOutcome> {
        self.outcomes.iter().find(|o| o.target == target)
    }

    fn count(&self, pred: impl Fn(&WriteStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

/// Translates change events and applies them across targets.
pub struct FanOutWriter {
    /// Database name used on every target.
    target_database: String,
}

impl FanOutWriter {
    pub fn new(target_database: impl Into<String>) -> Self {
        Self {
            target_database: target_database.into(),
        }
    }

    pub fn target_database(&self) -> &str {
        &self.target_database
    }

    /// Apply one event to every target.
    ///
    /// Completes once each target has succeeded or failed. Never returns an
    /// error: failures are carried in the report.
    pub async fn apply<T: TargetRef>(&self, event: &ChangeEvent, targets: &[T]) -> DispatchReport {
        let start = Instant::now();
        let document_id = event.document_id();

        let outcomes = match WriteOp::from_event(event) {
            Ok(Some(op)) => {
                let writes = targets.iter().map(|target| self.write_one(target, &op, document_id));
                join_all(writes).await
            }
            Ok(None) => {
                debug!(op = %event.operation_type, "Operation type not forwarded, skipping");
                targets
                    .iter()
                    .map(|target| TargetOutcome {
                        target: target.name().to_string(),
                        status: WriteStatus::Skipped,
                    })
                    .collect()
            }
            Err(e) => {
                warn!(
                    op = %event.operation_type,
                    namespace = %event.namespace,
                    error = %e,
                    "Cannot build write for event"
                );
                metrics::record_malformed_event(event.operation_type.as_str());
                targets
                    .iter()
                    .map(|target| TargetOutcome {
                        target: target.name().to_string(),
                        status: WriteStatus::Failed(e.to_string()),
                    })
                    .collect()
            }
        };

        let report = DispatchReport {
            cursor: event.cursor.clone(),
            operation: event.operation_type.clone(),
            collection: event.collection().map(str::to_string),
            document_id: document_id.cloned(),
            outcomes,
            duration: start.elapsed(),
        };
        metrics::record_dispatch(report.operation.as_str(), report.duration);
        report
    }

    async fn write_one<T: TargetRef>(
        &self,
        target: &T,
        op: &WriteOp,
        document_id: Option<&Bson>,
    ) -> TargetOutcome {
        let status = match target.apply(&self.target_database, op).await {
            Ok(()) => {
                metrics::record_target_write(target.name(), op.kind(), true);
                WriteStatus::Applied
            }
            Err(e) => {
                metrics::record_target_write(target.name(), op.kind(), false);
                warn!(
                    target = %target.name(),
                    op = op.kind(),
                    collection = %op.collection(),
                    document_id = ?document_id.map(|id| id.to_string()),
                    error = %e,
                    "Target write failed, target diverges for this event"
                );
                WriteStatus::Failed(e.to_string())
            }
        };

        TargetOutcome {
            target: target.name().to_string(),
            status,
        }
    }
}

/// Log a dispatch report at the appropriate level.
pub fn log_dispatch_report(report: &DispatchReport) {
    if !report.operation.is_handled() {
        debug!(op = %report.operation, cursor = %report.cursor, "Ignored event");
        return;
    }

    if report.is_success() {
        info!(
            op = %report.operation,
            collection = report.collection.as_deref().unwrap_or(""),
            targets = report.outcomes.len(),
            duration_ms = report.duration.as_millis(),
            "Successfully processed {} operation",
            report.operation
        );
    } else {
        warn!(
            op = %report.operation,
            collection = report.collection.as_deref().unwrap_or(""),
            document_id = ?report.document_id.as_ref().map(|id| id.to_string()),
            applied = report.applied(),
            failed = report.failed(),
            cursor = %report.cursor,
            "Processed {} operation with failed targets",
            report.operation
        );
    }
}
