//! # CDC Forwarder
//!
//! Forwards MongoDB change events from one authoritative source cluster to
//! any number of target clusters.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                             cdc-forwarder                                 │
//! │                                                                           │
//! │  ┌───────────────┐    ┌──────────────┐    ┌──────────────────────────┐    │
//! │  │ SourceWatcher │───►│ Coordinator  │───►│ FanOutWriter             │    │
//! │  │ (db.watch())  │    │ (one event   │    │ (all targets, joined)    │    │
//! │  └───────────────┘    │  at a time)  │    └──────────────────────────┘    │
//! │                       └──────────────┘                 │                  │
//! │                              │                         ▼                  │
//! │                              ▼                ┌─────────────────┐         │
//! │                      ┌──────────────┐         │ target A, B, …  │         │
//! │                      │ Checkpointer │         │ <target_db>.<c> │         │
//! │                      │ (on source)  │         └─────────────────┘         │
//! │                      └──────────────┘                                     │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery Semantics
//!
//! - Events are applied to each target in source order, one event at a time
//! - Writes for one event go to every target concurrently
//! - A failed target write is logged and not retried; that target diverges
//! - The resume cursor advances after every attempted event
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cdc_forwarder::{ForwarderConfig, MongoBackend, ReplicationCoordinator, ShutdownSignal};
//!
//! #[tokio::main]
//! async fn main() -> cdc_forwarder::Result<()> {
//!     let config = ForwarderConfig::from_env();
//!     config.validate()?;
//!
//!     let shutdown = ShutdownSignal::new();
//!     let mut coordinator = ReplicationCoordinator::new(&config, MongoBackend::new());
//!     coordinator.start().await?;
//!
//!     // Runs until the shutdown signal is triggered or the stream fails
//!     let summary = coordinator.run(&shutdown).await?;
//!     println!("processed {} events", summary.events_processed);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod fanout;
pub mod metrics;
pub mod mongo;
pub mod target;
pub mod watcher;

// Re-exports for convenience
pub use checkpoint::{CheckpointStore, Checkpointer};
pub use config::{CheckpointConfig, ForwarderConfig, SourceConfig, TargetConfig};
pub use coordinator::{Backend, EngineState, ReplicationCoordinator, RunSummary, ShutdownSignal};
pub use error::{ForwarderError, Result};
pub use event::{ChangeEvent, Cursor, Namespace, OperationType, UpdateDescription};
pub use fanout::{DispatchReport, FanOutWriter, TargetOutcome, WriteStatus};
pub use mongo::{MongoBackend, MongoCheckpointStore, MongoSource, MongoTarget};
pub use target::{BoxFuture, TargetRef, WriteOp};
pub use watcher::{ChangeSource, EventStream, SourceWatcher};
