// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication coordinator.
//!
//! The orchestrator that ties together:
//! - Source and target connections via a [`Backend`]
//! - The resume cursor via [`crate::checkpoint::Checkpointer`]
//! - The change stream via [`crate::watcher::SourceWatcher`]
//! - Per-event fan-out via [`crate::fanout::FanOutWriter`]
//!
//! # Lifecycle
//!
//! 1. [`start()`](ReplicationCoordinator::start) connects the source and every
//!    target, loads the checkpoint and opens the watcher
//! 2. [`run()`](ReplicationCoordinator::run) consumes events until a stop is
//!    requested, the stream ends, or the stream fails
//! 3. [`shutdown()`](ReplicationCoordinator::shutdown) closes the watcher, the
//!    source, then every target (`run()` calls it on the way out)
//!
//! # Ownership
//!
//! The coordinator owns every connection for the life of the process. There
//! is one consumer and no shared mutable state, so nothing here is locked.

mod event_loop;
mod shutdown;
mod types;

pub use event_loop::LoopExit;
pub use shutdown::{listen_for_signals, ShutdownSignal};
pub use types::{EngineState, RunSummary};

use crate::checkpoint::{CheckpointStore, Checkpointer};
use crate::config::{ForwarderConfig, TargetConfig};
use crate::error::{ForwarderError, Result};
use crate::fanout::FanOutWriter;
use crate::metrics;
use crate::target::{BoxFuture, TargetRef};
use crate::watcher::{ChangeSource, SourceWatcher};
use event_loop::set_state;
use futures::future::join_all;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Opens the connections the coordinator needs.
///
/// [`MongoBackend`](crate::mongo::MongoBackend) in production; in-memory
/// backends in tests.
pub trait Backend: Send + Sync + 'static {
    type Source: ChangeSource;
    type Checkpoint: CheckpointStore;
    type Target: TargetRef;

    /// Connect the source. The checkpoint store lives on the same cluster.
    fn connect_source<'a>(
        &'a self,
        config: &'a ForwarderConfig,
    ) -> BoxFuture<'a, (Self::Source, Self::Checkpoint)>;

    /// Connect one target.
    fn connect_target<'a>(
        &'a self,
        target: &'a TargetConfig,
        connect_timeout: Duration,
    ) -> BoxFuture<'a, Self::Target>;
}

/// Forwards source changes to every target.
pub struct ReplicationCoordinator<B: Backend> {
    /// Read once at construction.
    config: ForwarderConfig,

    backend: B,

    /// Coordinator state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,

    /// Coordinator state receiver (for internal use)
    state_rx: watch::Receiver<EngineState>,

    source: Option<B::Source>,
    checkpointer: Option<Checkpointer<B::Checkpoint>>,
    targets: Vec<B::Target>,
    watcher: Option<SourceWatcher>,
    writer: FanOutWriter,

    summary: RunSummary,
}

impl<B: Backend> ReplicationCoordinator<B> {
    /// Create a coordinator in `Init` state. Nothing is connected until
    /// [`start()`](Self::start).
    pub fn new(config: &ForwarderConfig, backend: B) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Init);

        Self {
            writer: FanOutWriter::new(config.target_database.clone()),
            config: config.clone(),
            backend,
            state_tx,
            state_rx,
            source: None,
            checkpointer: None,
            targets: Vec::new(),
            watcher: None,
            summary: RunSummary::default(),
        }
    }

    /// Get current state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Number of connected targets.
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Progress so far.
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Connect everything and open the change stream.
    ///
    /// `Init → Connecting → Watching`. Any failure moves to `Failed` and is
    /// returned; connections that did open are kept so
    /// [`shutdown()`](Self::shutdown) can close them.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != EngineState::Init {
            return Err(ForwarderError::InvalidState {
                expected: EngineState::Init.to_string(),
                actual: self.state().to_string(),
            });
        }

        info!(
            source_db = %self.config.source.database,
            target_db = %self.config.target_database,
            targets = ?self.config.target_names(),
            "Starting forwarder"
        );
        set_state(&self.state_tx, EngineState::Connecting);

        match self.connect_and_open().await {
            Ok(()) => {
                set_state(&self.state_tx, EngineState::Watching);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to start forwarder");
                metrics::record_error("startup");
                set_state(&self.state_tx, EngineState::Failed);
                Err(e)
            }
        }
    }

    /// [`start()`](Self::start), abandoned as soon as a stop is requested.
    ///
    /// An abandoned start returns [`ForwarderError::Shutdown`] without
    /// changing state; [`shutdown()`](Self::shutdown) then closes whatever
    /// had connected.
    pub async fn start_until(&mut self, shutdown: &ShutdownSignal) -> Result<()> {
        let started = tokio::select! {
            biased;

            _ = shutdown.wait() => None,
            result = self.start() => Some(result),
        };

        match started {
            Some(result) => result,
            None => {
                info!(state = %self.state(), "Stop requested during startup");
                Err(ForwarderError::Shutdown)
            }
        }
    }

    async fn connect_and_open(&mut self) -> Result<()> {
        self.config.validate()?;

        let (source, store) = self.backend.connect_source(&self.config).await?;
        self.source = Some(source);
        self.checkpointer = Some(Checkpointer::new(store));

        // Targets are independent, connect them together
        let connect_timeout = self.config.connect_timeout_duration();
        let results = join_all(
            self.config
                .targets
                .iter()
                .map(|target| self.backend.connect_target(target, connect_timeout)),
        )
        .await;

        let mut first_error = None;
        for result in results {
            match result {
                Ok(target) => self.targets.push(target),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        metrics::set_connected_targets(self.targets.len());
        if let Some(e) = first_error {
            return Err(e);
        }
        info!(targets = self.targets.len(), "All targets connected");

        let resume_from = match self.checkpointer.as_mut() {
            Some(checkpointer) => timeout(connect_timeout, checkpointer.load())
                .await
                .map_err(|_| {
                    ForwarderError::Checkpoint(format!(
                        "loading the checkpoint timed out after {:?}",
                        connect_timeout
                    ))
                })??,
            None => None,
        };

        let source = self
            .source
            .as_ref()
            .ok_or_else(|| ForwarderError::Internal("source missing after connect".to_string()))?;
        let watcher = timeout(connect_timeout, SourceWatcher::open(source, resume_from))
            .await
            .map_err(|_| {
                ForwarderError::Stream(format!(
                    "opening the change stream timed out after {:?}",
                    connect_timeout
                ))
            })??;
        self.watcher = Some(watcher);

        Ok(())
    }

    /// Consume events until stopped.
    ///
    /// Returns the run summary after a requested stop or the end of the
    /// stream. A stream failure moves to `Failed` and is returned. Cleanup
    /// runs in every case before this returns.
    pub async fn run(&mut self, shutdown: &ShutdownSignal) -> Result<RunSummary> {
        if self.state() != EngineState::Watching {
            return Err(ForwarderError::InvalidState {
                expected: EngineState::Watching.to_string(),
                actual: self.state().to_string(),
            });
        }

        let (watcher, checkpointer) = match (self.watcher.as_mut(), self.checkpointer.as_mut()) {
            (Some(watcher), Some(checkpointer)) => (watcher, checkpointer),
            _ => {
                return Err(ForwarderError::Internal(
                    "watcher not open in Watching state".to_string(),
                ))
            }
        };

        let span = info_span!("replication", source_db = %self.config.source.database);
        let result = event_loop::run_loop(
            watcher,
            &self.writer,
            &self.targets,
            checkpointer,
            &self.state_tx,
            shutdown,
            &mut self.summary,
        )
        .instrument(span)
        .await;

        match result {
            Ok(exit) => {
                info!(
                    reason = %exit,
                    events = self.summary.events_processed,
                    writes_failed = self.summary.writes_failed,
                    "Consume loop finished"
                );
                self.shutdown().await;
                Ok(self.summary.clone())
            }
            Err(e) => {
                error!(error = %e, "Error in change stream");
                metrics::record_error("stream");
                set_state(&self.state_tx, EngineState::Failed);
                self.shutdown().await;
                Err(e)
            }
        }
    }

    /// Close the watcher, the source, then every target.
    ///
    /// Callable from any state and more than once. Each step runs even if an
    /// earlier one failed. Ends in `Stopped`, unless the coordinator already
    /// `Failed`, which is kept.
    pub async fn shutdown(&mut self) {
        let failed = self.state() == EngineState::Failed;
        if self.state() == EngineState::Stopped {
            debug!("Shutdown called on stopped forwarder");
            return;
        }

        info!("Shutting down forwarder");
        if !failed {
            set_state(&self.state_tx, EngineState::Stopping);
        }

        if let Some(watcher) = self.watcher.as_mut() {
            watcher.close();
        }

        if let Some(source) = self.source.as_ref() {
            if let Err(e) = source.close().await {
                warn!(error = %e, "Failed to close source connection");
            }
        }

        for target in &self.targets {
            if let Err(e) = target.close().await {
                warn!(target = %target.name(), error = %e, "Failed to close target connection");
            }
        }
        metrics::set_connected_targets(0);

        if !failed {
            set_state(&self.state_tx, EngineState::Stopped);
        }
        info!("Cleanup completed");
    }
}
