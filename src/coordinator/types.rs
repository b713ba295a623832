// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Coordinator state types.
//!
//! Defines the state machine for the forwarder lifecycle.
//!
//! # State Transitions
//!
//! ```text
//!              start()
//! Init ─────────────────→ Connecting ───────────────→ Failed
//!   │                         │        (connect error,    ↑
//!   │                         │         checkpoint load)  │
//!   │                         ↓                           │
//!   │                     Watching ──────────────────────→┤
//!   │                      │    ↑      (stream error)     │
//!   │                      ↓    │                         │
//!   │              Dispatching  │                         │
//!   │                      ↓    │                         │
//!   │            Checkpointing ─┘                         │
//!   │                      │                              │
//!   │ shutdown()           ↓ (stop requested / stream end)│
//!   └─────────────────→ Stopping ←────────────────────────┘ shutdown()
//!                          ↓
//!                       Stopped
//! ```
//!
//! # State Descriptions
//!
//! - **Init**: Created, nothing connected.
//! - **Connecting**: Opening the source and every target connection.
//! - **Watching**: Waiting for the next change event.
//! - **Dispatching**: Fanning one event out to every target.
//! - **Checkpointing**: Persisting the event's cursor.
//! - **Stopping**: Closing the watcher, the source, then the targets.
//! - **Stopped**: Cleanup finished. Terminal.
//! - **Failed**: Fatal error. Cleanup still runs, but the state stays `Failed`.

use crate::event::Cursor;

/// State of the replication coordinator.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created but not started.
    Init,

    /// Establishing the source and target connections.
    Connecting,

    /// Waiting for the next event from the source.
    Watching,

    /// Applying one event to every target.
    Dispatching,

    /// Persisting the cursor of the event just dispatched.
    Checkpointing,

    /// Closing connections.
    Stopping,

    /// Stopped cleanly.
    Stopped,

    /// Fatal error. The run cannot continue.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Init => write!(f, "Init"),
            EngineState::Connecting => write!(f, "Connecting"),
            EngineState::Watching => write!(f, "Watching"),
            EngineState::Dispatching => write!(f, "Dispatching"),
            EngineState::Checkpointing => write!(f, "Checkpointing"),
            EngineState::Stopping => write!(f, "Stopping"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// What a run did before it ended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Events pulled and dispatched (ignored types included).
    pub events_processed: u64,
    /// Individual target writes that failed.
    pub writes_failed: u64,
    /// Cursor of the last event processed.
    pub last_cursor: Option<Cursor>,
}
