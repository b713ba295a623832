// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stop requests.
//!
//! [`ShutdownSignal`] is a level-triggered flag shared between the signal
//! handling boundary and the consume loop. Triggering it never interrupts
//! work in progress: the loop observes it between events, and a pull that is
//! waiting for source activity is abandoned before any event is taken.

use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Cloneable stop flag.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Request a stop. Repeated calls are no-ops.
    pub fn trigger(&self) {
        let changed = self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
        if changed {
            info!("Stop requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once a stop has been requested (for use in `select!`).
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            let stopped = *rx.borrow_and_update();
            if stopped {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender lives in self, so this cannot happen while we are borrowed
                return;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Trigger `shutdown` on the first SIGINT or SIGTERM; return on the second.
///
/// The caller decides what a second signal means (the binary exits without
/// waiting for the in-flight event).
#[cfg(unix)]
pub async fn listen_for_signals(shutdown: ShutdownSignal) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let sigterm = signal(SignalKind::terminate())?;
    let sigint = signal(SignalKind::interrupt())?;

    let signals = stream::unfold((sigterm, sigint), |(mut sigterm, mut sigint)| async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        Some((name, (sigterm, sigint)))
    });

    stop_on_signals(signals, &shutdown).await;
    Ok(())
}

/// Trigger `shutdown` on the first Ctrl+C; return on the second.
#[cfg(not(unix))]
pub async fn listen_for_signals(shutdown: ShutdownSignal) -> std::io::Result<()> {
    // Errors here mean the handler could not be installed
    tokio::signal::ctrl_c().await?;

    let signals = stream::once(async { "Ctrl+C" }).chain(stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok()?;
        Some(("Ctrl+C", ()))
    }));

    stop_on_signals(signals, &shutdown).await;
    Ok(())
}

/// First signal requests a graceful stop. Returns on the second one only;
/// if `signals` ends first this waits forever.
async fn stop_on_signals<S>(signals: S, shutdown: &ShutdownSignal)
where
    S: Stream<Item = &'static str>,
{
    futures::pin_mut!(signals);
    let mut stopping = false;

    while let Some(name) = signals.next().await {
        if stopping {
            warn!(signal = name, "Received second stop signal");
            return;
        }
        info!(signal = name, "Received stop signal, finishing the current event");
        shutdown.trigger();
        stopping = true;
    }
    std::future::pending::<()>().await;
}
