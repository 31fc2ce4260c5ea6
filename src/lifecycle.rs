//! Reload requests and the task that serves them.
//!
//! Every reload source (SIGHUP, the file watcher) holds a [`ReloadTrigger`].
//! Requests go through a single-slot channel: while one is pending, further
//! requests are coalesced into it. A single [`ReloadWorker`] drains the
//! channel and calls [`Coordinator::reload`], so reloads never overlap.

use crate::coordinator::Coordinator;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

/// What asked for a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadCause {
    Signal,
    FileChange,
}

impl fmt::Display for ReloadCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadCause::Signal => f.write_str("signal"),
            ReloadCause::FileChange => f.write_str("file change"),
        }
    }
}

/// A cloneable handle for requesting reloads.
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    tx: mpsc::Sender<ReloadCause>,
}

impl ReloadTrigger {
    /// Creates a trigger and the receiving end for a [`ReloadWorker`].
    pub fn channel() -> (Self, mpsc::Receiver<ReloadCause>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Requests a reload. Returns false if the request was coalesced into an
    /// already pending one or the worker is gone.
    pub fn request(&self, cause: ReloadCause) -> bool {
        match self.tx.try_send(cause) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(%cause, "Reload already pending, coalescing request");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Drains reload requests one at a time.
pub struct ReloadWorker {
    coordinator: Arc<Coordinator>,
    rx: mpsc::Receiver<ReloadCause>,
    shutdown_rx: watch::Receiver<bool>,
    // Used by tests to observe completed reloads.
    reload_notifier: Option<mpsc::Sender<Result<u64, String>>>,
}

impl ReloadWorker {
    pub fn new(
        coordinator: Arc<Coordinator>,
        rx: mpsc::Receiver<ReloadCause>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            coordinator,
            rx,
            shutdown_rx,
            reload_notifier: None,
        }
    }

    /// Reports the outcome of every reload (new generation or error text).
    pub fn with_notifier(mut self, notifier: mpsc::Sender<Result<u64, String>>) -> Self {
        self.reload_notifier = Some(notifier);
        self
    }

    pub async fn run(mut self) {
        info!("Reload worker started.");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    info!("Reload worker received shutdown signal.");
                    break;
                }
                cause = self.rx.recv() => {
                    let Some(cause) = cause else { break };
                    info!(%cause, "Reloading configuration");
                    let outcome = match self.coordinator.reload().await {
                        Ok(state) => Ok(state.generation),
                        Err(e) => {
                            error!(err = %e, %cause, "Error reloading config");
                            Err(e.to_string())
                        }
                    };
                    if let Some(notifier) = &self.reload_notifier {
                        if notifier.send(outcome).await.is_err() {
                            debug!("Reload notifier channel closed");
                        }
                    }
                }
            }
        }
        info!("Reload worker finished.");
    }
}

/// Turns SIGHUP into reload requests until shutdown.
#[cfg(unix)]
pub async fn listen_for_sighup(trigger: ReloadTrigger, mut shutdown_rx: watch::Receiver<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(err = %e, "Failed to install SIGHUP handler");
            return;
        }
    };
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                info!("Received SIGHUP");
                trigger.request(ReloadCause::Signal);
            }
        }
    }
}

#[cfg(not(unix))]
pub async fn listen_for_sighup(_trigger: ReloadTrigger, mut shutdown_rx: watch::Receiver<bool>) {
    let _ = shutdown_rx.changed().await;
}
