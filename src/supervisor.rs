//! Top-level control flow.
//!
//! The supervisor forwards services from the watch to the update loop and
//! waits on three things at once: the next watch event, a termination
//! signal, and errors reported by the update loop.  Whichever ends the
//! run, it sends [`Update::Shutdown`], closes its channels and drops the
//! subscription.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::stream::{Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::signal;
use tokio::sync::{mpsc, watch};

use crate::source::SourceEvent;
use crate::statefile::{StateError, StateStore};
use crate::types::Update;
use crate::updater::{Updater, WriteFailures};

/// Why the supervisor stopped.
#[derive(Debug)]
pub enum StopReason {
    /// A termination signal was received.
    Signal,
    /// The watch ended.
    StreamClosed,
    /// The watch produced something other than a service.
    Unexpected(String),
    /// Saving the host state failed and the policy said to stop.
    WriteError(Arc<StateError>),
    /// The update loop is no longer receiving.
    UpdaterGone,
}

impl StopReason {
    /// True for every reason except an orderly termination signal.
    pub fn is_fault(&self) -> bool {
        !matches!(self, StopReason::Signal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop,
}

/// What to do when the update loop reports a save error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop on the first error.
    FailFast,
    /// Keep going until more than `limit` errors have been seen.
    Tolerate { limit: u32 },
}

impl ErrorPolicy {
    /// A limit of zero means fail fast.
    pub fn with_limit(limit: u32) -> Self {
        if limit == 0 {
            ErrorPolicy::FailFast
        } else {
            ErrorPolicy::Tolerate { limit }
        }
    }

    /// Decide given the total number of save failures so far.
    pub fn decide(&self, failures: u32) -> Decision {
        let limit = match self {
            ErrorPolicy::FailFast => 0,
            ErrorPolicy::Tolerate { limit } => *limit,
        };
        if failures > limit {
            Decision::Stop
        } else {
            Decision::Continue
        }
    }
}

/// Multiplex watch events, `shutdown` and update errors until one of them
/// ends the run.
pub async fn supervise<E, F>(
    mut events: E,
    shutdown: F,
    updates: mpsc::Sender<Update>,
    mut errors: watch::Receiver<WriteFailures>,
    policy: ErrorPolicy,
) -> StopReason
where
    E: Stream<Item = SourceEvent> + Unpin,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let reason = loop {
        tokio::select! {
            item = events.next() => match item {
                Some(SourceEvent::Service(svc)) => {
                    info!(
                        "Updated service {}/{}",
                        svc.metadata.namespace.as_deref().unwrap_or_default(),
                        svc.metadata.name.as_deref().unwrap_or_default()
                    );
                    debug!("Service: {:?}", svc);
                    if updates.send(Update::Service(svc)).await.is_err() {
                        error!("Update loop is gone");
                        break StopReason::UpdaterGone;
                    }
                }
                Some(SourceEvent::Unexpected(what)) => {
                    error!("Got non-service from service watch: {}", what);
                    break StopReason::Unexpected(what);
                }
                None => {
                    error!("Service watch closed");
                    break StopReason::StreamClosed;
                }
            },
            _ = &mut shutdown => {
                info!("Terminating");
                break StopReason::Signal;
            }
            Ok(()) = errors.changed() => {
                let failures = errors.borrow_and_update().clone();
                let Some(last) = failures.last else { continue };
                error!(
                    "Error updating host state ({} so far): {}",
                    failures.count, last
                );
                match policy.decide(failures.count) {
                    Decision::Stop => break StopReason::WriteError(last),
                    Decision::Continue => warn!("Continuing after host state error"),
                }
            }
        }
    };

    if updates.send(Update::Shutdown).await.is_err() {
        debug!("Update loop already stopped");
    }
    reason
}

/// Run the update loop on its own task and supervise it until the run
/// ends. The update loop has finished by the time this returns.
pub async fn run<E, F, S>(
    events: E,
    shutdown: F,
    store: S,
    name_label: &str,
    policy: ErrorPolicy,
) -> Result<StopReason>
where
    E: Stream<Item = SourceEvent> + Unpin,
    F: Future<Output = ()>,
    S: StateStore + 'static,
{
    let (update_tx, update_rx) = mpsc::channel(1);
    let (error_tx, error_rx) = watch::channel(WriteFailures::default());

    let updater = Updater::new(store, name_label);
    let handle = tokio::spawn(updater.run(update_rx, error_tx));

    let reason = supervise(events, shutdown, update_tx, error_rx, policy).await;

    let updater = handle.await.context("update loop panicked")?;
    info!(
        "Update loop stopped, last saved state: {:?} ({} items)",
        updater.current().reference,
        updater.current().items.len()
    );
    Ok(reason)
}

/// Resolves on SIGINT or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
