//! The update loop.
//!
//! A single task owns the current [`HostState`].  It receives services one
//! at a time, converts them, and saves the result only when it differs
//! from the last state that was saved successfully.  Save failures are
//! reported on the error channel and never stop the loop; deciding what
//! to do about them is left to the supervisor.
//!
//! The error channel holds a single value: the number of failures so far
//! and the most recent error.  Reporting overwrites it, so the loop never
//! waits on the supervisor and no failure goes uncounted.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};

use crate::service;
use crate::statefile::{HostState, StateError, StateStore};
use crate::types::Update;

/// Save failures seen by the update loop so far.
#[derive(Debug, Clone, Default)]
pub struct WriteFailures {
    pub count: u32,
    pub last: Option<Arc<StateError>>,
}

pub struct Updater<S> {
    store: S,
    name_label: String,
    current: HostState,
}

impl<S: StateStore> Updater<S> {
    pub fn new(store: S, name_label: impl Into<String>) -> Self {
        Self {
            store,
            name_label: name_label.into(),
            current: HostState::default(),
        }
    }

    /// The last successfully saved state.
    pub fn current(&self) -> &HostState {
        &self.current
    }

    /// Process updates until [`Update::Shutdown`] arrives or the channel
    /// closes. Returns the updater so its final state can be inspected.
    pub async fn run(
        mut self,
        mut updates: mpsc::Receiver<Update>,
        errors: watch::Sender<WriteFailures>,
    ) -> Self {
        while let Some(update) = updates.recv().await {
            match update {
                Update::Service(svc) => {
                    if let Err(e) = self.apply(&svc) {
                        report(&errors, e);
                    }
                }
                Update::Shutdown => {
                    debug!("Update loop received shutdown");
                    return self;
                }
            }
        }
        debug!("Update channel closed");
        self
    }

    /// Convert one service and save it if it changed.
    ///
    /// On failure the current state is left untouched, so the same content
    /// counts as a change again next time.
    pub fn apply(&mut self, svc: &Service) -> Result<bool, StateError> {
        let (next, changed) = service::updated(&self.current, svc, &self.name_label);
        if !changed {
            debug!("Host state unchanged for {}", next.reference);
            return Ok(false);
        }
        self.store.save(&next)?;
        info!(
            "Saved host state for {} ({} items)",
            next.reference,
            next.items.len()
        );
        self.current = next;
        Ok(true)
    }
}

/// Hand an error to the supervisor without blocking the loop.
fn report(errors: &watch::Sender<WriteFailures>, err: StateError) {
    warn!("Failed to save host state: {}", err);
    errors.send_modify(|failures| {
        failures.count += 1;
        failures.last = Some(Arc::new(err));
    });
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::service::tests::make_service;
    use crate::statefile::FileStore;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Records every saved state; fails while `fail` is set.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingStore {
        pub saved: Arc<Mutex<Vec<HostState>>>,
        pub fail: Arc<Mutex<bool>>,
    }

    impl StateStore for RecordingStore {
        fn save(&mut self, state: &HostState) -> Result<(), StateError> {
            if *self.fail.lock().unwrap() {
                return Err(StateError::Io {
                    path: "/nonexistent/status.json".into(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            self.saved.lock().unwrap().push(state.clone());
            Ok(())
        }
    }

    fn svc_a() -> Update {
        Update::Service(Box::new(make_service(
            "ns1",
            "svc-a",
            &[],
            &["10.0.0.1"],
            Some("172.16.0.9"),
        )))
    }

    fn svc_a_moved() -> Update {
        Update::Service(Box::new(make_service(
            "ns1",
            "svc-a",
            &[],
            &["10.0.0.2"],
            Some("172.16.0.9"),
        )))
    }

    #[tokio::test]
    async fn test_identical_events_write_once() {
        let store = RecordingStore::default();
        let (tx, rx) = mpsc::channel(4);
        let (err_tx, err_rx) = watch::channel(WriteFailures::default());

        tx.send(svc_a()).await.unwrap();
        tx.send(svc_a()).await.unwrap();
        tx.send(Update::Shutdown).await.unwrap();

        let updater = Updater::new(store.clone(), "app").run(rx, err_tx).await;

        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert_eq!(updater.current().items.len(), 2);
        assert_eq!(err_rx.borrow().count, 0);
        assert!(err_rx.borrow().last.is_none());
    }

    #[tokio::test]
    async fn test_changed_event_writes_again() {
        let store = RecordingStore::default();
        let (tx, rx) = mpsc::channel(4);
        let (err_tx, _err_rx) = watch::channel(WriteFailures::default());

        tx.send(svc_a()).await.unwrap();
        tx.send(svc_a_moved()).await.unwrap();
        tx.send(svc_a()).await.unwrap();
        drop(tx);

        Updater::new(store.clone(), "app").run(rx, err_tx).await;

        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(saved[1].items[0].ipv4_address, "10.0.0.2");
    }

    #[test]
    fn test_failed_save_keeps_previous_state() {
        let store = RecordingStore::default();
        let mut updater = Updater::new(store.clone(), "app");
        let Update::Service(first) = svc_a() else { unreachable!() };
        let Update::Service(second) = svc_a_moved() else { unreachable!() };

        assert!(updater.apply(&first).unwrap());
        let before = updater.current().clone();

        *store.fail.lock().unwrap() = true;
        assert!(updater.apply(&second).is_err());
        assert_eq!(updater.current(), &before);

        // same content is still a change and is retried
        *store.fail.lock().unwrap() = false;
        assert!(updater.apply(&second).unwrap());
        assert_eq!(updater.current().items[0].ipv4_address, "10.0.0.2");
        assert_eq!(store.saved.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_save_error_is_reported_and_loop_continues() {
        let store = RecordingStore::default();
        *store.fail.lock().unwrap() = true;
        let (tx, rx) = mpsc::channel(1);
        let (err_tx, mut err_rx) = watch::channel(WriteFailures::default());

        let handle = tokio::spawn(Updater::new(store.clone(), "app").run(rx, err_tx));

        tx.send(svc_a()).await.unwrap();
        err_rx.changed().await.unwrap();
        {
            let failures = err_rx.borrow_and_update();
            assert_eq!(failures.count, 1);
            assert!(matches!(
                failures.last.as_deref(),
                Some(StateError::Io { .. })
            ));
        }

        *store.fail.lock().unwrap() = false;
        tx.send(svc_a()).await.unwrap();
        tx.send(Update::Shutdown).await.unwrap();

        let updater = handle.await.unwrap();
        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert_eq!(updater.current().reference, "k8s: ns1 service/svc-a");
    }

    #[tokio::test]
    async fn test_unread_failures_are_all_counted() {
        let store = RecordingStore::default();
        *store.fail.lock().unwrap() = true;
        let (tx, rx) = mpsc::channel(4);
        let (err_tx, err_rx) = watch::channel(WriteFailures::default());

        tx.send(svc_a()).await.unwrap();
        tx.send(svc_a_moved()).await.unwrap();
        tx.send(svc_a()).await.unwrap();
        tx.send(Update::Shutdown).await.unwrap();

        // nobody reads the error channel while the loop runs
        let updater = Updater::new(store, "app").run(rx, err_tx).await;

        assert_eq!(err_rx.borrow().count, 3);
        assert!(err_rx.borrow().last.is_some());
        assert_eq!(updater.current(), &HostState::default());
    }

    #[tokio::test]
    async fn test_shutdown_stops_before_queued_updates() {
        let store = RecordingStore::default();
        let (tx, rx) = mpsc::channel(4);
        let (err_tx, _err_rx) = watch::channel(WriteFailures::default());

        tx.send(Update::Shutdown).await.unwrap();
        tx.send(svc_a()).await.unwrap();

        Updater::new(store.clone(), "app").run(rx, err_tx).await;

        assert!(store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_writes_file_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("status.json");
        let (tx, rx) = mpsc::channel(2);
        let (err_tx, _err_rx) = watch::channel(WriteFailures::default());

        tx.send(svc_a()).await.unwrap();
        tx.send(Update::Shutdown).await.unwrap();

        Updater::new(FileStore::new(&path), "app")
            .run(rx, err_tx)
            .await;

        let saved: HostState =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.items[1].name, "svc-a-cluster");
    }
}
