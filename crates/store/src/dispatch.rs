//! Single-writer dispatch: actions are applied strictly in arrival order and
//! readers see immutable snapshots.

use std::sync::Arc;

use arc_swap::ArcSwap;
use fleet_core::{Action, DecodeError};
use metrics::counter;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Root state that routes wire actions to its slices.
pub trait Reducer: Clone + Default + Send + Sync + 'static {
    fn dispatch(&mut self, action: &Action) -> Result<(), DecodeError>;
}

/// Synchronous dispatcher owning the state.
#[derive(Debug, Default)]
pub struct Store<R> {
    state: R,
    dispatched: u64,
    rejected: u64,
}

impl<R: Reducer> Store<R> {
    pub fn new(state: R) -> Self {
        Self { state, dispatched: 0, rejected: 0 }
    }

    pub fn state(&self) -> &R {
        &self.state
    }

    /// Number of actions seen, rejected ones included.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn dispatch(&mut self, action: &Action) -> Result<(), DecodeError> {
        self.dispatched += 1;
        counter!("store_actions_total", 1u64);
        match self.state.dispatch(action) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.rejected += 1;
                counter!("store_rejected_total", 1u64);
                Err(e)
            }
        }
    }
}

/// Handle for readers to access the current snapshot and follow progress.
pub struct StoreHandle<R> {
    snap: Arc<ArcSwap<R>>,
    progress_rx: watch::Receiver<u64>,
}

impl<R> StoreHandle<R> {
    pub fn current(&self) -> Arc<R> {
        self.snap.load_full()
    }

    /// Receives the number of actions applied so far.
    pub fn subscribe_progress(&self) -> watch::Receiver<u64> {
        self.progress_rx.clone()
    }
}

impl<R> Clone for StoreHandle<R> {
    fn clone(&self) -> Self {
        Self { snap: Arc::clone(&self.snap), progress_rx: self.progress_rx.clone() }
    }
}

/// Spawn the dispatch loop. Returns a sender for actions and a handle for
/// reads. Actions queued together are applied in order and published as one
/// snapshot.
pub fn spawn_dispatch<R: Reducer>(cap: usize) -> (mpsc::Sender<Action>, StoreHandle<R>) {
    let (tx, mut rx) = mpsc::channel::<Action>(cap.max(1));
    let snap = Arc::new(ArcSwap::from_pointee(R::default()));
    let (progress_tx, progress_rx) = watch::channel(0u64);
    let snap_clone = Arc::clone(&snap);

    tokio::spawn(async move {
        let mut store = Store::new(R::default());
        while let Some(first) = rx.recv().await {
            apply_logged(&mut store, &first);
            while let Ok(next) = rx.try_recv() {
                apply_logged(&mut store, &next);
            }
            snap_clone.store(Arc::new(store.state().clone()));
            let _ = progress_tx.send(store.dispatched());
        }
        debug!(dispatched = store.dispatched(), rejected = store.rejected(), "action channel closed");
        info!("dispatch loop stopped");
    });

    (tx, StoreHandle { snap, progress_rx })
}

fn apply_logged<R: Reducer>(store: &mut Store<R>, action: &Action) {
    if let Err(e) = store.dispatch(action) {
        warn!(error = %e, kind = %action.kind, "rejected action");
    }
}
