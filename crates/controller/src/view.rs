//! Immutable view snapshots published for the rendering layer.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashsync_core::{EntityId, PageResult, QueryState};
use serde::Serialize;
use tokio::sync::watch;

use crate::controller::SurfacedError;
use crate::fetch::LoadPhase;
use crate::stats::StatsView;

/// Everything a list screen renders.
#[derive(Debug, Clone, Serialize)]
pub struct ViewState {
    pub epoch: u64,
    pub query: QueryState,
    pub phase: LoadPhase,
    pub page: Option<Arc<PageResult>>,
    /// Selected ids in page order.
    pub selection: Vec<EntityId>,
    /// Last fetch error; for `ErrorInitial` this replaces the list.
    pub error: Option<SurfacedError>,
    /// Last bulk action that did not fully succeed.
    pub bulk_error: Option<SurfacedError>,
    pub stats: StatsView,
}

impl ViewState {
    pub fn initial(query: QueryState) -> Self {
        Self {
            epoch: 0,
            query,
            phase: LoadPhase::Idle,
            page: None,
            selection: Vec::new(),
            error: None,
            bulk_error: None,
            stats: StatsView::default(),
        }
    }

    pub fn is_loading(&self) -> bool { self.phase.load_kind().is_some() }
}

/// Reader side: current snapshot plus a change signal.
#[derive(Clone)]
pub struct ViewHandle {
    snap: Arc<ArcSwap<ViewState>>,
    epoch_rx: watch::Receiver<u64>,
}

impl ViewHandle {
    pub fn current(&self) -> Arc<ViewState> { self.snap.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }
}

pub(crate) struct ViewPublisher {
    snap: Arc<ArcSwap<ViewState>>,
    epoch_tx: watch::Sender<u64>,
    epoch_rx: watch::Receiver<u64>,
    epoch: u64,
}

impl ViewPublisher {
    pub(crate) fn new(initial: ViewState) -> Self {
        let (epoch_tx, epoch_rx) = watch::channel(0u64);
        Self { snap: Arc::new(ArcSwap::from_pointee(initial)), epoch_tx, epoch_rx, epoch: 0 }
    }

    pub(crate) fn handle(&self) -> ViewHandle {
        ViewHandle { snap: Arc::clone(&self.snap), epoch_rx: self.epoch_rx.clone() }
    }

    pub(crate) fn publish(&mut self, mut next: ViewState) {
        self.epoch = self.epoch.saturating_add(1);
        next.epoch = self.epoch;
        self.snap.store(Arc::new(next));
        let _ = self.epoch_tx.send(self.epoch);
    }
}
