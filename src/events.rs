// Lifecycle event channel
//
// Carries protocol-level events (ready / update / finish / error) to the host
// application. This is separate from the store's change notifications, which
// exist to schedule re-renders.

use crate::types::{LoaderError, LogMetadata, Timeslice};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event types a host can listen for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderEventKind {
    Ready,
    Update,
    Finish,
    Error,
}

/// Events emitted by a loader
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    /// Metadata arrived and the log can be played
    Ready(Arc<LogMetadata>),
    /// A timeslice was received
    Update(Arc<Timeslice>),
    /// The server finished sending the requested data
    Finish,
    Error(LoaderError),
}

impl LoaderEvent {
    pub fn kind(&self) -> LoaderEventKind {
        match self {
            LoaderEvent::Ready(_) => LoaderEventKind::Ready,
            LoaderEvent::Update(_) => LoaderEventKind::Update,
            LoaderEvent::Finish => LoaderEventKind::Finish,
            LoaderEvent::Error(_) => LoaderEventKind::Error,
        }
    }
}

/// Handle returned by [`EventBus::on`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&LoaderEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<LoaderEventKind, Vec<(ListenerId, Handler)>>>,
    emitted: RwLock<HashMap<LoaderEventKind, u64>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: LoaderEventKind, handler: F) -> ListenerId
    where
        F: Fn(&LoaderEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn off(&self, kind: LoaderEventKind, id: ListenerId) -> bool {
        let mut handlers = self.handlers.write();
        match handlers.get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|(existing, _)| *existing != id);
                list.len() != before
            }
            None => false,
        }
    }

    pub fn emit(&self, event: LoaderEvent) {
        let kind = event.kind();
        *self.emitted.write().entry(kind).or_insert(0) += 1;

        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            handler(&event);
        }
    }

    /// How many events of `kind` were emitted
    pub fn emitted(&self, kind: LoaderEventKind) -> u64 {
        self.emitted.read().get(&kind).copied().unwrap_or(0)
    }
}
