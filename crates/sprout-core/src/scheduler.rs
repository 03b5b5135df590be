//! The dirty set, its host flush hook and the cross-thread mutation queue.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use indexmap::IndexSet;

use crate::platform::{DefaultScheduler, FlushScheduler};
use crate::NodeId;

/// A mutation marshalled from another thread.
pub(crate) struct RemoteMutation {
    pub(crate) node: NodeId,
    pub(crate) expected: &'static str,
    pub(crate) apply: Box<dyn FnOnce(&mut dyn Any) -> bool + Send>,
}

struct SchedulerInner {
    host: Arc<dyn FlushScheduler>,
    dirty: RefCell<IndexSet<NodeId>>,
    flush_requested: Cell<bool>,
    remote_tx: async_channel::Sender<RemoteMutation>,
    remote_rx: async_channel::Receiver<RemoteMutation>,
}

impl SchedulerInner {
    fn new(host: Arc<dyn FlushScheduler>) -> Self {
        let (remote_tx, remote_rx) = async_channel::unbounded();
        Self {
            host,
            dirty: RefCell::new(IndexSet::new()),
            flush_requested: Cell::new(false),
            remote_tx,
            remote_rx,
        }
    }

    fn request_flush(&self) {
        if !self.flush_requested.replace(true) {
            self.host.schedule_flush();
        }
    }

    fn mark_dirty(&self, id: NodeId) {
        let inserted = self.dirty.borrow_mut().insert(id);
        if inserted {
            log::trace!("marked {id:?} dirty");
            self.request_flush();
        }
    }

    fn take_dirty(&self) -> Vec<NodeId> {
        self.flush_requested.set(false);
        self.dirty.borrow_mut().drain(..).collect()
    }
}

/// The dirty set plus the remote-mutation queue for one tree.
///
/// Lifecycle per tick: empty, accumulate through `mark_dirty`, drained
/// atomically by the tree's flush, empty again.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(host: Arc<dyn FlushScheduler>) -> Self {
        Self {
            inner: Rc::new(SchedulerInner::new(host)),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle(Rc::downgrade(&self.inner))
    }

    pub fn has_dirty(&self) -> bool {
        !self.inner.dirty.borrow().is_empty()
    }

    pub fn dirty_len(&self) -> usize {
        self.inner.dirty.borrow().len()
    }

    /// Pending registrations in first-marked order.
    pub fn dirty_nodes(&self) -> Vec<NodeId> {
        self.inner.dirty.borrow().iter().copied().collect()
    }

    pub fn has_remote_mutations(&self) -> bool {
        !self.inner.remote_rx.is_empty()
    }

    pub(crate) fn take_dirty(&self) -> Vec<NodeId> {
        self.inner.take_dirty()
    }

    pub(crate) fn try_recv_remote(&self) -> Option<RemoteMutation> {
        self.inner.remote_rx.try_recv().ok()
    }

    /// Drop every registration without rebuilding. The tree clears the
    /// per-node dirty flags alongside.
    pub(crate) fn reset(&self) {
        self.inner.take_dirty();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Arc::new(DefaultScheduler))
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("dirty", &self.inner.dirty.borrow().len())
            .field("remote", &self.inner.remote_rx.len())
            .finish()
    }
}

/// Non-owning reference to a [`Scheduler`]; a no-op once it is dropped.
#[derive(Clone)]
pub struct SchedulerHandle(Weak<SchedulerInner>);

impl SchedulerHandle {
    pub(crate) fn mark_dirty(&self, id: NodeId) {
        if let Some(inner) = self.0.upgrade() {
            inner.mark_dirty(id);
        }
    }

    pub(crate) fn remote_sender(
        &self,
    ) -> Option<(async_channel::Sender<RemoteMutation>, Arc<dyn FlushScheduler>)> {
        self.0
            .upgrade()
            .map(|inner| (inner.remote_tx.clone(), inner.host.clone()))
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SchedulerHandle").field(&self.is_alive()).finish()
    }
}
