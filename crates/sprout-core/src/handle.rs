//! Per-node shared cell, liveness tokens and the mutation primitive.

use std::any::{type_name, Any};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::MutationError;
use crate::platform::FlushScheduler;
use crate::scheduler::{RemoteMutation, SchedulerHandle};
use crate::NodeId;

/// The part of a reconciliation node that continuations can reach.
///
/// The tree holds the only strong reference; handles hold `Weak`s, so a
/// destroyed node can never be revived through a handle.
pub(crate) struct NodeCell {
    id: NodeId,
    scheduler: SchedulerHandle,
    live: Arc<AtomicBool>,
    dirty: Cell<bool>,
    producing: Cell<bool>,
    state: RefCell<Option<Box<dyn Any>>>,
}

impl NodeCell {
    pub(crate) fn new(id: NodeId, scheduler: SchedulerHandle, state: Option<Box<dyn Any>>) -> Rc<Self> {
        Rc::new(Self {
            id,
            scheduler,
            live: Arc::new(AtomicBool::new(true)),
            dirty: Cell::new(false),
            producing: Cell::new(false),
            state: RefCell::new(state),
        })
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Shared liveness flag for handles that cannot hold the `Rc`.
    pub(crate) fn liveness(&self) -> Arc<AtomicBool> {
        self.live.clone()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Enqueue into the dirty set unless already enqueued.
    pub(crate) fn mark_dirty(&self) {
        if !self.is_live() || self.dirty.replace(true) {
            return;
        }
        self.scheduler.mark_dirty(self.id);
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.set(false);
    }

    /// Flag the node as producing until the guard drops.
    pub(crate) fn begin_produce(&self) -> ProduceGuard<'_> {
        self.producing.set(true);
        ProduceGuard { cell: self }
    }

    /// A failed borrow means a mutator for this node is running.
    pub(crate) fn read<S: 'static, R>(&self, f: impl FnOnce(&S) -> R) -> Result<R, MutationError> {
        let node = self.id;
        let slot = self
            .state
            .try_borrow()
            .map_err(|_| MutationError::ReentrantMutation { node })?;
        let state = slot
            .as_ref()
            .and_then(|state| state.downcast_ref::<S>())
            .ok_or(MutationError::StateTypeMismatch {
                node,
                expected: type_name::<S>(),
            })?;
        Ok(f(state))
    }

    pub(crate) fn with_state_mut(&self, f: impl FnOnce(&mut dyn Any)) {
        if let Ok(mut slot) = self.state.try_borrow_mut() {
            if let Some(state) = slot.as_mut() {
                f(state.as_mut());
            }
        }
    }

    /// The mutation primitive. `apply` returns `false` when the state has an
    /// unexpected type.
    pub(crate) fn apply(
        &self,
        expected: &'static str,
        apply: impl FnOnce(&mut dyn Any) -> bool,
    ) -> Result<(), MutationError> {
        let node = self.id;
        if !self.is_live() {
            return Err(MutationError::StaleNode { node });
        }
        {
            // A failed borrow means a mutator for this node is already running.
            let mut slot = self
                .state
                .try_borrow_mut()
                .map_err(|_| MutationError::ReentrantMutation { node })?;
            let state = slot
                .as_mut()
                .ok_or(MutationError::StateTypeMismatch { node, expected })?;
            if !apply(state.as_mut()) {
                return Err(MutationError::StateTypeMismatch { node, expected });
            }
        }
        if self.producing.get() {
            log::debug!("node {node:?} mutated itself while producing; not enqueued");
            return Err(MutationError::ReentrantMutation { node });
        }
        self.mark_dirty();
        Ok(())
    }

    /// Retire the cell. Returns the state so the caller decides where it drops.
    pub(crate) fn destroy(&self) -> Option<Box<dyn Any>> {
        self.live.store(false, Ordering::Release);
        self.dirty.set(false);
        self.state.try_borrow_mut().ok().and_then(|mut slot| slot.take())
    }

    pub(crate) fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }
}

impl Drop for NodeCell {
    fn drop(&mut self) {
        self.live.store(false, Ordering::Release);
    }
}

pub(crate) struct ProduceGuard<'a> {
    cell: &'a NodeCell,
}

impl Drop for ProduceGuard<'_> {
    fn drop(&mut self) {
        self.cell.producing.set(false);
    }
}

/// Typed liveness token for a composite node's state.
///
/// Continuations capture this instead of the node and check [`is_live`]
/// before mutating.
///
/// [`is_live`]: StateHandle::is_live
pub struct StateHandle<S> {
    cell: Weak<NodeCell>,
    node: NodeId,
    _state: PhantomData<fn(&mut S)>,
}

impl<S: 'static> StateHandle<S> {
    pub(crate) fn new(cell: &Rc<NodeCell>) -> Self {
        Self {
            cell: Rc::downgrade(cell),
            node: cell.id(),
            _state: PhantomData,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn is_live(&self) -> bool {
        self.cell.upgrade().is_some_and(|cell| cell.is_live())
    }

    /// Run `mutator` against the state now, then enqueue the node for the
    /// next flush. Never rebuilds synchronously.
    pub fn request_mutation(&self, mutator: impl FnOnce(&mut S)) -> Result<(), MutationError> {
        let cell = self
            .cell
            .upgrade()
            .ok_or(MutationError::StaleNode { node: self.node })?;
        cell.apply(type_name::<S>(), |state| match state.downcast_mut::<S>() {
            Some(state) => {
                mutator(state);
                true
            }
            None => false,
        })
    }

    /// Read the current state without scheduling anything.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R, MutationError> {
        let cell = self
            .cell
            .upgrade()
            .filter(|cell| cell.is_live())
            .ok_or(MutationError::StaleNode { node: self.node })?;
        cell.read(f)
    }

    /// A `Send` handle for continuations running on other threads. Returns
    /// `None` once the node or its scheduler is gone.
    pub fn remote(&self) -> Option<RemoteHandle<S>> {
        let cell = self.cell.upgrade().filter(|cell| cell.is_live())?;
        let (sender, host) = cell.scheduler().remote_sender()?;
        Some(RemoteHandle {
            node: self.node,
            live: cell.liveness(),
            sender,
            host,
            _state: PhantomData,
        })
    }
}

impl<S> Clone for StateHandle<S> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            node: self.node,
            _state: PhantomData,
        }
    }
}

impl<S> fmt::Debug for StateHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateHandle")
            .field("node", &self.node)
            .field("live", &self.cell.upgrade().is_some_and(|cell| cell.is_live()))
            .finish()
    }
}

/// Free-function form of [`StateHandle::request_mutation`].
pub fn request_mutation<S: 'static>(
    handle: &StateHandle<S>,
    mutator: impl FnOnce(&mut S),
) -> Result<(), MutationError> {
    handle.request_mutation(mutator)
}

/// Cross-thread counterpart of [`StateHandle`]. Mutations are marshalled onto
/// the tree's thread and applied by `Tree::drain_remote_mutations`.
pub struct RemoteHandle<S> {
    node: NodeId,
    live: Arc<AtomicBool>,
    sender: async_channel::Sender<RemoteMutation>,
    host: Arc<dyn FlushScheduler>,
    _state: PhantomData<fn(&mut S)>,
}

impl<S: 'static> RemoteHandle<S> {
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Whether the node was live when last observed from this thread.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Queue `mutator`. Fails with `StaleNode` once the node is destroyed or
    /// the tree is gone. A node destroyed after the request is queued drops it
    /// at drain time.
    pub fn request_mutation(
        &self,
        mutator: impl FnOnce(&mut S) + Send + 'static,
    ) -> Result<(), MutationError> {
        if !self.is_live() {
            return Err(MutationError::StaleNode { node: self.node });
        }
        let mutation = RemoteMutation {
            node: self.node,
            expected: type_name::<S>(),
            apply: Box::new(move |state: &mut dyn Any| match state.downcast_mut::<S>() {
                Some(state) => {
                    mutator(state);
                    true
                }
                None => false,
            }),
        };
        self.sender
            .try_send(mutation)
            .map_err(|_| MutationError::StaleNode { node: self.node })?;
        self.host.schedule_flush();
        Ok(())
    }
}

impl<S> Clone for RemoteHandle<S> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            live: self.live.clone(),
            sender: self.sender.clone(),
            host: self.host.clone(),
            _state: PhantomData,
        }
    }
}

impl<S: 'static> fmt::Debug for RemoteHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("node", &self.node)
            .field("live", &self.is_live())
            .finish()
    }
}
