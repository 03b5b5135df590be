//! Standard host services backed by Rust's `std` library.
//!
//! This crate provides a concrete [`FlushScheduler`] for `sprout-core`.
//! Applications construct a [`StdRuntime`], build their tree from it and
//! poll [`StdRuntime::take_flush_request`] once per tick.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use sprout_core::{Backend, FlushScheduler, Scheduler, Tree, TreeOptions};

type FrameWaker = Arc<dyn Fn() + Send + Sync + 'static>;

/// Flush scheduler that records requests in an atomic flag.
pub struct StdScheduler {
    flush_requested: AtomicBool,
    frame_waker: RwLock<Option<FrameWaker>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self {
            flush_requested: AtomicBool::new(false),
            frame_waker: RwLock::new(None),
        }
    }

    /// Returns whether a flush has been requested since the last call.
    pub fn take_flush_request(&self) -> bool {
        self.flush_requested.swap(false, Ordering::SeqCst)
    }

    /// Registers a waker invoked whenever a flush is requested, from any
    /// thread.
    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self
            .frame_waker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(waker));
    }

    pub fn clear_frame_waker(&self) {
        *self
            .frame_waker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn wake(&self) {
        let waker = self
            .frame_waker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field(
                "flush_requested",
                &self.flush_requested.load(Ordering::SeqCst),
            )
            .finish()
    }
}

impl FlushScheduler for StdScheduler {
    fn schedule_flush(&self) {
        self.flush_requested.store(true, Ordering::SeqCst);
        self.wake();
    }
}

/// Convenience container bundling the std scheduler with a dirty scheduler.
///
/// Each runtime drives exactly one tree; node ids from one tree mean
/// nothing to another.
#[derive(Clone)]
pub struct StdRuntime {
    host: Arc<StdScheduler>,
    scheduler: Scheduler,
}

impl StdRuntime {
    pub fn new() -> Self {
        let host = Arc::new(StdScheduler::default());
        let scheduler = Scheduler::new(host.clone());
        Self { host, scheduler }
    }

    /// Build the tree this runtime drives.
    pub fn tree<B: Backend>(&self, backend: B) -> Tree<B> {
        self.tree_with_options(backend, TreeOptions::default())
    }

    pub fn tree_with_options<B: Backend>(&self, backend: B, options: TreeOptions) -> Tree<B> {
        log::debug!("building tree on std runtime");
        Tree::with_scheduler(backend, self.scheduler.clone(), options)
    }

    /// Returns the dirty scheduler shared with the tree.
    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    /// Returns the host-side flush scheduler.
    pub fn host(&self) -> Arc<StdScheduler> {
        Arc::clone(&self.host)
    }

    /// Returns whether a flush was requested since the last poll.
    pub fn take_flush_request(&self) -> bool {
        self.host.take_flush_request()
    }

    /// Registers a waker to be called when the tree requests a flush.
    pub fn set_frame_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.host.set_frame_waker(waker);
    }

    pub fn clear_frame_waker(&self) {
        self.host.clear_frame_waker();
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("host", &self.host)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use sprout_core::{Component, Element, MemoryBackend, Props, RenderCx};

    use super::StdRuntime;

    struct Counter {
        renders: Rc<Cell<u32>>,
    }

    impl Component for Counter {
        type State = i32;

        fn init_state(&self) -> i32 {
            0
        }

        fn render(&self, cx: &RenderCx<'_, i32>) -> anyhow::Result<Element> {
            self.renders.set(self.renders.get() + 1);
            let value = cx.read(|value| *value)?;
            Ok(Element::leaf("text", Props::new().with("value", value)))
        }
    }

    #[test]
    fn std_runtime_requests_flush_and_rebuilds_on_state_change() {
        let runtime = StdRuntime::new();
        let mut tree = runtime.tree(MemoryBackend::new());
        let renders = Rc::new(Cell::new(0u32));

        tree.mount(Element::component(Counter {
            renders: renders.clone(),
        }))
        .expect("initial mount");
        assert_eq!(renders.get(), 1);
        assert!(!runtime.take_flush_request());

        let root = tree.root().expect("root");
        let state = tree.state_handle::<i32>(root).expect("state handle");
        state.request_mutation(|value| *value = 1).expect("mutate");

        assert!(
            runtime.take_flush_request(),
            "a mutation should request a flush"
        );
        tree.flush().expect("flush");
        assert_eq!(renders.get(), 2, "the flush should rebuild the counter");
        assert_eq!(state.read(|value| *value), Ok(1));
    }

    #[test]
    fn frame_waker_fires_for_remote_mutations() {
        let runtime = StdRuntime::new();
        let wakes = Arc::new(AtomicUsize::new(0));
        runtime.set_frame_waker({
            let wakes = Arc::clone(&wakes);
            move || {
                wakes.fetch_add(1, Ordering::SeqCst);
            }
        });
        let mut tree = runtime.tree(MemoryBackend::new());
        tree.mount(Element::component(Counter {
            renders: Rc::default(),
        }))
        .expect("initial mount");
        let remote = tree
            .root()
            .and_then(|root| tree.state_handle::<i32>(root))
            .and_then(|state| state.remote())
            .expect("remote handle");

        std::thread::spawn(move || remote.request_mutation(|value| *value += 1))
            .join()
            .expect("worker thread")
            .expect("queued");

        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        assert!(runtime.take_flush_request());

        runtime.clear_frame_waker();
        assert_eq!(tree.drain_remote_mutations(), 1);
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        assert!(runtime.take_flush_request());
    }
}
