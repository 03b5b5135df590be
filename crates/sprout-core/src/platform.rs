//! Host hooks for the dirty scheduler.
//!
//! The core never drives its own frame loop. It tells the host that work is
//! pending and the host calls `Tree::flush` once per rendering tick.

/// Receives flush requests from the dirty scheduler.
///
/// Implementations must be cheap to call repeatedly; the scheduler only
/// requests a flush when its dirty set goes from empty to non-empty, but
/// hosts may see requests from several trees.
pub trait FlushScheduler: Send + Sync {
    /// Ask the host to call flush at its next tick boundary.
    fn schedule_flush(&self);
}

/// Scheduler that ignores flush requests. Hosts that poll
/// `Tree::needs_flush` every tick need nothing more.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultScheduler;

impl FlushScheduler for DefaultScheduler {
    fn schedule_flush(&self) {}
}
