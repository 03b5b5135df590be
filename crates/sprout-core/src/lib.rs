#![doc = r"Reconciliation core for the Sprout declarative UI experiment."]

mod collections;
pub mod element;
pub mod error;
pub mod handle;
mod hash;
pub mod options;
pub mod platform;
pub mod props;
pub mod render;
pub mod scheduler;
pub mod tree;

pub use element::{Component, ComponentType, Element, Fallback, HostTag, Key, Kind, RenderCx};
pub use error::{FlushError, MutationError, ProducerError};
pub use handle::{request_mutation, RemoteHandle, StateHandle};
pub use options::TreeOptions;
pub use platform::{DefaultScheduler, FlushScheduler};
pub use props::{PropValue, Props};
pub use render::{
    Backend, BackendOp, MemoryBackend, Rect, RecordingObject, RenderId, RenderNode, RenderObject,
    RenderTree,
};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use tree::{FlushReport, Tree};

slotmap::new_key_type! {
    /// Generational id of a reconciliation node. A destroyed node's id never
    /// resolves again, even after its slot is reused.
    pub struct NodeId;
}

#[cfg(test)]
#[path = "tests/tree_tests.rs"]
mod tree_tests;

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod scheduler_tests;

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod render_tests;
