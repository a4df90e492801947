//! Task orchestration: queue routing, the broker contract, the in-memory
//! broker and the worker pools that drain it.

/// Handles and the broker contract.
pub mod broker;
/// Worker layout knobs.
pub mod config;
pub mod job;
pub mod memory;
/// Dataset partitioning and queue names.
pub mod queue;
/// Kind-to-handler lookup.
pub mod registry;
/// Worker pools and their shutdown.
pub mod runtime;

pub use broker::*;
pub use config::*;
pub use job::*;
pub use memory::*;
pub use queue::*;
pub use registry::*;
pub use runtime::*;
