//! scroll-virtualizer: visibility-driven virtualization for long documents.
//!
//! Keeps a continuously growing document responsive by evicting the content
//! of off-screen blocks into an off-tree cache, pinning each block to its
//! measured height so layout never shifts, and restoring the content
//! losslessly when the block scrolls back within the buffer distance.
//!
//! The host tree, visibility signals and stats display are external; see
//! [`host`] for the capabilities the engine consumes.

pub mod config;
pub mod host;
pub mod lifecycle;
pub mod metrics;
pub mod runtime;
pub mod virtualize;

pub use config::{ConfigChange, EngineConfig, Settings};
pub use host::{BlockId, MutationRecord, StatsSnapshot, VisibilityEntry};
pub use lifecycle::{Engine, EngineEvent, LifecycleState};
