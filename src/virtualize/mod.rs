//! Visibility-driven virtualization core.
//!
//! This module contains the data structures and algorithms behind eviction
//! and restoration:
//! - [`cache`]: EvictionCache holding detached content and recorded heights
//! - [`classifier`]: protected-set policy and per-batch classification
//! - [`registry`]: blocks subscribed to visibility signals
//! - [`controller`]: applies batch decisions to the host tree
//! - [`debounce`]: trailing-edge timers for stats and navigation

pub mod cache;
pub mod classifier;
pub mod controller;
pub mod debounce;
pub mod registry;
