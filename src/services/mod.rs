//! Synchronization engine services.

pub mod field_cache;
pub mod grouping;
pub mod link_codec;
pub mod lookup_cache;
pub mod orchestrator;
pub mod reconcile;
