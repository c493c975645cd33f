//! Shared entity types and client-less behavior for Micasa.
//!
//! This crate has no knowledge of storage, scheduling or scripting — it is
//! the tagged-variant data model (spec §3) plus the bits of validation logic
//! (cron parsing, switch opposites, level range clamping) that don't need
//! any of those. `micasa-runtime` builds the actual controller on top of it.

pub mod device;
pub mod error;
pub mod plugin;
pub mod rules;
pub mod update_source;

pub use error::{Error, Result};
pub use update_source::UpdateSource;
