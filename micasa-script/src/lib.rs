//! The rule engine's embedded script host, treated as a black-box sandbox
//! by every other crate: load source, bind one payload global, run, and
//! classify the result as ok, a user-thrown exception, or a syntax/internal
//! interpreter error.

pub mod host;
pub mod rhai_host;

pub use host::{HostCallbacks, RunOutcome, RunResult, ScriptHost};
pub use rhai_host::RhaiEngine;
