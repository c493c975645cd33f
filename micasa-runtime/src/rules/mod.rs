//! The rule engine: cron timers, value-driven links and the script runner.
//! Cron parsing itself lives in `micasa-core` since it needs no I/O; this
//! module is the part that actually fires things.

pub mod script_runner;
pub mod task_options;

pub use script_runner::ScriptRunner;
pub use task_options::{plan, PlannedUpdate, TaskOptions};
