//! THE CORE: scheduler, pending-update rendezvous, settings, the device
//! update pipeline, plugin lifecycle bookkeeping, the controller and the
//! rule engine (timers, links, task-options, scripts).
//!
//! Depends on `micasa-core` for the data model, `micasa-store` for
//! persistence and `micasa-script` for the embedded rule interpreter;
//! nothing above this crate talks to those directly.

pub mod api_adapter;
pub mod controller;
pub mod error;
pub mod pending;
pub mod pipeline;
pub mod plugin_handler;
pub mod rules;
pub mod scheduler;
pub mod settings;

pub use api_adapter::ApiAdapter;
pub use controller::Controller;
pub use error::{Error, Result};
pub use pending::{PendingEntry, PendingUpdates};
pub use plugin_handler::PluginHandler;
pub use scheduler::{Owner, Repeat, Scheduler, TaskHandle, TaskId};
pub use settings::Settings;
