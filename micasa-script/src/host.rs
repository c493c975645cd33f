//! The narrow seam between the rule engine and whatever interpreter runs
//! user scripts. Callers treat the interpreter as a black box: load source,
//! bind one payload global, run, and classify the result.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Host-side operations a running script can trigger. Implemented by the
/// controller, which owns the device map and the script table.
#[async_trait]
pub trait HostCallbacks: Send + Sync {
    /// `selector` may be a numeric id, a device name, or a device label.
    /// `options` is the raw, unparsed task-options string.
    async fn update_device(&self, selector: &str, raw_value: &str, options: &str) -> Result<(), String>;

    /// The device's JSON representation, or `None` if the selector doesn't
    /// resolve to anything (per spec: missing reference yields null, not an
    /// error).
    async fn get_device_json(&self, selector: &str) -> Option<Value>;

    /// The source of another enabled script by name, for `include()`.
    /// `None` if no such enabled script exists.
    async fn include_script(&self, name: &str) -> Option<String>;

    /// Emits one log line at the dedicated SCRIPT level.
    fn log(&self, message: &str);
}

/// How a script invocation ended, per the error-classification contract:
/// a script that throws a user-level exception stays enabled and is just
/// logged; a syntax or internal interpreter error gets the script disabled.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Ok,
    UserError(String),
    InterpreterError(String),
}

impl RunOutcome {
    pub fn should_disable_script(&self) -> bool {
        matches!(self, RunOutcome::InterpreterError(_))
    }
}

/// One script invocation's result: how it ended plus the `userdata` bag as
/// it stood when execution finished (unchanged on a syntax/internal error,
/// since the script never really ran).
pub struct RunResult {
    pub outcome: RunOutcome,
    pub userdata: Value,
}

#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Runs `code` with `binding_name` (`"event"` or `"timer"`) bound to
    /// `payload`, and `userdata` available as a read/write global bag.
    async fn run(
        &self,
        code: &str,
        binding_name: &str,
        payload: Value,
        userdata: Value,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> RunResult;
}
