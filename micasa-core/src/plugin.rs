//! The `Plugin` entity record (spec §3) — identity and lifecycle state.
//!
//! A `Plugin` in this core crate is a passive data record; the behavior
//! (`start`/`stop`/`updateDevice`) lives one layer up, in `micasa-runtime`,
//! where it can hold a device map and talk to the store. This mirrors how
//! `kube-core::Resource` only describes identity while `kube-runtime`
//! supplies the reconciling behavior.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a plugin (spec §3, §4.5).
///
/// Ordering matters: `state >= READY` gates rate limiting, duplicate
/// suppression and event firing in the update pipeline, so the discriminants
/// are chosen to put `READY`/`SLEEPING` above every "not yet/no longer able
/// to exchange updates" state, exactly as the original `Hardware::State`
/// enum orders `READY = 100` above the low initial states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum PluginState {
    Disabled = 1,
    Init = 2,
    Failed = 3,
    Disconnected = 4,
    Ready = 100,
    Sleeping = 101,
}

impl PluginState {
    /// Whether updates through this plugin should be rate-limited,
    /// duplicate-suppressed and event-fired (spec §4.4).
    pub fn is_ready_or_above(self) -> bool {
        self >= PluginState::Ready
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::Disabled => "disabled",
            PluginState::Init => "init",
            PluginState::Failed => "failed",
            PluginState::Disconnected => "disconnected",
            PluginState::Ready => "ready",
            PluginState::Sleeping => "sleeping",
        };
        f.write_str(s)
    }
}

/// An open, string-backed tag identifying which concrete integration a
/// plugin is. Concrete plugin implementations (weather, Z-Wave, serial,
/// RFX, Harmony, ...) are external collaborators (spec §1) the core never
/// enumerates, so this is not a closed Rust enum the way `PluginState` is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginType(pub Cow<'static, str>);

impl PluginType {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        PluginType(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Well-known plugin type used internally by the rule engine to observe
/// switch devices it does not own (spec §4.4 step 6: "every other plugin
/// with `owned=false`").
pub const PLUGIN_TYPE_RULES: &str = "rules";
/// Built-in diagnostic/self-test plugin type, useful in development and
/// integration tests.
pub const PLUGIN_TYPE_SYSTEM: &str = "system";

/// A plugin row (spec §3, Entity: Plugin).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: i64,
    pub reference: String,
    pub plugin_type: PluginType,
    pub parent_id: Option<i64>,
    pub state: PluginState,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_and_sleeping_are_ready_or_above() {
        assert!(PluginState::Ready.is_ready_or_above());
        assert!(PluginState::Sleeping.is_ready_or_above());
        assert!(!PluginState::Init.is_ready_or_above());
        assert!(!PluginState::Failed.is_ready_or_above());
        assert!(!PluginState::Disconnected.is_ready_or_above());
        assert!(!PluginState::Disabled.is_ready_or_above());
    }
}
