//! The four device kinds and the value union that ties them together.
//!
//! Per Design Note (spec §9): "dynamic dispatch on device type" is
//! implemented as a tagged variant, not a subclass hierarchy. [`DeviceValue`]
//! is that tag; the update pipeline and plugin trait both branch on it.

pub mod counter;
pub mod level;
pub mod switch;
pub mod text;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::update_source::UpdateSource;
use counter::CounterSubType;
use level::{LevelRange, LevelSubType};
use switch::{SwitchOption, SwitchSubType};
use text::TextSubType;

/// The closed set of device kinds (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Switch,
    Level,
    Counter,
    Text,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Switch => "switch",
            DeviceKind::Level => "level",
            DeviceKind::Counter => "counter",
            DeviceKind::Text => "text",
        }
    }
}

/// A value carried by a device, tagged by kind.
///
/// `PartialEq` backs the duplicate-suppression gate (`ignore_duplicates`,
/// spec §4.4 step 3) and round-trips through the wire form each device kind
/// uses for its history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum DeviceValue {
    Switch(SwitchOption),
    Level(f64),
    Counter(i64),
    Text(String),
}

impl DeviceValue {
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceValue::Switch(_) => DeviceKind::Switch,
            DeviceValue::Level(_) => DeviceKind::Level,
            DeviceValue::Counter(_) => DeviceKind::Counter,
            DeviceValue::Text(_) => DeviceKind::Text,
        }
    }

    /// The textual form written to the per-kind history table.
    pub fn to_history_string(&self) -> String {
        match self {
            DeviceValue::Switch(opt) => opt.as_str().to_string(),
            DeviceValue::Level(v) => v.to_string(),
            DeviceValue::Counter(v) => v.to_string(),
            DeviceValue::Text(s) => s.clone(),
        }
    }
}

/// Per-kind sub-type tag, stored as a device setting (`subtype`) but typed
/// here so pipeline code doesn't need to stringly-type it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceSubType {
    Switch(SwitchSubType),
    Level(LevelSubType),
    Counter(CounterSubType),
    Text(TextSubType),
}

/// Settings consulted directly by the update pipeline (spec §3, "Per-device
/// settings"). Backed by the generic [`Settings`](crate) bag one layer up;
/// this is just the typed projection the pipeline actually branches on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub allowed_update_sources: Option<UpdateSource>,
    pub minimum_user_rights: Option<u8>,
    pub ignore_duplicates: bool,
    /// Rate-limit window, in seconds.
    pub rate_limit: Option<f64>,
    /// History retention, in days.
    pub history_retention: Option<u32>,
    /// Trend retention, in months (Level only).
    pub trends_retention: Option<u32>,
    pub default_subtype: Option<String>,
    pub default_unit: Option<String>,
    pub battery_level: Option<u8>,
    pub signal_strength: Option<u8>,
    pub level_range: LevelRange,
}

/// A device: identity, owning plugin, current/previous value, and the
/// bookkeeping the pipeline needs (spec §3, Entity: Device).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub plugin_id: i64,
    pub reference: String,
    pub label: String,
    /// Settable override of `label`; falls back to `label` when unset.
    pub name: Option<String>,
    /// Fixed at declaration time (spec §3); does not depend on whether the
    /// device has received a value yet.
    pub kind: DeviceKind,
    pub enabled: bool,
    pub value: Option<DeviceValue>,
    pub previous_value: Option<DeviceValue>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_source: Option<UpdateSource>,
    pub settings: DeviceSettings,
}

impl Device {
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// The name shown to callers: `name` if set, else `label`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_to_label() {
        let device = Device {
            id: 1,
            plugin_id: 1,
            reference: "ref".into(),
            label: "Hallway Light".into(),
            name: None,
            kind: DeviceKind::Switch,
            enabled: true,
            value: None,
            previous_value: None,
            last_updated: None,
            last_source: None,
            settings: DeviceSettings::default(),
        };
        assert_eq!(device.display_name(), "Hallway Light");
    }

    #[test]
    fn duplicate_gate_compares_by_value_equality() {
        let a = DeviceValue::Switch(SwitchOption::On);
        let b = DeviceValue::Switch(SwitchOption::On);
        let c = DeviceValue::Switch(SwitchOption::Off);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
