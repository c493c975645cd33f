//! Rule-engine entities: scripts, cron timers and value-driven links
//! (spec §3, §4.7).

pub mod cron;

use serde::{Deserialize, Serialize};

use crate::device::DeviceValue;

/// A user script (spec §3, Entity: Script).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub enabled: bool,
}

/// A cron-driven rule (spec §3, Entity: Timer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timer {
    pub id: i64,
    pub name: String,
    pub cron: String,
    pub enabled: bool,
}

/// A device this timer drives to `target_value` when it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerDevice {
    pub timer_id: i64,
    pub device_id: i64,
    pub target_value: String,
}

/// A value-to-value rule between two devices (spec §3, Entity: Link).
///
/// Links only trigger for Switch source devices (spec §4.7.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub device_id: i64,
    pub target_device_id: i64,
    pub value: DeviceValue,
    pub target_value: DeviceValue,
    pub after: Option<f64>,
    pub for_seconds: Option<f64>,
    pub clear: bool,
    pub enabled: bool,
}
