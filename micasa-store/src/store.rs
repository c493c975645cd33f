//! The narrow query interface the rest of Micasa is allowed to depend on.
//!
//! Per spec §9 ("Database concurrency"): the core expects a single-writer /
//! multiple-reader serialization from the store itself and issues queries
//! freely from scheduler workers. Nothing above this trait writes SQL.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use micasa_core::device::DeviceKind;
use micasa_core::plugin::PluginType;
use micasa_core::rules::{Link, Script, Timer, TimerDevice};

use crate::error::Result;

/// A plugin row as persisted (spec §6) — lifecycle `state` is deliberately
/// absent: it is runtime-only and always re-initialized to `Init` on boot
/// (mirrors `original_source/src/Hardware.h`, where `m_state` has no
/// backing column).
#[derive(Debug, Clone, PartialEq)]
pub struct PluginRow {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub reference: String,
    pub plugin_type: PluginType,
    pub enabled: bool,
}

/// A device row as persisted. Like `PluginRow`, the live `value` is not a
/// column here — it is reconstructed from the latest history row on load.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRow {
    pub id: i64,
    pub plugin_id: i64,
    pub reference: String,
    pub label: String,
    pub name: Option<String>,
    pub kind: DeviceKind,
    pub enabled: bool,
}

/// A scope a settings key/value pair belongs to (spec §4.1 — "A process-wide
/// Settings instance (no entity) uses a singleton table").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsScope {
    Global,
    Plugin(i64),
    Device(i64),
    User(i64),
}

/// One row of a `getData` query result (spec §4.8): history rows carry only
/// `value`; trend rows additionally carry `minimum`/`maximum`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

/// Grouping granularity for `getData` (spec §4.8). Counter excludes
/// `FiveMin`; Switch/Text ignore grouping entirely and always return raw
/// rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataGroup {
    FiveMin,
    Hour,
    Day,
    Month,
    Year,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Creates the schema if it does not already exist.
    async fn init(&self) -> Result<()>;

    // -- plugins --------------------------------------------------------
    async fn insert_plugin(
        &self,
        reference: &str,
        plugin_type: &PluginType,
        parent_id: Option<i64>,
    ) -> Result<PluginRow>;
    /// All plugins, ordered by `id ASC` so parents (lower id) load before
    /// their children (spec §4.6 step 1).
    async fn list_plugins(&self) -> Result<Vec<PluginRow>>;
    async fn get_plugin_by_reference(&self, reference: &str) -> Result<Option<PluginRow>>;
    async fn set_plugin_enabled(&self, plugin_id: i64, enabled: bool) -> Result<()>;
    async fn delete_plugin(&self, plugin_id: i64) -> Result<()>;

    // -- devices ----------------------------------------------------------
    async fn insert_device(
        &self,
        plugin_id: i64,
        reference: &str,
        label: &str,
        kind: DeviceKind,
    ) -> Result<DeviceRow>;
    async fn get_device(&self, device_id: i64) -> Result<Option<DeviceRow>>;
    async fn get_device_by_reference(
        &self,
        plugin_id: i64,
        reference: &str,
    ) -> Result<Option<DeviceRow>>;
    async fn get_device_by_name(&self, plugin_id: i64, name: &str) -> Result<Option<DeviceRow>>;
    async fn get_device_by_label(&self, plugin_id: i64, label: &str) -> Result<Option<DeviceRow>>;
    async fn list_devices_for_plugin(&self, plugin_id: i64) -> Result<Vec<DeviceRow>>;
    async fn set_device_name(&self, device_id: i64, name: Option<&str>) -> Result<()>;
    async fn set_device_enabled(&self, device_id: i64, enabled: bool) -> Result<()>;
    async fn delete_device(&self, device_id: i64) -> Result<()>;

    // -- settings ---------------------------------------------------------
    async fn load_settings(&self, scope: SettingsScope) -> Result<HashMap<String, String>>;
    async fn put_setting(&self, scope: SettingsScope, key: &str, value: &str) -> Result<()>;
    async fn delete_setting(&self, scope: SettingsScope, key: &str) -> Result<()>;

    // -- history: switch / text (raw append) ------------------------------
    async fn insert_switch_history(
        &self,
        device_id: i64,
        value: &str,
        when: DateTime<Utc>,
    ) -> Result<()>;
    async fn insert_text_history(
        &self,
        device_id: i64,
        value: &str,
        when: DateTime<Utc>,
    ) -> Result<()>;
    async fn latest_switch_value(&self, device_id: i64) -> Result<Option<(String, DateTime<Utc>)>>;
    async fn latest_text_value(&self, device_id: i64) -> Result<Option<(String, DateTime<Utc>)>>;

    // -- history: counter (raw append + hourly trend) ---------------------
    async fn insert_counter_history(
        &self,
        device_id: i64,
        value: i64,
        when: DateTime<Utc>,
    ) -> Result<()>;
    async fn latest_counter_value(&self, device_id: i64) -> Result<Option<(i64, DateTime<Utc>)>>;
    async fn upsert_counter_trend(
        &self,
        device_id: i64,
        hour: DateTime<Utc>,
        last: i64,
        diff: i64,
    ) -> Result<()>;
    async fn counter_min_max_in_range(
        &self,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<(i64, i64)>>;

    // -- history: level (5-min running-average bucket + hourly trend) -----
    /// Folds `value` into the 5-minute bucket containing `when`, computing
    /// the running average in place (spec §4.4/§4.8): `new = (old*samples +
    /// value)/(samples+1)`.
    async fn fold_level_sample(&self, device_id: i64, when: DateTime<Utc>, value: f64) -> Result<()>;
    async fn latest_level_value(&self, device_id: i64) -> Result<Option<(f64, DateTime<Utc>)>>;
    async fn upsert_level_trend(
        &self,
        device_id: i64,
        hour: DateTime<Utc>,
        min: f64,
        max: f64,
        average: f64,
    ) -> Result<()>;
    async fn level_history_in_range(
        &self,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DataRow>>;

    // -- generic query / retention -----------------------------------------
    async fn query_history(
        &self,
        device_id: i64,
        kind: DeviceKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group: Option<DataGroup>,
    ) -> Result<Vec<DataRow>>;
    async fn query_trends(
        &self,
        device_id: i64,
        kind: DeviceKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DataRow>>;
    async fn delete_history_older_than(
        &self,
        device_id: i64,
        kind: DeviceKind,
        cutoff: DateTime<Utc>,
    ) -> Result<()>;
    async fn delete_trends_older_than(&self, device_id: i64, cutoff: DateTime<Utc>) -> Result<()>;

    // -- scripts ------------------------------------------------------------
    async fn insert_script(&self, name: &str, code: &str) -> Result<Script>;
    async fn get_script_by_name(&self, name: &str) -> Result<Option<Script>>;
    async fn list_enabled_scripts(&self) -> Result<Vec<Script>>;
    async fn set_script_enabled(&self, script_id: i64, enabled: bool) -> Result<()>;
    async fn scripts_for_device(&self, device_id: i64) -> Result<Vec<Script>>;
    async fn scripts_for_timer(&self, timer_id: i64) -> Result<Vec<Script>>;

    // -- timers ---------------------------------------------------------------
    async fn insert_timer(&self, name: &str, cron: &str) -> Result<Timer>;
    async fn list_enabled_timers(&self) -> Result<Vec<Timer>>;
    async fn set_timer_enabled(&self, timer_id: i64, enabled: bool) -> Result<()>;
    async fn devices_for_timer(&self, timer_id: i64) -> Result<Vec<TimerDevice>>;

    // -- links ------------------------------------------------------------------
    async fn insert_link(&self, link: &Link) -> Result<Link>;
    async fn links_for_source_device(&self, device_id: i64) -> Result<Vec<Link>>;
}
