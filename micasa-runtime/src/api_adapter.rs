//! The narrow interface an HTTP/API layer calls into (spec §1, §6: "API
//! adapter surface ... narrow interface the HTTP layer calls into, listed
//! only as §6 contracts"). Nothing here talks to a socket or a JSON codec —
//! that is the transport's job and stays out of scope; this trait is just
//! the seam it would call through to reach the controller, the same way
//! [`HostCallbacks`](micasa_script::HostCallbacks) is the seam the script
//! host calls through.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use micasa_core::device::DeviceKind;
use micasa_store::{DataGroup, DataRow};

use crate::error::Result;

#[async_trait]
pub trait ApiAdapter: Send + Sync {
    /// One device's JSON representation, resolved by id, name, or label.
    /// `None` if the selector doesn't resolve (spec's NotFound policy:
    /// callers get null, never a thrown error).
    async fn get_device(&self, selector: &str) -> Option<serde_json::Value>;

    /// Every known device's JSON representation.
    async fn list_devices(&self) -> Vec<serde_json::Value>;

    /// Pushes a new value at a device with `source = API` — the REST/HTTPS
    /// layer is one of the five sources the update pipeline accepts.
    /// `options` is the same free-form task-options grammar scripts use
    /// (spec §4.7.4).
    async fn update_device(&self, selector: &str, raw_value: &str, options: &str) -> Result<()>;

    async fn set_device_enabled(&self, device_id: i64, enabled: bool) -> Result<()>;
    async fn set_device_name(&self, device_id: i64, name: Option<&str>) -> Result<()>;

    /// `getSettingsJson` (spec §4.5) for one device.
    async fn get_device_settings(&self, device_id: i64) -> Result<serde_json::Value>;
    /// `putSettingsJson` (spec §4.5) for one device.
    async fn put_device_settings(&self, device_id: i64, settings: HashMap<String, String>) -> Result<()>;

    /// Every known plugin's JSON representation (row + live lifecycle state).
    async fn list_plugins(&self) -> Vec<serde_json::Value>;
    async fn set_plugin_enabled(&self, plugin_id: i64, enabled: bool) -> Result<()>;
    async fn get_plugin_settings(&self, plugin_id: i64) -> Result<serde_json::Value>;
    async fn put_plugin_settings(&self, plugin_id: i64, settings: HashMap<String, String>) -> Result<()>;

    /// `getData` (spec §4.8) raw history rows for one device.
    async fn device_history(
        &self,
        device_id: i64,
        kind: DeviceKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group: Option<DataGroup>,
    ) -> Result<Vec<DataRow>>;

    /// `getData` aggregated trend rows for one device.
    async fn device_trends(
        &self,
        device_id: i64,
        kind: DeviceKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DataRow>>;
}
