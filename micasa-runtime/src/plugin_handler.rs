//! The seam a concrete hardware integration implements.
//!
//! Mirrors the original `Hardware` base class's `start`/`stop`/`updateDevice`
//! trio: identity and lifecycle state live in [`micasa_core::plugin`], the
//! controller owns the device map and the store, and a `PluginHandler`
//! implementation is only ever asked to push a value out to real hardware or
//! react to its own lifecycle transitions. Concrete integrations (weather,
//! Z-Wave, serial, RFX, Harmony, ...) are out of scope for this crate; this
//! trait is the contract they'd implement against.

use async_trait::async_trait;

use micasa_core::device::DeviceValue;
use micasa_core::plugin::PluginState;

use crate::error::Result;

#[async_trait]
pub trait PluginHandler: Send + Sync {
    /// Called once, after settings are loaded and before the plugin's state
    /// moves past [`PluginState::Init`].
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Called during orderly shutdown, before the process exits.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Requests that the plugin push `value` out to the device it backs.
    /// Implementations call back into the controller with the device's
    /// observed value once the hardware confirms (or rejects) the change;
    /// this method itself only needs to start that exchange.
    async fn update_device(&self, device_reference: &str, value: &DeviceValue) -> Result<()>;

    /// The plugin's own view of its readiness. The controller polls this
    /// only to decide whether it's safe to start feeding devices again after
    /// a transient failure, not on every update.
    fn state(&self) -> PluginState {
        PluginState::Ready
    }
}
