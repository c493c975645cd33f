//! SQLite-backed persistence behind the narrow [`Store`] interface.
//!
//! Nothing outside this crate should depend on `sqlx` directly — every other
//! crate in the workspace talks to the store through [`Store`] so the
//! backing engine stays swappable.

pub mod error;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use error::{Error, Result};
pub use sqlite::SqliteStore;
pub use store::{DataGroup, DataRow, DeviceRow, PluginRow, SettingsScope, Store};
