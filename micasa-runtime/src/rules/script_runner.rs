//! Runs a batch of scripts against one event/timer payload, per spec
//! §4.7.5: load `userdata` once, run every script against the same
//! binding, persist `userdata` once at the end.

use std::sync::Arc;

use micasa_script::{HostCallbacks, RunOutcome, ScriptHost};
use micasa_store::{SettingsScope, Store};
use serde_json::Value;

use crate::error::Result;
use crate::settings::Settings;

const USERDATA_KEY: &str = "userdata";

pub struct ScriptRunner {
    host: Arc<dyn ScriptHost>,
    store: Arc<dyn Store>,
}

impl ScriptRunner {
    pub fn new(host: Arc<dyn ScriptHost>, store: Arc<dyn Store>) -> Self {
        ScriptRunner { host, store }
    }

    /// Runs every script in `scripts`, binding `binding_name` to `payload`
    /// for each. Any script whose run ends in a syntax/internal error is
    /// disabled in the store; a user-thrown exception is logged and the
    /// script stays enabled.
    pub async fn run_batch(
        &self,
        scripts: &[micasa_core::rules::Script],
        binding_name: &str,
        payload: Value,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Result<()> {
        if scripts.is_empty() {
            return Ok(());
        }

        let global = Settings::new(self.store.clone(), SettingsScope::Global);
        let mut userdata: Value = global
            .get_string(USERDATA_KEY)
            .await?
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| serde_json::json!({}));

        for script in scripts {
            let result = self
                .host
                .run(&script.code, binding_name, payload.clone(), userdata, callbacks.clone())
                .await;
            userdata = result.userdata;

            match result.outcome {
                RunOutcome::Ok => {}
                RunOutcome::UserError(message) => {
                    tracing::warn!(script = %script.name, error = %message, "script threw");
                }
                RunOutcome::InterpreterError(message) => {
                    tracing::error!(script = %script.name, error = %message, "script disabled after interpreter error");
                    self.store.set_script_enabled(script.id, false).await?;
                }
            }
        }

        global.put(USERDATA_KEY, serde_json::to_string(&userdata).unwrap_or_default());
        global.commit().await?;
        Ok(())
    }
}
