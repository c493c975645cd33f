//! A typed, write-deferred view over one [`SettingsScope`](micasa_store::SettingsScope)'s
//! key/value pairs.
//!
//! Mirrors the shape of a populate-once, dirty-tracked settings cache: reads
//! populate the in-memory map lazily from the store on first use, writes only
//! touch memory, and [`Settings::commit`] flushes the accumulated puts and
//! removes as a single batch.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use micasa_store::{SettingsScope, Store};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    Put(String),
    Remove,
}

struct Inner {
    values: HashMap<String, String>,
    populated: bool,
    dirty: HashMap<String, Pending>,
}

/// A lazily-populated, dirty-tracked view of one settings scope.
pub struct Settings {
    store: Arc<dyn Store>,
    scope: SettingsScope,
    inner: Mutex<Inner>,
}

impl Settings {
    pub fn new(store: Arc<dyn Store>, scope: SettingsScope) -> Self {
        Settings {
            store,
            scope,
            inner: Mutex::new(Inner {
                values: HashMap::new(),
                populated: false,
                dirty: HashMap::new(),
            }),
        }
    }

    async fn populate_once(&self) -> micasa_store::Result<()> {
        let needs_populate = { !self.inner.lock().populated };
        if needs_populate {
            let values = self.store.load_settings(self.scope).await?;
            let mut inner = self.inner.lock();
            if !inner.populated {
                inner.values = values;
                inner.populated = true;
            }
        }
        Ok(())
    }

    pub async fn contains(&self, key: &str) -> micasa_store::Result<bool> {
        self.populate_once().await?;
        Ok(self.inner.lock().values.contains_key(key))
    }

    pub async fn get_string(&self, key: &str) -> micasa_store::Result<Option<String>> {
        self.populate_once().await?;
        Ok(self.inner.lock().values.get(key).cloned())
    }

    /// Parses the raw string value as `V`, falling back to `default` if the
    /// key is absent or fails to parse.
    pub async fn get_or<V>(&self, key: &str, default: V) -> micasa_store::Result<V>
    where
        V: FromStr,
    {
        Ok(self
            .get_string(key)
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(default))
    }

    /// Stages `key = value` in memory; call [`Settings::commit`] to persist.
    pub fn put(&self, key: &str, value: impl Into<String>) {
        let mut inner = self.inner.lock();
        let value = value.into();
        inner.values.insert(key.to_string(), value.clone());
        inner.dirty.insert(key.to_string(), Pending::Put(value));
    }

    /// Stages removal of `key`; call [`Settings::commit`] to persist.
    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.values.remove(key);
        inner.dirty.insert(key.to_string(), Pending::Remove);
    }

    pub fn is_dirty(&self) -> bool {
        !self.inner.lock().dirty.is_empty()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().values.len()
    }

    pub fn all(&self) -> HashMap<String, String> {
        self.inner.lock().values.clone()
    }

    /// Stages every `(key, value)` pair as a put, overwriting whatever is
    /// already there. The batch counterpart to repeated [`Settings::put`]
    /// calls (spec §4.1 `insert(vector<kv>)`).
    pub fn insert<I>(&self, pairs: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in pairs {
            self.put(&key, value);
        }
    }

    /// Applies a device/plugin's declared settings with redeclare-safe
    /// merge semantics (spec §4.1, §4.5): keys beginning with `_` are
    /// reserved for the system and always overwrite the current value, even
    /// on a redeclare of something that already exists; every other key is
    /// only set if it is currently absent, so a user's prior edit survives
    /// a plugin re-announcing its defaults.
    pub async fn apply_declared<I>(&self, pairs: I) -> micasa_store::Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.populate_once().await?;
        for (key, value) in pairs {
            if key.starts_with('_') || !self.inner.lock().values.contains_key(&key) {
                self.put(&key, value);
            }
        }
        Ok(())
    }

    /// Writes every pending put/remove to the store and clears the dirty
    /// set. A no-op if nothing changed since the last commit.
    pub async fn commit(&self) -> micasa_store::Result<()> {
        let pending = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.dirty)
        };
        for (key, change) in pending {
            match change {
                Pending::Put(value) => self.store.put_setting(self.scope, &key, &value).await?,
                Pending::Remove => self.store.delete_setting(self.scope, &key).await?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use micasa_store::SqliteStore;

    async fn store() -> Arc<dyn Store> {
        let store = SqliteStore::in_memory().await.unwrap();
        store.init().await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn put_then_get_without_commit_reads_back_from_memory() {
        let settings = Settings::new(store().await, SettingsScope::Global);
        settings.put("foo", "bar");
        assert_eq!(settings.get_string("foo").await.unwrap(), Some("bar".to_string()));
        assert!(settings.is_dirty());
    }

    #[tokio::test]
    async fn commit_clears_dirty_and_persists() {
        let store = store().await;
        let settings = Settings::new(store.clone(), SettingsScope::Global);
        settings.put("level", "7");
        settings.commit().await.unwrap();
        assert!(!settings.is_dirty());

        let reloaded = Settings::new(store, SettingsScope::Global);
        let value: i64 = reloaded.get_or("level", 0).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn apply_declared_keeps_user_edits_but_overwrites_system_keys() {
        let settings = Settings::new(store().await, SettingsScope::Global);
        settings.put("name", "kitchen light");
        settings.put("_version", "1");
        settings.commit().await.unwrap();

        let redeclared = Settings::new(settings.store.clone(), SettingsScope::Global);
        redeclared
            .apply_declared([
                ("name".to_string(), "default label".to_string()),
                ("_version".to_string(), "2".to_string()),
            ])
            .await
            .unwrap();

        assert_eq!(redeclared.get_string("name").await.unwrap(), Some("kitchen light".to_string()));
        assert_eq!(redeclared.get_string("_version").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn get_or_falls_back_on_missing_key() {
        let settings = Settings::new(store().await, SettingsScope::Global);
        let value: i64 = settings.get_or("missing", 42).await.unwrap();
        assert_eq!(value, 42);
    }
}
