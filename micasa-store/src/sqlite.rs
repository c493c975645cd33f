//! The `sqlx`-backed [`Store`] implementation.
//!
//! Queries are issued with the runtime `sqlx::query`/`query_as` calls rather
//! than the compile-time-checked `query!` macros: the macros need a live
//! database reachable at compile time, which this crate deliberately doesn't
//! assume (mirrors the rest of the workspace's preference for keeping build
//! steps hermetic).

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use micasa_core::device::DeviceKind;
use micasa_core::plugin::PluginType;
use micasa_core::rules::{Link, Script, Timer, TimerDevice};

use crate::error::{Error, Result};
use crate::schema::CREATE_TABLES;
use crate::store::{DataGroup, DataRow, DeviceRow, PluginRow, SettingsScope, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if absent) the SQLite file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Ok(SqliteStore { pool })
    }

    /// An in-process, non-durable store. Used by tests across the workspace
    /// and by `micasa --ephemeral`-style dry runs.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(SqliteStore { pool })
    }
}

fn device_kind_to_i64(kind: DeviceKind) -> i64 {
    match kind {
        DeviceKind::Switch => 0,
        DeviceKind::Level => 1,
        DeviceKind::Counter => 2,
        DeviceKind::Text => 3,
    }
}

fn device_kind_from_i64(raw: i64, context: &str) -> Result<DeviceKind> {
    match raw {
        0 => Ok(DeviceKind::Switch),
        1 => Ok(DeviceKind::Level),
        2 => Ok(DeviceKind::Counter),
        3 => Ok(DeviceKind::Text),
        other => Err(Error::InvalidResult(
            context.to_string(),
            format!("unknown device kind discriminant {other}"),
        )),
    }
}

fn settings_table(scope: SettingsScope) -> &'static str {
    match scope {
        SettingsScope::Global => "settings",
        SettingsScope::Plugin(_) => "plugin_settings",
        SettingsScope::Device(_) => "device_settings",
        SettingsScope::User(_) => "user_settings",
    }
}

fn settings_entity_column(scope: SettingsScope) -> Option<&'static str> {
    match scope {
        SettingsScope::Global => None,
        SettingsScope::Plugin(_) => Some("plugin_id"),
        SettingsScope::Device(_) => Some("device_id"),
        SettingsScope::User(_) => Some("user_id"),
    }
}

fn settings_entity_id(scope: SettingsScope) -> Option<i64> {
    match scope {
        SettingsScope::Global => None,
        SettingsScope::Plugin(id) | SettingsScope::Device(id) | SettingsScope::User(id) => {
            Some(id)
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn init(&self) -> Result<()> {
        for ddl in CREATE_TABLES {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    // -- plugins ------------------------------------------------------------

    async fn insert_plugin(
        &self,
        reference: &str,
        plugin_type: &PluginType,
        parent_id: Option<i64>,
    ) -> Result<PluginRow> {
        let id = sqlx::query(
            "INSERT INTO plugins (parent_id, reference, type, enabled) VALUES (?, ?, ?, 1)",
        )
        .bind(parent_id)
        .bind(reference)
        .bind(plugin_type.as_str())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(PluginRow {
            id,
            parent_id,
            reference: reference.to_string(),
            plugin_type: plugin_type.clone(),
            enabled: true,
        })
    }

    async fn list_plugins(&self) -> Result<Vec<PluginRow>> {
        let rows = sqlx::query("SELECT id, parent_id, reference, type, enabled FROM plugins ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(PluginRow {
                    id: row.try_get("id")?,
                    parent_id: row.try_get("parent_id")?,
                    reference: row.try_get("reference")?,
                    plugin_type: PluginType::new(row.try_get::<String, _>("type")?),
                    enabled: row.try_get::<i64, _>("enabled")? != 0,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(Error::from)
    }

    async fn get_plugin_by_reference(&self, reference: &str) -> Result<Option<PluginRow>> {
        let row = sqlx::query("SELECT id, parent_id, reference, type, enabled FROM plugins WHERE reference = ?")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(PluginRow {
                id: row.try_get("id")?,
                parent_id: row.try_get("parent_id")?,
                reference: row.try_get("reference")?,
                plugin_type: PluginType::new(row.try_get::<String, _>("type")?),
                enabled: row.try_get::<i64, _>("enabled")? != 0,
            }),
            None => None,
        })
    }

    async fn set_plugin_enabled(&self, plugin_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE plugins SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(plugin_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_plugin(&self, plugin_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM plugins WHERE id = ?")
            .bind(plugin_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- devices --------------------------------------------------------------

    async fn insert_device(
        &self,
        plugin_id: i64,
        reference: &str,
        label: &str,
        kind: DeviceKind,
    ) -> Result<DeviceRow> {
        let id = sqlx::query(
            "INSERT INTO devices (plugin_id, reference, label, type, enabled) VALUES (?, ?, ?, ?, 1)",
        )
        .bind(plugin_id)
        .bind(reference)
        .bind(label)
        .bind(device_kind_to_i64(kind))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(DeviceRow {
            id,
            plugin_id,
            reference: reference.to_string(),
            label: label.to_string(),
            name: None,
            kind,
            enabled: true,
        })
    }

    async fn get_device(&self, device_id: i64) -> Result<Option<DeviceRow>> {
        let row = sqlx::query(
            "SELECT id, plugin_id, reference, label, name, type, enabled FROM devices WHERE id = ?",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| device_row_from_row(&row)).transpose()
    }

    async fn get_device_by_reference(
        &self,
        plugin_id: i64,
        reference: &str,
    ) -> Result<Option<DeviceRow>> {
        let row = sqlx::query(
            "SELECT id, plugin_id, reference, label, name, type, enabled FROM devices WHERE plugin_id = ? AND reference = ?",
        )
        .bind(plugin_id)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| device_row_from_row(&row)).transpose()
    }

    async fn get_device_by_name(&self, plugin_id: i64, name: &str) -> Result<Option<DeviceRow>> {
        let row = sqlx::query(
            "SELECT id, plugin_id, reference, label, name, type, enabled FROM devices WHERE plugin_id = ? AND name = ?",
        )
        .bind(plugin_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| device_row_from_row(&row)).transpose()
    }

    async fn get_device_by_label(&self, plugin_id: i64, label: &str) -> Result<Option<DeviceRow>> {
        let row = sqlx::query(
            "SELECT id, plugin_id, reference, label, name, type, enabled FROM devices WHERE plugin_id = ? AND label = ?",
        )
        .bind(plugin_id)
        .bind(label)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| device_row_from_row(&row)).transpose()
    }

    async fn list_devices_for_plugin(&self, plugin_id: i64) -> Result<Vec<DeviceRow>> {
        let rows = sqlx::query(
            "SELECT id, plugin_id, reference, label, name, type, enabled FROM devices WHERE plugin_id = ? ORDER BY id ASC",
        )
        .bind(plugin_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(device_row_from_row).collect()
    }

    async fn set_device_name(&self, device_id: i64, name: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE devices SET name = ? WHERE id = ?")
            .bind(name)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_device_enabled(&self, device_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE devices SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_device(&self, device_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- settings ---------------------------------------------------------------

    async fn load_settings(&self, scope: SettingsScope) -> Result<HashMap<String, String>> {
        let table = settings_table(scope);
        let rows = match settings_entity_column(scope) {
            Some(column) => {
                sqlx::query(&format!("SELECT key, value FROM {table} WHERE {column} = ?"))
                    .bind(settings_entity_id(scope))
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query(&format!("SELECT key, value FROM {table}"))
                .fetch_all(&self.pool)
                .await?,
        };
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            out.insert(row.try_get::<String, _>("key")?, row.try_get::<String, _>("value")?);
        }
        Ok(out)
    }

    async fn put_setting(&self, scope: SettingsScope, key: &str, value: &str) -> Result<()> {
        let table = settings_table(scope);
        match settings_entity_column(scope) {
            Some(column) => {
                sqlx::query(&format!(
                    "INSERT INTO {table} ({column}, key, value) VALUES (?, ?, ?) \
                     ON CONFLICT({column}, key) DO UPDATE SET value = excluded.value"
                ))
                .bind(settings_entity_id(scope))
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO settings (key, value) VALUES (?, ?) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                )
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn delete_setting(&self, scope: SettingsScope, key: &str) -> Result<()> {
        let table = settings_table(scope);
        match settings_entity_column(scope) {
            Some(column) => {
                sqlx::query(&format!("DELETE FROM {table} WHERE {column} = ? AND key = ?"))
                    .bind(settings_entity_id(scope))
                    .bind(key)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM settings WHERE key = ?")
                    .bind(key)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    // -- history: switch / text -----------------------------------------------

    async fn insert_switch_history(
        &self,
        device_id: i64,
        value: &str,
        when: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO device_switch_history (device_id, value, date) VALUES (?, ?, ?)")
            .bind(device_id)
            .bind(value)
            .bind(when)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_text_history(
        &self,
        device_id: i64,
        value: &str,
        when: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO device_text_history (device_id, value, date) VALUES (?, ?, ?)")
            .bind(device_id)
            .bind(value)
            .bind(when)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn latest_switch_value(&self, device_id: i64) -> Result<Option<(String, DateTime<Utc>)>> {
        let row = sqlx::query(
            "SELECT value, date FROM device_switch_history WHERE device_id = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| Ok((row.try_get("value")?, row.try_get("date")?)))
            .transpose()
    }

    async fn latest_text_value(&self, device_id: i64) -> Result<Option<(String, DateTime<Utc>)>> {
        let row = sqlx::query(
            "SELECT value, date FROM device_text_history WHERE device_id = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| Ok((row.try_get("value")?, row.try_get("date")?)))
            .transpose()
    }

    // -- history: counter -------------------------------------------------------

    async fn insert_counter_history(
        &self,
        device_id: i64,
        value: i64,
        when: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO device_counter_history (device_id, value, date) VALUES (?, ?, ?)")
            .bind(device_id)
            .bind(value)
            .bind(when)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn latest_counter_value(&self, device_id: i64) -> Result<Option<(i64, DateTime<Utc>)>> {
        let row = sqlx::query(
            "SELECT value, date FROM device_counter_history WHERE device_id = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| Ok((row.try_get("value")?, row.try_get("date")?)))
            .transpose()
    }

    async fn upsert_counter_trend(
        &self,
        device_id: i64,
        hour: DateTime<Utc>,
        last: i64,
        diff: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO device_counter_trends (device_id, date, last, diff) VALUES (?, ?, ?, ?) \
             ON CONFLICT(device_id, date) DO UPDATE SET last = excluded.last, diff = device_counter_trends.diff + excluded.diff",
        )
        .bind(device_id)
        .bind(hour)
        .bind(last)
        .bind(diff)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn counter_min_max_in_range(
        &self,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<(i64, i64)>> {
        let row = sqlx::query(
            "SELECT MIN(value) AS lo, MAX(value) AS hi FROM device_counter_history \
             WHERE device_id = ? AND date >= ? AND date < ?",
        )
        .bind(device_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        let lo: Option<i64> = row.try_get("lo")?;
        let hi: Option<i64> = row.try_get("hi")?;
        Ok(lo.zip(hi))
    }

    // -- history: level -----------------------------------------------------------

    async fn fold_level_sample(&self, device_id: i64, when: DateTime<Utc>, value: f64) -> Result<()> {
        let bucket = floor_to_five_minutes(when);
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query(
            "SELECT value, samples FROM device_level_history WHERE device_id = ? AND date = ?",
        )
        .bind(device_id)
        .bind(bucket)
        .fetch_optional(&mut *tx)
        .await?;

        let (new_value, new_samples) = match existing {
            Some(row) => {
                let old_value: f64 = row.try_get("value")?;
                let samples: i64 = row.try_get("samples")?;
                (
                    (old_value * samples as f64 + value) / (samples as f64 + 1.0),
                    samples + 1,
                )
            }
            None => (value, 1),
        };

        sqlx::query(
            "INSERT INTO device_level_history (device_id, date, value, samples) VALUES (?, ?, ?, ?) \
             ON CONFLICT(device_id, date) DO UPDATE SET value = excluded.value, samples = excluded.samples",
        )
        .bind(device_id)
        .bind(bucket)
        .bind(new_value)
        .bind(new_samples)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn latest_level_value(&self, device_id: i64) -> Result<Option<(f64, DateTime<Utc>)>> {
        let row = sqlx::query(
            "SELECT value, date FROM device_level_history WHERE device_id = ? ORDER BY date DESC LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| Ok((row.try_get("value")?, row.try_get("date")?)))
            .transpose()
    }

    async fn upsert_level_trend(
        &self,
        device_id: i64,
        hour: DateTime<Utc>,
        min: f64,
        max: f64,
        average: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO device_level_trends (device_id, date, min, max, average) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(device_id, date) DO UPDATE SET \
               min = MIN(device_level_trends.min, excluded.min), \
               max = MAX(device_level_trends.max, excluded.max), \
               average = excluded.average",
        )
        .bind(device_id)
        .bind(hour)
        .bind(min)
        .bind(max)
        .bind(average)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn level_history_in_range(
        &self,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DataRow>> {
        let rows = sqlx::query(
            "SELECT date, value FROM device_level_history WHERE device_id = ? AND date >= ? AND date < ? ORDER BY date ASC",
        )
        .bind(device_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(DataRow {
                    timestamp: row.try_get("date")?,
                    value: row.try_get("value")?,
                    minimum: None,
                    maximum: None,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(Error::from)
    }

    // -- generic query / retention --------------------------------------------------

    async fn query_history(
        &self,
        device_id: i64,
        kind: DeviceKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group: Option<DataGroup>,
    ) -> Result<Vec<DataRow>> {
        match kind {
            DeviceKind::Level => self.level_history_in_range(device_id, start, end).await,
            DeviceKind::Counter => {
                let strftime = match group {
                    Some(DataGroup::FiveMin) | None => "%Y-%m-%dT%H:%M",
                    Some(DataGroup::Hour) => "%Y-%m-%dT%H",
                    Some(DataGroup::Day) => "%Y-%m-%d",
                    Some(DataGroup::Month) => "%Y-%m",
                    Some(DataGroup::Year) => "%Y",
                };
                let rows = sqlx::query(&format!(
                    "SELECT strftime('{strftime}', date) AS bucket, MAX(value) AS value \
                     FROM device_counter_history WHERE device_id = ? AND date >= ? AND date < ? \
                     GROUP BY bucket ORDER BY bucket ASC"
                ))
                .bind(device_id)
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await?;
                rows.iter()
                    .map(|row| {
                        let bucket: String = row.try_get("bucket")?;
                        let timestamp = parse_bucket_timestamp(&bucket)?;
                        Ok(DataRow {
                            timestamp,
                            value: row.try_get::<i64, _>("value")? as f64,
                            minimum: None,
                            maximum: None,
                        })
                    })
                    .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                    .map_err(Error::from)
            }
            DeviceKind::Switch | DeviceKind::Text => {
                let table = if kind == DeviceKind::Switch {
                    "device_switch_history"
                } else {
                    "device_text_history"
                };
                let rows = sqlx::query(&format!(
                    "SELECT date, value FROM {table} WHERE device_id = ? AND date >= ? AND date < ? ORDER BY date ASC"
                ))
                .bind(device_id)
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await?;
                rows.iter()
                    .map(|row| {
                        Ok(DataRow {
                            timestamp: row.try_get("date")?,
                            value: 0.0,
                            minimum: None,
                            maximum: None,
                        })
                    })
                    .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                    .map_err(Error::from)
            }
        }
    }

    async fn query_trends(
        &self,
        device_id: i64,
        kind: DeviceKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DataRow>> {
        match kind {
            DeviceKind::Level => {
                let rows = sqlx::query(
                    "SELECT date, min, max, average FROM device_level_trends \
                     WHERE device_id = ? AND date >= ? AND date < ? ORDER BY date ASC",
                )
                .bind(device_id)
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await?;
                rows.iter()
                    .map(|row| {
                        Ok(DataRow {
                            timestamp: row.try_get("date")?,
                            value: row.try_get("average")?,
                            minimum: row.try_get::<f64, _>("min").ok(),
                            maximum: row.try_get::<f64, _>("max").ok(),
                        })
                    })
                    .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                    .map_err(Error::from)
            }
            DeviceKind::Counter => {
                let rows = sqlx::query(
                    "SELECT date, last, diff FROM device_counter_trends \
                     WHERE device_id = ? AND date >= ? AND date < ? ORDER BY date ASC",
                )
                .bind(device_id)
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await?;
                rows.iter()
                    .map(|row| {
                        Ok(DataRow {
                            timestamp: row.try_get("date")?,
                            value: row.try_get::<i64, _>("diff")? as f64,
                            minimum: None,
                            maximum: Some(row.try_get::<i64, _>("last")? as f64),
                        })
                    })
                    .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                    .map_err(Error::from)
            }
            DeviceKind::Switch | DeviceKind::Text => Ok(Vec::new()),
        }
    }

    async fn delete_history_older_than(
        &self,
        device_id: i64,
        kind: DeviceKind,
        cutoff: DateTime<Utc>,
    ) -> Result<()> {
        let table = match kind {
            DeviceKind::Switch => "device_switch_history",
            DeviceKind::Level => "device_level_history",
            DeviceKind::Counter => "device_counter_history",
            DeviceKind::Text => "device_text_history",
        };
        sqlx::query(&format!("DELETE FROM {table} WHERE device_id = ? AND date < ?"))
            .bind(device_id)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_trends_older_than(&self, device_id: i64, cutoff: DateTime<Utc>) -> Result<()> {
        sqlx::query("DELETE FROM device_level_trends WHERE device_id = ? AND date < ?")
            .bind(device_id)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM device_counter_trends WHERE device_id = ? AND date < ?")
            .bind(device_id)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- scripts --------------------------------------------------------------------

    async fn insert_script(&self, name: &str, code: &str) -> Result<Script> {
        let id = sqlx::query("INSERT INTO scripts (name, code, enabled) VALUES (?, ?, 1)")
            .bind(name)
            .bind(code)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        Ok(Script {
            id,
            name: name.to_string(),
            code: code.to_string(),
            enabled: true,
        })
    }

    async fn get_script_by_name(&self, name: &str) -> Result<Option<Script>> {
        let row = sqlx::query("SELECT id, name, code, enabled FROM scripts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| script_from_row(&row)).transpose()
    }

    async fn list_enabled_scripts(&self) -> Result<Vec<Script>> {
        let rows = sqlx::query("SELECT id, name, code, enabled FROM scripts WHERE enabled = 1 ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(script_from_row).collect()
    }

    async fn set_script_enabled(&self, script_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE scripts SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(script_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scripts_for_device(&self, device_id: i64) -> Result<Vec<Script>> {
        let rows = sqlx::query(
            "SELECT s.id, s.name, s.code, s.enabled FROM scripts s \
             JOIN x_device_scripts x ON x.script_id = s.id \
             WHERE x.device_id = ? AND s.enabled = 1 ORDER BY s.id ASC",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(script_from_row).collect()
    }

    async fn scripts_for_timer(&self, timer_id: i64) -> Result<Vec<Script>> {
        let rows = sqlx::query(
            "SELECT s.id, s.name, s.code, s.enabled FROM scripts s \
             JOIN x_timer_scripts x ON x.script_id = s.id \
             WHERE x.timer_id = ? AND s.enabled = 1 ORDER BY s.id ASC",
        )
        .bind(timer_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(script_from_row).collect()
    }

    // -- timers -----------------------------------------------------------------------

    async fn insert_timer(&self, name: &str, cron: &str) -> Result<Timer> {
        let id = sqlx::query("INSERT INTO timers (name, cron, enabled) VALUES (?, ?, 1)")
            .bind(name)
            .bind(cron)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        Ok(Timer {
            id,
            name: name.to_string(),
            cron: cron.to_string(),
            enabled: true,
        })
    }

    async fn list_enabled_timers(&self) -> Result<Vec<Timer>> {
        let rows = sqlx::query("SELECT id, name, cron, enabled FROM timers WHERE enabled = 1 ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Timer {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    cron: row.try_get("cron")?,
                    enabled: row.try_get::<i64, _>("enabled")? != 0,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(Error::from)
    }

    async fn set_timer_enabled(&self, timer_id: i64, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE timers SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(timer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn devices_for_timer(&self, timer_id: i64) -> Result<Vec<TimerDevice>> {
        let rows = sqlx::query(
            "SELECT timer_id, device_id, value FROM x_timer_devices WHERE timer_id = ?",
        )
        .bind(timer_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(TimerDevice {
                    timer_id: row.try_get("timer_id")?,
                    device_id: row.try_get("device_id")?,
                    target_value: row.try_get("value")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(Error::from)
    }

    // -- links ------------------------------------------------------------------------

    async fn insert_link(&self, link: &Link) -> Result<Link> {
        let value = serde_json::to_string(&link.value)
            .map_err(|e| Error::InvalidResult("link.value".into(), e.to_string()))?;
        let target_value = serde_json::to_string(&link.target_value)
            .map_err(|e| Error::InvalidResult("link.target_value".into(), e.to_string()))?;
        let id = sqlx::query(
            "INSERT INTO links (device_id, target_device_id, value, target_value, after, for_seconds, clear, enabled) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(link.device_id)
        .bind(link.target_device_id)
        .bind(&value)
        .bind(&target_value)
        .bind(link.after)
        .bind(link.for_seconds)
        .bind(link.clear as i64)
        .bind(link.enabled as i64)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(Link { id, ..link.clone() })
    }

    async fn links_for_source_device(&self, device_id: i64) -> Result<Vec<Link>> {
        let rows = sqlx::query(
            "SELECT id, device_id, target_device_id, value, target_value, after, for_seconds, clear, enabled \
             FROM links WHERE device_id = ? AND enabled = 1",
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(link_from_row).collect()
    }
}

fn device_row_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<DeviceRow> {
    let id: i64 = row.try_get("id")?;
    let kind_raw: i64 = row.try_get("type")?;
    Ok(DeviceRow {
        id,
        plugin_id: row.try_get("plugin_id")?,
        reference: row.try_get("reference")?,
        label: row.try_get("label")?,
        name: row.try_get("name")?,
        kind: device_kind_from_i64(kind_raw, &format!("device {id}"))?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
    })
}

fn script_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Script> {
    Ok(Script {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
    })
}

fn link_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Link> {
    let id: i64 = row.try_get("id")?;
    let raw_value: String = row.try_get("value")?;
    let raw_target: String = row.try_get("target_value")?;
    let value = serde_json::from_str(&raw_value)
        .map_err(|e| Error::InvalidResult(format!("link {id} value"), e.to_string()))?;
    let target_value = serde_json::from_str(&raw_target)
        .map_err(|e| Error::InvalidResult(format!("link {id} target_value"), e.to_string()))?;
    Ok(Link {
        id,
        device_id: row.try_get("device_id")?,
        target_device_id: row.try_get("target_device_id")?,
        value,
        target_value,
        after: row.try_get("after")?,
        for_seconds: row.try_get("for_seconds")?,
        clear: row.try_get::<i64, _>("clear")? != 0,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
    })
}

fn floor_to_five_minutes(when: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::{Timelike, Duration};
    let minute = when.minute() - (when.minute() % 5);
    when.with_minute(minute)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(when - Duration::seconds(when.second() as i64))
}

fn parse_bucket_timestamp(bucket: &str) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
    let padded = match bucket.len() {
        4 => format!("{bucket}-01-01T00:00:00Z"),
        7 => format!("{bucket}-01T00:00:00Z"),
        10 => format!("{bucket}T00:00:00Z"),
        13 => format!("{bucket}:00:00Z"),
        16 => format!("{bucket}:00Z"),
        _ => format!("{bucket}Z"),
    };
    DateTime::parse_from_rfc3339(&padded)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
