//! The controller: bootstraps the plugin tree from the store, runs the
//! device update pipeline, and fans successful updates out to the rule
//! engine (links, scripts) and the hourly retention/trend jobs.
//!
//! Plugin implementations are external collaborators (weather, Z-Wave,
//! serial, ...); this crate never constructs one. What it owns is the
//! lifecycle bookkeeping (`PluginState`) and an optional
//! [`PluginHandler`](crate::plugin_handler::PluginHandler) registration per
//! plugin, through which it asks a real integration to push a value out to
//! hardware.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Timelike, Utc};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::runtime::Handle;

use micasa_core::device::counter::fold_increment;
use micasa_core::device::level::LevelRange;
use micasa_core::device::switch::SwitchOption;
use micasa_core::device::{Device, DeviceKind, DeviceSettings, DeviceValue};
use micasa_core::plugin::{PluginState, PluginType};
use micasa_core::rules::cron::CronSchedule;
use micasa_core::UpdateSource;
use micasa_script::{HostCallbacks, ScriptHost};
use micasa_store::{DataGroup, DataRow, DeviceRow, PluginRow, SettingsScope, Store};

use crate::api_adapter::ApiAdapter;
use crate::error::{Error, Result};
use crate::pipeline::{self, Gate};
use crate::plugin_handler::PluginHandler;
use crate::rules::task_options::{self, TaskOptions};
use crate::rules::ScriptRunner;
use crate::scheduler::{Owner, Repeat, Scheduler};
use crate::settings::Settings;

/// How long after `Activate` the pipeline auto-reverts a Switch to `Idle`.
const ACTIVATE_REVERT: StdDuration = StdDuration::from_secs(5);
/// Timer scan cadence.
const TIMER_TICK: StdDuration = StdDuration::from_secs(60);
/// Retention sweep cadence, spread with a random initial offset.
const RETENTION_TICK: StdDuration = StdDuration::from_secs(3600);
/// Trend recomputation cadence, spread with a random initial offset.
const TREND_TICK: StdDuration = StdDuration::from_secs(3600);

/// The in-flight accumulator for one rate-limited device (spec §4.4 step 5):
/// Level readings arriving inside the window average together; every other
/// kind just keeps the most recent value and source.
struct RateLimitAccumulator {
    kind: DeviceKind,
    level_sum: f64,
    level_count: u32,
    latest: DeviceValue,
    source: UpdateSource,
}

impl RateLimitAccumulator {
    fn new(value: DeviceValue, source: UpdateSource) -> Self {
        let kind = value.kind();
        let (level_sum, level_count) = match &value {
            DeviceValue::Level(v) => (*v, 1),
            _ => (0.0, 0),
        };
        RateLimitAccumulator {
            kind,
            level_sum,
            level_count,
            latest: value,
            source,
        }
    }

    fn merge(&mut self, value: DeviceValue, source: UpdateSource) {
        if let DeviceValue::Level(v) = value {
            self.level_sum += v;
            self.level_count += 1;
        }
        self.latest = value;
        self.source = source;
    }

    fn resolve(&self) -> (DeviceValue, UpdateSource) {
        let value = if self.kind == DeviceKind::Level && self.level_count > 0 {
            DeviceValue::Level(self.level_sum / f64::from(self.level_count))
        } else {
            self.latest.clone()
        };
        (value, self.source)
    }
}

pub struct Controller {
    self_weak: Weak<Controller>,
    store: Arc<dyn Store>,
    scheduler: Arc<Scheduler>,
    script_runner: ScriptRunner,
    runtime: Handle,
    devices: RwLock<HashMap<i64, Device>>,
    plugin_states: RwLock<HashMap<i64, PluginState>>,
    plugin_handlers: RwLock<HashMap<i64, Arc<dyn PluginHandler>>>,
    rate_limit_pending: Mutex<HashMap<i64, RateLimitAccumulator>>,
    counter_staged_delta: Mutex<HashMap<i64, i64>>,
}

impl Controller {
    pub fn new(store: Arc<dyn Store>, scheduler: Arc<Scheduler>, script_host: Arc<dyn ScriptHost>, runtime: Handle) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Controller {
            self_weak: self_weak.clone(),
            script_runner: ScriptRunner::new(script_host, store.clone()),
            store,
            scheduler,
            runtime,
            devices: RwLock::new(HashMap::new()),
            plugin_states: RwLock::new(HashMap::new()),
            plugin_handlers: RwLock::new(HashMap::new()),
            rate_limit_pending: Mutex::new(HashMap::new()),
            counter_staged_delta: Mutex::new(HashMap::new()),
        })
    }

    /// Recovers the `Arc` this controller lives behind. Every `Controller`
    /// is constructed through `Controller::new`, which always wraps it in an
    /// `Arc` via `Arc::new_cyclic`, so this upgrade never fails in practice.
    fn self_arc(&self) -> Arc<Controller> {
        self.self_weak.upgrade().expect("controller dropped while still running")
    }

    pub fn register_plugin_handler(&self, plugin_id: i64, handler: Arc<dyn PluginHandler>) {
        self.plugin_handlers.write().insert(plugin_id, handler);
    }

    /// Loads every plugin and device from the store, starts enabled
    /// top-level plugins in parallel, and starts the timer and retention
    /// scan tasks.
    pub async fn boot(self: &Arc<Self>) -> Result<()> {
        self.store.init().await?;
        let plugins = self.store.list_plugins().await?;

        {
            let mut states = self.plugin_states.write();
            for plugin in &plugins {
                states.insert(plugin.id, PluginState::Init);
            }
        }

        for plugin in &plugins {
            for row in self.store.list_devices_for_plugin(plugin.id).await? {
                let device = self.hydrate_device(row).await?;
                self.devices.write().insert(device.id, device);
            }
        }

        let mut starts = Vec::new();
        for plugin in plugins.iter().filter(|p| p.enabled && p.parent_id.is_none()) {
            if let Some(handler) = self.plugin_handlers.read().get(&plugin.id).cloned() {
                let plugin_id = plugin.id;
                let controller = self.clone();
                starts.push(self.runtime.spawn(async move {
                    match handler.start().await {
                        Ok(()) => controller.plugin_states.write().insert(plugin_id, PluginState::Ready),
                        Err(err) => {
                            tracing::error!(plugin_id, %err, "plugin failed to start");
                            controller.plugin_states.write().insert(plugin_id, PluginState::Failed)
                        }
                    }
                }));
            } else {
                self.plugin_states.write().insert(plugin.id, PluginState::Ready);
            }
        }
        for handle in starts {
            let _ = handle.await;
        }

        self.start_timer_ticker();
        self.start_retention_ticker();
        self.start_trend_ticker();
        Ok(())
    }

    /// Erases every scheduler task owned by the controller itself (timer
    /// ticker, retention ticker — not per-device tasks, which belong to
    /// whichever device scheduled them), stops every registered plugin
    /// (parallel, 15s timeout each, a time-out is logged but not fatal),
    /// and clears the plugin map.
    pub async fn shutdown(self: &Arc<Self>) {
        self.scheduler.erase(|owner| owner == Owner::Controller);

        let handlers: Vec<Arc<dyn PluginHandler>> = self.plugin_handlers.read().values().cloned().collect();
        let mut stops = Vec::new();
        for handler in handlers {
            stops.push(self.runtime.spawn(async move {
                let outcome = tokio::time::timeout(StdDuration::from_secs(15), handler.stop()).await;
                if outcome.is_err() {
                    tracing::warn!("plugin stop timed out after 15s");
                }
            }));
        }
        for stop in stops {
            let _ = stop.await;
        }
        self.plugin_handlers.write().clear();
        self.plugin_states.write().clear();
        self.devices.write().clear();
    }

    async fn hydrate_device(&self, row: DeviceRow) -> Result<Device> {
        let raw_settings = self.store.load_settings(SettingsScope::Device(row.id)).await?;
        let settings = parse_device_settings(&raw_settings);
        let (value, previous_value, last_updated) = self.latest_value(row.id, row.kind).await?;

        Ok(Device {
            id: row.id,
            plugin_id: row.plugin_id,
            reference: row.reference,
            label: row.label,
            name: row.name,
            kind: row.kind,
            enabled: row.enabled,
            value,
            previous_value,
            last_updated,
            last_source: None,
            settings,
        })
    }

    async fn latest_value(
        &self,
        device_id: i64,
        kind: DeviceKind,
    ) -> Result<(Option<DeviceValue>, Option<DeviceValue>, Option<DateTime<Utc>>)> {
        let value = match kind {
            DeviceKind::Switch => self
                .store
                .latest_switch_value(device_id)
                .await?
                .map(|(raw, when)| Ok::<_, Error>((DeviceValue::Switch(SwitchOption::parse(&raw)?), when)))
                .transpose()?,
            DeviceKind::Text => self
                .store
                .latest_text_value(device_id)
                .await?
                .map(|(raw, when)| (DeviceValue::Text(raw), when)),
            DeviceKind::Counter => self
                .store
                .latest_counter_value(device_id)
                .await?
                .map(|(raw, when)| (DeviceValue::Counter(raw), when)),
            DeviceKind::Level => self
                .store
                .latest_level_value(device_id)
                .await?
                .map(|(raw, when)| (DeviceValue::Level(raw), when)),
        };
        match value {
            Some((value, when)) => Ok((Some(value.clone()), Some(value), Some(when))),
            None => Ok((None, None, None)),
        }
    }

    fn is_action_switch(&self, settings: &DeviceSettings, kind: DeviceKind) -> bool {
        kind == DeviceKind::Switch && settings.default_subtype.as_deref() == Some("action")
    }

    /// The entry point every source (plugin, timer, link, script, API) calls
    /// to push a new value at a device.
    pub async fn update_device_value(self: &Arc<Self>, device_id: i64, source: UpdateSource, value: DeviceValue) -> Result<()> {
        let (gate, is_action, plugin_id, reference) = {
            let devices = self.devices.read();
            let device = devices.get(&device_id).ok_or_else(|| Error::UnknownDevice(device_id.to_string()))?;
            let is_action = self.is_action_switch(&device.settings, device.kind());
            let plugin_state = *self.plugin_states.read().get(&device.plugin_id).unwrap_or(&PluginState::Init);
            let elapsed = device
                .last_updated
                .and_then(|when| (Utc::now() - when).to_std().ok());
            let gate = pipeline::evaluate(device, is_action, plugin_state, source, &value, elapsed);
            (gate, is_action, device.plugin_id, device.reference.clone())
        };

        match gate {
            Gate::Rejected(reason) => {
                tracing::debug!(device_id, ?reason, "update rejected");
                Ok(())
            }
            Gate::RateLimited { remaining } => {
                let is_first = {
                    let mut pending = self.rate_limit_pending.lock();
                    match pending.get_mut(&device_id) {
                        Some(accumulator) => {
                            accumulator.merge(value.clone(), source);
                            false
                        }
                        None => {
                            pending.insert(device_id, RateLimitAccumulator::new(value.clone(), source));
                            true
                        }
                    }
                };
                if is_first {
                    let controller = self.clone();
                    self.scheduler.schedule_fn(remaining, None, Repeat::Once, Owner::Device(device_id), move || {
                        let controller = controller.clone();
                        controller.runtime.block_on(async move {
                            controller.flush_rate_limited(device_id).await;
                        });
                    });
                }
                Ok(())
            }
            Gate::Accepted(value) => {
                // spec §4.4 step 6: the owning plugin gets first refusal on
                // every value it owns before it is committed and fanned out.
                let handler = self.plugin_handlers.read().get(&plugin_id).cloned();
                if let Some(handler) = handler {
                    if let Err(err) = handler.update_device(&reference, &value).await {
                        tracing::debug!(device_id, %err, "update rejected by owning plugin");
                        return Ok(());
                    }
                }
                self.commit_value(device_id, plugin_id, is_action, source, value).await
            }
        }
    }

    /// Fires once a rate-limit window elapses: resolves the accumulated
    /// value (average for Level, latest otherwise) and re-enters the
    /// pipeline so it gets history-committed and fans out like any other
    /// update.
    async fn flush_rate_limited(self: &Arc<Self>, device_id: i64) {
        let accumulator = self.rate_limit_pending.lock().remove(&device_id);
        let Some(accumulator) = accumulator else { return };
        let (value, source) = accumulator.resolve();
        if let Err(err) = self.update_device_value(device_id, source, value).await {
            tracing::error!(device_id, %err, "rate-limited flush failed");
        }
    }

    /// The Counter-specific entry point (spec §4.4 "State semantics per
    /// kind"): supplies a non-negative delta rather than an absolute
    /// reading. Deltas observed while a rate-limit window is open fold into
    /// the delta already staged for this device rather than overwriting it.
    pub async fn increment_value(self: &Arc<Self>, device_id: i64, source: UpdateSource, delta: i64) -> Result<()> {
        let baseline = {
            let devices = self.devices.read();
            match devices.get(&device_id).and_then(|d| d.value.as_ref()) {
                Some(DeviceValue::Counter(n)) => *n,
                _ => 0,
            }
        };
        let total_delta = {
            let mut staged = self.counter_staged_delta.lock();
            let entry = staged.entry(device_id).or_insert(0);
            *entry = fold_increment(*entry, delta);
            *entry
        };
        self.update_device_value(device_id, source, DeviceValue::Counter(baseline + total_delta)).await
    }

    async fn commit_value(
        self: &Arc<Self>,
        device_id: i64,
        plugin_id: i64,
        is_action_switch: bool,
        source: UpdateSource,
        value: DeviceValue,
    ) -> Result<()> {
        let now = Utc::now();
        match &value {
            DeviceValue::Switch(option) => self.store.insert_switch_history(device_id, option.as_str(), now).await?,
            DeviceValue::Text(text) => self.store.insert_text_history(device_id, text, now).await?,
            DeviceValue::Counter(n) => {
                self.store.insert_counter_history(device_id, *n, now).await?;
                self.counter_staged_delta.lock().remove(&device_id);
            }
            DeviceValue::Level(n) => self.store.fold_level_sample(device_id, now, *n).await?,
        }

        let plugin_state = *self.plugin_states.read().get(&plugin_id).unwrap_or(&PluginState::Init);
        let device_enabled = {
            let mut devices = self.devices.write();
            let device = devices.get_mut(&device_id).ok_or_else(|| Error::UnknownDevice(device_id.to_string()))?;
            device.previous_value = device.value.take();
            device.value = Some(value.clone());
            device.last_updated = Some(now);
            device.last_source = Some(source);
            device.enabled
        };

        if matches!(&value, DeviceValue::Switch(SwitchOption::Activate)) {
            let controller = self.clone();
            self.scheduler
                .schedule_fn(ACTIVATE_REVERT, None, Repeat::Once, Owner::Device(device_id), move || {
                    let controller = controller.clone();
                    controller.runtime.block_on(async move {
                        let source = UpdateSource::SYSTEM | UpdateSource::PLUGIN;
                        if let Err(err) = controller
                            .update_device_value(device_id, source, DeviceValue::Switch(SwitchOption::Idle))
                            .await
                        {
                            tracing::error!(device_id, %err, "activate auto-revert failed");
                        }
                    });
                });
        }

        if plugin_state.is_ready_or_above() && (device_enabled || is_action_switch) {
            self.fire_event(device_id, source).await?;
        }
        Ok(())
    }

    /// Controller.newEvent: evaluates links and the script dispatcher for a
    /// device that just changed.
    async fn fire_event(self: &Arc<Self>, device_id: i64, source: UpdateSource) -> Result<()> {
        // INTERNAL is reentrant-pipeline bookkeeping only; rule code must
        // never see it (spec §3, Entity: UpdateSource).
        let source = source.without_internal();
        let (value, previous_value) = {
            let devices = self.devices.read();
            let device = devices.get(&device_id).ok_or_else(|| Error::UnknownDevice(device_id.to_string()))?;
            (device.value.clone(), device.previous_value.clone())
        };
        let Some(value) = value else { return Ok(()) };

        if !source.contains(UpdateSource::LINK) {
            if let DeviceValue::Switch(_) = &value {
                self.evaluate_links(device_id, &value, source).await?;
            }
        }

        if !source.contains(UpdateSource::SCRIPT) {
            let scripts = self.store.scripts_for_device(device_id).await?;
            if !scripts.is_empty() {
                let device_json = self.device_json(device_id).await?;
                let payload = serde_json::json!({
                    "value": value,
                    "previous_value": previous_value,
                    "source_name": format!("{source:?}"),
                    "device_json": device_json,
                });
                let callbacks: Arc<dyn HostCallbacks> = self.clone();
                self.script_runner.run_batch(&scripts, "event", payload, callbacks).await?;
            }
        }
        Ok(())
    }

    async fn evaluate_links(self: &Arc<Self>, device_id: i64, new_value: &DeviceValue, source: UpdateSource) -> Result<()> {
        for link in self.store.links_for_source_device(device_id).await? {
            if &link.value != new_value {
                continue;
            }
            let options = TaskOptions {
                after_sec: link.after.unwrap_or(0.0),
                for_sec: link.for_seconds.unwrap_or(0.0),
                repeat: 1,
                interval_sec: 0.0,
                clear: link.clear,
                recur: false,
            };
            self.schedule_task_options(link.target_device_id, link.target_value.clone(), options, UpdateSource::LINK | source)
                .await?;
        }
        Ok(())
    }

    /// The task-options planner: expands `options` and schedules each
    /// resulting update onto the shared scheduler. When `options.clear` is
    /// set, every task already scheduled for this device is erased first
    /// (spec's task-options grammar: `CLEAR` supersedes whatever was
    /// pending rather than piling on top of it).
    pub async fn schedule_task_options(
        self: &Arc<Self>,
        target_device_id: i64,
        target_value: DeviceValue,
        options: TaskOptions,
        source: UpdateSource,
    ) -> Result<()> {
        if options.clear {
            self.scheduler.erase(|owner| owner == Owner::Device(target_device_id));
        }

        let current_value = self.devices.read().get(&target_device_id).and_then(|d| d.value.clone());
        let resolved_source = options.resolve_source(source);
        let planned = task_options::plan(target_value, current_value, &options);

        for update in planned {
            let controller = self.clone();
            self.scheduler
                .schedule_fn(update.at, None, Repeat::Once, Owner::Device(target_device_id), move || {
                    let controller = controller.clone();
                    let value = update.value.clone();
                    controller.runtime.block_on(async move {
                        if let Err(err) = controller.update_device_value(target_device_id, resolved_source, value).await {
                            tracing::error!(target_device_id, %err, "planned update failed");
                        }
                    });
                });
        }
        Ok(())
    }

    /// True iff the scheduler has any pending or in-flight task scheduled
    /// for this device (spec §4.6 `isScheduled`).
    pub fn is_scheduled(&self, device_id: i64) -> bool {
        self.scheduler.is_scheduled(|owner| owner == Owner::Device(device_id))
    }

    async fn device_json(&self, device_id: i64) -> Result<serde_json::Value> {
        let devices = self.devices.read();
        Ok(match devices.get(&device_id) {
            Some(device) => serde_json::to_value(device).unwrap_or(serde_json::Value::Null),
            None => serde_json::Value::Null,
        })
    }

    fn resolve_device_selector(&self, selector: &str) -> Option<i64> {
        if let Ok(id) = selector.parse::<i64>() {
            if self.devices.read().contains_key(&id) {
                return Some(id);
            }
        }
        let devices = self.devices.read();
        devices
            .values()
            .find(|d| d.name.as_deref() == Some(selector) || d.label == selector)
            .map(|d| d.id)
    }

    fn start_timer_ticker(self: &Arc<Self>) {
        let controller = self.clone();
        // Align roughly to the next full minute plus a small safety margin.
        let now = Local::now();
        let seconds_into_minute = now.time().second() as u64;
        let initial = StdDuration::from_secs(60 - seconds_into_minute.min(59)) + StdDuration::from_millis(5);
        self.scheduler
            .schedule_fn(initial, Some(TIMER_TICK), Repeat::Infinite, Owner::Controller, move || {
                let controller = controller.clone();
                controller.runtime.block_on(async move {
                    if let Err(err) = controller.tick_timers().await {
                        tracing::error!(%err, "timer tick failed");
                    }
                });
            });
    }

    async fn tick_timers(self: &Arc<Self>) -> Result<()> {
        let now = Local::now();
        for timer in self.store.list_enabled_timers().await? {
            let schedule = match CronSchedule::parse(&timer.cron) {
                Ok(schedule) => schedule,
                Err(err) => {
                    tracing::warn!(timer = %timer.name, %err, "disabling timer with invalid cron");
                    self.store.set_timer_enabled(timer.id, false).await?;
                    continue;
                }
            };
            if !schedule.matches(now) {
                continue;
            }

            let scripts = self.store.scripts_for_timer(timer.id).await?;
            if !scripts.is_empty() {
                let payload = serde_json::json!({ "id": timer.id, "cron": timer.cron, "name": timer.name });
                let callbacks: Arc<dyn HostCallbacks> = self.clone();
                self.script_runner.run_batch(&scripts, "timer", payload, callbacks).await?;
            }

            for target in self.store.devices_for_timer(timer.id).await? {
                let Some(device_kind) = self.devices.read().get(&target.device_id).map(|d| d.kind()) else {
                    continue;
                };
                let value = match parse_typed_value(device_kind, &target.target_value) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::warn!(timer = %timer.name, %err, "timer target value doesn't parse for device kind");
                        continue;
                    }
                };
                if let Err(err) = self.update_device_value(target.device_id, UpdateSource::TIMER, value).await {
                    tracing::error!(timer = %timer.name, %err, "timer-driven update failed");
                }
            }
        }
        Ok(())
    }

    fn start_retention_ticker(self: &Arc<Self>) {
        let controller = self.clone();
        let jitter = StdDuration::from_secs(rand::thread_rng().gen_range(0..RETENTION_TICK.as_secs()));
        self.scheduler
            .schedule_fn(jitter, Some(RETENTION_TICK), Repeat::Infinite, Owner::Controller, move || {
                let controller = controller.clone();
                controller.runtime.block_on(async move {
                    if let Err(err) = controller.run_retention().await {
                        tracing::error!(%err, "retention sweep failed");
                    }
                });
            });
    }

    async fn run_retention(&self) -> Result<()> {
        let device_ids: Vec<(i64, DeviceKind, DeviceSettings)> = self
            .devices
            .read()
            .values()
            .map(|d| (d.id, d.kind(), d.settings.clone()))
            .collect();

        for (device_id, kind, settings) in device_ids {
            let history_days = settings.history_retention.unwrap_or(7);
            let cutoff = Utc::now() - chrono::Duration::days(history_days as i64);
            self.store.delete_history_older_than(device_id, kind, cutoff).await?;

            if kind == DeviceKind::Level {
                let trend_months = settings.trends_retention.unwrap_or(12);
                let trend_cutoff = Utc::now() - chrono::Duration::days(30 * trend_months as i64);
                self.store.delete_trends_older_than(device_id, trend_cutoff).await?;
            }
        }
        Ok(())
    }

    fn start_trend_ticker(self: &Arc<Self>) {
        let controller = self.clone();
        let jitter = StdDuration::from_secs(rand::thread_rng().gen_range(0..TREND_TICK.as_secs()));
        self.scheduler
            .schedule_fn(jitter, Some(TREND_TICK), Repeat::Infinite, Owner::Controller, move || {
                let controller = controller.clone();
                controller.runtime.block_on(async move {
                    if let Err(err) = controller.run_trends().await {
                        tracing::error!(%err, "trend sweep failed");
                    }
                });
            });
    }

    /// Recomputes the previous *complete* hour's trend row for every
    /// Counter/Level device (spec §4.4/§4.8): the hour in progress is
    /// skipped to avoid aggregating a partial bucket.
    async fn run_trends(&self) -> Result<()> {
        let devices: Vec<(i64, DeviceKind)> = self
            .devices
            .read()
            .values()
            .map(|d| (d.id, d.kind()))
            .filter(|(_, kind)| matches!(kind, DeviceKind::Counter | DeviceKind::Level))
            .collect();

        let now = Utc::now();
        let hour_start = now
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now)
            - chrono::Duration::hours(1);
        let hour_end = hour_start + chrono::Duration::hours(1);

        for (device_id, kind) in devices {
            match kind {
                DeviceKind::Counter => {
                    if let Some((lo, hi)) = self.store.counter_min_max_in_range(device_id, hour_start, hour_end).await? {
                        self.store.upsert_counter_trend(device_id, hour_start, hi, hi - lo).await?;
                    }
                }
                DeviceKind::Level => {
                    let samples = self.store.level_history_in_range(device_id, hour_start, hour_end).await?;
                    if !samples.is_empty() {
                        let min = samples.iter().fold(f64::INFINITY, |acc, r| acc.min(r.value));
                        let max = samples.iter().fold(f64::NEG_INFINITY, |acc, r| acc.max(r.value));
                        let average = samples.iter().map(|r| r.value).sum::<f64>() / samples.len() as f64;
                        self.store.upsert_level_trend(device_id, hour_start, min, max, average).await?;
                    }
                }
                _ => unreachable!(),
            }
        }
        Ok(())
    }

    /// Idempotent plugin registration (spec §4.1 entity note, §4.5): if a
    /// plugin with this reference already exists, it is returned unchanged;
    /// otherwise a new row is inserted and tracked as `Init`.
    pub async fn declare_plugin(&self, reference: &str, plugin_type: PluginType, parent_id: Option<i64>) -> Result<PluginRow> {
        if let Some(existing) = self.store.get_plugin_by_reference(reference).await? {
            return Ok(existing);
        }
        let row = self.store.insert_plugin(reference, &plugin_type, parent_id).await?;
        self.plugin_states.write().insert(row.id, PluginState::Init);
        Ok(row)
    }

    /// Stops and removes a plugin along with every device it owns (cascade
    /// per spec §3 "children cascade"). Child plugins are expected to have
    /// been removed already by the caller — this crate does not walk the
    /// parent/child tree on behalf of a single `removePlugin` call, mirroring
    /// the original's one-level-deep tree where each `Hardware::stop()` is
    /// orchestrated by its owner.
    pub async fn remove_plugin(self: &Arc<Self>, plugin_id: i64) -> Result<()> {
        if let Some(handler) = self.plugin_handlers.write().remove(&plugin_id) {
            let _ = tokio::time::timeout(StdDuration::from_secs(15), handler.stop()).await;
        }
        let device_ids: Vec<i64> = self
            .devices
            .read()
            .values()
            .filter(|d| d.plugin_id == plugin_id)
            .map(|d| d.id)
            .collect();
        for device_id in device_ids {
            self.remove_device(device_id).await?;
        }
        self.plugin_states.write().remove(&plugin_id);
        self.store.delete_plugin(plugin_id).await?;
        Ok(())
    }

    /// `declareDevice<T>` (spec §4.5): idempotent by `(plugin_id, reference)`.
    /// On redeclare, only settings keys starting with `_` are applied to the
    /// existing device; on first declaration every setting in `declared` is
    /// applied and the device is constructed and registered fresh.
    pub async fn declare_device(
        self: &Arc<Self>,
        plugin_id: i64,
        reference: &str,
        label: &str,
        kind: DeviceKind,
        declared_settings: HashMap<String, String>,
    ) -> Result<Device> {
        if let Some(row) = self.store.get_device_by_reference(plugin_id, reference).await? {
            let settings = Settings::new(self.store.clone(), SettingsScope::Device(row.id));
            settings.apply_declared(declared_settings).await?;
            settings.commit().await?;
            let device = self.hydrate_device(row).await?;
            self.devices.write().insert(device.id, device.clone());
            return Ok(device);
        }

        let row = self.store.insert_device(plugin_id, reference, label, kind).await?;
        let settings = Settings::new(self.store.clone(), SettingsScope::Device(row.id));
        settings.apply_declared(declared_settings).await?;
        settings.commit().await?;

        let device = self.hydrate_device(row).await?;
        self.devices.write().insert(device.id, device.clone());
        Ok(device)
    }

    /// `removeDevice`: erases any scheduler tasks owned by this device
    /// (auto-revert, rate-limit flush, link/task-option timers), drops it
    /// from the store and the in-memory map.
    pub async fn remove_device(&self, device_id: i64) -> Result<()> {
        self.scheduler.erase(|owner| owner == Owner::Device(device_id));
        self.rate_limit_pending.lock().remove(&device_id);
        self.counter_staged_delta.lock().remove(&device_id);
        self.devices.write().remove(&device_id);
        self.store.delete_device(device_id).await?;
        Ok(())
    }
}

#[async_trait]
impl HostCallbacks for Controller {
    async fn update_device(&self, selector: &str, raw_value: &str, options: &str) -> std::result::Result<(), String> {
        let device_id = self
            .resolve_device_selector(selector)
            .ok_or_else(|| format!("unknown device '{selector}'"))?;
        let kind = self
            .devices
            .read()
            .get(&device_id)
            .map(|d| d.kind())
            .ok_or_else(|| format!("unknown device '{selector}'"))?;
        let value = parse_typed_value(kind, raw_value).map_err(|err| err.to_string())?;
        let parsed_options = TaskOptions::parse(options);
        self.self_arc()
            .schedule_task_options(device_id, value, parsed_options, UpdateSource::SCRIPT)
            .await
            .map_err(|err| err.to_string())
    }

    async fn get_device_json(&self, selector: &str) -> Option<serde_json::Value> {
        let device_id = self.resolve_device_selector(selector)?;
        self.device_json(device_id).await.ok()
    }

    async fn include_script(&self, name: &str) -> Option<String> {
        self.store.get_script_by_name(name).await.ok().flatten().filter(|s| s.enabled).map(|s| s.code)
    }

    fn log(&self, message: &str) {
        tracing::info!(target: "micasa::script", "{message}");
    }
}

#[async_trait]
impl ApiAdapter for Controller {
    async fn get_device(&self, selector: &str) -> Option<serde_json::Value> {
        let device_id = self.resolve_device_selector(selector)?;
        self.device_json(device_id).await.ok()
    }

    async fn list_devices(&self) -> Vec<serde_json::Value> {
        self.devices
            .read()
            .values()
            .filter_map(|d| serde_json::to_value(d).ok())
            .collect()
    }

    async fn update_device(&self, selector: &str, raw_value: &str, options: &str) -> Result<()> {
        let device_id = self
            .resolve_device_selector(selector)
            .ok_or_else(|| Error::UnknownDevice(selector.to_string()))?;
        let kind = self
            .devices
            .read()
            .get(&device_id)
            .map(|d| d.kind())
            .ok_or_else(|| Error::UnknownDevice(selector.to_string()))?;
        let value = parse_typed_value(kind, raw_value)?;
        let parsed_options = TaskOptions::parse(options);
        self.self_arc()
            .schedule_task_options(device_id, value, parsed_options, UpdateSource::API)
            .await
    }

    async fn set_device_enabled(&self, device_id: i64, enabled: bool) -> Result<()> {
        self.store.set_device_enabled(device_id, enabled).await?;
        if let Some(device) = self.devices.write().get_mut(&device_id) {
            device.enabled = enabled;
        }
        Ok(())
    }

    async fn set_device_name(&self, device_id: i64, name: Option<&str>) -> Result<()> {
        self.store.set_device_name(device_id, name).await?;
        if let Some(device) = self.devices.write().get_mut(&device_id) {
            device.name = name.map(str::to_string);
        }
        Ok(())
    }

    async fn get_device_settings(&self, device_id: i64) -> Result<serde_json::Value> {
        let raw = self.store.load_settings(SettingsScope::Device(device_id)).await?;
        Ok(serde_json::to_value(raw).unwrap_or(serde_json::Value::Null))
    }

    async fn put_device_settings(&self, device_id: i64, settings: HashMap<String, String>) -> Result<()> {
        let store_settings = Settings::new(self.store.clone(), SettingsScope::Device(device_id));
        store_settings.insert(settings);
        store_settings.commit().await?;

        let raw_settings = self.store.load_settings(SettingsScope::Device(device_id)).await?;
        let parsed = parse_device_settings(&raw_settings);
        if let Some(device) = self.devices.write().get_mut(&device_id) {
            device.settings = parsed;
        }
        Ok(())
    }

    async fn list_plugins(&self) -> Vec<serde_json::Value> {
        let Ok(rows) = self.store.list_plugins().await else {
            return Vec::new();
        };
        let states = self.plugin_states.read();
        rows.into_iter()
            .map(|row| {
                let state = states.get(&row.id).copied().unwrap_or(PluginState::Disabled);
                serde_json::json!({
                    "id": row.id,
                    "parent_id": row.parent_id,
                    "reference": row.reference,
                    "type": row.plugin_type,
                    "enabled": row.enabled,
                    "state": state,
                })
            })
            .collect()
    }

    async fn set_plugin_enabled(&self, plugin_id: i64, enabled: bool) -> Result<()> {
        self.store.set_plugin_enabled(plugin_id, enabled).await?;
        Ok(())
    }

    async fn get_plugin_settings(&self, plugin_id: i64) -> Result<serde_json::Value> {
        let raw = self.store.load_settings(SettingsScope::Plugin(plugin_id)).await?;
        Ok(serde_json::to_value(raw).unwrap_or(serde_json::Value::Null))
    }

    async fn put_plugin_settings(&self, plugin_id: i64, settings: HashMap<String, String>) -> Result<()> {
        let store_settings = Settings::new(self.store.clone(), SettingsScope::Plugin(plugin_id));
        store_settings.insert(settings);
        store_settings.commit().await?;
        Ok(())
    }

    async fn device_history(
        &self,
        device_id: i64,
        kind: DeviceKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        group: Option<DataGroup>,
    ) -> Result<Vec<DataRow>> {
        Ok(self.store.query_history(device_id, kind, start, end, group).await?)
    }

    async fn device_trends(
        &self,
        device_id: i64,
        kind: DeviceKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DataRow>> {
        Ok(self.store.query_trends(device_id, kind, start, end).await?)
    }
}

fn parse_typed_value(kind: DeviceKind, raw: &str) -> Result<DeviceValue> {
    Ok(match kind {
        DeviceKind::Switch => DeviceValue::Switch(SwitchOption::parse(raw)?),
        DeviceKind::Text => DeviceValue::Text(raw.to_string()),
        DeviceKind::Counter => DeviceValue::Counter(
            raw.parse()
                .map_err(|_| micasa_core::Error::SettingTypeMismatch { key: "counter value".into() })?,
        ),
        DeviceKind::Level => DeviceValue::Level(
            raw.parse()
                .map_err(|_| micasa_core::Error::SettingTypeMismatch { key: "level value".into() })?,
        ),
    })
}

fn parse_device_settings(map: &HashMap<String, String>) -> DeviceSettings {
    let mut settings = DeviceSettings::default();
    settings.allowed_update_sources = map
        .get("allowed_update_sources")
        .and_then(|raw| raw.parse::<u8>().ok())
        .and_then(UpdateSource::from_bits);
    settings.minimum_user_rights = map.get("minimum_user_rights").and_then(|raw| raw.parse().ok());
    settings.ignore_duplicates = map
        .get("ignore_duplicates")
        .map(|raw| raw == "true" || raw == "1")
        .unwrap_or(false);
    settings.rate_limit = map.get("rate_limit").and_then(|raw| raw.parse().ok());
    settings.history_retention = map.get("history_retention").and_then(|raw| raw.parse().ok());
    settings.trends_retention = map.get("trends_retention").and_then(|raw| raw.parse().ok());
    settings.default_subtype = map.get("subtype").or_else(|| map.get("default_subtype")).cloned();
    settings.default_unit = map.get("default_unit").cloned();
    settings.battery_level = map.get("battery_level").and_then(|raw| raw.parse().ok());
    settings.signal_strength = map.get("signal_strength").and_then(|raw| raw.parse().ok());
    settings.level_range = LevelRange {
        divider: map.get("divider").and_then(|raw| raw.parse().ok()),
        offset: map.get("offset").and_then(|raw| raw.parse().ok()),
        minimum: map.get("minimum").and_then(|raw| raw.parse().ok()),
        maximum: map.get("maximum").and_then(|raw| raw.parse().ok()),
    };
    settings
}
