//! Per-key rendezvous for outbound commands that must await a hardware
//! acknowledgement (spec §4.3).
//!
//! Grounded in `original_source/src/Hardware.cpp`'s
//! `_queuePendingUpdate`/`_releasePendingUpdate`: a plugin sends a command,
//! queues a pending entry under some caller-chosen key (usually the device
//! reference), and the eventual ack calls `try_release` with the same key to
//! recover the source that originated the command. If no ack ever arrives,
//! an auto-release timer clears the entry after `max_wait`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use micasa_core::UpdateSource;

use crate::scheduler::{Owner, Repeat, Scheduler};

/// One pending entry: the source that should be credited once the ack
/// arrives, plus arbitrary caller data (e.g. the command payload, for
/// dedup/log-throttling use cases).
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub source: UpdateSource,
    pub data: String,
}

struct Shared {
    entries: Mutex<HashMap<String, PendingEntry>>,
    condvar: Condvar,
}

/// Owns the pending-update map for one plugin (or the controller itself).
/// Each instance is independent; nothing here is process-global.
pub struct PendingUpdates {
    scheduler: Arc<Scheduler>,
    shared: Arc<Shared>,
}

impl PendingUpdates {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        PendingUpdates {
            scheduler,
            shared: Arc::new(Shared {
                entries: Mutex::new(HashMap::new()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Attempts to claim `key`. If it is already held, blocks up to
    /// `min_block` waiting for the holder to release it before giving up.
    /// On success, schedules an auto-release after `max_wait` so a command
    /// that never gets acked doesn't wedge the key forever.
    pub fn try_queue(&self, key: &str, source: UpdateSource, data: impl Into<String>, min_block: Duration, max_wait: Duration) -> bool {
        let data = data.into();
        let deadline = Instant::now() + min_block;
        let mut entries = self.shared.entries.lock();
        loop {
            if !entries.contains_key(key) {
                entries.insert(key.to_string(), PendingEntry { source, data });
                drop(entries);

                let shared = self.shared.clone();
                let release_key = key.to_string();
                self.scheduler.schedule_fn(max_wait, None, Repeat::Once, Owner::Controller, move || {
                    let mut entries = shared.entries.lock();
                    entries.remove(&release_key);
                    shared.condvar.notify_all();
                });
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.shared.condvar.wait_for(&mut entries, deadline - now);
        }
    }

    /// Consumes the entry for `key` if present, notifying anyone blocked in
    /// `try_queue` waiting for it to free up.
    pub fn try_release(&self, key: &str) -> Option<PendingEntry> {
        let released = self.shared.entries.lock().remove(key);
        self.shared.condvar.notify_all();
        released
    }

    pub fn contains(&self, key: &str) -> bool {
        self.shared.entries.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_queue_for_same_key_is_rejected_until_released() {
        let scheduler = Arc::new(Scheduler::new(2));
        let pending = PendingUpdates::new(scheduler.clone());

        assert!(pending.try_queue("zwave:node:5", UpdateSource::PLUGIN, "on", Duration::from_millis(5), Duration::from_secs(5)));
        assert!(!pending.try_queue("zwave:node:5", UpdateSource::API, "off", Duration::from_millis(5), Duration::from_secs(5)));

        let released = pending.try_release("zwave:node:5").unwrap();
        assert_eq!(released.source, UpdateSource::PLUGIN);
        assert_eq!(released.data, "on");
        assert!(pending.try_release("zwave:node:5").is_none());

        Arc::try_unwrap(scheduler).unwrap_or_else(|_| panic!("scheduler still shared")).shutdown();
    }

    #[test]
    fn queue_blocks_until_released_within_min_block_window() {
        let scheduler = Arc::new(Scheduler::new(2));
        let pending = Arc::new(PendingUpdates::new(scheduler.clone()));

        assert!(pending.try_queue("rfxcom", UpdateSource::PLUGIN, "cmd-1", Duration::from_millis(1), Duration::from_secs(5)));

        let releaser = pending.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            releaser.try_release("rfxcom");
        });

        assert!(pending.try_queue("rfxcom", UpdateSource::API, "cmd-2", Duration::from_millis(200), Duration::from_secs(5)));

        Arc::try_unwrap(scheduler).unwrap_or_else(|_| panic!("scheduler still shared")).shutdown();
    }

    #[test]
    fn auto_release_clears_key_after_max_wait() {
        let scheduler = Arc::new(Scheduler::new(2));
        let pending = PendingUpdates::new(scheduler.clone());

        assert!(pending.try_queue("harmony_hub_1", UpdateSource::PLUGIN, "activity", Duration::from_millis(1), Duration::from_millis(20)));
        assert!(pending.contains("harmony_hub_1"));
        std::thread::sleep(Duration::from_millis(80));
        assert!(!pending.contains("harmony_hub_1"));

        Arc::try_unwrap(scheduler).unwrap_or_else(|_| panic!("scheduler still shared")).shutdown();
    }
}
