//! The free-form task-options grammar (`"AFTER 5 SECONDS FOR 30 MINUTES"`)
//! and the planner that turns a parsed [`TaskOptions`] into a concrete list
//! of delayed updates.

use std::time::Duration;

use micasa_core::device::switch::SwitchOption;
use micasa_core::device::DeviceValue;
use micasa_core::UpdateSource;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskOptions {
    pub after_sec: f64,
    pub for_sec: f64,
    pub repeat: u32,
    pub interval_sec: f64,
    pub clear: bool,
    pub recur: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        TaskOptions {
            after_sec: 0.0,
            for_sec: 0.0,
            repeat: 1,
            interval_sec: 0.0,
            clear: false,
            recur: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    After,
    For,
    Repeat,
    Interval,
}

impl TaskOptions {
    /// Parses the textual grammar. Unrecognized tokens are ignored (per the
    /// CLI's "unknown flags are ignored" posture carried into this parser
    /// too — a typo in a script's options string shouldn't abort the whole
    /// update).
    pub fn parse(raw: &str) -> TaskOptions {
        let mut opts = TaskOptions::default();
        let mut slot: Option<Slot> = None;
        let mut pending = 0.0_f64;
        let mut has_pending = false;

        let mut commit = |opts: &mut TaskOptions, slot: Option<Slot>, value: f64| match slot {
            Some(Slot::After) => opts.after_sec = value,
            Some(Slot::For) => opts.for_sec = value,
            Some(Slot::Repeat) => opts.repeat = value.max(0.0) as u32,
            Some(Slot::Interval) => opts.interval_sec = value,
            None => {}
        };

        for token in raw.split_whitespace() {
            let upper = token.to_ascii_uppercase();
            match upper.as_str() {
                "AFTER" => {
                    if has_pending {
                        commit(&mut opts, slot, pending);
                    }
                    slot = Some(Slot::After);
                    pending = 0.0;
                    has_pending = false;
                }
                "FOR" => {
                    if has_pending {
                        commit(&mut opts, slot, pending);
                    }
                    slot = Some(Slot::For);
                    pending = 0.0;
                    has_pending = false;
                }
                "REPEAT" => {
                    if has_pending {
                        commit(&mut opts, slot, pending);
                    }
                    slot = Some(Slot::Repeat);
                    pending = 0.0;
                    has_pending = false;
                }
                "INTERVAL" => {
                    if has_pending {
                        commit(&mut opts, slot, pending);
                    }
                    slot = Some(Slot::Interval);
                    pending = 0.0;
                    has_pending = false;
                }
                "CLEAR" => opts.clear = true,
                "RECUR" => opts.recur = true,
                "SECOND" | "SECONDS" => has_pending = true,
                "MINUTE" | "MINUTES" => {
                    pending *= 60.0;
                    has_pending = true;
                }
                "HOUR" | "HOURS" => {
                    pending *= 3600.0;
                    has_pending = true;
                }
                other => {
                    if let Ok(number) = other.parse::<f64>() {
                        pending = number;
                        has_pending = true;
                    }
                }
            }
        }
        if has_pending {
            commit(&mut opts, slot, pending);
        }
        opts
    }

    /// `source` with script/timer/link bits cleared when `recur` is set, so
    /// the eventual update re-fires event handlers as if freshly observed.
    pub fn resolve_source(&self, source: UpdateSource) -> UpdateSource {
        if self.recur {
            source - (UpdateSource::TIMER | UpdateSource::SCRIPT | UpdateSource::LINK)
        } else {
            source
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    pub at: Duration,
    pub value: DeviceValue,
}

/// Expands `options` into the concrete sequence of delayed updates it
/// describes, given the target value and the device's current value (used
/// to compute the revert target for non-Switch kinds).
pub fn plan(target_value: DeviceValue, current_value: Option<DeviceValue>, options: &TaskOptions) -> Vec<PlannedUpdate> {
    let repeat = options.repeat.max(1);
    let revert_value = revert_target(&target_value, current_value);
    let mut updates = Vec::with_capacity(repeat as usize * 2);

    for i in 0..repeat {
        let t = options.after_sec + i as f64 * (options.for_sec + options.interval_sec);
        updates.push(PlannedUpdate {
            at: secs(t),
            value: target_value.clone(),
        });

        let is_final = i + 1 == repeat;
        if options.for_sec > 0.05 && !is_final {
            if let Some(revert) = revert_value.clone() {
                updates.push(PlannedUpdate {
                    at: secs(t + options.for_sec),
                    value: revert,
                });
            }
        }
    }
    updates
}

fn revert_target(target_value: &DeviceValue, current_value: Option<DeviceValue>) -> Option<DeviceValue> {
    match target_value {
        DeviceValue::Switch(option) => Some(DeviceValue::Switch(option.opposite())),
        _ => current_value,
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use micasa_core::device::switch::SwitchOption;

    #[test]
    fn parses_after_and_for_with_unit_words() {
        let opts = TaskOptions::parse("AFTER 5 SECONDS FOR 30 MINUTES");
        assert_eq!(opts.after_sec, 5.0);
        assert_eq!(opts.for_sec, 30.0 * 60.0);
    }

    #[test]
    fn flags_do_not_consume_numeric_slots() {
        let opts = TaskOptions::parse("CLEAR RECUR AFTER 2");
        assert!(opts.clear);
        assert!(opts.recur);
        assert_eq!(opts.after_sec, 2.0);
    }

    #[test]
    fn recur_clears_event_bits_but_keeps_plugin_and_api() {
        let opts = TaskOptions::parse("RECUR");
        let resolved = opts.resolve_source(UpdateSource::SCRIPT | UpdateSource::API);
        assert_eq!(resolved, UpdateSource::API);
    }

    #[test]
    fn plan_reverts_switch_to_opposite_between_repeats() {
        let opts = TaskOptions {
            after_sec: 0.0,
            for_sec: 10.0,
            repeat: 2,
            interval_sec: 0.0,
            clear: false,
            recur: false,
        };
        let planned = plan(DeviceValue::Switch(SwitchOption::On), None, &opts);
        assert_eq!(planned.len(), 3);
        assert_eq!(planned[0].value, DeviceValue::Switch(SwitchOption::On));
        assert_eq!(planned[1].value, DeviceValue::Switch(SwitchOption::Off));
        assert_eq!(planned[2].value, DeviceValue::Switch(SwitchOption::On));
    }

    #[test]
    fn plan_without_for_duration_never_reverts() {
        let opts = TaskOptions::default();
        let planned = plan(DeviceValue::Level(2.0), Some(DeviceValue::Level(0.0)), &opts);
        assert_eq!(planned.len(), 1);
    }
}
