//! Pure gate logic an incoming device value update must pass before it is
//! committed. No I/O here — [`Controller`](crate::controller::Controller)
//! is the only caller, and it supplies the plugin state and elapsed time the
//! gates need from its own bookkeeping.

use std::time::Duration;

use micasa_core::device::Device;
use micasa_core::device::DeviceValue;
use micasa_core::plugin::PluginState;
use micasa_core::UpdateSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Disabled,
    SourceNotAllowed,
    DuplicateValue,
    LevelOutOfRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Gate {
    Rejected(RejectReason),
    /// Passed every gate. Carries the *raw* value to commit — for `Level`
    /// devices this is the unscaled reading; `LevelRange::apply` is only
    /// used here to decide accept/reject, and divider/offset are applied
    /// again by readers at query time, not baked into storage.
    Accepted(DeviceValue),
    /// Below the configured rate-limit window; re-evaluate after `remaining`.
    RateLimited { remaining: Duration },
}

/// Evaluates the update gates in the fixed order: enabled, allowed source,
/// duplicate suppression, level range, rate limiting.
///
/// `is_action_switch` carves out the one enabled-gate exception: a disabled
/// Switch device with subtype `action` still accepts plugin-sourced updates
/// (it represents a momentary trigger, not a toggleable state).
pub fn evaluate(
    device: &Device,
    is_action_switch: bool,
    plugin_state: PluginState,
    source: UpdateSource,
    value: &DeviceValue,
    elapsed_since_last_update: Option<Duration>,
) -> Gate {
    if !device.enabled && !is_action_switch && !source.contains(UpdateSource::PLUGIN) {
        return Gate::Rejected(RejectReason::Disabled);
    }

    if let Some(allowed) = device.settings.allowed_update_sources {
        if !allowed.contains(source) {
            return Gate::Rejected(RejectReason::SourceNotAllowed);
        }
    }

    let ready = plugin_state.is_ready_or_above();

    if ready && device.settings.ignore_duplicates && device.value.as_ref() == Some(value) {
        return Gate::Rejected(RejectReason::DuplicateValue);
    }

    if let DeviceValue::Level(raw) = *value {
        if device.settings.level_range.apply(raw).is_err() {
            return Gate::Rejected(RejectReason::LevelOutOfRange);
        }
    }
    let value = value.clone();

    if ready {
        if let Some(rate_limit_secs) = device.settings.rate_limit {
            let window = Duration::from_secs_f64(rate_limit_secs.max(0.0));
            match elapsed_since_last_update {
                Some(elapsed) if elapsed < window => {
                    return Gate::RateLimited {
                        remaining: window - elapsed,
                    }
                }
                _ => {}
            }
        }
    }

    Gate::Accepted(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use micasa_core::device::switch::SwitchOption;
    use micasa_core::device::DeviceSettings;

    fn device_with(settings: DeviceSettings, enabled: bool, value: Option<DeviceValue>) -> Device {
        let kind = value.as_ref().map(DeviceValue::kind).unwrap_or(micasa_core::device::DeviceKind::Switch);
        Device {
            id: 1,
            plugin_id: 1,
            reference: "ref".into(),
            label: "label".into(),
            name: None,
            kind,
            enabled,
            value,
            previous_value: None,
            last_updated: None,
            last_source: None,
            settings,
        }
    }

    #[test]
    fn disabled_device_rejects_non_plugin_updates() {
        let device = device_with(DeviceSettings::default(), false, None);
        let gate = evaluate(
            &device,
            false,
            PluginState::Ready,
            UpdateSource::API,
            &DeviceValue::Switch(SwitchOption::On),
            None,
        );
        assert_eq!(gate, Gate::Rejected(RejectReason::Disabled));
    }

    #[test]
    fn disabled_action_switch_still_accepts_plugin_updates() {
        let device = device_with(DeviceSettings::default(), false, None);
        let gate = evaluate(
            &device,
            true,
            PluginState::Ready,
            UpdateSource::PLUGIN,
            &DeviceValue::Switch(SwitchOption::Activate),
            None,
        );
        assert_eq!(gate, Gate::Accepted(DeviceValue::Switch(SwitchOption::Activate)));
    }

    #[test]
    fn source_outside_allowed_mask_is_rejected() {
        let mut settings = DeviceSettings::default();
        settings.allowed_update_sources = Some(UpdateSource::PLUGIN);
        let device = device_with(settings, true, None);
        let gate = evaluate(
            &device,
            false,
            PluginState::Ready,
            UpdateSource::API,
            &DeviceValue::Switch(SwitchOption::On),
            None,
        );
        assert_eq!(gate, Gate::Rejected(RejectReason::SourceNotAllowed));
    }

    #[test]
    fn duplicate_is_only_suppressed_once_plugin_is_ready() {
        let mut settings = DeviceSettings::default();
        settings.ignore_duplicates = true;
        let value = DeviceValue::Switch(SwitchOption::On);
        let device = device_with(settings.clone(), true, Some(value.clone()));

        let not_ready = evaluate(&device, false, PluginState::Init, UpdateSource::PLUGIN, &value, None);
        assert_eq!(not_ready, Gate::Accepted(value.clone()));

        let ready = evaluate(&device, false, PluginState::Ready, UpdateSource::PLUGIN, &value, None);
        assert_eq!(ready, Gate::Rejected(RejectReason::DuplicateValue));
    }

    #[test]
    fn level_outside_range_is_rejected_and_inside_passes_through_raw() {
        let mut settings = DeviceSettings::default();
        settings.level_range = micasa_core::device::level::LevelRange {
            divider: Some(10.0),
            offset: Some(1.0),
            minimum: Some(0.0),
            maximum: Some(50.0),
        };
        let device = device_with(settings, true, None);

        let rejected = evaluate(&device, false, PluginState::Ready, UpdateSource::PLUGIN, &DeviceValue::Level(600.0), None);
        assert_eq!(rejected, Gate::Rejected(RejectReason::LevelOutOfRange));

        // Range-checked against the scaled value (100/10+1 = 11, inside [0,50]),
        // but the *raw* 100.0 is what gets carried forward to commit/history.
        let accepted = evaluate(&device, false, PluginState::Ready, UpdateSource::PLUGIN, &DeviceValue::Level(100.0), None);
        assert_eq!(accepted, Gate::Accepted(DeviceValue::Level(100.0)));
    }

    #[test]
    fn rate_limit_defers_within_window_and_accepts_after() {
        let mut settings = DeviceSettings::default();
        settings.rate_limit = Some(5.0);
        let device = device_with(settings, true, None);

        let inside = evaluate(
            &device,
            false,
            PluginState::Ready,
            UpdateSource::PLUGIN,
            &DeviceValue::Level(1.0),
            Some(Duration::from_secs(2)),
        );
        assert_eq!(
            inside,
            Gate::RateLimited {
                remaining: Duration::from_secs(3)
            }
        );

        let outside = evaluate(
            &device,
            false,
            PluginState::Ready,
            UpdateSource::PLUGIN,
            &DeviceValue::Level(1.0),
            Some(Duration::from_secs(6)),
        );
        assert_eq!(outside, Gate::Accepted(DeviceValue::Level(1.0)));
    }
}
