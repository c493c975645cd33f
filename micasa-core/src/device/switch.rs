//! The `Switch` device kind: a discrete option picked from a closed set.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One of the discrete states a [`Switch`](super::DeviceKind::Switch) device
/// can hold. Every variant has a defined opposite — see
/// [`SwitchOption::opposite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwitchOption {
    On,
    Off,
    Open,
    Close,
    Stop,
    Start,
    Enabled,
    Disabled,
    Idle,
    /// Momentary "fire and forget" state; the pipeline auto-reverts this to
    /// [`SwitchOption::Idle`] a few seconds after it is applied.
    Activate,
}

impl SwitchOption {
    /// All ten options, in declaration order — used for wire (de)serialization
    /// and for building lookup tables.
    pub const ALL: [SwitchOption; 10] = [
        SwitchOption::On,
        SwitchOption::Off,
        SwitchOption::Open,
        SwitchOption::Close,
        SwitchOption::Stop,
        SwitchOption::Start,
        SwitchOption::Enabled,
        SwitchOption::Disabled,
        SwitchOption::Idle,
        SwitchOption::Activate,
    ];

    /// The textual wire form, as stored in `device_switch_history.value` and
    /// accepted back by [`SwitchOption::parse`].
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchOption::On => "On",
            SwitchOption::Off => "Off",
            SwitchOption::Open => "Open",
            SwitchOption::Close => "Close",
            SwitchOption::Stop => "Stop",
            SwitchOption::Start => "Start",
            SwitchOption::Enabled => "Enabled",
            SwitchOption::Disabled => "Disabled",
            SwitchOption::Idle => "Idle",
            SwitchOption::Activate => "Activate",
        }
    }

    /// Parses the textual wire form produced by [`SwitchOption::as_str`].
    pub fn parse(value: &str) -> Result<SwitchOption> {
        Self::ALL
            .into_iter()
            .find(|opt| opt.as_str() == value)
            .ok_or_else(|| Error::UnknownSwitchOption(value.to_string()))
    }

    /// The option this one flips to. Every option has one: `On`/`Off`,
    /// `Open`/`Close`, `Stop`/`Start`, `Enabled`/`Disabled` and
    /// `Idle`/`Activate` are each other's opposite.
    ///
    /// `opposite(opposite(x)) == x` for every `x` — exercised directly in
    /// the tests below, as the round-trip property from spec §8.
    pub fn opposite(self) -> SwitchOption {
        match self {
            SwitchOption::On => SwitchOption::Off,
            SwitchOption::Off => SwitchOption::On,
            SwitchOption::Open => SwitchOption::Close,
            SwitchOption::Close => SwitchOption::Open,
            SwitchOption::Stop => SwitchOption::Start,
            SwitchOption::Start => SwitchOption::Stop,
            SwitchOption::Enabled => SwitchOption::Disabled,
            SwitchOption::Disabled => SwitchOption::Enabled,
            SwitchOption::Idle => SwitchOption::Activate,
            SwitchOption::Activate => SwitchOption::Idle,
        }
    }
}

impl fmt::Display for SwitchOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The switch sub-type tag, driving UI hints and a couple of pipeline
/// special cases (`Action` devices skip the disabled-device event gate,
/// `Scene` devices are typically write-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SwitchSubType {
    #[default]
    Generic,
    Light,
    DoorContact,
    Blinds,
    Motion,
    Scene,
    Action,
}

impl SwitchSubType {
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchSubType::Generic => "generic",
            SwitchSubType::Light => "light",
            SwitchSubType::DoorContact => "door_contact",
            SwitchSubType::Blinds => "blinds",
            SwitchSubType::Motion => "motion",
            SwitchSubType::Scene => "scene",
            SwitchSubType::Action => "action",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_is_involutive() {
        for opt in SwitchOption::ALL {
            assert_eq!(opt.opposite().opposite(), opt);
        }
    }

    #[test]
    fn parse_round_trips_as_str() {
        for opt in SwitchOption::ALL {
            assert_eq!(SwitchOption::parse(opt.as_str()).unwrap(), opt);
        }
    }

    #[test]
    fn parse_rejects_unknown_value() {
        assert!(SwitchOption::parse("Banana").is_err());
    }
}
