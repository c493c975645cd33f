//! The origin of a device value change.
//!
//! Every call into [`Device::update_value`](crate::device::Device) carries one of
//! these as its `source`. The pipeline, the rule engine and the history writer
//! all branch on it, so the bit values are part of the wire contract (see
//! spec §6) and must never be renumbered.

use bitflags::bitflags;

bitflags! {
    /// Flag set identifying where a device update originated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct UpdateSource: u8 {
        /// Update pushed by the owning plugin from hardware I/O.
        const PLUGIN = 1;
        /// Update driven by a cron [`Timer`](crate::rules::Timer).
        const TIMER = 2;
        /// Update driven by a [`Script`](crate::rules::Script) via `updateDevice`.
        const SCRIPT = 4;
        /// Update requested over the REST/HTTPS API.
        const API = 8;
        /// Update driven by a [`Link`](crate::rules::Link).
        const LINK = 16;
        /// Update originating from the controller/scheduler itself (e.g. auto-revert).
        const SYSTEM = 32;
        /// Reentrant internal push (e.g. refresh-after-suspected-mismatch).
        ///
        /// Must be stripped before the pipeline fires events — see
        /// [`UpdateSource::without_internal`].
        const INTERNAL = 64;
    }
}

impl UpdateSource {
    /// `TIMER|SCRIPT|API|LINK` — any source a human or rule, rather than raw
    /// hardware, could have caused.
    pub const USER: UpdateSource = UpdateSource::TIMER
        .union(UpdateSource::SCRIPT)
        .union(UpdateSource::API)
        .union(UpdateSource::LINK);

    /// `TIMER|SCRIPT|LINK` — sources that are themselves rule-engine outputs.
    pub const EVENT: UpdateSource = UpdateSource::TIMER
        .union(UpdateSource::SCRIPT)
        .union(UpdateSource::LINK);

    /// All flags except [`UpdateSource::INTERNAL`], the default
    /// `allowed_update_sources` for a freshly declared device.
    pub const ANY: UpdateSource = UpdateSource::all().difference(UpdateSource::INTERNAL);

    /// Returns this source with the [`UpdateSource::INTERNAL`] bit cleared.
    ///
    /// The update pipeline calls this immediately before handing a source to
    /// `Controller::new_event` — internal reentrant pushes must never look
    /// like INTERNAL to rule code.
    pub fn without_internal(self) -> UpdateSource {
        self.difference(UpdateSource::INTERNAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_fixed() {
        assert_eq!(UpdateSource::PLUGIN.bits(), 1);
        assert_eq!(UpdateSource::TIMER.bits(), 2);
        assert_eq!(UpdateSource::SCRIPT.bits(), 4);
        assert_eq!(UpdateSource::API.bits(), 8);
        assert_eq!(UpdateSource::LINK.bits(), 16);
        assert_eq!(UpdateSource::SYSTEM.bits(), 32);
        assert_eq!(UpdateSource::INTERNAL.bits(), 64);
    }

    #[test]
    fn derived_masks() {
        assert_eq!(UpdateSource::USER.bits(), 2 | 4 | 8 | 16);
        assert_eq!(UpdateSource::EVENT.bits(), 2 | 4 | 16);
        assert_eq!(UpdateSource::ANY.bits(), 0x7F & !64);
    }

    #[test]
    fn without_internal_strips_only_that_bit() {
        let s = UpdateSource::PLUGIN | UpdateSource::INTERNAL;
        assert_eq!(s.without_internal(), UpdateSource::PLUGIN);
    }
}
