//! The `Text` device kind: an arbitrary string, optionally used as a log sink.

use serde::{Deserialize, Serialize};

/// Text sub-type tag; `Log` devices are commonly wired up as the target of
/// `script.log(...)` calls (spec §4.7.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TextSubType {
    #[default]
    Generic,
    Log,
}
