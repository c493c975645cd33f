//! The `Level` device kind: a real number with a unit, optional scaling and
//! optional clamping.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Scaling and bounds applied to a raw reading before it is staged as the
/// device's value (spec §4.4 step 4, "Range gate").
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LevelRange {
    pub divider: Option<f64>,
    pub offset: Option<f64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl LevelRange {
    /// Applies `divider`/`offset` to `raw`, then checks the result against
    /// `[minimum, maximum]`. Division happens before the offset is added,
    /// mirroring the order the original firmware-facing plugins expect
    /// (scale first, then zero-shift).
    pub fn apply(&self, raw: f64) -> Result<f64> {
        let mut value = raw;
        if let Some(divider) = self.divider {
            if divider != 0.0 {
                value /= divider;
            }
        }
        if let Some(offset) = self.offset {
            value += offset;
        }
        let min = self.minimum.unwrap_or(f64::NEG_INFINITY);
        let max = self.maximum.unwrap_or(f64::INFINITY);
        if value < min || value > max {
            return Err(Error::LevelOutOfRange {
                value,
                min,
                max,
            });
        }
        Ok(value)
    }
}

/// Level sub-type tag (temperature, humidity, power, ...); purely
/// informational to the core but used by plugins to pick a default unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LevelSubType {
    #[default]
    Generic,
    Temperature,
    Humidity,
    Pressure,
    Power,
    Energy,
    Voltage,
    Current,
    Illuminance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_rejects_outside_bounds() {
        let range = LevelRange {
            divider: None,
            offset: None,
            minimum: Some(0.0),
            maximum: Some(100.0),
        };
        assert!(range.apply(150.0).is_err());
        assert!(range.apply(50.0).is_ok());
    }

    #[test]
    fn divider_and_offset_apply_in_order() {
        let range = LevelRange {
            divider: Some(10.0),
            offset: Some(1.0),
            minimum: None,
            maximum: None,
        };
        // 100 / 10 = 10, + 1 = 11
        assert_eq!(range.apply(100.0).unwrap(), 11.0);
    }
}
