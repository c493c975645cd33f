//! The 5-field cron grammar (spec §4.7.1, §6): minute, hour, day-of-month,
//! month, day-of-week. No named months/weekdays, no `L`/`W`/`#` — this is
//! intentionally narrower than a general-purpose cron crate, which is why it
//! is hand-written rather than pulled in from the ecosystem (see
//! `SPEC_FULL.md` §4.7).

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Weekday};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    min: u32,
    max: u32,
}

const MINUTE: FieldSpec = FieldSpec { min: 0, max: 59 };
const HOUR: FieldSpec = FieldSpec { min: 0, max: 23 };
const DOM: FieldSpec = FieldSpec { min: 1, max: 31 };
const MONTH: FieldSpec = FieldSpec { min: 1, max: 12 };
/// Day-of-week: 1-7 with Sunday = 7 (spec §6).
const DOW: FieldSpec = FieldSpec { min: 1, max: 7 };

/// A parsed, matchable cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: BTreeSet<u32>,
    hour: BTreeSet<u32>,
    dom: BTreeSet<u32>,
    month: BTreeSet<u32>,
    dow: BTreeSet<u32>,
    source: String,
}

impl CronSchedule {
    /// Parses a 5-field cron expression. Any parse failure means the caller
    /// should disable the owning timer (spec §4.7.1 step/`Any parse
    /// exception disables the timer and logs`).
    pub fn parse(expr: &str) -> Result<CronSchedule> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::InvalidCron(format!(
                "expected 5 whitespace-separated fields, got {}",
                fields.len()
            )));
        }
        Ok(CronSchedule {
            minute: parse_field(fields[0], MINUTE)?,
            hour: parse_field(fields[1], HOUR)?,
            dom: parse_field(fields[2], DOM)?,
            month: parse_field(fields[3], MONTH)?,
            dow: parse_field(fields[4], DOW)?,
            source: expr.to_string(),
        })
    }

    /// The expression this schedule was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether this schedule matches the given local wall-clock instant.
    pub fn matches<Tz: TimeZone>(&self, when: DateTime<Tz>) -> bool {
        let dow = weekday_to_cron(when.weekday());
        self.minute.contains(&when.minute())
            && self.hour.contains(&when.hour())
            && self.dom.contains(&when.day())
            && self.month.contains(&when.month())
            && self.dow.contains(&dow)
    }
}

/// Maps `chrono`'s Monday=0 weekday into the cron 1-7/Sunday=7 convention.
fn weekday_to_cron(weekday: Weekday) -> u32 {
    match weekday {
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
        Weekday::Sun => 7,
    }
}

fn parse_field(field: &str, spec: FieldSpec) -> Result<BTreeSet<u32>> {
    let mut values = BTreeSet::new();
    for sub in field.split(',') {
        parse_sub_expression(sub, spec, &mut values)?;
    }
    if values.is_empty() {
        return Err(Error::InvalidCron(format!("empty field: {field:?}")));
    }
    Ok(values)
}

fn parse_sub_expression(sub: &str, spec: FieldSpec, out: &mut BTreeSet<u32>) -> Result<()> {
    let (range_part, step) = match sub.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| Error::InvalidCron(format!("invalid step: {sub:?}")))?;
            if step == 0 {
                return Err(Error::InvalidCron(format!("step cannot be zero: {sub:?}")));
            }
            (range, step)
        }
        None => (sub, 1),
    };

    let (start, end) = if range_part == "*" {
        (spec.min, spec.max)
    } else if let Some((a, b)) = range_part.split_once('-') {
        let a: u32 = a
            .parse()
            .map_err(|_| Error::InvalidCron(format!("invalid range start: {range_part:?}")))?;
        let b: u32 = b
            .parse()
            .map_err(|_| Error::InvalidCron(format!("invalid range end: {range_part:?}")))?;
        (a, b)
    } else {
        let n: u32 = range_part
            .parse()
            .map_err(|_| Error::InvalidCron(format!("invalid value: {range_part:?}")))?;
        (n, n)
    };

    if start < spec.min || end > spec.max || start > end {
        return Err(Error::InvalidCron(format!(
            "range {start}-{end} outside allowed bounds [{}, {}]",
            spec.min, spec.max
        )));
    }

    let mut v = start;
    while v <= end {
        out.insert(v);
        v += step;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSchedule::parse("* * * *").is_err());
        assert!(CronSchedule::parse("* * * * * *").is_err());
    }

    #[test]
    fn star_matches_every_value_in_range() {
        let s = CronSchedule::parse("* * * * *").unwrap();
        assert_eq!(s.minute.len(), 60);
        assert_eq!(s.hour.len(), 24);
    }

    #[test]
    fn every_five_minutes_matches_expected_set() {
        let s = CronSchedule::parse("*/5 * * * *").unwrap();
        let expected: BTreeSet<u32> = (0..60).step_by(5).collect();
        assert_eq!(s.minute, expected);
    }

    #[test]
    fn comma_list_and_range_combine() {
        let s = CronSchedule::parse("0,30 9-17 * * 1-5").unwrap();
        assert_eq!(s.minute, BTreeSet::from([0, 30]));
        assert_eq!(s.hour, (9..=17).collect::<BTreeSet<_>>());
        assert_eq!(s.dow, BTreeSet::from([1, 2, 3, 4, 5]));
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("* 24 * * *").is_err());
        assert!(CronSchedule::parse("* * 32 * *").is_err());
        assert!(CronSchedule::parse("* * * 13 *").is_err());
        assert!(CronSchedule::parse("* * * * 8").is_err());
    }

    #[test]
    fn sunday_is_seven() {
        let s = CronSchedule::parse("* * * * 7").unwrap();
        // 2024-01-07 was a Sunday.
        let dt = Local.with_ymd_and_hms(2024, 1, 7, 12, 0, 0).unwrap();
        assert!(s.matches(dt));
        let monday = Local.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap();
        assert!(!s.matches(monday));
    }

    #[test]
    fn parsing_is_deterministic_for_matching() {
        let s1 = CronSchedule::parse("*/15 * * * *").unwrap();
        let s2 = CronSchedule::parse("*/15 * * * *").unwrap();
        let now = Local::now();
        assert_eq!(s1.matches(now), s2.matches(now));
    }
}
