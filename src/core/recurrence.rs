//! Recurrence expansion.
//!
//! A [`RecurrenceEngine`] answers one question: given a calendar event and a
//! window start, when does the next occurrence start (strictly after the
//! window start)? [`RRuleEngine`] delegates base-rule expansion to the
//! `rrule` crate and applies EXDATE, RDATE and RECURRENCE-ID overrides on top.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;
use thiserror::Error;

use super::event::CalendarEvent;
use super::ical::parse_date_time_value;

/// Number of occurrences fetched from the rule per expansion step.
const BATCH_SIZE: u16 = 64;

/// Upper bound on expansion steps before giving up on a rule whose
/// occurrences are all excluded.
const MAX_BATCHES: usize = 64;

/// Errors that can occur while expanding a recurrence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceError {
    /// The RRULE (or DTSTART/RRULE combination) was rejected.
    #[error("invalid recurrence rule: {0}")]
    InvalidRule(String),
}

/// Computes occurrence starts of a calendar event.
pub trait RecurrenceEngine: Send + Sync {
    /// First occurrence start strictly after `after`, or `None` when the
    /// recurrence set is exhausted.
    fn next_occurrence(
        &self,
        event: &CalendarEvent,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, RecurrenceError>;
}

/// [`RecurrenceEngine`] backed by the `rrule` crate.
#[derive(Debug, Clone, Default)]
pub struct RRuleEngine;

impl RRuleEngine {
    pub fn new() -> Self {
        Self
    }

    fn rule_set(event: &CalendarEvent) -> Result<RRuleSet, RecurrenceError> {
        let mut text = event.dtstart_line();
        for rule in &event.rrules {
            text.push('\n');
            text.push_str("RRULE:");
            text.push_str(&until_in_utc(rule, event.timezone));
        }
        text.parse::<RRuleSet>()
            .map_err(|e| RecurrenceError::InvalidRule(e.to_string()))
    }

    /// First rule occurrence after `after` that is neither excluded nor
    /// replaced by an override.
    fn next_from_rules(
        event: &CalendarEvent,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, RecurrenceError> {
        if event.rrules.is_empty() {
            return Ok(None);
        }
        let set = Self::rule_set(event)?;
        let mut cursor = after;

        for _ in 0..MAX_BATCHES {
            let batch = set
                .clone()
                .after(cursor.with_timezone(&rrule::Tz::UTC))
                .all(BATCH_SIZE);

            let dates: Vec<DateTime<Utc>> = batch
                .dates
                .iter()
                .map(|d| d.with_timezone(&Utc))
                .filter(|d| *d > cursor)
                .collect();

            let Some(last) = dates.last().copied() else {
                return Ok(None);
            };
            if let Some(found) = dates.into_iter().find(|d| !is_replaced(event, *d)) {
                return Ok(Some(found));
            }
            cursor = last;
        }

        Ok(None)
    }
}

impl RecurrenceEngine for RRuleEngine {
    fn next_occurrence(
        &self,
        event: &CalendarEvent,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, RecurrenceError> {
        let from_rules = Self::next_from_rules(event, after)?;

        // Without an RRULE the start itself is the first member of the set.
        let start = (event.rrules.is_empty() && event.start > after && !is_replaced(event, event.start))
            .then_some(event.start);

        let from_rdates = event
            .rdates
            .iter()
            .copied()
            .filter(|d| *d > after && !is_replaced(event, *d))
            .min();

        let from_overrides = event
            .overrides
            .iter()
            .filter(|o| !o.cancelled && o.start > after && !event.exdates.contains(&o.recurrence_id))
            .map(|o| o.start)
            .min();

        Ok([from_rules, start, from_rdates, from_overrides]
            .into_iter()
            .flatten()
            .min())
    }
}

/// Rewrite a floating or DATE `UNTIL` as a UTC date-time.
///
/// `rrule` only accepts a UTC UNTIL next to a zoned or UTC DTSTART.
/// Unparsable values are left for it to reject.
fn until_in_utc(rule: &str, tz: Option<Tz>) -> String {
    rule.split(';')
        .map(|part| match part.split_once('=') {
            Some((key, value))
                if key.trim().eq_ignore_ascii_case("UNTIL") && !value.trim().ends_with('Z') =>
            {
                match parse_date_time_value(value.trim(), tz) {
                    Ok(until) => format!("UNTIL={}", until.format("%Y%m%dT%H%M%SZ")),
                    Err(_) => part.to_string(),
                }
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Whether the base occurrence at `start` is excluded or overridden.
fn is_replaced(event: &CalendarEvent, start: DateTime<Utc>) -> bool {
    event.exdates.contains(&start) || event.overrides.iter().any(|o| o.recurrence_id == start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::EventPath;
    use chrono::{Duration, TimeZone};

    fn event(body: &str) -> CalendarEvent {
        let ics = format!("BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:r\n{}END:VEVENT\nEND:VCALENDAR\n", body);
        CalendarEvent::parse(EventPath::new("/r.ics"), &ics).unwrap()
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_next_is_strictly_after() {
        let ev = event("DTSTART:20300101T100000Z\nRRULE:FREQ=DAILY;COUNT=3\n");
        let engine = RRuleEngine::new();

        assert_eq!(engine.next_occurrence(&ev, at(1, 9)).unwrap(), Some(at(1, 10)));
        assert_eq!(engine.next_occurrence(&ev, at(1, 10)).unwrap(), Some(at(2, 10)));
        assert_eq!(
            engine.next_occurrence(&ev, at(1, 10) + Duration::seconds(1)).unwrap(),
            Some(at(2, 10))
        );
    }

    #[test]
    fn test_count_exhausted() {
        let ev = event("DTSTART:20300101T100000Z\nRRULE:FREQ=DAILY;COUNT=3\n");
        let engine = RRuleEngine::new();

        assert_eq!(engine.next_occurrence(&ev, at(3, 10)).unwrap(), None);
    }

    #[test]
    fn test_until_exhausted() {
        let ev = event("DTSTART:20300101T100000Z\nRRULE:FREQ=DAILY;UNTIL=20300102T100000Z\n");
        let engine = RRuleEngine::new();

        assert_eq!(engine.next_occurrence(&ev, at(1, 12)).unwrap(), Some(at(2, 10)));
        assert_eq!(engine.next_occurrence(&ev, at(2, 10)).unwrap(), None);
    }

    #[test]
    fn test_date_until_on_all_day_event() {
        let ev = event("DTSTART;VALUE=DATE:20300101\nRRULE:FREQ=DAILY;UNTIL=20300103\n");
        let engine = RRuleEngine::new();

        assert_eq!(engine.next_occurrence(&ev, at(1, 0)).unwrap(), Some(at(2, 0)));
        assert_eq!(engine.next_occurrence(&ev, at(2, 0)).unwrap(), Some(at(3, 0)));
        assert_eq!(engine.next_occurrence(&ev, at(3, 0)).unwrap(), None);
    }

    #[test]
    fn test_floating_until_on_floating_event() {
        let ev = event("DTSTART:20300101T100000\nRRULE:FREQ=DAILY;UNTIL=20300102T100000\n");
        let engine = RRuleEngine::new();

        assert_eq!(engine.next_occurrence(&ev, at(1, 10)).unwrap(), Some(at(2, 10)));
        assert_eq!(engine.next_occurrence(&ev, at(2, 10)).unwrap(), None);
    }

    #[test]
    fn test_until_rewritten_in_utc() {
        assert_eq!(
            until_in_utc("FREQ=DAILY;UNTIL=20300105", None),
            "FREQ=DAILY;UNTIL=20300105T000000Z"
        );
        assert_eq!(
            until_in_utc("FREQ=DAILY;UNTIL=20300105T100000;COUNT=2", Some(chrono_tz::Europe::Paris)),
            "FREQ=DAILY;UNTIL=20300105T090000Z;COUNT=2"
        );
        assert_eq!(
            until_in_utc("FREQ=WEEKLY;UNTIL=20300105T100000Z", None),
            "FREQ=WEEKLY;UNTIL=20300105T100000Z"
        );
    }

    #[test]
    fn test_exdate_is_skipped() {
        let ev = event("DTSTART:20300101T100000Z\nRRULE:FREQ=DAILY;COUNT=5\nEXDATE:20300102T100000Z\n");
        let engine = RRuleEngine::new();

        assert_eq!(engine.next_occurrence(&ev, at(1, 10)).unwrap(), Some(at(3, 10)));
    }

    #[test]
    fn test_rdate_adds_occurrence() {
        let ev = event("DTSTART:20300101T100000Z\nRRULE:FREQ=DAILY;COUNT=2\nRDATE:20300110T080000Z\n");
        let engine = RRuleEngine::new();

        assert_eq!(engine.next_occurrence(&ev, at(2, 10)).unwrap(), Some(at(10, 8)));
    }

    #[test]
    fn test_rdate_only_event() {
        let ev = event("DTSTART:20300101T100000Z\nRDATE:20300105T100000Z\n");
        let engine = RRuleEngine::new();

        assert!(ev.is_recurring());
        assert_eq!(engine.next_occurrence(&ev, at(1, 0)).unwrap(), Some(at(1, 10)));
        assert_eq!(engine.next_occurrence(&ev, at(1, 10)).unwrap(), Some(at(5, 10)));
        assert_eq!(engine.next_occurrence(&ev, at(5, 10)).unwrap(), None);
    }

    #[test]
    fn test_moved_override_replaces_base_occurrence() {
        let ics = "BEGIN:VCALENDAR\n\
BEGIN:VEVENT\nUID:r\nDTSTART:20300101T100000Z\nRRULE:FREQ=DAILY;COUNT=5\nEND:VEVENT\n\
BEGIN:VEVENT\nUID:r\nRECURRENCE-ID:20300102T100000Z\nDTSTART:20300102T150000Z\nEND:VEVENT\n\
END:VCALENDAR\n";
        let ev = CalendarEvent::parse(EventPath::new("/r.ics"), ics).unwrap();
        let engine = RRuleEngine::new();

        assert_eq!(engine.next_occurrence(&ev, at(1, 10)).unwrap(), Some(at(2, 15)));
        assert_eq!(engine.next_occurrence(&ev, at(2, 15)).unwrap(), Some(at(3, 10)));
    }

    #[test]
    fn test_cancelled_override_is_skipped() {
        let ics = "BEGIN:VCALENDAR\n\
BEGIN:VEVENT\nUID:r\nDTSTART:20300101T100000Z\nRRULE:FREQ=DAILY;COUNT=5\nEND:VEVENT\n\
BEGIN:VEVENT\nUID:r\nRECURRENCE-ID:20300102T100000Z\nSTATUS:CANCELLED\nEND:VEVENT\n\
END:VCALENDAR\n";
        let ev = CalendarEvent::parse(EventPath::new("/r.ics"), ics).unwrap();
        let engine = RRuleEngine::new();

        assert_eq!(engine.next_occurrence(&ev, at(1, 10)).unwrap(), Some(at(3, 10)));
    }

    #[test]
    fn test_dst_keeps_local_wall_clock() {
        // 09:00 Paris is 08:00Z in winter and 07:00Z in summer.
        let ev = event("DTSTART;TZID=Europe/Paris:20300325T090000\nRRULE:FREQ=DAILY\n");
        let engine = RRuleEngine::new();

        let before_switch = Utc.with_ymd_and_hms(2030, 3, 30, 12, 0, 0).unwrap();
        assert_eq!(
            engine.next_occurrence(&ev, before_switch).unwrap(),
            Some(Utc.with_ymd_and_hms(2030, 3, 31, 7, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_window_far_after_start() {
        let ev = event("DTSTART:20300101T100000Z\nRRULE:FREQ=WEEKLY\n");
        let engine = RRuleEngine::new();
        let after = Utc.with_ymd_and_hms(2031, 6, 1, 0, 0, 0).unwrap();

        let next = engine.next_occurrence(&ev, after).unwrap().unwrap();
        assert!(next > after);
        assert!(next - after <= Duration::weeks(1));
    }

    #[test]
    fn test_invalid_rule() {
        let ev = event("DTSTART:20300101T100000Z\nRRULE:FREQ=SOMETIMES\n");
        let engine = RRuleEngine::new();

        assert!(matches!(
            engine.next_occurrence(&ev, at(1, 0)),
            Err(RecurrenceError::InvalidRule(_))
        ));
    }
}
