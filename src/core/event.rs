//! Read-only view of a calendar object.
//!
//! Built from VCALENDAR text: the master VEVENT (the first VEVENT without a
//! RECURRENCE-ID) provides the start, recurrence data and alarm definitions;
//! VEVENTs with a RECURRENCE-ID become overrides.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use super::alarm::{AlarmAction, UnknownAction};
use super::ical::{
    Component, IcalError, Property, Trigger, parse_date_time, parse_date_time_list, resolve_tzid,
};
use super::types::EventPath;

/// Why a single VALARM could not be turned into an alarm.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlarmDefinitionError {
    #[error("VALARM #{0} has no ACTION")]
    MissingAction(usize),

    #[error("VALARM #{index}: {source}")]
    Action {
        index: usize,
        #[source]
        source: UnknownAction,
    },

    #[error("VALARM #{0} has no TRIGGER")]
    MissingTrigger(usize),

    #[error("VALARM #{index}: {source}")]
    Trigger {
        index: usize,
        #[source]
        source: IcalError,
    },

    #[error("VALARM #{0} fires outside the supported date range")]
    OutOfRange(usize),

    #[error("no VALARM at position {0}")]
    NotFound(usize),
}

/// One VALARM of the master VEVENT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmDefinition {
    /// Position among the master VEVENT's VALARMs.
    pub index: usize,
    pub action: AlarmAction,
    pub trigger: Trigger,
    /// ATTENDEE with any `mailto:` prefix stripped.
    pub recipient: Option<String>,
}

/// A modified or cancelled instance of a recurring event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    /// Original start of the instance being replaced.
    pub recurrence_id: DateTime<Utc>,
    /// Start of the replacement instance.
    pub start: DateTime<Utc>,
    /// `STATUS:CANCELLED` instances are removed from the set.
    pub cancelled: bool,
}

/// A parsed calendar object.
#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub path: EventPath,
    pub uid: String,
    pub summary: Option<String>,
    /// Start of the first occurrence.
    pub start: DateTime<Utc>,
    /// Timezone of DTSTART when given through TZID.
    pub timezone: Option<Tz>,
    /// Raw RRULE values.
    pub rrules: Vec<String>,
    pub exdates: Vec<DateTime<Utc>>,
    pub rdates: Vec<DateTime<Utc>>,
    pub overrides: Vec<Override>,
    alarms: Vec<Component>,
    source: String,
}

impl CalendarEvent {
    /// Parse VCALENDAR text.
    pub fn parse(path: EventPath, ics: &str) -> Result<Self, IcalError> {
        let root = Component::parse(ics)?;

        let mut events = if root.name == "VEVENT" {
            vec![&root]
        } else {
            root.components_named("VEVENT").collect::<Vec<_>>()
        };
        let master_idx = events
            .iter()
            .position(|e| e.property("RECURRENCE-ID").is_none())
            .ok_or_else(|| IcalError::MissingComponent("VEVENT".to_string()))?;
        let master = events.remove(master_idx);

        let dtstart = master
            .property("DTSTART")
            .ok_or_else(|| IcalError::MissingProperty("DTSTART".to_string()))?;
        let start = parse_date_time(dtstart)?;
        let timezone = match dtstart.param("TZID") {
            Some(tzid) if !is_date_value(dtstart) => Some(resolve_tzid(tzid)?),
            _ => None,
        };

        let mut exdates = Vec::new();
        for prop in master.properties_named("EXDATE") {
            exdates.extend(parse_date_time_list(prop)?);
        }
        let mut rdates = Vec::new();
        for prop in master.properties_named("RDATE") {
            // PERIOD values are not supported.
            if prop.param("VALUE").is_some_and(|v| v.eq_ignore_ascii_case("PERIOD")) {
                continue;
            }
            rdates.extend(parse_date_time_list(prop)?);
        }

        let mut overrides = Vec::new();
        for instance in events {
            let Some(recurrence_id) = instance.property("RECURRENCE-ID") else {
                continue;
            };
            let recurrence_id = parse_date_time(recurrence_id)?;
            let start = match instance.property("DTSTART") {
                Some(prop) => parse_date_time(prop)?,
                None => recurrence_id,
            };
            let cancelled = instance
                .value("STATUS")
                .is_some_and(|s| s.trim().eq_ignore_ascii_case("CANCELLED"));
            overrides.push(Override {
                recurrence_id,
                start,
                cancelled,
            });
        }

        Ok(Self {
            path,
            uid: master.value("UID").unwrap_or_default().trim().to_string(),
            summary: master.value("SUMMARY").map(unescape_text),
            start,
            timezone,
            rrules: master
                .properties_named("RRULE")
                .map(|p| p.value.trim().to_string())
                .collect(),
            exdates,
            rdates,
            overrides,
            alarms: master.components_named("VALARM").cloned().collect(),
            source: ics.to_string(),
        })
    }

    /// Whether the event repeats (RRULE or RDATE present).
    pub fn is_recurring(&self) -> bool {
        !self.rrules.is_empty() || !self.rdates.is_empty()
    }

    /// The VCALENDAR text this event was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of VALARMs on the master VEVENT.
    pub fn alarm_count(&self) -> usize {
        self.alarms.len()
    }

    /// Every VALARM of the master VEVENT, each parsed independently.
    pub fn alarm_definitions(&self) -> Vec<Result<AlarmDefinition, AlarmDefinitionError>> {
        self.alarms
            .iter()
            .enumerate()
            .map(|(index, valarm)| parse_definition(index, valarm))
            .collect()
    }

    /// The VALARM at `index`.
    pub fn alarm_definition(&self, index: usize) -> Result<AlarmDefinition, AlarmDefinitionError> {
        let valarm = self
            .alarms
            .get(index)
            .ok_or(AlarmDefinitionError::NotFound(index))?;
        parse_definition(index, valarm)
    }

    /// DTSTART rendered for the recurrence engine.
    ///
    /// Keeps TZID so expansion follows local wall-clock time across DST
    /// changes; floating and date values are pinned to UTC.
    pub fn dtstart_line(&self) -> String {
        match self.timezone {
            Some(tz) => {
                let local = self.start.with_timezone(&tz);
                format!("DTSTART;TZID={}:{}", tz.name(), local.format("%Y%m%dT%H%M%S"))
            }
            None => format!("DTSTART:{}", self.start.format("%Y%m%dT%H%M%SZ")),
        }
    }
}

fn parse_definition(index: usize, valarm: &Component) -> Result<AlarmDefinition, AlarmDefinitionError> {
    let action = valarm
        .value("ACTION")
        .ok_or(AlarmDefinitionError::MissingAction(index))?
        .parse::<AlarmAction>()
        .map_err(|source| AlarmDefinitionError::Action { index, source })?;

    let trigger = valarm
        .property("TRIGGER")
        .ok_or(AlarmDefinitionError::MissingTrigger(index))?;
    let trigger = Trigger::from_property(trigger)
        .map_err(|source| AlarmDefinitionError::Trigger { index, source })?;

    let recipient = valarm
        .property("ATTENDEE")
        .map(strip_mailto)
        .filter(|r| !r.is_empty());

    Ok(AlarmDefinition {
        index,
        action,
        trigger,
        recipient,
    })
}

fn strip_mailto(attendee: &Property) -> String {
    let value = attendee.value.trim();
    match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("mailto:") => value[7..].to_string(),
        _ => value.to_string(),
    }
}

fn is_date_value(prop: &Property) -> bool {
    prop.param("VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE")) || prop.value.trim().len() == 8
}

fn unescape_text(value: &str) -> String {
    value
        .replace("\\n", "\n")
        .replace("\\N", "\n")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}
