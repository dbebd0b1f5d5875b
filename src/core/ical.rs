//! Minimal iCalendar (RFC 5545) reader.
//!
//! Parses content lines into a component tree and converts the value types
//! the alarm engine needs (DATE, DATE-TIME, DURATION, TRIGGER). The reader is
//! tolerant: unknown properties and components are kept as-is and nothing is
//! validated beyond what is needed to compute alarm due dates.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt;
use thiserror::Error;

const DATE_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";
const DATE_FORMAT: &str = "%Y%m%d";

/// Errors that can occur while reading iCalendar data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IcalError {
    /// A content line could not be split into name, parameters and value.
    #[error("malformed content line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    /// BEGIN/END markers do not pair up.
    #[error("unbalanced component: {0}")]
    Unbalanced(String),

    /// A required component is absent.
    #[error("no {0} component found")]
    MissingComponent(String),

    /// A required property is absent.
    #[error("missing property: {0}")]
    MissingProperty(String),

    /// DATE or DATE-TIME value could not be parsed.
    #[error("invalid date-time: {0}")]
    InvalidDateTime(String),

    /// DURATION value could not be parsed.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// TZID does not name a known IANA timezone.
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// A single property: `NAME;PARAM=VALUE:value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Upper-cased property name.
    pub name: String,
    /// Parameters in declaration order, names upper-cased.
    pub params: Vec<(String, String)>,
    /// Raw (unescaped) value.
    pub value: String,
}

impl Property {
    /// Look up a parameter value by name (case-insensitive).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Render the property back into a content line (without folding).
    pub fn to_line(&self) -> String {
        let mut line = self.name.clone();
        for (key, value) in &self.params {
            line.push(';');
            line.push_str(key);
            line.push('=');
            if value.contains([':', ';', ',']) {
                line.push('"');
                line.push_str(value);
                line.push('"');
            } else {
                line.push_str(value);
            }
        }
        line.push(':');
        line.push_str(&self.value);
        line
    }
}

/// A component (`BEGIN:NAME` ... `END:NAME`) with its properties and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Upper-cased component name (VCALENDAR, VEVENT, VALARM, ...).
    pub name: String,
    /// Properties in declaration order.
    pub properties: Vec<Property>,
    /// Nested components in declaration order.
    pub components: Vec<Component>,
}

impl Component {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            components: Vec::new(),
        }
    }

    /// Parse iCalendar text and return its first top-level component.
    pub fn parse(text: &str) -> Result<Self, IcalError> {
        let mut stack: Vec<Component> = Vec::new();

        for (line_no, line) in unfold(text) {
            if line.trim().is_empty() {
                continue;
            }
            let property = parse_line(line_no, &line)?;

            match property.name.as_str() {
                "BEGIN" => stack.push(Component::new(property.value.trim().to_ascii_uppercase())),
                "END" => {
                    let name = property.value.trim().to_ascii_uppercase();
                    let component = stack
                        .pop()
                        .ok_or_else(|| IcalError::Unbalanced(format!("END:{} without BEGIN", name)))?;
                    if component.name != name {
                        return Err(IcalError::Unbalanced(format!(
                            "END:{} closes {}",
                            name, component.name
                        )));
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.components.push(component),
                        None => return Ok(component),
                    }
                }
                _ => {
                    let current = stack.last_mut().ok_or_else(|| IcalError::MalformedLine {
                        line: line_no,
                        reason: "property outside of any component".to_string(),
                    })?;
                    current.properties.push(property);
                }
            }
        }

        match stack.first() {
            Some(open) => Err(IcalError::Unbalanced(format!("{} is never closed", open.name))),
            None => Err(IcalError::MissingComponent("VCALENDAR".to_string())),
        }
    }

    /// First property with the given name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// All properties with the given name.
    pub fn properties_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Property> + 'a {
        self.properties
            .iter()
            .filter(move |p| p.name.eq_ignore_ascii_case(name))
    }

    /// Value of the first property with the given name.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.property(name).map(|p| p.value.as_str())
    }

    /// All direct children with the given component name.
    pub fn components_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Component> + 'a {
        self.components
            .iter()
            .filter(move |c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Timing of an alarm relative to its occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Signed offset from the occurrence start.
    Relative(Duration),
    /// Fixed point in time (`VALUE=DATE-TIME`).
    Absolute(DateTime<Utc>),
}

impl Trigger {
    /// Parse a TRIGGER property.
    pub fn from_property(property: &Property) -> Result<Self, IcalError> {
        let is_absolute = property
            .param("VALUE")
            .is_some_and(|v| v.eq_ignore_ascii_case("DATE-TIME"));

        if is_absolute {
            parse_date_time(property).map(Trigger::Absolute)
        } else {
            parse_duration(&property.value).map(Trigger::Relative)
        }
    }

    /// Fire time of this trigger for an occurrence starting at `start`.
    ///
    /// Returns `None` when the offset moves the instant out of range.
    pub fn fire_time(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Relative(offset) => start.checked_add_signed(*offset),
            Trigger::Absolute(at) => Some(*at),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Relative(offset) => f.write_str(&format_duration(*offset)),
            Trigger::Absolute(at) => write!(f, "{}", at.format("%Y%m%dT%H%M%SZ")),
        }
    }
}

/// Split text into logical content lines, undoing RFC 5545 line folding.
///
/// Returns `(line_number, line)` pairs where the number is that of the first
/// physical line.
fn unfold(text: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = raw.strip_prefix([' ', '\t'])
            && let Some((_, last)) = lines.last_mut()
        {
            last.push_str(rest);
            continue;
        }
        lines.push((idx + 1, raw.to_string()));
    }

    lines
}

/// Split a content line into a property.
fn parse_line(line_no: usize, line: &str) -> Result<Property, IcalError> {
    let malformed = |reason: &str| IcalError::MalformedLine {
        line: line_no,
        reason: reason.to_string(),
    };

    let name_end = line
        .find([';', ':'])
        .ok_or_else(|| malformed("missing ':' separator"))?;
    let name = line[..name_end].trim().to_ascii_uppercase();
    if name.is_empty() {
        return Err(malformed("empty property name"));
    }

    let mut params = Vec::new();
    let mut rest = &line[name_end..];

    while let Some(after_semicolon) = rest.strip_prefix(';') {
        let eq = after_semicolon
            .find('=')
            .ok_or_else(|| malformed("parameter without '='"))?;
        let key = after_semicolon[..eq].trim().to_ascii_uppercase();
        let value_part = &after_semicolon[eq + 1..];

        let (value, consumed) = if let Some(quoted) = value_part.strip_prefix('"') {
            let close = quoted
                .find('"')
                .ok_or_else(|| malformed("unterminated quoted parameter"))?;
            (quoted[..close].to_string(), close + 2)
        } else {
            let end = value_part
                .find([';', ':'])
                .ok_or_else(|| malformed("missing ':' separator"))?;
            (value_part[..end].to_string(), end)
        };

        params.push((key, value));
        rest = &value_part[consumed..];
    }

    let value = rest
        .strip_prefix(':')
        .ok_or_else(|| malformed("missing ':' separator"))?;

    Ok(Property {
        name,
        params,
        value: value.to_string(),
    })
}

/// Resolve a TZID parameter to an IANA timezone.
///
/// Accepts vendor-prefixed identifiers such as
/// `/mozilla.org/20050126_1/Europe/Paris` by retrying on path suffixes.
pub fn resolve_tzid(tzid: &str) -> Result<Tz, IcalError> {
    let trimmed = tzid.trim().trim_matches('"');
    if let Ok(tz) = trimmed.parse::<Tz>() {
        return Ok(tz);
    }
    trimmed
        .match_indices('/')
        .find_map(|(idx, _)| trimmed[idx + 1..].parse::<Tz>().ok())
        .ok_or_else(|| IcalError::UnknownTimezone(tzid.to_string()))
}

/// Parse a single DATE or DATE-TIME property value into a UTC instant.
///
/// UTC values (`Z` suffix) are taken as is, `TZID` values are resolved in
/// their timezone, and floating values and dates are interpreted as UTC.
pub fn parse_date_time(property: &Property) -> Result<DateTime<Utc>, IcalError> {
    let tz = property.param("TZID").map(resolve_tzid).transpose()?;
    parse_date_time_value(property.value.trim(), tz)
}

/// Parse a comma-separated list of DATE or DATE-TIME values (EXDATE, RDATE).
pub fn parse_date_time_list(property: &Property) -> Result<Vec<DateTime<Utc>>, IcalError> {
    let tz = property.param("TZID").map(resolve_tzid).transpose()?;
    property
        .value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| parse_date_time_value(v, tz))
        .collect()
}

/// Parse one DATE or DATE-TIME value, resolving floating values in `tz`
/// (or UTC when `None`).
pub(crate) fn parse_date_time_value(value: &str, tz: Option<Tz>) -> Result<DateTime<Utc>, IcalError> {
    let invalid = || IcalError::InvalidDateTime(value.to_string());

    let naive = if value.len() == 8 {
        NaiveDate::parse_from_str(value, DATE_FORMAT)
            .map_err(|_| invalid())?
            .and_hms_opt(0, 0, 0)
            .ok_or_else(invalid)?
    } else if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, DATE_TIME_FORMAT).map_err(|_| invalid())?;
        return Ok(Utc.from_utc_datetime(&naive));
    } else {
        NaiveDateTime::parse_from_str(value, DATE_TIME_FORMAT).map_err(|_| invalid())?
    };

    match tz {
        Some(tz) => tz
            .from_local_datetime(&naive)
            .earliest()
            // Local times inside a DST gap do not exist; RFC 5545 shifts them forward.
            .or_else(|| {
                let shifted = naive.checked_add_signed(Duration::hours(1))?;
                tz.from_local_datetime(&shifted).earliest()
            })
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(invalid),
        None => Ok(Utc.from_utc_datetime(&naive)),
    }
}

/// Parse an RFC 5545 DURATION value such as `-PT15M`, `P1D` or `P1DT2H`.
pub fn parse_duration(value: &str) -> Result<Duration, IcalError> {
    let invalid = || IcalError::InvalidDuration(value.to_string());
    let trimmed = value.trim();

    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let body = unsigned
        .strip_prefix(['P', 'p'])
        .ok_or_else(invalid)?;
    if body.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::zero();
    let mut number = String::new();
    let mut in_time = false;
    let mut saw_component = false;

    for c in body.chars() {
        match c.to_ascii_uppercase() {
            d if d.is_ascii_digit() => number.push(d),
            'T' if !in_time && number.is_empty() => in_time = true,
            unit => {
                let n: i64 = number.parse().map_err(|_| invalid())?;
                number.clear();
                saw_component = true;
                let component = match (unit, in_time) {
                    ('W', false) => Duration::try_weeks(n),
                    ('D', false) => Duration::try_days(n),
                    ('H', true) => Duration::try_hours(n),
                    ('M', true) => Duration::try_minutes(n),
                    ('S', true) => Duration::try_seconds(n),
                    _ => return Err(invalid()),
                };
                total = component
                    .and_then(|c| total.checked_add(&c))
                    .ok_or_else(invalid)?;
            }
        }
    }

    if !number.is_empty() || !saw_component {
        return Err(invalid());
    }

    Ok(if negative { -total } else { total })
}

/// Render a duration in RFC 5545 form.
pub fn format_duration(duration: Duration) -> String {
    let sign = if duration < Duration::zero() { "-" } else { "" };
    let mut secs = duration.num_seconds().abs();
    if secs == 0 {
        return "PT0S".to_string();
    }

    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3600;
    secs %= 3600;
    let minutes = secs / 60;
    secs %= 60;

    let mut out = format!("{}P", sign);
    if days > 0 {
        out.push_str(&format!("{}D", days));
    }
    if hours > 0 || minutes > 0 || secs > 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{}H", hours));
        }
        if minutes > 0 {
            out.push_str(&format!("{}M", minutes));
        }
        if secs > 0 {
            out.push_str(&format!("{}S", secs));
        }
    }
    out
}
