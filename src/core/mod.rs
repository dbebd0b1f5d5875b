//! Core domain types: identifiers, the alarm record, the iCalendar reader and
//! recurrence expansion.

pub mod alarm;
pub mod event;
pub mod ical;
pub mod recurrence;
pub mod retry;
pub mod types;
