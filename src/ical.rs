//! Minimal iCalendar (RFC 5545) event reader
//!
//! Reads the properties of the first `VEVENT` in a calendar object. Folded
//! lines are unfolded first; properties of nested components such as
//! `VALARM` are ignored. Recurrence rules and time zone definitions are not
//! interpreted: date-times are returned as written, without zone conversion.

use chrono::{NaiveDate, NaiveDateTime};

use crate::errors::{AppError, AppResult};
use crate::models::CalendarEventRecord;

/// Status assumed when an event carries no `STATUS`
pub const DEFAULT_STATUS: &str = "CONFIRMED";

/// Parse an iCalendar `DATE` or `DATE-TIME` value
///
/// - 8 characters: `YYYYMMDD`, at local midnight
/// - 15 or more: `YYYYMMDDTHHMMSS`; anything after (such as `Z`) is ignored
///
/// # Errors
///
/// `DateFormat` for any other length or for digits that do not form a date.
pub fn parse_ical_date(value: &str) -> AppResult<NaiveDateTime> {
    let value = value.trim();
    let parsed = match value.len() {
        8 => NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0)),
        n if n >= 15 => value
            .get(..15)
            .and_then(|head| NaiveDateTime::parse_from_str(head, "%Y%m%dT%H%M%S").ok()),
        _ => None,
    };
    parsed.ok_or_else(|| AppError::DateFormat(format!("unsupported iCalendar date '{value}'")))
}

/// Parse the first `VEVENT` of a calendar object
///
/// Returns `Ok(None)` when the event lacks a `UID`, `SUMMARY`, `DTSTART` or
/// `DTEND`, or when the object contains no `VEVENT` at all.
///
/// # Errors
///
/// `DateFormat` when `DTSTART` or `DTEND` is present but malformed.
pub fn parse_event(text: &str, calendar_id: &str) -> AppResult<Option<CalendarEventRecord>> {
    let Some(props) = first_event_properties(text) else {
        return Ok(None);
    };

    let mut uid = None;
    let mut summary = None;
    let mut description = None;
    let mut start = None;
    let mut end = None;
    let mut location = None;
    let mut organizer = None;
    let mut status = None;

    for (name, value) in &props {
        match name.to_ascii_uppercase().as_str() {
            "UID" => uid = non_empty(value.trim().to_owned()),
            "SUMMARY" => summary = non_empty(unescape_text(value)),
            "DESCRIPTION" => description = non_empty(unescape_text(value)),
            "LOCATION" => location = non_empty(unescape_text(value)),
            "STATUS" => status = non_empty(value.trim().to_owned()),
            "ORGANIZER" => organizer = non_empty(strip_mailto(value).to_owned()),
            "DTSTART" => start = Some(parse_ical_date(value)?),
            "DTEND" => end = Some(parse_ical_date(value)?),
            _ => {}
        }
    }

    let (Some(id), Some(summary), Some(start), Some(end)) = (uid, summary, start, end) else {
        return Ok(None);
    };
    Ok(Some(CalendarEventRecord {
        id,
        summary,
        description,
        start,
        end,
        location,
        organizer,
        status: status.unwrap_or_else(|| DEFAULT_STATUS.to_owned()),
        calendar_id: calendar_id.to_owned(),
    }))
}

/// Join continuation lines (leading space or tab) onto the previous line
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in text.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = line.strip_prefix([' ', '\t'])
            && let Some(last) = lines.last_mut()
        {
            last.push_str(rest);
            continue;
        }
        lines.push(line.to_owned());
    }
    lines
}

/// `(name, value)` pairs of the first `VEVENT`, excluding nested components
fn first_event_properties(text: &str) -> Option<Vec<(String, String)>> {
    let mut props = Vec::new();
    let mut in_event = false;
    let mut depth = 0usize;

    for line in unfold(text) {
        let Some((name, value)) = split_property(&line) else {
            continue;
        };
        let is_begin = name.eq_ignore_ascii_case("BEGIN");
        let is_end = name.eq_ignore_ascii_case("END");

        if !in_event {
            if is_begin && value.trim().eq_ignore_ascii_case("VEVENT") {
                in_event = true;
            }
            continue;
        }
        if is_begin {
            depth += 1;
        } else if is_end {
            if depth == 0 {
                return Some(props);
            }
            depth -= 1;
        } else if depth == 0 {
            props.push((name.to_owned(), value.to_owned()));
        }
    }
    in_event.then_some(props)
}

/// Split a content line into its property name and value
///
/// The value is everything after the first colon; parameters between the
/// name and the colon are dropped.
fn split_property(line: &str) -> Option<(&str, &str)> {
    let (head, value) = line.split_once(':')?;
    let name = head.split(';').next().unwrap_or(head).trim();
    (!name.is_empty()).then_some((name, value))
}

/// Decode `TEXT` escapes: `\n`, `\N`, `\,`, `\;` and `\\`
fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(other @ (',' | ';' | '\\')) => out.push(other),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn strip_mailto(value: &str) -> &str {
    let value = value.trim();
    match value.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("mailto:") => &value[7..],
        _ => value,
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}
