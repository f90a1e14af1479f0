//! Date window expansion.
//!
//! The window ends at a symbolic or explicit date and starts `offset_days`
//! away from it. Each day `d` in `[start, end)` yields one target with
//! `{start_date} = d` and `{end_date} = d + 1`.

use std::fmt::Write;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use super::Target;
use crate::domain::{EndDate, template};
use crate::{Error, Result};

/// Date format used in destination file names, independent of the URL format.
const FILE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Resolve the end of the window relative to `today`.
pub fn resolve_end_date(end: &EndDate, date_format: &str, today: NaiveDate) -> Result<NaiveDate> {
    match end {
        EndDate::Now => Ok(today),
        EndDate::Yesterday => shift_days(today, -1),
        EndDate::Explicit(raw) => parse_date(raw, date_format),
    }
}

/// Parse an explicit date, trying the configured format before ISO forms.
pub fn parse_date(raw: &str, date_format: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, date_format)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, date_format).map(|dt| dt.date()))
        .or_else(|_| NaiveDate::parse_from_str(raw, FILE_DATE_FORMAT))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").map(|dt| dt.date()))
        .map_err(|_| {
            Error::config(format!(
                "end date '{raw}' does not match format '{date_format}'"
            ))
        })
}

/// `day` moved by `days`. Out-of-range results are configuration errors.
pub fn shift_days(day: NaiveDate, days: i64) -> Result<NaiveDate> {
    TimeDelta::try_days(days)
        .and_then(|delta| day.checked_add_signed(delta))
        .ok_or_else(|| Error::config(format!("{day} shifted by {days} days is out of range")))
}

/// Render `day` with a strftime format. Time fields render as midnight.
pub fn format_date(day: NaiveDate, date_format: &str) -> Result<String> {
    let mut out = String::new();
    write!(out, "{}", day.and_time(NaiveTime::MIN).format(date_format))
        .map_err(|_| Error::config(format!("invalid date format '{date_format}'")))?;
    Ok(out)
}

/// Days in the window, ascending. A negative span is swapped so the later
/// date is always the excluded bound.
pub fn days_in_window(end: NaiveDate, offset_days: i64) -> Result<Vec<NaiveDate>> {
    let start = shift_days(end, offset_days)?;
    let (first, last) = if start <= end { (start, end) } else { (end, start) };

    Ok(first.iter_days().take_while(|day| *day < last).collect())
}

fn file_name(spec_name: &str, url_template: &str, day: NaiveDate, next: NaiveDate) -> String {
    let uses_start = template::has_placeholder(url_template, "start_date");
    let uses_end = template::has_placeholder(url_template, "end_date");
    let start = day.format(FILE_DATE_FORMAT);
    let end = next.format(FILE_DATE_FORMAT);

    match (uses_start, uses_end) {
        (true, true) => format!("{spec_name}_{start}_{end}.json"),
        (true, false) => format!("{spec_name}_{start}.json"),
        (false, true) => format!("{spec_name}_{end}.json"),
        (false, false) => format!("{spec_name}.json"),
    }
}

pub fn expand(
    spec_name: &str,
    url_template: &str,
    end_date: &EndDate,
    date_format: &str,
    offset_days: i64,
    today: NaiveDate,
) -> Result<Vec<Target>> {
    let end = resolve_end_date(end_date, date_format, today)?;
    if end > today {
        tracing::debug!(spec = spec_name, %end, %today, "Date window ends in the future, nothing to expand");
        return Ok(Vec::new());
    }

    days_in_window(end, offset_days)?
        .into_iter()
        .map(|day| {
            let next = shift_days(day, 1)?;
            let start_str = format_date(day, date_format)?;
            let end_str = format_date(next, date_format)?;
            let address = template::render(
                url_template,
                &[("start_date", start_str.as_str()), ("end_date", end_str.as_str())],
            )?;

            let mut target = Target::new(address, file_name(spec_name, url_template, day, next));
            target
                .aux_data
                .insert("start_date".into(), serde_json::Value::String(start_str));
            target
                .aux_data
                .insert("end_date".into(), serde_json::Value::String(end_str));
            Ok(target)
        })
        .collect()
}
