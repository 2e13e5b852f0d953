//! Time addressing for queries.
//!
//! A value is written in one of three syntaxes, tried in this order:
//!
//! | syntax   | form                  | meaning                                   |
//! |----------|-----------------------|-------------------------------------------|
//! | relative | `1500ms`              | offset from the recording start           |
//! | order    | `12`                  | 1-based sample number of a thread         |
//! | absolute | `2024.03.01/10:00:05` | local wall-clock second                   |
//!
//! A range joins two values of the same syntax with `~`.

use crate::error::{Error, Result};
use crate::model::{SampleWindow, ThreadId, ThreadSnapshot};
use crate::recording::Recording;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

const ABSOLUTE_FORMAT: &str = "%Y.%m.%d/%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeValue {
    /// Milliseconds after the recording start
    Relative(i64),
    /// 1-based sample number
    Order(i64),
    /// Epoch ms of the start of a local wall-clock second
    Absolute(i64),
}

impl TimeValue {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if let Some(ms) = text.strip_suffix("ms").and_then(|n| n.parse::<i64>().ok()) {
            return Ok(TimeValue::Relative(ms));
        }
        if let Ok(order) = text.parse::<i64>() {
            return Ok(TimeValue::Order(order));
        }
        if let Some(ms) = parse_absolute(text) {
            return Ok(TimeValue::Absolute(ms));
        }
        Err(Error::invalid_expr(
            text,
            "expected <n>ms, a sample number or yyyy.MM.dd/HH:mm:ss",
        ))
    }

    fn syntax(&self) -> &'static str {
        match self {
            TimeValue::Relative(_) => "relative",
            TimeValue::Order(_) => "order",
            TimeValue::Absolute(_) => "absolute",
        }
    }
}

/// Inclusive epoch-ms bounds a sample window must lie within to be selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from_ms: i64,
    pub to_ms: i64,
}

impl TimeWindow {
    pub fn selects(&self, window: &SampleWindow) -> bool {
        window.within(self.from_ms, self.to_ms)
    }
}

/// Whether `snapshot` passes an optional window filter
pub fn is_selected(window: Option<&TimeWindow>, snapshot: &ThreadSnapshot) -> bool {
    window.is_none_or(|w| w.selects(&snapshot.window))
}

/// What a point expression designates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePoint {
    /// One instant, epoch ms
    Instant(i64),
    /// 1-based sample number within the thread
    Order(usize),
    /// A whole second: `[start_ms, start_ms + 999]`
    Second(i64),
}

/// Resolve `a~b` against `rec`. Order values index into `thread`'s snapshots.
pub fn resolve_range(rec: &Recording, thread: Option<ThreadId>, expr: &str) -> Result<TimeWindow> {
    let (from_text, to_text) = expr
        .split_once('~')
        .ok_or_else(|| Error::invalid_expr(expr, "a range needs the form FROM~TO"))?;
    let from = TimeValue::parse(from_text)?;
    let to = TimeValue::parse(to_text)?;

    let window = match (from, to) {
        (TimeValue::Relative(a), TimeValue::Relative(b)) => {
            let from_ms = relative_instant(rec, a, expr)?;
            let to_ms = relative_instant(rec, b, expr)?;
            TimeWindow { from_ms, to_ms }
        }
        (TimeValue::Order(a), TimeValue::Order(b)) => {
            let list = thread_samples(rec, thread, expr)?;
            let first = order_index(rec, list, a, expr)?;
            let last = order_index(rec, list, b, expr)?;
            TimeWindow {
                from_ms: list[first].window.start_ms,
                to_ms: list[last].window.end_ms,
            }
        }
        (TimeValue::Absolute(a), TimeValue::Absolute(b)) => {
            let (lo, hi) = absolute_bounds(rec);
            let (from_ms, to_ms) = (a, b + 999);
            if !(lo..=hi).contains(&from_ms) || !(lo..=hi).contains(&to_ms) {
                return Err(Error::OutOfRange(format!(
                    "absolute time {} must be between {} and {}",
                    expr,
                    format_second(lo),
                    format_second(hi)
                )));
            }
            TimeWindow { from_ms, to_ms }
        }
        (a, b) => {
            return Err(Error::invalid_expr(
                expr,
                format!("cannot mix {} and {} values", a.syntax(), b.syntax()),
            ));
        }
    };

    if window.from_ms > window.to_ms {
        return Err(Error::invalid_expr(expr, "the range ends before it starts"));
    }
    Ok(window)
}

/// Resolve a single value for a point query on `thread`
pub fn resolve_point(rec: &Recording, thread: ThreadId, expr: &str) -> Result<TimePoint> {
    match TimeValue::parse(expr)? {
        TimeValue::Relative(ms) => Ok(TimePoint::Instant(relative_instant(rec, ms, expr)?)),
        TimeValue::Order(order) => {
            let total = rec.snapshots(thread).len();
            if order < 1 || order as usize > total {
                return Err(Error::OutOfRange(format!(
                    "order {} must be between 1 and {}",
                    order, total
                )));
            }
            Ok(TimePoint::Order(order as usize))
        }
        TimeValue::Absolute(second) => {
            let (lo, hi) = absolute_bounds(rec);
            if second < lo || second + 999 > hi {
                return Err(Error::OutOfRange(format!(
                    "absolute time {} must be between {} and {}",
                    expr,
                    format_second(lo),
                    format_second(hi)
                )));
            }
            Ok(TimePoint::Second(second))
        }
    }
}

/// Epoch ms `offset` after the recording start, bounded by the recording
fn relative_instant(rec: &Recording, offset: i64, expr: &str) -> Result<i64> {
    let (start, end) = (rec.start_time_ms(), rec.end_time_ms());
    start
        .checked_add(offset)
        .filter(|at| (start..=end).contains(at))
        .ok_or_else(|| {
            Error::OutOfRange(format!(
                "relative time {} must be between 0 and {}ms",
                expr,
                end - start
            ))
        })
}

fn thread_samples<'a>(
    rec: &'a Recording,
    thread: Option<ThreadId>,
    expr: &str,
) -> Result<&'a [ThreadSnapshot]> {
    let thread = thread.ok_or_else(|| Error::invalid_expr(expr, "an order range needs a thread"))?;
    Ok(rec.snapshots(thread))
}

/// 0-based index for a 1-based order, bounded by the sample count and the list
fn order_index(rec: &Recording, list: &[ThreadSnapshot], order: i64, expr: &str) -> Result<usize> {
    let limit = (rec.sample_count() as usize).min(list.len());
    if order < 1 || order as usize > limit {
        return Err(Error::OutOfRange(format!(
            "order {} must be between 1 and {}",
            expr, limit
        )));
    }
    Ok(order as usize - 1)
}

/// Recording bounds widened to whole seconds
fn absolute_bounds(rec: &Recording) -> (i64, i64) {
    (
        truncate_to_second(rec.start_time_ms()),
        truncate_to_second(rec.end_time_ms()) + 999,
    )
}

fn truncate_to_second(ms: i64) -> i64 {
    ms - ms.rem_euclid(1000)
}

fn parse_absolute(text: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(text, ABSOLUTE_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

fn local(ms: i64) -> Option<DateTime<Local>> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.with_timezone(&Local))
}

/// `yyyy.MM.dd/HH:mm:ss.SSS` in local time
pub fn format_timestamp(ms: i64) -> String {
    local(ms)
        .map(|dt| dt.format("%Y.%m.%d/%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// `yyyy.MM.dd/HH:mm:ss` in local time
pub fn format_second(ms: i64) -> String {
    local(ms)
        .map(|dt| dt.format(ABSOLUTE_FORMAT).to_string())
        .unwrap_or_else(|| ms.to_string())
}
