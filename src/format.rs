//! Display text for the sleep history.

use crate::session::SessionRecord;
use chrono::{DateTime, Local};
use std::fmt::Write;

pub const DEFAULT_TIME_FORMAT: &str = "%a %b %d %Y %H:%M";

/// Renders the history list shown to the user. Must be pure.
pub trait HistoryFormatter: Send + Sync {
    fn format(&self, history: &[SessionRecord]) -> String;
}

impl<F> HistoryFormatter for F
where
    F: Fn(&[SessionRecord]) -> String + Send + Sync,
{
    fn format(&self, history: &[SessionRecord]) -> String {
        self(history)
    }
}

/// One block of plain text per night, in local time.
#[derive(Debug, Clone)]
pub struct PlainFormatter {
    time_format: String,
}

impl PlainFormatter {
    pub fn new(time_format: impl Into<String>) -> Self {
        Self {
            time_format: time_format.into(),
        }
    }

    /// Render epoch milliseconds in local time, falling back to the raw number.
    pub fn timestamp(&self, ms: i64) -> String {
        let Some(utc) = DateTime::from_timestamp_millis(ms) else {
            return ms.to_string();
        };
        let mut out = String::new();
        // An invalid pattern makes chrono report a formatting error
        if write!(out, "{}", utc.with_timezone(&Local).format(&self.time_format)).is_err() {
            return ms.to_string();
        }
        out
    }
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_FORMAT)
    }
}

impl HistoryFormatter for PlainFormatter {
    fn format(&self, history: &[SessionRecord]) -> String {
        let mut out = String::new();
        for (i, night) in history.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            // Writing to a String cannot fail
            let _ = writeln!(out, "Night {}", night.id);
            let _ = writeln!(out, "  Start:   {}", self.timestamp(night.start_time_ms));
            if night.is_in_progress() {
                let _ = writeln!(out, "  End:     in progress");
            } else {
                let _ = writeln!(out, "  End:     {}", self.timestamp(night.end_time_ms));
                let slept = night.duration();
                let _ = writeln!(
                    out,
                    "  Slept:   {}h {:02}m",
                    slept.num_hours(),
                    slept.num_minutes() % 60
                );
            }
            let quality = night.quality.map_or("unrated", |q| q.label());
            let _ = writeln!(out, "  Quality: {quality}");
        }
        out
    }
}
