//! Query windows
//!
//! A window is the closed-open interval `[start, end)` that one cost response
//! covers. Windows of a single request are produced by [`Window::split`] and are
//! contiguous, non-overlapping and calendar aligned (UTC).

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::WindowError;

/// Window resolution supported by the provider usage APIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Hourly,
    Daily,
}

impl Resolution {
    /// Length of one window at this resolution
    pub fn duration(&self) -> Duration {
        match self {
            Resolution::Hourly => Duration::hours(1),
            Resolution::Daily => Duration::days(1),
        }
    }

    fn is_aligned(&self, at: DateTime<Utc>) -> bool {
        let on_the_hour = at.minute() == 0 && at.second() == 0 && at.nanosecond() == 0;
        match self {
            Resolution::Hourly => on_the_hour,
            Resolution::Daily => on_the_hour && at.hour() == 0,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Hourly => write!(f, "hourly"),
            Resolution::Daily => write!(f, "daily"),
        }
    }
}

/// Closed-open time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    resolution: Resolution,
}

impl Window {
    /// Create the window of `resolution` length beginning at `start`
    pub fn new(start: DateTime<Utc>, resolution: Resolution) -> Self {
        Self {
            start,
            end: start + resolution.duration(),
            resolution,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// The immediately preceding window of equal length
    pub fn previous(&self) -> Self {
        Self::new(self.start - self.resolution.duration(), self.resolution)
    }

    /// Whether the window has not started yet relative to `now`
    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.start > now
    }

    /// Split `[start, end)` into contiguous windows of `resolution`.
    ///
    /// Both bounds must sit on a resolution boundary; the provider APIs only
    /// report whole hours and days.
    pub fn split(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<Vec<Window>, WindowError> {
        if start >= end {
            return Err(WindowError::EmptyRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        for at in [start, end] {
            if !resolution.is_aligned(at) {
                return Err(WindowError::Misaligned {
                    at: at.to_rfc3339(),
                    resolution: resolution.to_string(),
                });
            }
        }

        let mut windows = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let window = Window::new(cursor, resolution);
            cursor = window.end;
            windows.push(window);
        }
        tracing::debug!(count = windows.len(), %resolution, "Split request into windows");
        Ok(windows)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}
