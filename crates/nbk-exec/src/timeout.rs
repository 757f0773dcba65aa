use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::error::ExecError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Accepts full names in any case (`SECONDS`, `seconds`) and short suffixes (`s`, `ms`).
    pub fn parse(name: &str) -> Option<Self> {
        let unit = match name.to_ascii_lowercase().as_str() {
            "nanoseconds" | "ns" => TimeUnit::Nanoseconds,
            "microseconds" | "us" => TimeUnit::Microseconds,
            "milliseconds" | "ms" => TimeUnit::Milliseconds,
            "seconds" | "s" => TimeUnit::Seconds,
            "minutes" | "m" => TimeUnit::Minutes,
            "hours" | "h" => TimeUnit::Hours,
            "days" | "d" => TimeUnit::Days,
            _ => return None,
        };
        Some(unit)
    }

    pub fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "m",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "d",
        }
    }

    pub fn to_duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(amount),
            TimeUnit::Microseconds => Duration::from_micros(amount),
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(86_400)),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeUnit::Nanoseconds => "nanoseconds",
            TimeUnit::Microseconds => "microseconds",
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
        })
    }
}

/// Per-submission deadline as configured, kept in its original unit for reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeout {
    pub duration: u64,
    pub unit: TimeUnit,
}

impl Timeout {
    pub fn new(duration: u64, unit: TimeUnit) -> Self {
        Self { duration, unit }
    }

    pub fn as_duration(&self) -> Duration {
        self.unit.to_duration(self.duration)
    }

    /// Parses `<integer>[separator][unit]`. A bare integer is milliseconds and
    /// a non-positive amount disables the timeout.
    pub fn parse(spec: &str) -> Result<Option<Self>, ExecError> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^(?P<dur>-?\d+)\W*(?P<unit>[A-Za-z]+)?$").expect("timeout pattern is valid")
        });

        let spec = spec.trim();
        let caps = pattern
            .captures(spec)
            .ok_or_else(|| ExecError::InvalidTimeout(spec.to_string()))?;
        let amount: i64 = caps["dur"]
            .parse()
            .map_err(|_| ExecError::InvalidTimeout(spec.to_string()))?;
        let unit = match caps.name("unit") {
            Some(unit) => TimeUnit::parse(unit.as_str())
                .ok_or_else(|| ExecError::InvalidTimeoutUnit(unit.as_str().to_string()))?,
            None => TimeUnit::Milliseconds,
        };

        if amount <= 0 {
            return Ok(None);
        }
        Ok(Some(Timeout::new(amount as u64, unit)))
    }
}
