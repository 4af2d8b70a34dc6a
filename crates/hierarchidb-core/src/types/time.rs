use serde::{Deserialize, Serialize};
use std::{cell::Cell, fmt, rc::Rc};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

///
/// Timestamp
///
/// Milliseconds since the Unix epoch. The engine never reads wall time
/// directly; all stamps flow through the injected [`Clock`].
///

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn saturating_sub(&self, other: Self) -> u64 {
        self.0.saturating_sub(other.0)
    }

    #[must_use]
    pub const fn saturating_add_millis(&self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

// RFC 3339 rendering for diagnostics and backup metadata; storage keeps the
// raw millisecond integer.
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = i128::from(self.0) * 1_000_000;
        match OffsetDateTime::from_unix_timestamp_nanos(nanos) {
            Ok(dt) => match dt.format(&Rfc3339) {
                Ok(formatted) => f.write_str(&formatted),
                Err(_) => write!(f, "{}ms", self.0),
            },
            Err(_) => write!(f, "{}ms", self.0),
        }
    }
}

///
/// Clock
///
/// Monotonic millisecond clock boundary; injected for testability.
///

pub trait Clock {
    fn now_ms(&self) -> u64;
}

///
/// SystemClock
///

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};

        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
            })
    }
}

///
/// ManualClock
///
/// Settable clock for deterministic tests.
///

#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    ms: Rc<Cell<u64>>,
}

impl ManualClock {
    #[must_use]
    pub fn starting_at(ms: u64) -> Self {
        let clock = Self::default();
        clock.set(ms);
        clock
    }

    pub fn set(&self, ms: u64) {
        self.ms.set(ms);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.ms.set(self.ms.get().saturating_add(delta_ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.ms.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::starting_at(1_000);
        clock.advance(500);

        assert_eq!(clock.now_ms(), 1_500);
    }

    #[test]
    fn timestamp_displays_rfc3339() {
        let ts = Timestamp::from_millis(0);

        assert_eq!(ts.to_string(), "1970-01-01T00:00:00Z");
    }
}
