//! NTP-style time tags
//!
//! Bundles carry a 64-bit time tag: whole seconds since 1900-01-01 plus a
//! 32-bit binary fraction of a second. The raw `(0, 1)` value is the
//! "execute immediately" sentinel and must survive encode/decode untouched.

use serde::{Deserialize, Serialize};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01)
pub const SECONDS_1900_TO_1970: u64 = 2_208_988_800;

/// One second expressed in fractional units (2^32)
const FRACTIONAL_UNITS: f64 = 4_294_967_296.0;

/// Raw wire time tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeTag {
    /// Whole seconds since 1900-01-01
    pub seconds: u32,
    /// Binary fraction of a second (1/2^32 units)
    pub fraction: u32,
}

impl TimeTag {
    /// The "execute immediately" sentinel
    pub const IMMEDIATE: TimeTag = TimeTag {
        seconds: 0,
        fraction: 1,
    };

    pub fn new(seconds: u32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    /// Whether this is the immediate sentinel
    pub fn is_immediate(&self) -> bool {
        *self == Self::IMMEDIATE
    }

    /// Convert to seconds since the Unix epoch.
    ///
    /// Not meaningful for the immediate sentinel; callers must check
    /// [`TimeTag::is_immediate`] first.
    pub fn to_unix(&self) -> f64 {
        (self.seconds as f64 - SECONDS_1900_TO_1970 as f64)
            + self.fraction as f64 / FRACTIONAL_UNITS
    }

    /// Build a time tag from seconds since the Unix epoch.
    ///
    /// The fractional part wraps with unsigned 32-bit semantics.
    pub fn from_unix(unix_seconds: f64) -> Self {
        let whole = unix_seconds.floor();
        let seconds = (whole as i64 + SECONDS_1900_TO_1970 as i64) as u64 as u32;
        let fraction = ((unix_seconds - whole) * FRACTIONAL_UNITS) as u64 as u32;
        Self { seconds, fraction }
    }

    /// Seconds since 1900-01-01 as a float, fraction included
    pub fn ntp_seconds(&self) -> f64 {
        self.seconds as f64 + self.fraction as f64 / FRACTIONAL_UNITS
    }
}
