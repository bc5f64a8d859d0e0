//! TTL classes.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

const DAY_SECS: u32 = 24 * 60 * 60;

/// Bucket of time-to-live durations.
///
/// The class decides whether an anchor node keeps a value across restarts.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum TtlClass {
    /// Less than a week.
    Ephemeral = 0,
    /// One week or more.
    Week = 1,
    /// Thirty days or more.
    Month = 2,
    /// A year or more.
    Year = 3,
    /// Never expires.
    Permanent = 4,
}

impl TtlClass {
    /// Classify a TTL given in seconds.
    ///
    /// `0` and `u32::MAX` both mean "never expires".
    pub const fn from_secs(ttl_secs: u32) -> Self {
        match ttl_secs {
            0 | u32::MAX => Self::Permanent,
            t if t >= 365 * DAY_SECS => Self::Year,
            t if t >= 30 * DAY_SECS => Self::Month,
            t if t >= 7 * DAY_SECS => Self::Week,
            _ => Self::Ephemeral,
        }
    }

    /// Storage discriminant.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a storage discriminant.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ephemeral),
            1 => Some(Self::Week),
            2 => Some(Self::Month),
            3 => Some(Self::Year),
            4 => Some(Self::Permanent),
            _ => None,
        }
    }

    /// Expiry timestamp for a value created at `created_at` with `ttl_secs`.
    ///
    /// Returns `0` for permanent values.
    pub const fn expires_at(self, created_at: u64, ttl_secs: u32) -> u64 {
        match self {
            Self::Permanent => 0,
            _ => created_at.saturating_add(ttl_secs as u64),
        }
    }
}
