//! Expiry arithmetic and the rolling-refresh rule.
//!
//! All helpers are pure; the `*_at` variants take the current time explicitly and the others read
//! the system clock.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Unit of the configured session lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryUnit {
    #[default]
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl ExpiryUnit {
    fn seconds(self) -> i64 {
        match self {
            ExpiryUnit::Days => 24 * 60 * 60,
            ExpiryUnit::Hours => 60 * 60,
            ExpiryUnit::Minutes => 60,
            ExpiryUnit::Seconds => 1,
        }
    }
}

/// Convert `count` units into a max-age.
pub fn to_seconds(count: u64, unit: ExpiryUnit) -> Duration {
    let count = i64::try_from(count).unwrap_or(i64::MAX);
    Duration::seconds(count.saturating_mul(unit.seconds()))
}

pub fn expiry_timestamp(max_age: Duration) -> OffsetDateTime {
    expiry_timestamp_at(OffsetDateTime::now_utc(), max_age)
}

pub fn expiry_timestamp_at(now: OffsetDateTime, max_age: Duration) -> OffsetDateTime {
    now.saturating_add(max_age)
}

/// Lifetime left before `expires`. Negative once it has passed.
pub fn remaining_max_age(expires: OffsetDateTime) -> Duration {
    remaining_max_age_at(OffsetDateTime::now_utc(), expires)
}

pub fn remaining_max_age_at(now: OffsetDateTime, expires: OffsetDateTime) -> Duration {
    expires - now
}

/// A session is due for a percentage-based refresh once less than `percentage` percent of its
/// full lifetime remains.
pub fn rolling_eligible(remaining: Duration, total_max_age: Duration, percentage: f64) -> bool {
    remaining.as_seconds_f64() < (percentage / 100.0) * total_max_age.as_seconds_f64()
}

/// Rolling-refresh policy applied to every loaded session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Rolling {
    #[default]
    Disabled,
    /// Extend the expiry on every request.
    Always,
    /// Extend the expiry once less than this percentage of the lifetime remains.
    Percentage(f64),
}

impl Rolling {
    /// Whether a session with `remaining` lifetime out of `total_max_age` should be refreshed.
    pub fn should_refresh(&self, remaining: Option<Duration>, total_max_age: Duration) -> bool {
        match self {
            Rolling::Disabled => false,
            Rolling::Always => true,
            Rolling::Percentage(percentage) => remaining
                .is_some_and(|remaining| rolling_eligible(remaining, total_max_age, *percentage)),
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        match self {
            Rolling::Percentage(percentage) => {
                percentage.is_finite() && *percentage > 0.0 && *percentage <= 100.0
            }
            Rolling::Disabled | Rolling::Always => true,
        }
    }
}
