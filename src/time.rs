use chrono::{SecondsFormat, Utc};

/// Current unix time in seconds. Clock readings before the epoch clamp to 0.
pub fn now_secs() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

/// Current UTC time as RFC 3339 with millisecond precision, e.g.
/// `2024-05-01T10:00:00.000Z`.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
