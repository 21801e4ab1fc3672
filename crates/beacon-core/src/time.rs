//! Clock helpers.
//!
//! Wire timestamps are RFC 3339 with millisecond precision. Internal
//! watermarks (heartbeat pings, rate windows, session activity) are epoch
//! milliseconds so arithmetic stays integer.

use chrono::{SecondsFormat, Utc};

/// Current time as epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time as an RFC 3339 string with millisecond precision (UTC).
#[must_use]
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_recent() {
        // Well past 2020-01-01 in epoch millis.
        assert!(now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn now_ms_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }

    #[test]
    fn rfc3339_shape() {
        let ts = now_rfc3339();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
        // millisecond precision: ss.mmm
        assert!(ts.contains('.'));
    }
}
