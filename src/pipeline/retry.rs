//! Retry policy for page downloads.
//!
//! A transient failure is a connect/read error (including timeouts) or an
//! HTTP status in [`RETRYABLE_STATUSES`]. Each retry waits either for the
//! server's `Retry-After` hint or for exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)` plus jitter). Both are capped at
//! `max_backoff_ms`.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// Statuses worth another attempt.
pub const RETRYABLE_STATUSES: [u16; 7] = [408, 425, 429, 500, 502, 503, 504];

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP-date.
///
/// Dates in the past give a zero delay. Unparseable values give `None`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<i64>() {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }
    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_finite() {
            return Some(Duration::from_secs_f64(secs.max(0.0)));
        }
        return None;
    }

    let when = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let remaining = (when - now).num_milliseconds().max(0);
    Some(Duration::from_millis(remaining as u64))
}

/// Exponential backoff for the given 1-based attempt, with jitter, capped.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64, jitter_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(32);
    let raw = base_ms.saturating_mul(1u64 << exp);
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_ms)
    } else {
        0
    };
    Duration::from_millis(raw.saturating_add(jitter).min(max_ms))
}

/// Delay before the next attempt: the server hint when present, otherwise
/// backoff. Never longer than `max_ms`.
pub fn retry_delay(
    attempt: u32,
    hint: Option<Duration>,
    base_ms: u64,
    max_ms: u64,
    jitter_ms: u64,
) -> Duration {
    match hint {
        Some(hint) => hint.min(Duration::from_millis(max_ms)),
        None => backoff_delay(attempt, base_ms, max_ms, jitter_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn retryable_set() {
        for s in [408, 425, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(s), "{s}");
        }
        for s in [200, 301, 400, 403, 404, 501] {
            assert!(!is_retryable_status(s), "{s}");
        }
    }

    #[test]
    fn retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("7", now), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 0 ", now), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("-5", now), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("1.5", now), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("soon", now), None);
        assert_eq!(parse_retry_after("", now), None);
    }

    #[test]
    fn retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:10 GMT", now),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:27:00 GMT", now),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1, 100, 10_000, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, 100, 10_000, 0), Duration::from_millis(200));
        assert_eq!(backoff_delay(4, 100, 10_000, 0), Duration::from_millis(800));
        assert_eq!(backoff_delay(40, 100, 10_000, 0), Duration::from_millis(10_000));
    }

    #[test]
    fn jitter_is_bounded() {
        for _ in 0..50 {
            let d = backoff_delay(1, 100, 10_000, 50);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn hint_wins_but_is_clamped() {
        assert_eq!(
            retry_delay(1, Some(Duration::from_secs(2)), 100, 30_000, 0),
            Duration::from_secs(2)
        );
        assert_eq!(
            retry_delay(1, Some(Duration::from_secs(3600)), 100, 30_000, 0),
            Duration::from_secs(30)
        );
        assert_eq!(retry_delay(3, None, 100, 30_000, 0), Duration::from_millis(400));
    }
}
