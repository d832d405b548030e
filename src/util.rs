use core::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, TimeZone, Utc};
use rand::Rng;

/// Sleeps `base_ms` plus up to `jitter_ms` of random slack.
pub async fn pause(base_ms: u64, jitter_ms: u64) {
    let extra = if jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_ms)
    };
    let total = Duration::from_millis(base_ms + extra);
    if !total.is_zero() {
        tokio::time::sleep(total).await;
    }
}

pub fn offset(hours: i32) -> anyhow::Result<FixedOffset> {
    FixedOffset::east_opt(hours * 3600).ok_or_else(|| anyhow::anyhow!("bad utc offset {hours}"))
}

#[inline]
pub fn now_in(offset: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&offset)
}

/// The first instant strictly after `now` whose wall-clock time is `at`.
pub fn next_run(now: DateTime<FixedOffset>, at: NaiveTime) -> DateTime<FixedOffset> {
    let today = now.date_naive().and_time(at);
    // a fixed offset has no gaps or folds
    let candidate = now.timezone().from_local_datetime(&today).single().unwrap_or(now);
    if candidate > now {
        candidate
    } else {
        candidate + TimeDelta::days(1)
    }
}

/// Percentage with one decimal, `None` when nothing was counted.
pub fn rate(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| (part as f64 / whole as f64 * 1000.0).round() / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kst(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn next_run_later_today() {
        let at = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        assert_eq!(next_run(kst("2024-05-01T09:30:00+09:00"), at), kst("2024-05-01T12:00:00+09:00"));
    }

    #[test]
    fn next_run_rolls_to_tomorrow() {
        let at = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        assert_eq!(next_run(kst("2024-05-01T00:00:00+09:00"), at), kst("2024-05-02T00:00:00+09:00"));
        assert_eq!(next_run(kst("2024-12-31T23:59:00+09:00"), at), kst("2025-01-01T00:00:00+09:00"));
    }

    #[test]
    fn rates() {
        assert_eq!(rate(1, 3), Some(33.3));
        assert_eq!(rate(2, 3), Some(66.7));
        assert_eq!(rate(0, 0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_waits_at_least_base() {
        let start = tokio::time::Instant::now();
        pause(1500, 100).await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(1500));
        assert!(waited <= Duration::from_millis(1600));
    }
}
