//! Release-cadence estimation and the cache tier derived from it.

use chrono::{DateTime, Months, Utc};

use super::types::{CacheDuration, FeedRecord};

const SECS_PER_DAY: f64 = 86_400.0;

/// A feed counts as active when it released within this many days.
const ACTIVE_WITHIN_DAYS: f64 = 90.0;

/// Outcome of [`analyze`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cadence {
    pub is_active: bool,
    /// Mean days between releases over the last six months, outliers removed.
    pub release_cycle: f64,
    pub last_released: i64,
    pub cache_duration: CacheDuration,
}

impl Cadence {
    pub fn apply(&self, feed: &mut FeedRecord) {
        feed.is_active = self.is_active;
        feed.release_cycle = self.release_cycle;
        feed.last_released = self.last_released;
        feed.cache_duration = self.cache_duration;
    }
}

/// Estimates how often a feed publishes and how long a fetch stays fresh.
///
/// Gaps are measured between consecutive releases in the six calendar
/// months before `now`. With two or more gaps, those further than two
/// population standard deviations from the mean are discarded before the
/// mean is recomputed.
///
/// The tiers are checked in order and a later match overrides an earlier
/// one, so a feed that is overdue by any margin ends up on the shortest tier.
pub fn analyze(published: &[i64], now: DateTime<Utc>) -> Cadence {
    let mut timestamps = published.to_vec();
    timestamps.sort_unstable();

    let window_start = now
        .checked_sub_months(Months::new(6))
        .map(|t| t.timestamp())
        .unwrap_or(i64::MIN);
    let recent: Vec<i64> = timestamps
        .iter()
        .copied()
        .filter(|&t| t >= window_start)
        .collect();

    let gaps: Vec<f64> = recent
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) as f64 / SECS_PER_DAY)
        .collect();
    let release_cycle = filtered_mean(&gaps);

    let last_released = timestamps.last().copied().unwrap_or(0);
    let days_since_last = (now.timestamp() - last_released) as f64 / SECS_PER_DAY;
    let is_active = days_since_last <= ACTIVE_WITHIN_DAYS;

    let cache_duration = if !is_active {
        CacheDuration::SevenDays
    } else {
        let mut tier = CacheDuration::OneDay;
        if days_since_last >= release_cycle - 7.0 {
            tier = CacheDuration::SixHours;
        }
        if days_since_last >= release_cycle - 2.0 {
            tier = CacheDuration::OneHour;
        }
        if days_since_last >= release_cycle - 1.0 {
            tier = CacheDuration::ThirtyMinutes;
        }
        tier
    };

    Cadence {
        is_active,
        release_cycle,
        last_released,
        cache_duration,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn filtered_mean(gaps: &[f64]) -> f64 {
    let average = mean(gaps);
    if gaps.len() < 2 {
        return average;
    }

    let variance = gaps.iter().map(|g| (g - average).powi(2)).sum::<f64>() / gaps.len() as f64;
    let threshold = 2.0 * variance.sqrt();
    let kept: Vec<f64> = gaps
        .iter()
        .copied()
        .filter(|g| (g - average).abs() <= threshold)
        .collect();
    mean(&kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const DAY: i64 = 86_400;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_weekly_feed_three_days_after_release() {
        let last = now().timestamp() - 3 * DAY;
        let published: Vec<i64> = (0..10).map(|i| last - i * 7 * DAY).collect();

        let cadence = analyze(&published, now());
        assert!(cadence.is_active);
        assert!((cadence.release_cycle - 7.0).abs() < 1e-9);
        assert_eq!(cadence.last_released, last);
        assert_eq!(cadence.cache_duration, CacheDuration::SixHours);
    }

    #[test]
    fn test_weekly_feed_nearly_due() {
        let last = now().timestamp() - 6 * DAY;
        let published: Vec<i64> = (0..10).map(|i| last - i * 7 * DAY).collect();
        assert_eq!(
            analyze(&published, now()).cache_duration,
            CacheDuration::ThirtyMinutes
        );
    }

    #[test]
    fn test_weekly_feed_five_days_after_release() {
        let last = now().timestamp() - 5 * DAY;
        let published: Vec<i64> = (0..10).map(|i| last - i * 7 * DAY).collect();
        assert_eq!(analyze(&published, now()).cache_duration, CacheDuration::OneHour);
    }

    #[test]
    fn test_monthly_feed_just_released() {
        let last = now().timestamp() - DAY;
        let published: Vec<i64> = (0..5).map(|i| last - i * 30 * DAY).collect();
        assert_eq!(analyze(&published, now()).cache_duration, CacheDuration::OneDay);
    }

    #[test]
    fn test_inactive_feed() {
        let published = vec![now().timestamp() - 200 * DAY, now().timestamp() - 230 * DAY];
        let cadence = analyze(&published, now());
        assert!(!cadence.is_active);
        assert_eq!(cadence.release_cycle, 0.0);
        assert_eq!(cadence.cache_duration, CacheDuration::SevenDays);
    }

    #[test]
    fn test_outlier_gap_is_ignored() {
        let last = now().timestamp() - DAY;
        // Ten weekly gaps and one 60-day hiatus.
        let mut published: Vec<i64> = (0..11).map(|i| last - i * 7 * DAY).collect();
        published.push(last - 10 * 7 * DAY - 60 * DAY);

        let cadence = analyze(&published, now());
        assert!((cadence.release_cycle - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_apply_copies_fields() {
        let mut feed = FeedRecord::default();
        let cadence = Cadence {
            is_active: false,
            release_cycle: 3.5,
            last_released: 42,
            cache_duration: CacheDuration::SevenDays,
        };
        cadence.apply(&mut feed);
        assert!(!feed.is_active);
        assert_eq!(feed.release_cycle, 3.5);
        assert_eq!(feed.last_released, 42);
    }

    proptest! {
        #[test]
        fn prop_input_order_does_not_matter(mut offsets in prop::collection::vec(0i64..400 * DAY, 0..30)) {
            let now = now();
            let published: Vec<i64> = offsets.iter().map(|o| now.timestamp() - o).collect();
            let expected = analyze(&published, now);

            offsets.reverse();
            let reversed: Vec<i64> = offsets.iter().map(|o| now.timestamp() - o).collect();
            prop_assert_eq!(analyze(&reversed, now), expected);
        }

        #[test]
        fn prop_release_cycle_is_non_negative(offsets in prop::collection::vec(0i64..400 * DAY, 0..30)) {
            let now = now();
            let published: Vec<i64> = offsets.iter().map(|o| now.timestamp() - o).collect();
            let cadence = analyze(&published, now);
            prop_assert!(cadence.release_cycle >= 0.0);
            prop_assert_eq!(cadence.is_active, cadence.cache_duration != CacheDuration::SevenDays);
        }
    }
}
