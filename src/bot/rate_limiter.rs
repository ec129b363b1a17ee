use serde::{Deserialize, Serialize};

use crate::config::RateLimitTier;
use crate::types::{RateLimitResult, RecentActivitySample, UnixMillis};

/// Samples older than this are of no use to any tier
pub const MAX_WINDOW_MS: u64 = 10_000;

/// Tiered sliding-window rate limiter over a user's recent-activity buffer
#[derive(Debug, Clone)]
pub struct SlidingWindowRateLimiter {
    tiers: Vec<RateLimitTier>,
}

/// Message counts per standard window, for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStats {
    pub last_2s: usize,
    pub last_4s: usize,
    pub last_10s: usize,
    pub total: usize,
}

impl SlidingWindowRateLimiter {
    /// Tiers must already be ordered most severe first
    pub fn new(tiers: Vec<RateLimitTier>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[RateLimitTier] {
        &self.tiers
    }

    /// Evaluate tiers in order and return the first one violated
    pub fn check(&self, buffer: &[RecentActivitySample], now: UnixMillis) -> RateLimitResult {
        for tier in &self.tiers {
            let in_window = count_within(buffer, now, tier.window_ms);
            if in_window >= tier.max_messages {
                return RateLimitResult {
                    is_rate_limited: true,
                    violation_type: Some(tier.name),
                    severity: Some(tier.severity),
                    messages_in_window: in_window,
                    time_window: tier.window_ms,
                    recommended_action: Some(tier.action),
                    mute_duration: tier.mute_minutes,
                };
            }
        }

        let widest = self.tiers.iter().map(|t| t.window_ms).max().unwrap_or(MAX_WINDOW_MS);
        RateLimitResult::clear(count_within(buffer, now, widest))
    }
}

/// Samples with `timestamp > now - window`
pub fn count_within(buffer: &[RecentActivitySample], now: UnixMillis, window_ms: u64) -> usize {
    let cutoff = now - window_ms as i64;
    buffer.iter().filter(|s| s.timestamp > cutoff).count()
}

/// Insert keeping the buffer sorted by timestamp, then drop the oldest beyond `capacity`
pub fn push_sample(buffer: &mut Vec<RecentActivitySample>, sample: RecentActivitySample, capacity: usize) {
    let at = buffer.partition_point(|s| s.timestamp <= sample.timestamp);
    buffer.insert(at, sample);
    if buffer.len() > capacity {
        let excess = buffer.len() - capacity;
        buffer.drain(..excess);
    }
}

pub fn window_stats(buffer: &[RecentActivitySample], now: UnixMillis) -> WindowStats {
    WindowStats {
        last_2s: count_within(buffer, now, 2_000),
        last_4s: count_within(buffer, now, 4_000),
        last_10s: count_within(buffer, now, MAX_WINDOW_MS),
        total: buffer.len(),
    }
}

/// Drop samples outside the widest window; returns how many were removed
pub fn clean_old_samples(buffer: &mut Vec<RecentActivitySample>, now: UnixMillis) -> usize {
    let before = buffer.len();
    let cutoff = now - MAX_WINDOW_MS as i64;
    buffer.retain(|s| s.timestamp > cutoff);
    before - buffer.len()
}

pub fn average_spam_score(buffer: &[RecentActivitySample]) -> f64 {
    if buffer.is_empty() {
        return 0.0;
    }
    buffer.iter().map(|s| s.spam_score).sum::<f64>() / buffer.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpamConfig;
    use crate::types::{RecommendedAction, Severity, ViolationType, ACTIVITY_BUFFER_CAPACITY};

    fn limiter() -> SlidingWindowRateLimiter {
        SlidingWindowRateLimiter::new(SpamConfig::default().tiers)
    }

    fn sample(id: usize, timestamp: UnixMillis) -> RecentActivitySample {
        RecentActivitySample {
            id: id.to_string(),
            timestamp,
            spam_score: 0.0,
        }
    }

    fn buffer_at(timestamps: &[UnixMillis]) -> Vec<RecentActivitySample> {
        timestamps.iter().enumerate().map(|(i, t)| sample(i, *t)).collect()
    }

    #[test]
    fn test_empty_and_undersized_buffers() {
        let now = 100_000;
        assert!(!limiter().check(&[], now).is_rate_limited);
        assert!(!limiter().check(&buffer_at(&[now - 100, now - 50, now - 10]), now).is_rate_limited);
    }

    #[test]
    fn test_burst_wins_over_weaker_tiers() {
        let now = 100_000;
        // 10 messages in the last second qualify for every tier
        let buffer = buffer_at(&(0..10).map(|i| now - 900 + i * 90).collect::<Vec<_>>());
        let result = limiter().check(&buffer, now);

        assert!(result.is_rate_limited);
        assert_eq!(result.violation_type, Some(ViolationType::Burst));
        assert_eq!(result.severity, Some(Severity::High));
        assert_eq!(result.recommended_action, Some(RecommendedAction::Mute));
        assert_eq!(result.mute_duration, Some(1));
        assert_eq!(result.time_window, 2_000);
    }

    #[test]
    fn test_rapid_and_sustained_tiers() {
        let now = 100_000;

        let rapid = buffer_at(&[now - 3_900, now - 3_500, now - 3_000, now - 2_800, now - 2_500, now - 1_500, now - 100]);
        let result = limiter().check(&rapid, now);
        assert_eq!(result.violation_type, Some(ViolationType::Rapid));
        assert_eq!(result.recommended_action, Some(RecommendedAction::TextWarn));
        assert_eq!(result.mute_duration, None);

        let sustained = buffer_at(&(0..10).map(|i| now - 9_500 + i * 1_000).collect::<Vec<_>>());
        let result = limiter().check(&sustained, now);
        assert_eq!(result.violation_type, Some(ViolationType::Sustained));
        assert_eq!(result.messages_in_window, 10);
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let now = 100_000;
        // Sample exactly 2000ms old falls outside the burst window
        let buffer = buffer_at(&[now - 2_000, now - 300, now - 200, now - 100]);
        let result = limiter().check(&buffer, now);
        assert_ne!(result.violation_type, Some(ViolationType::Burst));
    }

    #[test]
    fn test_buffer_keeps_newest_samples_in_order() {
        let mut buffer = Vec::new();
        for i in 0..15 {
            push_sample(&mut buffer, sample(i, 1_000 + i as i64), ACTIVITY_BUFFER_CAPACITY);
        }
        // Late arrival lands in timestamp order, evicting the oldest
        push_sample(&mut buffer, sample(99, 1_010), ACTIVITY_BUFFER_CAPACITY);

        assert_eq!(buffer.len(), ACTIVITY_BUFFER_CAPACITY);
        assert!(buffer.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(buffer.last().map(|s| s.id.as_str()), Some("14"));
        assert_eq!(buffer.first().map(|s| s.timestamp), Some(1_006));
    }

    #[test]
    fn test_stats_cleanup_and_average() {
        let now = 50_000;
        let mut buffer = buffer_at(&[now - 20_000, now - 5_000, now - 3_000, now - 1_000]);
        buffer[3].spam_score = 0.8;

        let stats = window_stats(&buffer, now);
        assert_eq!(stats, WindowStats { last_2s: 1, last_4s: 2, last_10s: 3, total: 4 });

        assert_eq!(clean_old_samples(&mut buffer, now), 1);
        assert!((average_spam_score(&buffer) - 0.8 / 3.0).abs() < 1e-9);
        assert_eq!(average_spam_score(&[]), 0.0);
    }
}
