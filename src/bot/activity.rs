use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::rate_limiter::{self, WindowStats};
use crate::store::{Collection, DocumentStore, Filter, Update};
use crate::types::{
    ModerationResult, RateLimitViolations, RecentActivitySample, UnixMillis, UserMetrics, ViolationType,
    ACTIVITY_BUFFER_CAPACITY,
};

pub const METRICS_COLLECTION: &str = "userMetrics";

const DAY_MS: i64 = 86_400_000;
const HOUR_MS: i64 = 3_600_000;

/// Violation counters plus the current window counts for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub violations: RateLimitViolations,
    pub windows: WindowStats,
}

/// Aggregate view over every tracked user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityStats {
    pub total_users: usize,
    pub average_messages: f64,
    pub users_with_warnings: usize,
    /// Flagged for spam in the last 24h
    pub recently_flagged: usize,
}

/// Persistent per-user rolling activity buffer and counters
#[derive(Clone)]
pub struct UserActivityStore {
    metrics: Collection<UserMetrics>,
}

fn by_user(user: &str) -> Filter {
    Filter::eq("id", user)
}

impl UserActivityStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            metrics: Collection::new(store, METRICS_COLLECTION),
        }
    }

    pub async fn get(&self, user: &str) -> ModerationResult<Option<UserMetrics>> {
        Ok(self.metrics.get_one(&by_user(user)).await?.map(|r| r.doc))
    }

    /// Metrics are created lazily the first time a user is seen
    pub async fn get_or_create(&self, user: &str, now: UnixMillis) -> ModerationResult<UserMetrics> {
        let fresh = UserMetrics::new(user.to_string(), now);
        if self.metrics.insert_if_absent(&by_user(user), &fresh).await?.is_some() {
            debug!("Created metrics for user {}", user);
            return Ok(fresh);
        }
        Ok(self.get(user).await?.unwrap_or(fresh))
    }

    pub async fn recent_activity(&self, user: &str) -> ModerationResult<Vec<RecentActivitySample>> {
        Ok(self.get(user).await?.map(|m| m.recent_messages).unwrap_or_default())
    }

    /// Append a sample to the bounded buffer and refresh the rolling average
    pub async fn record_message(&self, user: &str, sample: RecentActivitySample) -> ModerationResult<UserMetrics> {
        let now = sample.timestamp;
        let mut metrics = self.get_or_create(user, now).await?;

        rate_limiter::push_sample(&mut metrics.recent_messages, sample, ACTIVITY_BUFFER_CAPACITY);
        let average = rate_limiter::average_spam_score(&metrics.recent_messages);

        let update = Update::new()
            .set("recentMessages", serde_json::to_value(&metrics.recent_messages)?)
            .set("averageSpamScore", average)
            .set("lastActivity", now.max(metrics.last_activity))
            .inc("totalMessages", 1);

        let updated = self.metrics.update(&by_user(user), &update).await?;
        Ok(updated.map(|r| r.doc).unwrap_or(metrics))
    }

    pub async fn record_violation(&self, user: &str, violation: ViolationType, now: UnixMillis) -> ModerationResult<()> {
        self.get_or_create(user, now).await?;
        let update = Update::new()
            .inc(format!("rateLimitViolations.{}", violation.as_str()), 1)
            .inc("rateLimitViolations.total", 1);
        self.metrics.update(&by_user(user), &update).await?;
        Ok(())
    }

    pub async fn flag_spam(&self, user: &str, now: UnixMillis) -> ModerationResult<()> {
        self.metrics
            .update(&by_user(user), &Update::new().set("lastSpamFlag", now))
            .await?;
        Ok(())
    }

    /// Atomically shift the warning counter; returns the new count
    pub async fn adjust_warning_count(&self, user: &str, delta: i64, now: UnixMillis) -> ModerationResult<i64> {
        self.get_or_create(user, now).await?;
        let updated = self.metrics.increment(&by_user(user), "warningCount", delta).await?;
        Ok(updated.map(|r| r.doc.warning_count).unwrap_or(0))
    }

    pub async fn adjust_mute_minutes(&self, user: &str, delta: i64, now: UnixMillis) -> ModerationResult<i64> {
        self.get_or_create(user, now).await?;
        let updated = self.metrics.increment(&by_user(user), "muteDurationMinutes", delta).await?;
        Ok(updated.map(|r| r.doc.mute_duration_minutes).unwrap_or(0))
    }

    pub async fn high_spam_users(&self, threshold: f64) -> ModerationResult<Vec<UserMetrics>> {
        self.query(Filter::gt("averageSpamScore", threshold)).await
    }

    pub async fn users_by_warning_count(&self, min_warnings: i64) -> ModerationResult<Vec<UserMetrics>> {
        self.query(Filter::gte("warningCount", min_warnings)).await
    }

    pub async fn inactive_users(&self, days: i64, now: UnixMillis) -> ModerationResult<Vec<UserMetrics>> {
        self.query(Filter::lt("lastActivity", now - days * DAY_MS)).await
    }

    pub async fn recent_spam_users(&self, hours: i64, now: UnixMillis) -> ModerationResult<Vec<UserMetrics>> {
        self.query(Filter::gte("lastSpamFlag", now - hours * HOUR_MS)).await
    }

    pub async fn rate_limit_stats(&self, user: &str, now: UnixMillis) -> ModerationResult<Option<RateLimitStats>> {
        Ok(self.get(user).await?.map(|m| RateLimitStats {
            windows: rate_limiter::window_stats(&m.recent_messages, now),
            violations: m.rate_limit_violations,
        }))
    }

    /// Trim samples that no tier can see any more; returns how many users changed
    pub async fn clean_old_samples(&self, now: UnixMillis) -> ModerationResult<usize> {
        let mut cleaned = 0;
        for record in self.metrics.get_many(&Filter::All).await? {
            let mut buffer = record.doc.recent_messages;
            if rate_limiter::clean_old_samples(&mut buffer, now) == 0 {
                continue;
            }
            let update = Update::new()
                .set("recentMessages", serde_json::to_value(&buffer)?)
                .set("averageSpamScore", rate_limiter::average_spam_score(&buffer));
            self.metrics.update(&Filter::by_id(&record.id), &update).await?;
            cleaned += 1;
        }
        Ok(cleaned)
    }

    /// Retention sweep: delete metrics of users inactive for `days`
    pub async fn delete_inactive(&self, days: i64, now: UnixMillis) -> ModerationResult<usize> {
        Ok(self
            .metrics
            .delete_many(&Filter::lt("lastActivity", now - days * DAY_MS))
            .await?)
    }

    pub async fn stats(&self, now: UnixMillis) -> ModerationResult<ActivityStats> {
        let all = self.query(Filter::All).await?;
        if all.is_empty() {
            return Ok(ActivityStats::default());
        }

        let total_messages: u64 = all.iter().map(|m| m.total_messages).sum();
        let flagged_since = now - 24 * HOUR_MS;
        Ok(ActivityStats {
            total_users: all.len(),
            average_messages: total_messages as f64 / all.len() as f64,
            users_with_warnings: all.iter().filter(|m| m.warning_count > 0).count(),
            recently_flagged: all
                .iter()
                .filter(|m| m.last_spam_flag.map_or(false, |t| t >= flagged_since))
                .count(),
        })
    }

    async fn query(&self, filter: Filter) -> ModerationResult<Vec<UserMetrics>> {
        Ok(self.metrics.get_many(&filter).await?.into_iter().map(|r| r.doc).collect())
    }
}
