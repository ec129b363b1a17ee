use log::debug;

use super::activity::UserActivityStore;
use super::content_analyzer::ContentAnalyzer;
use super::rate_limiter::SlidingWindowRateLimiter;
use crate::config::SpamConfig;
use crate::types::{InboundMessage, ModerationResult, RecentActivitySample, RecommendedAction, SpamDetectionResult};

/// Combines rate limiting, content analysis and activity history into one verdict per message
pub struct DetectionCoordinator {
    limiter: SlidingWindowRateLimiter,
    analyzer: ContentAnalyzer,
    activity: UserActivityStore,
    high_average_threshold: f64,
    content_mute_threshold: f64,
    content_mute_minutes: i64,
}

impl DetectionCoordinator {
    pub fn new(config: &SpamConfig, analyzer: ContentAnalyzer, activity: UserActivityStore) -> Self {
        Self {
            limiter: SlidingWindowRateLimiter::new(config.tiers.clone()),
            analyzer,
            activity,
            high_average_threshold: config.high_average_threshold,
            content_mute_threshold: config.content_mute_threshold,
            content_mute_minutes: config.content_mute_minutes,
        }
    }

    pub fn analyzer(&self) -> &ContentAnalyzer {
        &self.analyzer
    }

    /// Evaluate one message and record it in the author's activity
    ///
    /// The rate limit check sees the buffer before this message is added. A
    /// rate-limited message is counted as a violation but not recorded, and
    /// its content never escalates the response.
    pub async fn process(&self, message: &InboundMessage) -> ModerationResult<SpamDetectionResult> {
        let author = &message.author_id;
        let now = message.timestamp;

        let metrics = self.activity.get_or_create(author, now).await?;
        let rate_limit_check = self.limiter.check(&metrics.recent_messages, now);
        let content_analysis = self.analyzer.analyze(&message.content);

        if rate_limit_check.is_rate_limited {
            if let Some(violation) = rate_limit_check.violation_type {
                self.activity.record_violation(author, violation, now).await?;
            }
            self.activity.flag_spam(author, now).await?;

            let reason = format!(
                "Rate limit exceeded: {} messages in {}ms ({})",
                rate_limit_check.messages_in_window,
                rate_limit_check.time_window,
                rate_limit_check.violation_type.map(|v| v.as_str()).unwrap_or("unknown"),
            );
            debug!("User {} rate limited: {}", author, reason);

            return Ok(SpamDetectionResult {
                recommended_action: rate_limit_check.recommended_action,
                mute_duration: rate_limit_check.mute_duration,
                should_take_action: true,
                action_reason: Some(reason),
                content_analysis,
                rate_limit_check,
            });
        }

        let updated = self
            .activity
            .record_message(
                author,
                RecentActivitySample {
                    id: message.id.clone(),
                    timestamp: now,
                    spam_score: content_analysis.spam_score,
                },
            )
            .await?;

        let mut result = SpamDetectionResult {
            content_analysis,
            rate_limit_check,
            ..SpamDetectionResult::no_action()
        };

        if result.content_analysis.is_spam {
            self.activity.flag_spam(author, now).await?;

            result.should_take_action = true;
            result.action_reason = Some(format!(
                "Content spam detected: {}",
                result.content_analysis.spam_indicators.join(", ")
            ));
            if result.content_analysis.spam_score > self.content_mute_threshold {
                result.recommended_action = Some(RecommendedAction::Mute);
                result.mute_duration = Some(self.content_mute_minutes);
            } else {
                result.recommended_action = Some(RecommendedAction::TextWarn);
            }
        } else if updated.average_spam_score > self.high_average_threshold {
            result.should_take_action = true;
            result.recommended_action = Some(RecommendedAction::TextWarn);
            result.action_reason = Some(format!("High average spam score: {:.2}", updated.average_spam_score));
        }

        if result.should_take_action {
            debug!("Detection verdict for {}: {:?} ({:?})", author, result.recommended_action, result.action_reason);
        }
        Ok(result)
    }
}
