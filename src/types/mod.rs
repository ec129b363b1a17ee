// src/types/mod.rs - Shared moderation domain types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Platform user identifier (snowflake-style opaque string)
pub type UserId = String;
/// Platform role identifier
pub type RoleId = String;
/// Platform channel identifier
pub type ChannelId = String;
/// Platform message identifier
pub type MessageId = String;
/// Milliseconds since the unix epoch
pub type UnixMillis = i64;

/// Sentinel duration (in minutes) that marks a mute as permanent
pub const PERMANENT_MUTE: i64 = -1;

/// Maximum number of samples kept in a user's recent-activity buffer
pub const ACTIVITY_BUFFER_CAPACITY: usize = 10;

/// Current wall-clock time in unix millis
pub fn now_millis() -> UnixMillis {
    chrono::Utc::now().timestamp_millis()
}

/// Named mute durations, in minutes
pub struct RestrictionDuration;

impl RestrictionDuration {
    pub const ONE_MINUTE: i64 = 1;
    pub const FIVE_MINUTES: i64 = 5;
    pub const FIFTEEN_MINUTES: i64 = 15;
    pub const THIRTY_MINUTES: i64 = 30;
    pub const ONE_HOUR: i64 = 60;
    pub const THREE_HOURS: i64 = 180;
    pub const SIX_HOURS: i64 = 360;
    pub const TWELVE_HOURS: i64 = 720;
    pub const ONE_DAY: i64 = 1440;
    pub const THREE_DAYS: i64 = 4320;
    pub const ONE_WEEK: i64 = 10080;
    pub const PERMANENT: i64 = PERMANENT_MUTE;
}

/// Rate limit tiers, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationType {
    Burst,
    Rapid,
    Sustained,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::Burst => "burst",
            ViolationType::Rapid => "rapid",
            ViolationType::Sustained => "sustained",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// What the detection layer suggests the caller should do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendedAction {
    /// Soft in-channel reply, no persistent consequence
    TextWarn,
    Warn,
    Mute,
}

/// One entry in a user's bounded recent-activity buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivitySample {
    pub id: MessageId,
    pub timestamp: UnixMillis,
    pub spam_score: f64,
}

/// Rate limit violation counters, used to spot repeat offenders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitViolations {
    pub burst: u64,
    pub rapid: u64,
    pub sustained: u64,
    pub total: u64,
}

impl RateLimitViolations {
    pub fn get(&self, violation: ViolationType) -> u64 {
        match violation {
            ViolationType::Burst => self.burst,
            ViolationType::Rapid => self.rapid,
            ViolationType::Sustained => self.sustained,
        }
    }
}

/// Per-user read-optimized rollup of activity and punishments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetrics {
    pub id: UserId,
    pub joined_at: UnixMillis,
    pub total_messages: u64,
    pub warning_count: i64,
    /// Cumulative minutes spent muted
    pub mute_duration_minutes: i64,
    pub last_activity: UnixMillis,
    pub recent_messages: Vec<RecentActivitySample>,
    pub average_spam_score: f64,
    pub rate_limit_violations: RateLimitViolations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_spam_flag: Option<UnixMillis>,
}

impl UserMetrics {
    pub fn new(id: UserId, now: UnixMillis) -> Self {
        Self {
            id,
            joined_at: now,
            total_messages: 0,
            warning_count: 0,
            mute_duration_minutes: 0,
            last_activity: now,
            recent_messages: Vec::new(),
            average_spam_score: 0.0,
            rate_limit_violations: RateLimitViolations::default(),
            last_spam_flag: None,
        }
    }
}

/// A moderator (or automatic) warning. Immutable; revoked by deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub target_id: UserId,
    pub moderator_id: UserId,
    pub reason: String,
    pub timestamp: UnixMillis,
}

/// An active mute. Presence of the record is the muted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mute {
    pub target_id: UserId,
    pub moderator_id: UserId,
    pub reason: String,
    pub timestamp: UnixMillis,
    pub duration_minutes: i64,
    pub permanent: bool,
    /// Roles held right before the mute, restored verbatim on unmute
    pub snapshot_roles: Vec<RoleId>,
}

impl Mute {
    /// Instant at which a non-permanent mute runs out
    pub fn expires_at(&self) -> Option<UnixMillis> {
        if self.permanent {
            None
        } else {
            Some(self.timestamp + self.duration_minutes * 60_000)
        }
    }

    /// Minutes this mute contributes to the cumulative mute metric
    pub fn added_minutes(&self) -> i64 {
        if self.permanent {
            0
        } else {
            self.duration_minutes
        }
    }
}

/// A recurring channel broadcast driven by the job scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub creator_id: UserId,
    pub name: String,
    pub message: String,
    pub channel: ChannelId,
    /// Cron-style schedule expression
    pub cycle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
}

/// Inbound chat message as forwarded by the ingestion layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    pub author_id: UserId,
    pub channel_id: ChannelId,
    pub content: String,
    pub timestamp: UnixMillis,
    pub author_is_bot: bool,
    pub is_system: bool,
}

/// Result of checking a recent-activity buffer against the rate limit tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub is_rate_limited: bool,
    pub violation_type: Option<ViolationType>,
    pub severity: Option<Severity>,
    pub messages_in_window: usize,
    /// Window of the violated tier in millis (0 when not limited)
    pub time_window: u64,
    pub recommended_action: Option<RecommendedAction>,
    /// Minutes to mute for when the action is a mute
    pub mute_duration: Option<i64>,
}

impl RateLimitResult {
    pub fn clear(messages_in_window: usize) -> Self {
        Self {
            is_rate_limited: false,
            violation_type: None,
            severity: None,
            messages_in_window,
            time_window: 0,
            recommended_action: None,
            mute_duration: None,
        }
    }
}

/// Boolean content violations found during analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentViolations {
    pub too_many_urls: bool,
    pub too_many_mentions: bool,
    pub too_many_emojis: bool,
    pub too_short: bool,
    pub too_many_caps: bool,
    pub too_much_repetition: bool,
}

/// Deterministic output of the content analyzer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentAnalysisResult {
    pub url_count: usize,
    pub mention_count: usize,
    pub emoji_count: usize,
    pub message_length: usize,
    pub word_count: usize,
    pub unique_word_count: usize,
    pub toxicity_score: f64,
    pub toxic_terms: Vec<String>,
    pub spam_score: f64,
    pub is_spam: bool,
    pub violations: ContentViolations,
    /// Human-readable reasons, for audit logs
    pub spam_indicators: Vec<String>,
}

/// Combined verdict for one inbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpamDetectionResult {
    pub content_analysis: ContentAnalysisResult,
    pub rate_limit_check: RateLimitResult,
    pub should_take_action: bool,
    pub action_reason: Option<String>,
    pub recommended_action: Option<RecommendedAction>,
    /// Minutes to mute for when the recommendation is a mute
    pub mute_duration: Option<i64>,
}

impl SpamDetectionResult {
    pub fn no_action() -> Self {
        Self {
            content_analysis: ContentAnalysisResult::default(),
            rate_limit_check: RateLimitResult::clear(0),
            should_take_action: false,
            action_reason: None,
            recommended_action: None,
            mute_duration: None,
        }
    }
}

/// Error taxonomy for moderation operations
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("member {0} is already muted")]
    AlreadyMuted(UserId),

    #[error("member {0} is not muted")]
    NotMuted(UserId),

    #[error("warning {0} not found")]
    WarningNotFound(String),

    #[error("invalid mute duration: {0} minutes")]
    InvalidDuration(i64),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("direct message delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("platform call failed: {0}")]
    Platform(String),

    #[error("an announcement named '{0}' already exists")]
    AnnouncementExists(String),

    #[error("announcement '{0}' not found")]
    AnnouncementNotFound(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

pub type ModerationResult<T> = std::result::Result<T, ModerationError>;

impl From<crate::store::StoreError> for ModerationError {
    fn from(err: crate::store::StoreError) -> Self {
        ModerationError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for ModerationError {
    fn from(err: serde_json::Error) -> Self {
        crate::store::StoreError::from(err).into()
    }
}
