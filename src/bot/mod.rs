use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::platforms::{ChannelGateway, MemberGateway};
use crate::store::DocumentStore;
use crate::types::{
    InboundMessage, ModerationError, ModerationResult, RecommendedAction, SpamDetectionResult, UserId,
};

pub mod activity;
pub mod announcements;
pub mod content_analyzer;
pub mod detection;
pub mod escalation;
pub mod jobs;
pub mod pattern_matching;
pub mod rate_limiter;
pub mod restriction;
pub mod scheduler;
pub mod toxicity;

use activity::UserActivityStore;
use announcements::AnnouncementService;
use content_analyzer::ContentAnalyzer;
use detection::DetectionCoordinator;
use escalation::EscalationPolicy;
use jobs::{MetricsRetentionJob, MuteExpirySweepJob};
use pattern_matching::{RestrictedMatch, RestrictedTermMatcher};
use restriction::{platform_err, Escalation, MuteOutcome, RestrictionSettings, RestrictionStateMachine, WarnOutcome};
use scheduler::JobRegistry;

/// Reason recorded on mutes triggered by spam detection
pub const SPAM_MUTE_REASON: &str = "Spam";

/// What the engine did with one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageVerdict {
    /// Bot, system or unmonitored-channel message; not analyzed
    Skipped,
    Clean,
    /// Detection flagged the message but the author or channel is exempt
    Exempt(Box<SpamDetectionResult>),
    TextWarned { reason: String },
    Muted(MuteOutcome),
    /// A mute was recommended while one was already active
    AlreadyMuted,
    RestrictedContent {
        terms: Vec<String>,
        warning: WarnOutcome,
        evasion_mute: Option<MuteOutcome>,
    },
}

/// Core engine wiring detection, restriction and scheduled jobs together
pub struct ModerationEngine {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    members: Arc<dyn MemberGateway>,
    channels: Arc<dyn ChannelGateway>,
    activity: UserActivityStore,
    detector: DetectionCoordinator,
    restriction: Arc<RestrictionStateMachine>,
    matcher: RestrictedTermMatcher,
    registry: Arc<JobRegistry>,
    announcements: AnnouncementService,
}

impl ModerationEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        members: Arc<dyn MemberGateway>,
        channels: Arc<dyn ChannelGateway>,
    ) -> Result<Self> {
        config.validate().context("invalid engine configuration")?;

        let activity = UserActivityStore::new(Arc::clone(&store));
        let analyzer = ContentAnalyzer::from_config(&config).context("failed to build content analyzer")?;
        let detector = DetectionCoordinator::new(&config.spam, analyzer, activity.clone());
        let restriction = Arc::new(RestrictionStateMachine::new(
            Arc::clone(&store),
            Arc::clone(&members),
            Arc::clone(&channels),
            activity.clone(),
            EscalationPolicy::from_config(&config.escalation),
            RestrictionSettings {
                server_name: config.server_name.clone(),
                muted_role: config.roles.muted_role.clone(),
                muted_text_channel: config.channels.muted_text_channel.clone(),
            },
        ));
        let registry = Arc::new(JobRegistry::new());
        let announcements = AnnouncementService::new(Arc::clone(&store), Arc::clone(&channels), Arc::clone(&registry));
        let matcher = RestrictedTermMatcher::new(&config.restricted_terms);

        Ok(Self {
            config,
            store,
            members,
            channels,
            activity,
            detector,
            restriction,
            matcher,
            registry,
            announcements,
        })
    }

    /// Confirm the store is reachable, then start every scheduled job
    pub async fn start(&self) -> ModerationResult<()> {
        info!("Starting moderation engine for {}...", self.config.server_name);
        self.store.ping().await?;

        let sweep = MuteExpirySweepJob::new(Arc::clone(&self.restriction), self.config.scheduler.sweep_schedule.clone());
        let retention = MetricsRetentionJob::new(
            self.activity.clone(),
            self.config.scheduler.retention_schedule.clone(),
            self.config.scheduler.retention_days,
        );
        self.registry
            .add_job(Arc::new(sweep))
            .await
            .map_err(|e| ModerationError::InvalidSchedule(format!("{:#}", e)))?;
        self.registry
            .add_job(Arc::new(retention))
            .await
            .map_err(|e| ModerationError::InvalidSchedule(format!("{:#}", e)))?;

        self.announcements.start_all().await?;

        info!("Moderation engine started with {} jobs", self.registry.len().await);
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("Shutting down moderation engine...");
        self.registry.stop_all().await;
        info!("Moderation engine shutdown complete");
    }

    /// Run one inbound message through detection and apply the consequences
    pub async fn handle_message(&self, message: &InboundMessage) -> ModerationResult<MessageVerdict> {
        if message.author_is_bot || message.is_system || !self.config.is_monitored(&message.channel_id) {
            return Ok(MessageVerdict::Skipped);
        }

        let detection = self.detector.process(message).await?;
        let restricted = self.matcher.find(&message.content);
        if !detection.should_take_action && !restricted.is_match() {
            return Ok(MessageVerdict::Clean);
        }

        if self.is_exempt(message).await? {
            debug!("Exempt message from {} in {}", message.author_id, message.channel_id);
            return Ok(MessageVerdict::Exempt(Box::new(detection)));
        }

        if restricted.is_match() {
            return self.handle_restricted(message, restricted).await;
        }

        match detection.recommended_action {
            Some(RecommendedAction::Mute) => {
                let minutes = detection.mute_duration.unwrap_or(self.config.spam.content_mute_minutes);
                self.mute_for_spam(&message.author_id, minutes).await
            }
            Some(RecommendedAction::TextWarn) | Some(RecommendedAction::Warn) => {
                let reply = if detection.rate_limit_check.is_rate_limited {
                    &self.config.spam.rate_limit_reply
                } else {
                    &self.config.spam.content_reply
                };
                if let Err(e) = self.channels.reply(&message.channel_id, &message.id, reply).await {
                    warn!("Could not reply to {} in {}: {:#}", message.author_id, message.channel_id, e);
                }
                Ok(MessageVerdict::TextWarned {
                    reason: detection.action_reason.unwrap_or_default(),
                })
            }
            None => Ok(MessageVerdict::Clean),
        }
    }

    async fn is_exempt(&self, message: &InboundMessage) -> ModerationResult<bool> {
        if self.config.is_ignored(&message.channel_id) {
            return Ok(true);
        }
        let roles = self.members.list_roles(&message.author_id).await.map_err(platform_err)?;
        Ok(self.config.is_staff(&roles))
    }

    async fn mute_for_spam(&self, target: &str, minutes: i64) -> ModerationResult<MessageVerdict> {
        match self
            .restriction
            .mute(target, &self.config.bot_user_id, minutes, SPAM_MUTE_REASON)
            .await
        {
            Ok(outcome) => Ok(MessageVerdict::Muted(outcome)),
            Err(ModerationError::AlreadyMuted(_)) => Ok(MessageVerdict::AlreadyMuted),
            Err(e) => Err(e),
        }
    }

    /// Delete, warn, and mute on top when look-alike characters were used to slip past the filter
    async fn handle_restricted(&self, message: &InboundMessage, found: RestrictedMatch) -> ModerationResult<MessageVerdict> {
        if let Err(e) = self.channels.delete_message(&message.channel_id, &message.id).await {
            warn!("Could not delete restricted message {}: {:#}", message.id, e);
        }

        let reason = format!(
            "Restricted content detected: \"{}\", context: \"{}\"",
            found.terms.join(", "),
            found.context
        );
        let warning = self
            .restriction
            .warn(&message.author_id, &self.config.bot_user_id, &reason)
            .await?;

        let already_muted = !matches!(warning.escalation, Escalation::None);
        let evasion_mute = if found.evasion && !already_muted {
            match self
                .restriction
                .mute(&message.author_id, &self.config.bot_user_id, self.config.evasion_mute_minutes, &reason)
                .await
            {
                Ok(outcome) => Some(outcome),
                Err(ModerationError::AlreadyMuted(_)) => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        info!(
            "Restricted content from {} in {} ({}evasion)",
            message.author_id,
            message.channel_id,
            if found.evasion { "" } else { "no " }
        );
        Ok(MessageVerdict::RestrictedContent {
            terms: found.terms,
            warning,
            evasion_mute,
        })
    }

    /// Re-apply an active mute to a member who rejoined
    pub async fn handle_member_join(&self, user: &UserId) -> ModerationResult<bool> {
        self.restriction.reapply_mute(user).await
    }

    /// Re-apply an active mute after a member's roles changed
    pub async fn handle_member_update(&self, user: &UserId) -> ModerationResult<bool> {
        self.restriction.reapply_mute(user).await
    }

    pub async fn handle_channel_create(&self, channel: &str) -> ModerationResult<bool> {
        self.restriction.apply_channel_preset(channel).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn restriction(&self) -> &Arc<RestrictionStateMachine> {
        &self.restriction
    }

    pub fn activity(&self) -> &UserActivityStore {
        &self.activity
    }

    pub fn announcements(&self) -> &AnnouncementService {
        &self.announcements
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn detector(&self) -> &DetectionCoordinator {
        &self.detector
    }
}
