use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::activity::UserActivityStore;
use super::escalation::EscalationPolicy;
use crate::platforms::{ChannelGateway, MemberGateway, PermissionOverwrite};
use crate::store::{CmpOp, Collection, DocumentId, DocumentStore, Filter, Operand, Record, Update};
use crate::types::{
    now_millis, ChannelId, ModerationError, ModerationResult, Mute, RoleId, UnixMillis, UserId, Warning,
    PERMANENT_MUTE,
};

pub const WARNINGS_COLLECTION: &str = "warnings";
pub const MUTES_COLLECTION: &str = "mutes";
pub const ESCALATION_REASON: &str = "automatic escalation";

/// Render minutes as `1w 2d 3h 4m`, skipping empty units
pub fn format_minutes(minutes: i64) -> String {
    if minutes <= 0 {
        return "0m".to_string();
    }

    let units = [("w", 10_080), ("d", 1_440), ("h", 60), ("m", 1)];
    let mut rest = minutes;
    let mut parts = Vec::new();
    for (suffix, size) in units {
        let amount = rest / size;
        if amount > 0 {
            parts.push(format!("{}{}", amount, suffix));
            rest %= size;
        }
    }
    parts.join(" ")
}

pub(crate) fn platform_err(err: anyhow::Error) -> ModerationError {
    ModerationError::Platform(err.to_string())
}

/// What the escalation policy did after a warning
#[derive(Debug, Clone, PartialEq)]
pub enum Escalation {
    None,
    Muted(MuteOutcome),
    /// Policy asked for a mute but one was already active
    AlreadyMuted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WarnOutcome {
    pub warning_id: DocumentId,
    pub warning_count: i64,
    pub notified: bool,
    pub escalation: Escalation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwarnOutcome {
    pub target: UserId,
    pub warning_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuteOutcome {
    pub target: UserId,
    pub duration_minutes: i64,
    pub permanent: bool,
    /// Roles removed and stored for restoration
    pub snapshot_roles: Vec<RoleId>,
    /// Roles that could not be removed and stay on the member
    pub failed_roles: Vec<RoleId>,
    pub voice_disconnected: bool,
    pub notified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnmuteOutcome {
    pub target: UserId,
    pub restored_roles: Vec<RoleId>,
    pub failed_roles: Vec<RoleId>,
    pub muted_role_removed: bool,
    /// Record released without touching the member
    pub metadata_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired: usize,
    pub unmuted: usize,
    pub released: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetReport {
    pub applied: Vec<ChannelId>,
    pub skipped: Vec<ChannelId>,
    pub failed: Vec<ChannelId>,
}

/// Role and channel settings the state machine needs
#[derive(Debug, Clone)]
pub struct RestrictionSettings {
    pub server_name: String,
    pub muted_role: RoleId,
    pub muted_text_channel: Option<ChannelId>,
}

/// Owns warnings and mutes and drives the Clean -> Warned(n) -> Muted transitions
pub struct RestrictionStateMachine {
    members: Arc<dyn MemberGateway>,
    channels: Arc<dyn ChannelGateway>,
    warnings: Collection<Warning>,
    mutes: Collection<Mute>,
    activity: UserActivityStore,
    escalation: EscalationPolicy,
    settings: RestrictionSettings,
}

fn by_target(target: &str) -> Filter {
    Filter::eq("targetId", target)
}

/// `permanent != true AND timestamp + durationMinutes * 60000 < now`
pub fn expired_mutes_filter(now: UnixMillis) -> Filter {
    Filter::and(vec![
        Filter::ne("permanent", true),
        Filter::compare(
            Operand::field("timestamp").add(Operand::field("durationMinutes").mul(Operand::value(60_000))),
            CmpOp::Lt,
            Operand::value(now),
        ),
    ])
}

impl RestrictionStateMachine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        members: Arc<dyn MemberGateway>,
        channels: Arc<dyn ChannelGateway>,
        activity: UserActivityStore,
        escalation: EscalationPolicy,
        settings: RestrictionSettings,
    ) -> Self {
        Self {
            members,
            channels,
            warnings: Collection::new(Arc::clone(&store), WARNINGS_COLLECTION),
            mutes: Collection::new(store, MUTES_COLLECTION),
            activity,
            escalation,
            settings,
        }
    }

    pub fn muted_role(&self) -> &str {
        &self.settings.muted_role
    }

    /// Record a warning, notify the target and apply the escalation policy
    pub async fn warn(&self, target: &str, moderator: &str, reason: &str) -> ModerationResult<WarnOutcome> {
        let now = now_millis();
        let warning = Warning {
            target_id: target.to_string(),
            moderator_id: moderator.to_string(),
            reason: reason.to_string(),
            timestamp: now,
        };

        let warning_id = self.warnings.insert(&warning).await?;
        let warning_count = self.activity.adjust_warning_count(target, 1, now).await?;
        info!("Warned {} ({} warnings) by {}: {}", target, warning_count, moderator, reason);

        let notice = format!(
            "You have been warned in {}. Reason is: `{}`",
            self.settings.server_name, reason
        );
        let notified = self.notify(target, &notice).await;

        let escalation = match self.escalation.mute_for(warning_count) {
            None => Escalation::None,
            Some(minutes) => match self.mute(target, moderator, minutes, ESCALATION_REASON).await {
                Ok(outcome) => Escalation::Muted(outcome),
                Err(ModerationError::AlreadyMuted(_)) => {
                    debug!("Escalation for {} skipped, already muted", target);
                    Escalation::AlreadyMuted
                }
                Err(e) => return Err(e),
            },
        };

        Ok(WarnOutcome {
            warning_id,
            warning_count,
            notified,
            escalation,
        })
    }

    /// Revoke a warning by id
    pub async fn unwarn(&self, warning_id: &str, moderator: &str) -> ModerationResult<UnwarnOutcome> {
        let record = self
            .warnings
            .get_by_id(warning_id)
            .await?
            .ok_or_else(|| ModerationError::WarningNotFound(warning_id.to_string()))?;

        if !self.warnings.delete(warning_id).await? {
            return Err(ModerationError::WarningNotFound(warning_id.to_string()));
        }

        let target = record.doc.target_id;
        let warning_count = self.activity.adjust_warning_count(&target, -1, now_millis()).await?;
        info!("Warning {} on {} revoked by {} ({} left)", warning_id, target, moderator, warning_count);

        Ok(UnwarnOutcome { target, warning_count })
    }

    /// Mute a member, snapshotting the roles it strips
    ///
    /// The record is claimed before any role is touched, so of two concurrent
    /// mutes the loser fails with `AlreadyMuted` and changes nothing.
    pub async fn mute(&self, target: &str, moderator: &str, duration: i64, reason: &str) -> ModerationResult<MuteOutcome> {
        if duration != PERMANENT_MUTE && duration <= 0 {
            return Err(ModerationError::InvalidDuration(duration));
        }
        let permanent = duration == PERMANENT_MUTE;
        let now = now_millis();

        let record = Mute {
            target_id: target.to_string(),
            moderator_id: moderator.to_string(),
            reason: reason.to_string(),
            timestamp: now,
            duration_minutes: duration,
            permanent,
            snapshot_roles: Vec::new(),
        };
        let Some(mute_id) = self.mutes.insert_if_absent(&by_target(target), &record).await? else {
            return Err(ModerationError::AlreadyMuted(target.to_string()));
        };

        let roles = match self.members.list_roles(target).await {
            Ok(roles) => roles,
            Err(e) => {
                self.mutes.delete(&mute_id).await?;
                return Err(platform_err(e));
            }
        };

        let mut snapshot_roles = Vec::new();
        let mut failed_roles = Vec::new();
        for role in roles.into_iter().filter(|r| *r != self.settings.muted_role) {
            match self.members.remove_role(target, &role).await {
                Ok(()) => snapshot_roles.push(role),
                Err(e) => {
                    warn!("Could not remove role {} from {} while muting: {}", role, target, e);
                    failed_roles.push(role);
                }
            }
        }

        if let Err(e) = self.members.add_role(target, &self.settings.muted_role).await {
            self.undo_mute(target, &mute_id, &snapshot_roles, false).await;
            return Err(platform_err(e));
        }

        let snapshot = Update::new().set("snapshotRoles", serde_json::to_value(&snapshot_roles)?);
        if let Err(e) = self.mutes.update(&Filter::by_id(&mute_id), &snapshot).await {
            self.undo_mute(target, &mute_id, &snapshot_roles, true).await;
            return Err(e.into());
        }

        let voice_disconnected = match self.members.disconnect_voice(target).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not disconnect {} from voice: {}", target, e);
                false
            }
        };

        self.settle_mute_minutes(target, record.added_minutes()).await;

        let length = if permanent {
            "permanently".to_string()
        } else {
            format!("for {}", format_minutes(duration))
        };
        info!("Muted {} {} by {}: {}", target, length, moderator, reason);

        let notice = format!(
            "You have been muted in {}. You will be muted {} with reason: `{}`",
            self.settings.server_name, length, reason
        );
        let notified = self.notify(target, &notice).await;

        Ok(MuteOutcome {
            target: target.to_string(),
            duration_minutes: duration,
            permanent,
            snapshot_roles,
            failed_roles,
            voice_disconnected,
            notified,
        })
    }

    /// Lift a mute and restore the snapshotted roles, one by one
    pub async fn unmute(&self, target: &str) -> ModerationResult<UnmuteOutcome> {
        let record = self.take_mute(target).await?;
        let mut outcome = UnmuteOutcome {
            target: target.to_string(),
            ..UnmuteOutcome::default()
        };

        for role in &record.doc.snapshot_roles {
            match self.members.add_role(target, role).await {
                Ok(()) => outcome.restored_roles.push(role.clone()),
                Err(e) => {
                    warn!("Could not restore role {} to {}: {}", role, target, e);
                    outcome.failed_roles.push(role.clone());
                }
            }
        }

        match self.members.remove_role(target, &self.settings.muted_role).await {
            Ok(()) => outcome.muted_role_removed = true,
            Err(e) => warn!("Could not remove muted role from {}: {}", target, e),
        }
        self.settle_mute_minutes(target, -record.doc.added_minutes()).await;

        info!(
            "Unmuted {} ({} roles restored, {} failed)",
            target,
            outcome.restored_roles.len(),
            outcome.failed_roles.len()
        );
        Ok(outcome)
    }

    /// Delete the mute record and its metrics without calling the platform
    pub async fn release(&self, target: &str) -> ModerationResult<UnmuteOutcome> {
        let record = self.take_mute(target).await?;
        self.settle_mute_minutes(target, -record.doc.added_minutes()).await;
        info!("Released mute record for {} without role changes", target);

        Ok(UnmuteOutcome {
            target: target.to_string(),
            metadata_only: true,
            ..UnmuteOutcome::default()
        })
    }

    /// Claim the active mute by deleting it; losing the delete means someone else unmuted first
    async fn take_mute(&self, target: &str) -> ModerationResult<Record<Mute>> {
        let record = self
            .mutes
            .get_one(&by_target(target))
            .await?
            .ok_or_else(|| ModerationError::NotMuted(target.to_string()))?;

        if !self.mutes.delete(&record.id).await? {
            return Err(ModerationError::NotMuted(target.to_string()));
        }
        Ok(record)
    }

    /// Put back what a half-applied mute stripped and drop its claimed record
    async fn undo_mute(&self, target: &str, mute_id: &str, stripped: &[RoleId], muted_role_added: bool) {
        for role in stripped {
            if let Err(e) = self.members.add_role(target, role).await {
                warn!("Could not restore role {} to {}: {}", role, target, e);
            }
        }
        if muted_role_added {
            if let Err(e) = self.members.remove_role(target, &self.settings.muted_role).await {
                warn!("Could not remove muted role from {}: {}", target, e);
            }
        }
        if let Err(e) = self.mutes.delete(mute_id).await {
            warn!("Could not drop mute record {} for {}: {}", mute_id, target, e);
        }
    }

    /// Metrics lag behind the mute itself; a failed write never undoes a role change
    async fn settle_mute_minutes(&self, target: &str, delta: i64) {
        if let Err(e) = self.activity.adjust_mute_minutes(target, delta, now_millis()).await {
            warn!("Could not adjust mute minutes for {} by {}: {}", target, delta, e);
        }
    }

    /// Strip roles again for a member whose mute is still active; the snapshot is left alone
    pub async fn reapply_mute(&self, target: &str) -> ModerationResult<bool> {
        if self.active_mute(target).await?.is_none() {
            return Ok(false);
        }

        let roles = self.members.list_roles(target).await.map_err(platform_err)?;
        for role in roles.iter().filter(|r| **r != self.settings.muted_role) {
            if let Err(e) = self.members.remove_role(target, role).await {
                warn!("Could not remove role {} from muted member {}: {}", role, target, e);
            }
        }
        if !roles.iter().any(|r| *r == self.settings.muted_role) {
            self.members
                .add_role(target, &self.settings.muted_role)
                .await
                .map_err(platform_err)?;
        }
        if let Err(e) = self.members.disconnect_voice(target).await {
            warn!("Could not disconnect {} from voice: {}", target, e);
        }

        debug!("Re-applied active mute for {}", target);
        Ok(true)
    }

    pub async fn active_mute(&self, target: &str) -> ModerationResult<Option<Mute>> {
        Ok(self.mutes.get_one(&by_target(target)).await?.map(|r| r.doc))
    }

    pub async fn is_muted(&self, target: &str) -> ModerationResult<bool> {
        Ok(self.mutes.count(&by_target(target)).await? > 0)
    }

    /// Warnings on a target, oldest first
    pub async fn warnings_for(&self, target: &str) -> ModerationResult<Vec<Record<Warning>>> {
        let mut warnings = self.warnings.get_many(&by_target(target)).await?;
        warnings.sort_by_key(|r| r.doc.timestamp);
        Ok(warnings)
    }

    pub async fn expired_mutes(&self, now: UnixMillis) -> ModerationResult<Vec<Record<Mute>>> {
        Ok(self.mutes.get_many(&expired_mutes_filter(now)).await?)
    }

    /// Unmute every expired mute; members who left only get their record released
    pub async fn sweep_expired(&self, now: UnixMillis) -> ModerationResult<SweepReport> {
        let expired = self.expired_mutes(now).await?;
        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };

        for record in expired {
            let target = record.doc.target_id;
            let present = match self.members.member_exists(&target).await {
                Ok(present) => present,
                Err(e) => {
                    warn!("Could not resolve member {}, releasing record only: {}", target, e);
                    false
                }
            };

            let result = if present {
                self.unmute(&target).await
            } else {
                self.release(&target).await
            };

            match result {
                Ok(outcome) if outcome.metadata_only => report.released += 1,
                Ok(_) => report.unmuted += 1,
                // Unmuted by someone else between the query and now
                Err(ModerationError::NotMuted(_)) => {}
                Err(e @ ModerationError::StoreUnavailable(_)) => return Err(e),
                Err(e) => {
                    warn!("Failed to expire mute for {}: {}", target, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Hide a channel from the muted role, unless it is the muted-text channel
    pub async fn apply_channel_preset(&self, channel: &str) -> ModerationResult<bool> {
        if self.settings.muted_text_channel.as_deref() == Some(channel) {
            return Ok(false);
        }
        self.channels
            .set_permission_overwrite(channel, &self.settings.muted_role, PermissionOverwrite::hidden())
            .await
            .map_err(platform_err)?;
        debug!("Applied muted preset to channel {}", channel);
        Ok(true)
    }

    pub async fn apply_muted_preset(&self, channels: &[ChannelId]) -> PresetReport {
        let mut report = PresetReport::default();
        for channel in channels {
            match self.apply_channel_preset(channel).await {
                Ok(true) => report.applied.push(channel.clone()),
                Ok(false) => report.skipped.push(channel.clone()),
                Err(e) => {
                    warn!("Could not apply muted preset to {}: {}", channel, e);
                    report.failed.push(channel.clone());
                }
            }
        }
        info!(
            "Muted preset: {} applied, {} skipped, {} failed",
            report.applied.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    /// DMs are best effort; a closed inbox is an expected outcome
    async fn notify(&self, target: &str, content: &str) -> bool {
        match self.members.send_direct_message(target, content).await {
            Ok(delivered) => {
                if !delivered {
                    debug!("{} does not accept direct messages", target);
                }
                delivered
            }
            Err(e) => {
                warn!("{}", ModerationError::DeliveryFailed(format!("{}: {}", target, e)));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{InMemoryPlatform, PlatformCall};
    use crate::store::{MemoryStore, StoreError, StoreResult};
    use crate::types::RestrictionDuration;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Harness {
        store: Arc<MemoryStore>,
        platform: Arc<InMemoryPlatform>,
        activity: UserActivityStore,
        machine: RestrictionStateMachine,
    }

    fn machine_over(store: Arc<dyn DocumentStore>, platform: Arc<InMemoryPlatform>) -> (UserActivityStore, RestrictionStateMachine) {
        let activity = UserActivityStore::new(store.clone());
        let machine = RestrictionStateMachine::new(
            store,
            platform.clone(),
            platform,
            activity.clone(),
            EscalationPolicy::new(BTreeMap::from([(3, 360), (4, 720), (5, 1440)])),
            RestrictionSettings {
                server_name: "Test Server".to_string(),
                muted_role: "muted".to_string(),
                muted_text_channel: Some("muted-chat".to_string()),
            },
        );
        (activity, machine)
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(InMemoryPlatform::new());
        let (activity, machine) = machine_over(store.clone(), platform.clone());
        Harness { store, platform, activity, machine }
    }

    /// Store whose writes to one collection can be switched off
    struct FailingWrites {
        inner: MemoryStore,
        collection: &'static str,
        failing: AtomicBool,
    }

    impl FailingWrites {
        fn new(collection: &'static str) -> Self {
            Self {
                inner: MemoryStore::new(),
                collection,
                failing: AtomicBool::new(false),
            }
        }

        fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn check(&self, collection: &str) -> StoreResult<()> {
            if collection == self.collection && self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable(format!("{} writes down", collection)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DocumentStore for FailingWrites {
        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }

        async fn insert(&self, collection: &str, doc: Value) -> StoreResult<DocumentId> {
            self.inner.insert(collection, doc).await
        }

        async fn insert_if_absent(&self, collection: &str, filter: &Filter, doc: Value) -> StoreResult<Option<DocumentId>> {
            self.inner.insert_if_absent(collection, filter, doc).await
        }

        async fn get_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Value>> {
            self.inner.get_one(collection, filter).await
        }

        async fn get_many(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Value>> {
            self.inner.get_many(collection, filter).await
        }

        async fn update(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<Option<Value>> {
            self.check(collection)?;
            self.inner.update(collection, filter, update).await
        }

        async fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<usize> {
            self.check(collection)?;
            self.inner.update_many(collection, filter, update).await
        }

        async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
            self.inner.delete(collection, id).await
        }

        async fn delete_many(&self, collection: &str, filter: &Filter) -> StoreResult<usize> {
            self.inner.delete_many(collection, filter).await
        }

        async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<usize> {
            self.inner.count(collection, filter).await
        }
    }

    fn role_set(roles: &[RoleId]) -> HashSet<RoleId> {
        roles.iter().cloned().collect()
    }

    #[test]
    fn test_format_minutes() {
        assert_eq!(format_minutes(1), "1m");
        assert_eq!(format_minutes(360), "6h");
        assert_eq!(format_minutes(10_080 + 2 * 1_440 + 3 * 60 + 4), "1w 2d 3h 4m");
        assert_eq!(format_minutes(0), "0m");
    }

    #[tokio::test]
    async fn test_mute_unmute_round_trip() {
        let h = harness();
        h.platform.add_member("u1", &["member", "artist", "verified"]).await;
        let before = role_set(&h.platform.roles_of("u1").await);

        let outcome = h.machine.mute("u1", "mod", 60, "spam").await.unwrap();
        assert_eq!(role_set(&outcome.snapshot_roles), before);
        assert_eq!(h.platform.roles_of("u1").await, vec!["muted".to_string()]);
        assert!(outcome.voice_disconnected);
        assert!(outcome.notified);
        assert!(h.machine.is_muted("u1").await.unwrap());

        let stored = h.machine.active_mute("u1").await.unwrap().unwrap();
        assert_eq!(role_set(&stored.snapshot_roles), before);
        assert_eq!(h.activity.get("u1").await.unwrap().unwrap().mute_duration_minutes, 60);

        let unmuted = h.machine.unmute("u1").await.unwrap();
        assert!(unmuted.failed_roles.is_empty());
        assert!(unmuted.muted_role_removed);
        assert_eq!(role_set(&h.platform.roles_of("u1").await), before);
        assert_eq!(h.activity.get("u1").await.unwrap().unwrap().mute_duration_minutes, 0);

        assert!(matches!(h.machine.unmute("u1").await, Err(ModerationError::NotMuted(_))));
    }

    #[tokio::test]
    async fn test_second_mute_is_rejected() {
        let h = harness();
        h.platform.add_member("u1", &["member"]).await;

        h.machine.mute("u1", "mod", 60, "first").await.unwrap();
        h.platform.clear_calls().await;

        let second = h.machine.mute("u1", "mod", 30, "second").await;
        assert!(matches!(second, Err(ModerationError::AlreadyMuted(_))));
        assert!(h.platform.calls().await.is_empty());
        assert_eq!(h.store.count(MUTES_COLLECTION, &Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_mutes_only_one_wins() {
        let h = Arc::new(harness());
        h.platform.add_member("u1", &["member", "artist"]).await;

        let a = {
            let h = h.clone();
            tokio::spawn(async move { h.machine.mute("u1", "mod-a", 60, "a").await })
        };
        let b = {
            let h = h.clone();
            tokio::spawn(async move { h.machine.mute("u1", "mod-b", 60, "b").await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(h.store.count(MUTES_COLLECTION, &Filter::All).await.unwrap(), 1);
        let stored = h.machine.active_mute("u1").await.unwrap().unwrap();
        assert_eq!(role_set(&stored.snapshot_roles), role_set(&["member".into(), "artist".into()]));
    }

    #[tokio::test]
    async fn test_invalid_durations() {
        let h = harness();
        h.platform.add_member("u1", &[]).await;

        assert!(matches!(h.machine.mute("u1", "mod", 0, "x").await, Err(ModerationError::InvalidDuration(0))));
        assert!(matches!(h.machine.mute("u1", "mod", -5, "x").await, Err(ModerationError::InvalidDuration(-5))));
        assert!(!h.machine.is_muted("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_permanent_mute() {
        let h = harness();
        h.platform.add_member("u1", &["member"]).await;

        let outcome = h.machine.mute("u1", "mod", PERMANENT_MUTE, "raid").await.unwrap();
        assert!(outcome.permanent);
        assert_eq!(h.activity.get("u1").await.unwrap().unwrap().mute_duration_minutes, 0);

        let dm = h.platform.calls().await.into_iter().find_map(|c| match c {
            PlatformCall::DirectMessage { content, .. } => Some(content),
            _ => None,
        });
        assert_eq!(
            dm.unwrap(),
            "You have been muted in Test Server. You will be muted permanently with reason: `raid`"
        );

        // Never expires
        assert!(h.machine.expired_mutes(i64::MAX / 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_restoration_is_tolerated() {
        let h = harness();
        h.platform.add_member("u1", &["member", "admin"]).await;
        h.machine.mute("u1", "mod", 60, "spam").await.unwrap();

        h.platform.fail_role("admin").await;
        let outcome = h.machine.unmute("u1").await.unwrap();

        assert_eq!(outcome.restored_roles, vec!["member".to_string()]);
        assert_eq!(outcome.failed_roles, vec!["admin".to_string()]);
        assert!(!h.machine.is_muted("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_dm_refusal_is_not_an_error() {
        let h = harness();
        h.platform.add_member("u1", &["member"]).await;
        h.platform.set_accepts_dms("u1", false).await;

        let outcome = h.machine.warn("u1", "mod", "be nice").await.unwrap();
        assert!(!outcome.notified);
        assert_eq!(outcome.warning_count, 1);
    }

    #[tokio::test]
    async fn test_warnings_escalate_to_mute() {
        let h = harness();
        h.platform.add_member("u1", &["member"]).await;

        for _ in 0..2 {
            let outcome = h.machine.warn("u1", "mod", "rude").await.unwrap();
            assert_eq!(outcome.escalation, Escalation::None);
        }

        let third = h.machine.warn("u1", "mod", "rude").await.unwrap();
        assert_eq!(third.warning_count, 3);
        match third.escalation {
            Escalation::Muted(mute) => assert_eq!(mute.duration_minutes, 360),
            other => panic!("expected escalation mute, got {:?}", other),
        }
        let mute = h.machine.active_mute("u1").await.unwrap().unwrap();
        assert_eq!(mute.reason, ESCALATION_REASON);

        // Already muted, the next warning does not stack another mute
        let fourth = h.machine.warn("u1", "mod", "rude").await.unwrap();
        assert_eq!(fourth.escalation, Escalation::AlreadyMuted);
    }

    #[tokio::test]
    async fn test_escalation_above_highest_threshold() {
        let h = harness();
        h.platform.add_member("u1", &[]).await;

        for _ in 0..5 {
            h.machine.warn("u1", "mod", "rude").await.unwrap();
        }
        h.machine.unmute("u1").await.unwrap();

        let sixth = h.machine.warn("u1", "mod", "rude").await.unwrap();
        assert_eq!(sixth.warning_count, 6);
        match sixth.escalation {
            Escalation::Muted(mute) => assert_eq!(mute.duration_minutes, 1440),
            other => panic!("expected escalation mute, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unwarn() {
        let h = harness();
        h.platform.add_member("u1", &[]).await;

        let first = h.machine.warn("u1", "mod", "one").await.unwrap();
        h.machine.warn("u1", "mod", "two").await.unwrap();

        let outcome = h.machine.unwarn(&first.warning_id, "mod").await.unwrap();
        assert_eq!(outcome.warning_count, 1);

        let remaining = h.machine.warnings_for("u1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].doc.reason, "two");

        assert!(matches!(
            h.machine.unwarn(&first.warning_id, "mod").await,
            Err(ModerationError::WarningNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expiry_sweep() {
        let h = harness();
        h.platform.add_member("stays", &["member"]).await;
        h.platform.add_member("leaves", &["member"]).await;
        h.platform.add_member("long", &["member"]).await;

        h.machine.mute("stays", "mod", 1, "short").await.unwrap();
        h.machine.mute("leaves", "mod", 1, "short").await.unwrap();
        h.machine.mute("long", "mod", RestrictionDuration::ONE_WEEK, "long").await.unwrap();
        h.platform.remove_member("leaves").await;

        let later = now_millis() + 2 * 60_000;
        assert_eq!(h.machine.expired_mutes(later).await.unwrap().len(), 2);

        let report = h.machine.sweep_expired(later).await.unwrap();
        assert_eq!(report, SweepReport { expired: 2, unmuted: 1, released: 1, failed: 0 });
        assert!(h.machine.expired_mutes(later).await.unwrap().is_empty());
        assert_eq!(h.platform.roles_of("stays").await, vec!["member".to_string()]);
        assert!(h.machine.is_muted("long").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_makes_no_role_calls() {
        let h = harness();
        h.platform.add_member("u1", &["member"]).await;
        h.machine.mute("u1", "mod", 60, "spam").await.unwrap();
        h.platform.clear_calls().await;

        let outcome = h.machine.release("u1").await.unwrap();
        assert!(outcome.metadata_only);
        assert!(h.platform.calls().await.is_empty());
        assert!(!h.machine.is_muted("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_reapply_on_rejoin() {
        let h = harness();
        h.platform.add_member("u1", &["member"]).await;
        h.machine.mute("u1", "mod", 60, "spam").await.unwrap();

        // Member rejoins with default roles
        h.platform.add_member("u1", &["member"]).await;
        assert!(h.machine.reapply_mute("u1").await.unwrap());
        assert_eq!(h.platform.roles_of("u1").await, vec!["muted".to_string()]);

        let stored = h.machine.active_mute("u1").await.unwrap().unwrap();
        assert_eq!(stored.snapshot_roles, vec!["member".to_string()]);
        assert!(!h.machine.reapply_mute("someone-else").await.unwrap());
    }

    #[tokio::test]
    async fn test_channel_preset() {
        let h = harness();
        let channels = vec!["general".to_string(), "muted-chat".to_string()];

        let report = h.machine.apply_muted_preset(&channels).await;
        assert_eq!(report.applied, vec!["general".to_string()]);
        assert_eq!(report.skipped, vec!["muted-chat".to_string()]);
        assert!(h.platform.calls().await.contains(&PlatformCall::PermissionOverwrite {
            channel: "general".to_string(),
            role: "muted".to_string(),
            overwrite: PermissionOverwrite::hidden(),
        }));
    }

    #[tokio::test]
    async fn test_store_outage_surfaces() {
        let h = harness();
        h.platform.add_member("u1", &[]).await;
        h.store.set_available(false);

        assert!(matches!(
            h.machine.mute("u1", "mod", 5, "x").await,
            Err(ModerationError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unmute_restores_roles_when_metrics_write_fails() {
        let store = Arc::new(FailingWrites::new(crate::bot::activity::METRICS_COLLECTION));
        let platform = Arc::new(InMemoryPlatform::new());
        let (_, machine) = machine_over(store.clone(), platform.clone());
        platform.add_member("u1", &["member", "artist"]).await;

        machine.mute("u1", "mod", 60, "spam").await.unwrap();
        store.fail(true);

        let outcome = machine.unmute("u1").await.unwrap();
        assert_eq!(role_set(&outcome.restored_roles), role_set(&["member".to_string(), "artist".to_string()]));
        assert!(outcome.muted_role_removed);
        assert_eq!(
            role_set(&platform.roles_of("u1").await),
            role_set(&["member".to_string(), "artist".to_string()])
        );
        assert!(!machine.is_muted("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_mute_rolls_back_when_snapshot_write_fails() {
        let store = Arc::new(FailingWrites::new(MUTES_COLLECTION));
        let platform = Arc::new(InMemoryPlatform::new());
        let (_, machine) = machine_over(store.clone(), platform.clone());
        platform.add_member("u1", &["member", "artist"]).await;
        store.fail(true);

        assert!(matches!(
            machine.mute("u1", "mod", 60, "spam").await,
            Err(ModerationError::StoreUnavailable(_))
        ));
        assert_eq!(
            role_set(&platform.roles_of("u1").await),
            role_set(&["member".to_string(), "artist".to_string()])
        );
        assert!(!machine.is_muted("u1").await.unwrap());

        store.fail(false);
        let outcome = machine.mute("u1", "mod", 60, "spam").await.unwrap();
        assert_eq!(outcome.snapshot_roles.len(), 2);
    }
}
