use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;

use super::activity::UserActivityStore;
use super::restriction::RestrictionStateMachine;
use super::scheduler::Job;
use crate::types::now_millis;

pub const MUTE_SWEEP_JOB: &str = "mute-expiry-sweep";
pub const METRICS_RETENTION_JOB: &str = "metrics-retention";

/// Lifts mutes whose duration has run out
pub struct MuteExpirySweepJob {
    restriction: Arc<RestrictionStateMachine>,
    schedule: String,
}

impl MuteExpirySweepJob {
    pub fn new(restriction: Arc<RestrictionStateMachine>, schedule: impl Into<String>) -> Self {
        Self {
            restriction,
            schedule: schedule.into(),
        }
    }
}

#[async_trait]
impl Job for MuteExpirySweepJob {
    fn name(&self) -> &str {
        MUTE_SWEEP_JOB
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    async fn execute(&self) -> Result<()> {
        let report = self
            .restriction
            .sweep_expired(now_millis())
            .await
            .context("mute expiry sweep failed")?;

        if report.expired > 0 {
            info!(
                "Expired {} mutes: {} unmuted, {} released, {} failed",
                report.expired, report.unmuted, report.released, report.failed
            );
        } else {
            debug!("No expired mutes");
        }
        Ok(())
    }
}

/// Drops metrics for long-inactive users and trims stale activity samples
pub struct MetricsRetentionJob {
    activity: UserActivityStore,
    schedule: String,
    retention_days: i64,
}

impl MetricsRetentionJob {
    pub fn new(activity: UserActivityStore, schedule: impl Into<String>, retention_days: i64) -> Self {
        Self {
            activity,
            schedule: schedule.into(),
            retention_days,
        }
    }
}

#[async_trait]
impl Job for MetricsRetentionJob {
    fn name(&self) -> &str {
        METRICS_RETENTION_JOB
    }

    fn schedule(&self) -> &str {
        &self.schedule
    }

    async fn execute(&self) -> Result<()> {
        let now = now_millis();
        let deleted = self
            .activity
            .delete_inactive(self.retention_days, now)
            .await
            .context("failed to delete inactive user metrics")?;
        let cleaned = self
            .activity
            .clean_old_samples(now)
            .await
            .context("failed to clean activity samples")?;

        info!(
            "Metrics retention: removed {} users inactive for {}+ days, trimmed samples for {}",
            deleted, self.retention_days, cleaned
        );
        Ok(())
    }
}
