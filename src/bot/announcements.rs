use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::scheduler::{Job, JobRegistry, Schedule};
use crate::platforms::ChannelGateway;
use crate::store::{Collection, DocumentStore, Filter, Update};
use crate::types::{Announcement, ChannelId, ModerationError, ModerationResult};

pub const ANNOUNCEMENTS_COLLECTION: &str = "announcements";

/// Registry names are namespaced so an announcement can never replace a system job
const JOB_PREFIX: &str = "announcement:";

/// Standard announcement cadences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnouncementCycle {
    Minute,
    Hour,
    ThreeHours,
    SixHours,
    TwelveHours,
    Day,
}

impl AnnouncementCycle {
    pub const ALL: [AnnouncementCycle; 6] = [
        AnnouncementCycle::Minute,
        AnnouncementCycle::Hour,
        AnnouncementCycle::ThreeHours,
        AnnouncementCycle::SixHours,
        AnnouncementCycle::TwelveHours,
        AnnouncementCycle::Day,
    ];

    pub fn expression(&self) -> &'static str {
        match self {
            AnnouncementCycle::Minute => "* * * * *",
            AnnouncementCycle::Hour => "0 * * * *",
            AnnouncementCycle::ThreeHours => "0 */3 * * *",
            AnnouncementCycle::SixHours => "0 */6 * * *",
            AnnouncementCycle::TwelveHours => "0 */12 * * *",
            AnnouncementCycle::Day => "0 18 * * *",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnnouncementCycle::Minute => "Every minute",
            AnnouncementCycle::Hour => "Every hour",
            AnnouncementCycle::ThreeHours => "Every 3 hours",
            AnnouncementCycle::SixHours => "Every 6 hours",
            AnnouncementCycle::TwelveHours => "Every 12 hours",
            AnnouncementCycle::Day => "Every day",
        }
    }

    pub fn from_expression(expr: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.expression() == expr.trim())
    }
}

/// Human label for a cycle expression; custom schedules are shown verbatim
pub fn describe_cycle(expr: &str) -> String {
    AnnouncementCycle::from_expression(expr)
        .map(|c| c.label().to_string())
        .unwrap_or_else(|| format!("Custom ({})", expr))
}

pub fn job_name(announcement: &str) -> String {
    format!("{}{}", JOB_PREFIX, announcement)
}

/// Fields to change on an existing announcement; `None` leaves a field as is
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnouncementEdit {
    pub message: Option<String>,
    pub channel: Option<ChannelId>,
    pub cycle: Option<String>,
}

impl AnnouncementEdit {
    pub fn is_empty(&self) -> bool {
        self.message.is_none() && self.channel.is_none() && self.cycle.is_none()
    }

    fn to_update(&self) -> Update {
        let mut update = Update::new();
        if let Some(message) = &self.message {
            update = update.set("message", message.as_str());
        }
        if let Some(channel) = &self.channel {
            update = update.set("channel", channel.as_str());
        }
        if let Some(cycle) = &self.cycle {
            update = update.set("cycle", cycle.as_str());
        }
        update
    }
}

fn by_name(name: &str) -> Filter {
    Filter::eq("name", name)
}

fn validate_cycle(cycle: &str) -> ModerationResult<()> {
    Schedule::parse(cycle)
        .map(|_| ())
        .map_err(|e| ModerationError::InvalidSchedule(e.to_string()))
}

/// Persisted recurring broadcasts, each driven by its own scheduled job
#[derive(Clone)]
pub struct AnnouncementService {
    announcements: Collection<Announcement>,
    channels: Arc<dyn ChannelGateway>,
    registry: Arc<JobRegistry>,
}

impl AnnouncementService {
    pub fn new(store: Arc<dyn DocumentStore>, channels: Arc<dyn ChannelGateway>, registry: Arc<JobRegistry>) -> Self {
        Self {
            announcements: Collection::new(store, ANNOUNCEMENTS_COLLECTION),
            channels,
            registry,
        }
    }

    /// Persist a new announcement and start broadcasting it
    pub async fn insert(&self, announcement: Announcement) -> ModerationResult<()> {
        validate_cycle(&announcement.cycle)?;

        let claimed = self
            .announcements
            .insert_if_absent(&by_name(&announcement.name), &announcement)
            .await?;
        if claimed.is_none() {
            return Err(ModerationError::AnnouncementExists(announcement.name));
        }

        self.schedule(&announcement.name, &announcement.cycle).await?;
        info!(
            "Announcement '{}' created by {} in {} ({})",
            announcement.name,
            announcement.creator_id,
            announcement.channel,
            describe_cycle(&announcement.cycle)
        );
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> ModerationResult<()> {
        if self.announcements.delete_many(&by_name(name)).await? == 0 {
            return Err(ModerationError::AnnouncementNotFound(name.to_string()));
        }
        self.registry.remove_job(&job_name(name)).await;
        info!("Announcement '{}' removed", name);
        Ok(())
    }

    /// Apply an edit and restart the job so a new cycle takes effect
    pub async fn edit(&self, name: &str, edit: &AnnouncementEdit) -> ModerationResult<Announcement> {
        if let Some(cycle) = &edit.cycle {
            validate_cycle(cycle)?;
        }

        let updated = if edit.is_empty() {
            self.announcements.get_one(&by_name(name)).await?
        } else {
            self.announcements.update(&by_name(name), &edit.to_update()).await?
        };
        let announcement = updated
            .map(|r| r.doc)
            .ok_or_else(|| ModerationError::AnnouncementNotFound(name.to_string()))?;

        self.schedule(&announcement.name, &announcement.cycle).await?;
        info!("Announcement '{}' edited", name);
        Ok(announcement)
    }

    pub async fn get(&self, name: &str) -> ModerationResult<Option<Announcement>> {
        Ok(self.announcements.get_one(&by_name(name)).await?.map(|r| r.doc))
    }

    pub async fn list(&self) -> ModerationResult<Vec<Announcement>> {
        Ok(self
            .announcements
            .get_many(&Filter::All)
            .await?
            .into_iter()
            .map(|r| r.doc)
            .collect())
    }

    /// Register a job for every stored announcement; returns how many started
    pub async fn start_all(&self) -> ModerationResult<usize> {
        let mut started = 0;
        for announcement in self.list().await? {
            match self.schedule(&announcement.name, &announcement.cycle).await {
                Ok(()) => started += 1,
                Err(e) => warn!("Skipping announcement '{}': {}", announcement.name, e),
            }
        }
        info!("Started {} announcements", started);
        Ok(started)
    }

    async fn schedule(&self, name: &str, cycle: &str) -> ModerationResult<()> {
        let job = AnnouncementJob {
            job_name: job_name(name),
            announcement: name.to_string(),
            cycle: cycle.to_string(),
            announcements: self.announcements.clone(),
            channels: Arc::clone(&self.channels),
        };
        self.registry
            .add_job(Arc::new(job))
            .await
            .map_err(|e| ModerationError::InvalidSchedule(format!("{:#}", e)))
    }
}

/// Posts an announcement, then replaces the previous post
pub struct AnnouncementJob {
    job_name: String,
    announcement: String,
    cycle: String,
    announcements: Collection<Announcement>,
    channels: Arc<dyn ChannelGateway>,
}

impl AnnouncementJob {
    pub fn announcement(&self) -> &str {
        &self.announcement
    }
}

#[async_trait]
impl Job for AnnouncementJob {
    fn name(&self) -> &str {
        &self.job_name
    }

    fn schedule(&self) -> &str {
        &self.cycle
    }

    async fn execute(&self) -> Result<()> {
        let Some(record) = self.announcements.get_one(&by_name(&self.announcement)).await? else {
            warn!("Announcement '{}' no longer exists", self.announcement);
            return Ok(());
        };
        let current = record.doc;

        let message_id = self
            .channels
            .send_message(&current.channel, &current.message)
            .await
            .with_context(|| format!("error sending announcement message from '{}'", current.name))?;

        self.announcements
            .update(&by_name(&current.name), &Update::new().set("messageId", message_id.as_str()))
            .await?;

        if let Some(previous) = current.message_id {
            if let Err(e) = self.channels.delete_message(&current.channel, &previous).await {
                warn!("Could not delete previous post of '{}': {:#}", current.name, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{InMemoryPlatform, PlatformCall};
    use crate::store::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        platform: Arc<InMemoryPlatform>,
        registry: Arc<JobRegistry>,
        service: AnnouncementService,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(InMemoryPlatform::new());
        let registry = Arc::new(JobRegistry::new());
        let service = AnnouncementService::new(store.clone(), platform.clone(), registry.clone());
        Harness { store, platform, registry, service }
    }

    fn rules(cycle: &str) -> Announcement {
        Announcement {
            creator_id: "mod".to_string(),
            name: "rules".to_string(),
            message: "Please read the rules".to_string(),
            channel: "general".to_string(),
            cycle: cycle.to_string(),
            message_id: None,
        }
    }

    #[test]
    fn test_cycles() {
        assert_eq!(AnnouncementCycle::from_expression("0 */3 * * *"), Some(AnnouncementCycle::ThreeHours));
        assert_eq!(describe_cycle("0 18 * * *"), "Every day");
        assert_eq!(describe_cycle("@every 5m"), "Custom (@every 5m)");
        for cycle in AnnouncementCycle::ALL {
            assert!(Schedule::parse(cycle.expression()).is_ok());
        }
    }

    #[tokio::test]
    async fn test_insert_registers_job_and_rejects_duplicates() {
        let h = harness();
        h.service.insert(rules(AnnouncementCycle::Hour.expression())).await.unwrap();

        assert!(h.registry.contains(&job_name("rules")).await);
        let duplicate = h.service.insert(rules(AnnouncementCycle::Day.expression())).await;
        assert!(matches!(duplicate, Err(ModerationError::AnnouncementExists(_))));
        assert_eq!(h.service.list().await.unwrap().len(), 1);

        h.registry.stop_all().await;
    }

    #[tokio::test]
    async fn test_invalid_cycle_is_not_stored() {
        let h = harness();
        let result = h.service.insert(rules("whenever")).await;

        assert!(matches!(result, Err(ModerationError::InvalidSchedule(_))));
        assert!(h.service.list().await.unwrap().is_empty());
        assert_eq!(h.registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_job_replaces_previous_post() {
        let h = harness();
        h.service.insert(rules(AnnouncementCycle::Hour.expression())).await.unwrap();
        let name = job_name("rules");

        assert_eq!(h.registry.run_now(&name).await, Some(true));
        let first = h.service.get("rules").await.unwrap().unwrap().message_id.unwrap();

        assert_eq!(h.registry.run_now(&name).await, Some(true));
        let second = h.service.get("rules").await.unwrap().unwrap().message_id.unwrap();
        assert_ne!(first, second);

        let calls = h.platform.calls().await;
        assert!(calls.contains(&PlatformCall::DeleteMessage {
            channel: "general".to_string(),
            message: first,
        }));
        assert_eq!(
            calls.iter().filter(|c| matches!(c, PlatformCall::SendMessage { .. })).count(),
            2
        );

        h.registry.stop_all().await;
    }

    #[tokio::test]
    async fn test_edit_and_remove() {
        let h = harness();
        h.service.insert(rules(AnnouncementCycle::Hour.expression())).await.unwrap();

        let edited = h
            .service
            .edit(
                "rules",
                &AnnouncementEdit {
                    message: Some("Be kind".to_string()),
                    cycle: Some(AnnouncementCycle::SixHours.expression().to_string()),
                    ..AnnouncementEdit::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.message, "Be kind");
        assert_eq!(edited.channel, "general");
        assert_eq!(edited.cycle, "0 */6 * * *");
        assert_eq!(h.registry.len().await, 1);

        let missing = h.service.edit("nope", &AnnouncementEdit::default()).await;
        assert!(matches!(missing, Err(ModerationError::AnnouncementNotFound(_))));

        h.service.remove("rules").await.unwrap();
        assert_eq!(h.registry.len().await, 0);
        assert!(matches!(
            h.service.remove("rules").await,
            Err(ModerationError::AnnouncementNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_start_all_rebuilds_registry() {
        let h = harness();
        h.service.insert(rules(AnnouncementCycle::Day.expression())).await.unwrap();

        let fresh_registry = Arc::new(JobRegistry::new());
        let restarted = AnnouncementService::new(h.store.clone(), h.platform.clone(), fresh_registry.clone());
        assert_eq!(restarted.start_all().await.unwrap(), 1);
        assert_eq!(fresh_registry.job_names().await, vec![job_name("rules")]);

        h.registry.stop_all().await;
        fresh_registry.stop_all().await;
    }
}
