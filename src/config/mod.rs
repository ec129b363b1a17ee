// src/config/mod.rs - Engine configuration loading and validation

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::bot::scheduler::Schedule;
use crate::types::{RecommendedAction, RestrictionDuration, Severity, ViolationType};

/// Env var selecting the config file path
pub const CONFIG_PATH_ENV: &str = "MODGUARD_CONFIG";
/// Env var overriding the store data directory
pub const DATA_DIR_ENV: &str = "MODGUARD_DATA_DIR";
pub const DEFAULT_CONFIG_PATH: &str = "config/modguard.yaml";

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Display name used in member notices
    pub server_name: String,
    /// Moderator id recorded for automatic actions
    pub bot_user_id: String,
    pub spam: SpamConfig,
    pub escalation: EscalationConfig,
    pub roles: RoleConfig,
    pub channels: ChannelConfig,
    pub lexicon: LexiconConfig,
    pub restricted_terms: Vec<String>,
    /// Extra mute applied when a restricted term was disguised
    pub evasion_mute_minutes: i64,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
}

/// One rate limit tier: at least `max_messages` inside `window_ms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitTier {
    pub name: ViolationType,
    pub max_messages: usize,
    pub window_ms: u64,
    pub severity: Severity,
    pub action: RecommendedAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamConfig {
    /// Spam score above which a message counts as spam
    pub threshold: f64,
    /// Ordered most severe first
    pub tiers: Vec<RateLimitTier>,
    pub content: ContentThresholds,
    /// Rolling average above which the author gets a text warning
    pub high_average_threshold: f64,
    /// Content spam score above which the author is muted
    pub content_mute_threshold: f64,
    pub content_mute_minutes: i64,
    pub rate_limit_reply: String,
    pub content_reply: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentThresholds {
    pub max_urls: usize,
    pub max_mentions: usize,
    pub max_emojis: usize,
    pub min_length: usize,
    pub caps_ratio: f64,
    pub min_caps_letters: usize,
    pub repetition_ratio: f64,
    pub toxicity_threshold: f64,
    pub weights: SpamWeights,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamWeights {
    pub urls: f64,
    pub mentions: f64,
    pub emojis: f64,
    pub low_quality: f64,
    pub caps: f64,
    pub repetition: f64,
    pub toxicity_bonus: f64,
}

/// Warning count -> mute minutes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub thresholds: BTreeMap<u32, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    pub muted_role: String,
    /// Members holding any of these are exempt from automatic consequences
    pub staff_roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// The one channel muted members can still see
    pub muted_text_channel: Option<String>,
    pub ignored_channels: Vec<String>,
    /// Empty means every channel is monitored
    pub monitored_channels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexiconConfig {
    pub low: Vec<String>,
    pub medium: Vec<String>,
    pub high: Vec<String>,
    pub critical: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sweep_schedule: String,
    pub retention_schedule: String,
    pub retention_days: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Persist collections as JSON files here; in-memory only when unset
    pub data_dir: Option<PathBuf>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_name: "Community Server".to_string(),
            bot_user_id: "modguard".to_string(),
            spam: SpamConfig::default(),
            escalation: EscalationConfig::default(),
            roles: RoleConfig::default(),
            channels: ChannelConfig::default(),
            lexicon: LexiconConfig::default(),
            restricted_terms: words(&["heil", "hitler", "goy", "palestine", "intifada", "nigger"]),
            evasion_mute_minutes: RestrictionDuration::SIX_HOURS,
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            threshold: 0.65,
            tiers: vec![
                RateLimitTier {
                    name: ViolationType::Burst,
                    max_messages: 4,
                    window_ms: 2_000,
                    severity: Severity::High,
                    action: RecommendedAction::Mute,
                    mute_minutes: Some(RestrictionDuration::ONE_MINUTE),
                },
                RateLimitTier {
                    name: ViolationType::Rapid,
                    max_messages: 7,
                    window_ms: 4_000,
                    severity: Severity::Medium,
                    action: RecommendedAction::TextWarn,
                    mute_minutes: None,
                },
                RateLimitTier {
                    name: ViolationType::Sustained,
                    max_messages: 10,
                    window_ms: 10_000,
                    severity: Severity::Low,
                    action: RecommendedAction::TextWarn,
                    mute_minutes: None,
                },
            ],
            content: ContentThresholds::default(),
            high_average_threshold: 0.7,
            content_mute_threshold: 0.9,
            content_mute_minutes: RestrictionDuration::FIFTEEN_MINUTES,
            rate_limit_reply: "You're sending messages too quickly. Please slow down.".to_string(),
            content_reply: "Your message looks like spam. Please keep the chat readable.".to_string(),
        }
    }
}

impl Default for ContentThresholds {
    fn default() -> Self {
        Self {
            max_urls: 3,
            max_mentions: 6,
            max_emojis: 15,
            min_length: 2,
            caps_ratio: 0.8,
            min_caps_letters: 10,
            repetition_ratio: 0.5,
            toxicity_threshold: 0.7,
            weights: SpamWeights::default(),
        }
    }
}

impl Default for SpamWeights {
    fn default() -> Self {
        Self {
            urls: 0.3,
            mentions: 0.4,
            emojis: 0.25,
            low_quality: 0.4,
            caps: 0.3,
            repetition: 0.3,
            toxicity_bonus: 0.2,
        }
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            thresholds: BTreeMap::from([
                (3, RestrictionDuration::SIX_HOURS),
                (4, RestrictionDuration::TWELVE_HOURS),
                (5, RestrictionDuration::ONE_DAY),
                (6, RestrictionDuration::THREE_DAYS),
                (7, RestrictionDuration::ONE_WEEK),
            ]),
        }
    }
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            muted_role: "muted".to_string(),
            staff_roles: words(&["moderator", "admin"]),
        }
    }
}

impl Default for LexiconConfig {
    fn default() -> Self {
        Self {
            low: words(&["suck", "sucks", "lame", "noob", "scrub", "ez", "easy", "mad", "salty", "cringe", "bad"]),
            medium: words(&["stupid", "idiot", "dumb", "trash", "loser", "pathetic", "damn", "hell", "crap", "moron", "garbage"]),
            high: words(&["fuck", "shit", "bitch", "asshole", "hate", "kill", "die", "retard", "cunt", "bastard"]),
            critical: words(&["kys", "kill yourself", "suicide", "rape", "nazi"]),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_schedule: "@every 1m".to_string(),
            retention_schedule: "0 3 * * *".to_string(),
            retention_days: 90,
        }
    }
}

impl EngineConfig {
    /// Load the config at `path`, writing the defaults there first when it is missing
    pub async fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save(path).await?;
            info!("Created default configuration at {}", path.display());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::parse(path, &content)?;
        config.validate()?;

        debug!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
        let config = if is_toml {
            toml::from_str(content).with_context(|| format!("parsing TOML config {}", path.display()))?
        } else {
            serde_yaml::from_str(content).with_context(|| format!("parsing YAML config {}", path.display()))?
        };
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let content = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
            toml::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        fs::write(path, content)
            .await
            .with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    /// Apply `MODGUARD_DATA_DIR` on top of the file contents
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                info!("Store data directory overridden by {}: {}", DATA_DIR_ENV, dir);
                self.store.data_dir = Some(PathBuf::from(dir));
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let spam = &self.spam;

        if spam.tiers.is_empty() {
            bail!("spam.tiers must define at least one rate limit tier");
        }
        for tier in &spam.tiers {
            if tier.max_messages == 0 || tier.window_ms == 0 {
                bail!("rate limit tier '{}' needs a positive message count and window", tier.name.as_str());
            }
            if tier.action == RecommendedAction::Mute && !tier.mute_minutes.map_or(false, is_valid_duration) {
                bail!("rate limit tier '{}' mutes but has no valid mute_minutes", tier.name.as_str());
            }
        }
        if spam.tiers.windows(2).any(|pair| pair[0].window_ms > pair[1].window_ms) {
            bail!("spam.tiers must be ordered most severe (shortest window) first");
        }

        for (name, value) in [
            ("spam.threshold", spam.threshold),
            ("spam.high_average_threshold", spam.high_average_threshold),
            ("spam.content_mute_threshold", spam.content_mute_threshold),
            ("spam.content.caps_ratio", spam.content.caps_ratio),
            ("spam.content.repetition_ratio", spam.content.repetition_ratio),
            ("spam.content.toxicity_threshold", spam.content.toxicity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be between 0 and 1, got {}", name, value);
            }
        }

        let w = &spam.content.weights;
        if [w.urls, w.mentions, w.emojis, w.low_quality, w.caps, w.repetition, w.toxicity_bonus]
            .iter()
            .any(|weight| *weight < 0.0)
        {
            bail!("spam.content.weights must not be negative");
        }

        if !is_valid_duration(spam.content_mute_minutes) {
            bail!("spam.content_mute_minutes must be -1 or positive");
        }
        if !is_valid_duration(self.evasion_mute_minutes) {
            bail!("evasion_mute_minutes must be -1 or positive");
        }
        if let Some((count, minutes)) = self.escalation.thresholds.iter().find(|(_, m)| !is_valid_duration(**m)) {
            bail!("escalation threshold {} has invalid duration {}", count, minutes);
        }

        if self.roles.muted_role.trim().is_empty() {
            bail!("roles.muted_role must be set");
        }
        if self.scheduler.retention_days <= 0 {
            bail!("scheduler.retention_days must be positive");
        }

        Schedule::parse(&self.scheduler.sweep_schedule).context("scheduler.sweep_schedule")?;
        Schedule::parse(&self.scheduler.retention_schedule).context("scheduler.retention_schedule")?;

        Ok(())
    }

    pub fn is_staff(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| self.roles.staff_roles.contains(r))
    }

    pub fn is_monitored(&self, channel: &str) -> bool {
        self.channels.monitored_channels.is_empty() || self.channels.monitored_channels.iter().any(|c| c == channel)
    }

    pub fn is_ignored(&self, channel: &str) -> bool {
        self.channels.ignored_channels.iter().any(|c| c == channel)
    }
}

fn is_valid_duration(minutes: i64) -> bool {
    minutes == RestrictionDuration::PERMANENT || minutes > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.spam.tiers.len(), 3);
        assert_eq!(config.escalation.thresholds.get(&3), Some(&360));
    }

    #[tokio::test]
    async fn test_load_or_create_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("modguard.yaml");

        let created = EngineConfig::load_or_create(&path).await.unwrap();
        assert!(path.exists());

        let reloaded = EngineConfig::load_or_create(&path).await.unwrap();
        assert_eq!(reloaded.server_name, created.server_name);
        assert_eq!(reloaded.spam.tiers, created.spam.tiers);
    }

    #[tokio::test]
    async fn test_partial_yaml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modguard.yaml");
        fs::write(&path, "server_name: Test Guild\nescalation:\n  thresholds:\n    2: 30\n").await.unwrap();

        let config = EngineConfig::load_or_create(&path).await.unwrap();
        assert_eq!(config.server_name, "Test Guild");
        assert_eq!(config.escalation.thresholds.len(), 1);
        assert_eq!(config.roles.muted_role, "muted");
    }

    #[tokio::test]
    async fn test_toml_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modguard.toml");
        fs::write(&path, "server_name = \"Toml Guild\"\nevasion_mute_minutes = 720\n").await.unwrap();

        let config = EngineConfig::load_or_create(&path).await.unwrap();
        assert_eq!(config.server_name, "Toml Guild");
        assert_eq!(config.evasion_mute_minutes, 720);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.spam.tiers.reverse();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.escalation.thresholds.insert(8, 0);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.scheduler.sweep_schedule = "not a schedule".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_policy() {
        let mut config = EngineConfig::default();
        assert!(config.is_monitored("general"));

        config.channels.monitored_channels = vec!["general".to_string()];
        config.channels.ignored_channels = vec!["bot-spam".to_string()];
        assert!(!config.is_monitored("random"));
        assert!(config.is_ignored("bot-spam"));
        assert!(config.is_staff(&["admin".to_string()]));
    }
}
