//! # modguard
//!
//! Automated moderation engine for community chat servers.
//!
//! ## Features
//!
//! - **Sliding-window rate limiting**: burst, rapid and sustained tiers over a bounded activity buffer
//! - **Content analysis**: URL, mention, emoji, caps, repetition and toxicity scoring
//! - **Restricted terms**: evasion-tolerant matching of look-alike spellings
//! - **Restriction state machine**: warnings, escalation, mutes with exact role restoration
//! - **Job scheduler**: cron or interval jobs with overlap skipping, driving mute expiry and announcements
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modguard::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::load_or_create("config/modguard.yaml").await?;
//!     let store = Arc::new(MemoryStore::new());
//!     let platform = Arc::new(InMemoryPlatform::new());
//!
//!     let engine = ModerationEngine::new(config, store, platform.clone(), platform)?;
//!     engine.start().await?;
//!
//!     // Feed messages from your ingestion layer
//!     // engine.handle_message(&message).await?;
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod platforms;
pub mod store;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::restriction::RestrictionStateMachine;
    pub use crate::bot::scheduler::{Job, JobRegistry, JobStats, Schedule};
    pub use crate::bot::{MessageVerdict, ModerationEngine};
    pub use crate::config::EngineConfig;
    pub use crate::platforms::{ChannelGateway, InMemoryPlatform, MemberGateway};
    pub use crate::store::{Collection, DocumentStore, Filter, MemoryStore, Update};
    pub use crate::types::{
        Announcement, InboundMessage, ModerationError, ModerationResult, Mute, RestrictionDuration, UserMetrics,
        Warning,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
