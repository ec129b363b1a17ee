use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, MessageId, RoleId, UserId};

pub mod memory;

pub use memory::InMemoryPlatform;

/// Channel permission override applied to a role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    pub view_channel: bool,
}

impl PermissionOverwrite {
    /// Preset that hides a channel from the muted role
    pub fn hidden() -> Self {
        Self { view_channel: false }
    }
}

/// Trait defining the member-side calls the engine makes against a chat server
#[async_trait]
pub trait MemberGateway: Send + Sync {
    /// Whether the user is currently a member of the server
    async fn member_exists(&self, user: &str) -> Result<bool>;

    /// Roles currently held by the member, in platform order
    async fn list_roles(&self, user: &str) -> Result<Vec<RoleId>>;

    async fn add_role(&self, user: &str, role: &str) -> Result<()>;

    async fn remove_role(&self, user: &str, role: &str) -> Result<()>;

    /// Drop the member from any voice channel they are connected to
    async fn disconnect_voice(&self, user: &str) -> Result<()>;

    /// Send a direct message; returns false when the member does not accept DMs
    async fn send_direct_message(&self, user: &str, content: &str) -> Result<bool>;
}

/// Trait defining the channel-side calls the engine makes
#[async_trait]
pub trait ChannelGateway: Send + Sync {
    async fn send_message(&self, channel: &str, content: &str) -> Result<MessageId>;

    /// Reply to a specific message in its channel
    async fn reply(&self, channel: &str, message: &str, content: &str) -> Result<MessageId>;

    async fn delete_message(&self, channel: &str, message: &str) -> Result<()>;

    async fn set_permission_overwrite(&self, channel: &str, role: &str, overwrite: PermissionOverwrite) -> Result<()>;
}

/// A recorded outbound platform call, used by the demo runner and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    AddRole { user: UserId, role: RoleId },
    RemoveRole { user: UserId, role: RoleId },
    DisconnectVoice { user: UserId },
    DirectMessage { user: UserId, content: String },
    SendMessage { channel: ChannelId, content: String },
    Reply { channel: ChannelId, message: MessageId, content: String },
    DeleteMessage { channel: ChannelId, message: MessageId },
    PermissionOverwrite { channel: ChannelId, role: RoleId, overwrite: PermissionOverwrite },
}
