// src/platforms/memory.rs - In-memory chat server used by the demo runner and tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use super::{ChannelGateway, MemberGateway, PermissionOverwrite, PlatformCall};
use crate::types::{MessageId, RoleId, UserId};

#[derive(Debug, Clone)]
struct MemberState {
    roles: Vec<RoleId>,
    accepts_dms: bool,
    in_voice: bool,
}

/// Simulated server: members with roles, an outbound call log and failure injection
pub struct InMemoryPlatform {
    members: Mutex<HashMap<UserId, MemberState>>,
    calls: Mutex<Vec<PlatformCall>>,
    failing_roles: Mutex<HashSet<RoleId>>,
    next_message: AtomicU64,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failing_roles: Mutex::new(HashSet::new()),
            next_message: AtomicU64::new(1),
        }
    }

    pub async fn add_member(&self, user: &str, roles: &[&str]) {
        self.members.lock().await.insert(
            user.to_string(),
            MemberState {
                roles: roles.iter().map(|r| r.to_string()).collect(),
                accepts_dms: true,
                in_voice: false,
            },
        );
    }

    pub async fn remove_member(&self, user: &str) {
        self.members.lock().await.remove(user);
    }

    pub async fn set_accepts_dms(&self, user: &str, accepts: bool) {
        if let Some(member) = self.members.lock().await.get_mut(user) {
            member.accepts_dms = accepts;
        }
    }

    pub async fn set_in_voice(&self, user: &str, in_voice: bool) {
        if let Some(member) = self.members.lock().await.get_mut(user) {
            member.in_voice = in_voice;
        }
    }

    /// Make every add/remove call for this role fail
    pub async fn fail_role(&self, role: &str) {
        self.failing_roles.lock().await.insert(role.to_string());
    }

    pub async fn roles_of(&self, user: &str) -> Vec<RoleId> {
        self.members
            .lock()
            .await
            .get(user)
            .map(|m| m.roles.clone())
            .unwrap_or_default()
    }

    pub async fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    async fn record(&self, call: PlatformCall) {
        debug!("Platform call: {:?}", call);
        self.calls.lock().await.push(call);
    }

    async fn check_role(&self, role: &str) -> Result<()> {
        if self.failing_roles.lock().await.contains(role) {
            return Err(anyhow!("missing permissions to manage role {}", role));
        }
        Ok(())
    }

    fn next_message_id(&self) -> MessageId {
        format!("msg-{}", self.next_message.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl MemberGateway for InMemoryPlatform {
    async fn member_exists(&self, user: &str) -> Result<bool> {
        Ok(self.members.lock().await.contains_key(user))
    }

    async fn list_roles(&self, user: &str) -> Result<Vec<RoleId>> {
        self.members
            .lock()
            .await
            .get(user)
            .map(|m| m.roles.clone())
            .ok_or_else(|| anyhow!("unknown member {}", user))
    }

    async fn add_role(&self, user: &str, role: &str) -> Result<()> {
        self.check_role(role).await?;
        {
            let mut members = self.members.lock().await;
            let member = members.get_mut(user).ok_or_else(|| anyhow!("unknown member {}", user))?;
            if !member.roles.iter().any(|r| r == role) {
                member.roles.push(role.to_string());
            }
        }
        self.record(PlatformCall::AddRole { user: user.to_string(), role: role.to_string() }).await;
        Ok(())
    }

    async fn remove_role(&self, user: &str, role: &str) -> Result<()> {
        self.check_role(role).await?;
        {
            let mut members = self.members.lock().await;
            let member = members.get_mut(user).ok_or_else(|| anyhow!("unknown member {}", user))?;
            member.roles.retain(|r| r != role);
        }
        self.record(PlatformCall::RemoveRole { user: user.to_string(), role: role.to_string() }).await;
        Ok(())
    }

    async fn disconnect_voice(&self, user: &str) -> Result<()> {
        if let Some(member) = self.members.lock().await.get_mut(user) {
            member.in_voice = false;
        }
        self.record(PlatformCall::DisconnectVoice { user: user.to_string() }).await;
        Ok(())
    }

    async fn send_direct_message(&self, user: &str, content: &str) -> Result<bool> {
        let accepts = self
            .members
            .lock()
            .await
            .get(user)
            .map(|m| m.accepts_dms)
            .unwrap_or(false);
        if accepts {
            self.record(PlatformCall::DirectMessage { user: user.to_string(), content: content.to_string() }).await;
        }
        Ok(accepts)
    }
}

#[async_trait]
impl ChannelGateway for InMemoryPlatform {
    async fn send_message(&self, channel: &str, content: &str) -> Result<MessageId> {
        self.record(PlatformCall::SendMessage { channel: channel.to_string(), content: content.to_string() }).await;
        Ok(self.next_message_id())
    }

    async fn reply(&self, channel: &str, message: &str, content: &str) -> Result<MessageId> {
        self.record(PlatformCall::Reply {
            channel: channel.to_string(),
            message: message.to_string(),
            content: content.to_string(),
        })
        .await;
        Ok(self.next_message_id())
    }

    async fn delete_message(&self, channel: &str, message: &str) -> Result<()> {
        self.record(PlatformCall::DeleteMessage { channel: channel.to_string(), message: message.to_string() }).await;
        Ok(())
    }

    async fn set_permission_overwrite(&self, channel: &str, role: &str, overwrite: PermissionOverwrite) -> Result<()> {
        self.record(PlatformCall::PermissionOverwrite {
            channel: channel.to_string(),
            role: role.to_string(),
            overwrite,
        })
        .await;
        Ok(())
    }
}
