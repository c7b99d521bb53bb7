//! Typed views of the documents the upgrade touches.
//!
//! These only model the fields the migration adds or rewrites. Everything
//! else on the documents is left to the application and ignored on decode.

use chrono::{DateTime, Duration, Utc};
use mongodb::bson::{self, serde_helpers::chrono_datetime_as_bson_datetime, Bson};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub const COLLAB_PODS: &str = "collabPods";
pub const POD_COOLDOWNS: &str = "podCooldowns";
pub const MESSAGES: &str = "messages";
/// Ledger of applied upgrades.
pub const SCHEMA_MIGRATIONS: &str = "schemaMigrations";

/// How long a member stays locked out after leaving or being kicked.
pub const COOLDOWN_MINUTES: i64 = 15;

pub fn cooldown_period() -> Duration {
    Duration::minutes(COOLDOWN_MINUTES)
}

/// Enumerated message kind. Every message that existed before the upgrade is a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Chat,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Chat => "CHAT",
            MessageType::System => "SYSTEM",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHAT" => Ok(MessageType::Chat),
            "SYSTEM" => Ok(MessageType::System),
            other => Err(format!("unknown message type {other:?}")),
        }
    }
}

/// What triggered a cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CooldownAction {
    Leave,
    Rejoin,
    Kick,
}

/// Role fields of a collab pod after the upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodRoles {
    #[serde(rename = "_id")]
    pub id: Bson,
    /// Copied from `creatorId`; never changes afterwards.
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub admin_ids: Vec<String>,
    #[serde(default)]
    pub banned_ids: Vec<String>,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

impl PodRoles {
    pub fn is_banned(&self, user_id: &str) -> bool {
        self.banned_ids.iter().any(|id| id == user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.owner_id.as_deref() == Some(user_id) || self.admin_ids.iter().any(|id| id == user_id)
    }
}

/// A leave/rejoin lockout record. Removed by the TTL monitor once `expiry_date` passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodCooldown {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Bson>,
    pub user_id: String,
    pub pod_id: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expiry_date: DateTime<Utc>,
    #[serde(default)]
    pub action: Option<CooldownAction>,
    #[serde(default)]
    pub created_at: Option<bson::DateTime>,
}

impl PodCooldown {
    #[cfg(test)]
    pub fn starting_at(
        user_id: impl Into<String>,
        pod_id: impl Into<String>,
        action: CooldownAction,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            pod_id: pod_id.into(),
            expiry_date: now + cooldown_period(),
            action: Some(action),
            created_at: Some(bson::DateTime::from_chrono(now)),
        }
    }

    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        at < self.expiry_date
    }
}

/// Message fields touched by the upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "_id")]
    pub id: Bson,
    #[serde(default)]
    pub pod_id: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
    /// Pre-upgrade value of `messageType` (e.g. `CAMPUS_POD`, `GLOBAL_ROOM`).
    #[serde(default)]
    pub message_type_string: Option<String>,
    #[serde(default)]
    pub sent_at: Option<bson::DateTime>,
}
