//! queries.rs
//!
//! Ad-hoc lookups against the upgraded collections, plus the one admin write
//! the new role fields make possible: banning a member from a pod.

use crate::schema::{MessageType, PodCooldown, PodRoles, COLLAB_PODS, MESSAGES, POD_COOLDOWNS};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Bson, Document};
use mongodb::Database;
use std::str::FromStr;

/// A lookup the `inspect` command can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// All cooldowns held by a user
    UserCooldowns { user_id: String },
    /// Whether a user is on cooldown for a pod
    PodCooldown { user_id: String, pod_id: String },
    /// Pods a user owns
    OwnedPods { user_id: String },
    /// Pods where a user is admin
    AdminPods { user_id: String },
    /// Pods a user is banned from
    BannedPods { user_id: String },
    /// SYSTEM (audit) messages in a pod
    SystemMessages { pod_id: String },
}

impl Query {
    pub fn collection(&self) -> &'static str {
        match self {
            Query::UserCooldowns { .. } | Query::PodCooldown { .. } => POD_COOLDOWNS,
            Query::OwnedPods { .. } | Query::AdminPods { .. } | Query::BannedPods { .. } => COLLAB_PODS,
            Query::SystemMessages { .. } => MESSAGES,
        }
    }

    pub fn filter(&self) -> Document {
        match self {
            Query::UserCooldowns { user_id } => doc! { "userId": user_id.as_str() },
            Query::PodCooldown { user_id, pod_id } => {
                doc! { "userId": user_id.as_str(), "podId": pod_id.as_str() }
            }
            Query::OwnedPods { user_id } => doc! { "ownerId": user_id.as_str() },
            // Equality on an array field matches any element.
            Query::AdminPods { user_id } => doc! { "adminIds": user_id.as_str() },
            Query::BannedPods { user_id } => doc! { "bannedIds": user_id.as_str() },
            Query::SystemMessages { pod_id } => {
                doc! { "podId": pod_id.as_str(), "messageType": MessageType::System.as_str() }
            }
        }
    }

    /// At most one cooldown can exist per (user, pod).
    pub fn single(&self) -> bool {
        matches!(self, Query::PodCooldown { .. })
    }
}

/// Pod ids are usually ObjectIds, but documents written by hand may carry a plain string.
pub fn pod_id_filter(pod_id: &str) -> Document {
    match ObjectId::from_str(pod_id) {
        Ok(oid) => doc! { "_id": oid },
        Err(_) => doc! { "_id": Bson::String(pod_id.to_string()) },
    }
}

/// Remove the user from members and admins and add them to the ban list.
pub fn ban_update(user_id: &str) -> Document {
    doc! {
        "$pull": { "memberIds": user_id, "adminIds": user_id },
        "$addToSet": { "bannedIds": user_id }
    }
}

/// Target of the ban update. The owner cannot be banned from their own pod,
/// so a pod owned by `user_id` never matches.
pub fn ban_filter(pod_id: &str, user_id: &str) -> Document {
    let mut filter = pod_id_filter(pod_id);
    filter.insert("ownerId", doc! { "$ne": user_id });
    filter
}

/// What `ban_member` did, or why it did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanOutcome {
    PodNotFound,
    IsOwner,
    AlreadyBanned,
    /// `was_admin` is set when the ban also revoked admin rights.
    Banned { was_admin: bool },
}

impl BanOutcome {
    /// Decide from the pod's current roles, before writing anything.
    pub fn decide(pod: Option<&PodRoles>, user_id: &str) -> Self {
        match pod {
            None => BanOutcome::PodNotFound,
            Some(p) if p.owner_id.as_deref() == Some(user_id) => BanOutcome::IsOwner,
            Some(p) if p.is_banned(user_id) => BanOutcome::AlreadyBanned,
            Some(p) => BanOutcome::Banned { was_admin: p.is_admin(user_id) },
        }
    }
}

/// For a `podCooldowns` document, whether it still blocks a rejoin at `now`.
/// The TTL monitor sweeps about once a minute, so expired records can linger.
/// `None` if the document is not a cooldown.
pub fn cooldown_active(doc: &Document, now: DateTime<Utc>) -> Option<bool> {
    bson::from_document::<PodCooldown>(doc.clone())
        .ok()
        .map(|c| c.is_active_at(now))
}

/// Run `query` and collect the matching documents.
pub async fn run_query(db: &Database, query: &Query) -> Result<Vec<Document>> {
    let collection = db.collection::<Document>(query.collection());

    if query.single() {
        let found = collection
            .find_one(query.filter(), None)
            .await
            .with_context(|| format!("findOne on {}", query.collection()))?;
        return Ok(found.into_iter().collect());
    }

    let cursor = collection
        .find(query.filter(), None)
        .await
        .with_context(|| format!("find on {}", query.collection()))?;
    let docs: Vec<Document> = cursor.try_collect().await?;
    Ok(docs)
}

/// Ban `user_id` from the pod: drop them from members and admins and add them
/// to `bannedIds`. Nothing is written unless the outcome is `Banned`.
pub async fn ban_member(db: &Database, pod_id: &str, user_id: &str) -> Result<BanOutcome> {
    let pods = db.collection::<Document>(COLLAB_PODS);

    let pod = pods
        .find_one(pod_id_filter(pod_id), None)
        .await
        .with_context(|| format!("loading pod {pod_id}"))?
        .map(bson::from_document::<PodRoles>)
        .transpose()
        .with_context(|| format!("pod {pod_id} has no valid role fields"))?;

    let outcome = BanOutcome::decide(pod.as_ref(), user_id);
    if !matches!(outcome, BanOutcome::Banned { .. }) {
        return Ok(outcome);
    }

    let result = pods
        .update_one(ban_filter(pod_id, user_id), ban_update(user_id), None)
        .await
        .with_context(|| format!("banning {user_id} from pod {pod_id}"))?;

    // Ownership changed between the read and the write.
    if result.matched_count == 0 {
        return Ok(BanOutcome::IsOwner);
    }
    Ok(outcome)
}
