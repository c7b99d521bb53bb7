//! MongoDB index definitions.
//!
//! `collabPods`:
//! - `{ "ownerId": 1 }` - pods owned by a user
//! - `{ "adminIds": 1 }` - pods a user administers
//! - `{ "bannedIds": 1 }` - pods a user is banned from
//! - `{ "podId": 1, "ownerId": 1, "adminIds": 1, "memberIds": 1 }` - role queries
//!
//! `podCooldowns`:
//! - `{ "expiryDate": 1 }` - TTL, documents removed once `expiryDate` passes
//! - `{ "userId": 1, "podId": 1 }` - unique, one cooldown per user and pod
//! - `{ "userId": 1 }`
//! - `{ "podId": 1 }`
//!
//! `messages`:
//! - `{ "messageType": 1 }`
//! - `{ "podId": 1, "messageType": 1, "sentAt": -1 }` - pod timeline by type

use mongodb::bson::{doc, Bson, Document};
use mongodb::options::IndexOptions;
use mongodb::IndexModel;
use std::time::Duration;

pub fn collab_pod_indexes() -> Vec<IndexModel> {
    vec![
        IndexModel::builder().keys(doc! { "ownerId": 1 }).build(),
        IndexModel::builder().keys(doc! { "adminIds": 1 }).build(),
        IndexModel::builder().keys(doc! { "bannedIds": 1 }).build(),
        IndexModel::builder()
            .keys(doc! { "podId": 1, "ownerId": 1, "adminIds": 1, "memberIds": 1 })
            .build(),
    ]
}

pub fn pod_cooldown_indexes() -> Vec<IndexModel> {
    vec![
        // Zero means "expire exactly at expiryDate". The TTL monitor runs
        // about once a minute, so deletion can lag by up to 60s.
        IndexModel::builder()
            .keys(doc! { "expiryDate": 1 })
            .options(IndexOptions::builder().expire_after(Duration::ZERO).build())
            .build(),
        IndexModel::builder()
            .keys(doc! { "userId": 1, "podId": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build(),
        IndexModel::builder().keys(doc! { "userId": 1 }).build(),
        IndexModel::builder().keys(doc! { "podId": 1 }).build(),
    ]
}

pub fn message_indexes() -> Vec<IndexModel> {
    vec![
        IndexModel::builder().keys(doc! { "messageType": 1 }).build(),
        IndexModel::builder()
            .keys(doc! { "podId": 1, "messageType": 1, "sentAt": -1 })
            .build(),
    ]
}

/// The name the server assigns when none is given: `field_dir` pairs joined by `_`.
pub fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, dir)| {
            let dir = match dir {
                Bson::Int32(n) => n.to_string(),
                Bson::Int64(n) => n.to_string(),
                Bson::Double(n) => n.to_string(),
                Bson::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{field}_{dir}")
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// Name of `model`, honouring an explicit name option if one was set.
pub fn index_name(model: &IndexModel) -> String {
    model
        .options
        .as_ref()
        .and_then(|o| o.name.clone())
        .unwrap_or_else(|| default_index_name(&model.keys))
}
