//! plan.rs
//!
//! The upgrade as data: an ordered list of steps, each a list of database
//! commands. Building the plan touches no database, so it can be printed,
//! reviewed and tested before anything is applied.

use crate::indexes::{collab_pod_indexes, index_name, message_indexes, pod_cooldown_indexes};
use crate::schema::{MessageType, COLLAB_PODS, MESSAGES, POD_COOLDOWNS};
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::UpdateModifications;
use mongodb::IndexModel;
use std::fmt;

/// Update half of an `updateMany`.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Classic operator document (`$set`, `$unset`, ...).
    Document(Document),
    /// Aggregation pipeline, needed to copy one field into another.
    Pipeline(Vec<Document>),
}

impl From<Update> for UpdateModifications {
    fn from(update: Update) -> Self {
        match update {
            Update::Document(d) => UpdateModifications::Document(d),
            Update::Pipeline(p) => UpdateModifications::Pipeline(p),
        }
    }
}

/// One database administration command.
#[derive(Debug, Clone)]
pub enum Operation {
    UpdateMany {
        collection: &'static str,
        filter: Document,
        update: Update,
    },
    CreateCollection {
        name: &'static str,
    },
    CreateIndexes {
        collection: &'static str,
        indexes: Vec<IndexModel>,
    },
}

impl Operation {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::UpdateMany { .. } => "update_many",
            Operation::CreateCollection { .. } => "create_collection",
            Operation::CreateIndexes { .. } => "create_indexes",
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            Operation::UpdateMany { collection, .. } | Operation::CreateIndexes { collection, .. } => *collection,
            Operation::CreateCollection { name } => *name,
        }
    }

    /// Shell-style one-liner, e.g. `db.messages.createIndexes([messageType_1])`.
    pub fn describe(&self) -> String {
        match self {
            Operation::UpdateMany { collection, filter, update } => {
                let update = match update {
                    Update::Document(d) => Bson::Document(d.clone()).into_relaxed_extjson().to_string(),
                    Update::Pipeline(p) => {
                        let stages: Vec<Bson> = p.iter().cloned().map(Bson::Document).collect();
                        Bson::Array(stages).into_relaxed_extjson().to_string()
                    }
                };
                let filter = Bson::Document(filter.clone()).into_relaxed_extjson().to_string();
                format!("db.{collection}.updateMany({filter}, {update})")
            }
            Operation::CreateCollection { name } => format!("db.createCollection(\"{name}\")"),
            Operation::CreateIndexes { collection, indexes } => {
                let names: Vec<String> = indexes.iter().map(index_name).collect();
                format!("db.{collection}.createIndexes([{}])", names.join(", "))
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[derive(Debug, Clone)]
pub struct Step {
    pub number: u32,
    pub name: &'static str,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone)]
pub struct MigrationPlan {
    id: &'static str,
    pub steps: Vec<Step>,
}

/// Ledger id of the pod roles / cooldowns / message type upgrade.
pub const POD_ROLES_UPGRADE_ID: &str = "2026-01-31-pod-roles-cooldowns";

impl MigrationPlan {
    /// The full upgrade: pod roles, cooldown collection, message types.
    pub fn standard() -> Self {
        Self {
            id: POD_ROLES_UPGRADE_ID,
            steps: vec![collab_pod_roles(), pod_cooldowns(), message_types()],
        }
    }

    pub fn id(&self) -> &str {
        self.id
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.steps.iter().flat_map(|s| s.operations.iter())
    }

    /// Every index the plan creates, as `(collection, index)` pairs.
    pub fn planned_indexes(&self) -> Vec<(&'static str, &IndexModel)> {
        self.operations()
            .filter_map(|op| match op {
                Operation::CreateIndexes { collection, indexes } => Some((*collection, indexes)),
                _ => None,
            })
            .flat_map(|(collection, indexes)| indexes.iter().map(move |i| (collection, i)))
            .collect()
    }
}

/// Step 1: `creatorId` becomes the immutable `ownerId`, moderators become
/// admins, and every pod starts with an empty ban list.
fn collab_pod_roles() -> Step {
    let pipeline = vec![doc! {
        "$set": {
            "ownerId": "$creatorId",
            "adminIds": {
                "$cond": [
                    { "$eq": ["$moderatorIds", Bson::Null] },
                    [],
                    "$moderatorIds"
                ]
            },
            "bannedIds": []
        }
    }];

    Step {
        number: 1,
        name: "collab pod roles",
        operations: vec![
            Operation::UpdateMany {
                collection: COLLAB_PODS,
                filter: doc! {},
                update: Update::Pipeline(pipeline),
            },
            Operation::CreateIndexes {
                collection: COLLAB_PODS,
                indexes: collab_pod_indexes(),
            },
        ],
    }
}

/// Step 2: the cooldown collection and its TTL index.
fn pod_cooldowns() -> Step {
    Step {
        number: 2,
        name: "pod cooldowns",
        operations: vec![
            Operation::CreateCollection { name: POD_COOLDOWNS },
            Operation::CreateIndexes {
                collection: POD_COOLDOWNS,
                indexes: pod_cooldown_indexes(),
            },
        ],
    }
}

/// Step 3: the free-form `messageType` is kept as `messageTypeString` and
/// replaced by the enum. Pre-existing messages are all chat messages.
fn message_types() -> Step {
    let chat = MessageType::Chat.as_str();

    Step {
        number: 3,
        name: "message types",
        operations: vec![
            Operation::UpdateMany {
                collection: MESSAGES,
                filter: doc! { "messageType": { "$exists": true } },
                update: Update::Pipeline(vec![doc! {
                    "$set": {
                        "messageTypeString": "$messageType",
                        "messageType": chat
                    }
                }]),
            },
            Operation::UpdateMany {
                collection: MESSAGES,
                filter: doc! { "messageType": { "$exists": false } },
                update: Update::Document(doc! { "$set": { "messageType": chat } }),
            },
            Operation::CreateIndexes {
                collection: MESSAGES,
                indexes: message_indexes(),
            },
        ],
    }
}
