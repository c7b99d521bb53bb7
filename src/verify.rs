//! verify.rs
//!
//! Post-upgrade checks: sample documents decode into the new shapes, every
//! planned index exists, and no document was left behind un-migrated.

use crate::db::is_namespace_not_found;
use crate::errors::MigrateError;
use crate::indexes::index_name;
use crate::plan::MigrationPlan;
use crate::schema::{ChatMessage, MessageType, PodCooldown, PodRoles, COLLAB_PODS, MESSAGES, POD_COOLDOWNS};
use mongodb::bson::{self, doc, Document};
use mongodb::Database;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleCheck {
    pub collection: String,
    /// `false` when the collection had no matching document.
    pub found: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MissingIndex {
    pub collection: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerificationReport {
    pub samples: Vec<SampleCheck>,
    pub missing_indexes: Vec<MissingIndex>,
    /// Pods without `adminIds` or `bannedIds`.
    pub pods_missing_roles: u64,
    /// Messages whose `messageType` is absent or not an enum value.
    pub messages_unclassified: u64,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.samples.iter().all(|s| s.error.is_none())
            && self.missing_indexes.is_empty()
            && self.pods_missing_roles == 0
            && self.messages_unclassified == 0
    }

    /// One line per problem, for logs and error messages.
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        for s in &self.samples {
            if let Some(e) = &s.error {
                out.push(format!("{} sample does not decode: {e}", s.collection));
            }
        }
        for m in &self.missing_indexes {
            out.push(format!("{} is missing index {}", m.collection, m.name));
        }
        if self.pods_missing_roles > 0 {
            // `$eq: ["$moderatorIds", null]` is false for a missing field, so pods
            // stored without moderatorIds come out of step 1 with no adminIds.
            out.push(format!(
                "{} pods lack adminIds/bannedIds (likely stored without moderatorIds)",
                self.pods_missing_roles
            ));
        }
        if self.messages_unclassified > 0 {
            out.push(format!("{} messages have no valid messageType", self.messages_unclassified));
        }
        out
    }
}

/// Decode an optional sample into `T` and record the outcome.
pub fn check_sample<T: DeserializeOwned>(collection: &str, sample: Option<Document>) -> SampleCheck {
    let error = sample
        .as_ref()
        .and_then(|d| bson::from_document::<T>(d.clone()).err())
        .map(|e| e.to_string());
    SampleCheck {
        collection: collection.to_string(),
        found: sample.is_some(),
        error,
    }
}

/// Planned indexes absent from `existing` (collection -> index names).
pub fn missing_indexes(plan: &MigrationPlan, existing: &BTreeMap<String, Vec<String>>) -> Vec<MissingIndex> {
    let mut missing = BTreeSet::new();
    for (collection, model) in plan.planned_indexes() {
        let name = index_name(model);
        let present = existing
            .get(collection)
            .map_or(false, |names| names.iter().any(|n| *n == name));
        if !present {
            missing.insert(MissingIndex {
                collection: collection.to_string(),
                name,
            });
        }
    }
    missing.into_iter().collect()
}

/// Pods step 1 did not give both role lists.
pub fn pods_missing_roles_filter() -> Document {
    doc! { "$or": [
        { "adminIds": { "$exists": false } },
        { "bannedIds": { "$exists": false } }
    ] }
}

/// Messages without a valid `messageType`. `$nin` also matches a missing field.
pub fn unclassified_messages_filter() -> Document {
    doc! { "messageType": { "$nin": [MessageType::Chat.as_str(), MessageType::System.as_str()] } }
}

async fn list_index_names(db: &Database, collection: &str) -> Result<Vec<String>, MigrateError> {
    match db.collection::<Document>(collection).list_index_names().await {
        Ok(names) => Ok(names),
        Err(e) if is_namespace_not_found(&e) => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Run every check against `db`.
pub async fn verify(db: &Database, plan: &MigrationPlan) -> Result<VerificationReport, MigrateError> {
    let pod = db.collection::<Document>(COLLAB_PODS).find_one(None, None).await?;
    let cooldown = db.collection::<Document>(POD_COOLDOWNS).find_one(None, None).await?;
    let message = db
        .collection::<Document>(MESSAGES)
        .find_one(doc! { "messageType": MessageType::Chat.as_str() }, None)
        .await?;

    let samples = vec![
        check_sample::<PodRoles>(COLLAB_PODS, pod),
        check_sample::<PodCooldown>(POD_COOLDOWNS, cooldown),
        check_sample::<ChatMessage>(MESSAGES, message),
    ];

    let mut existing = BTreeMap::new();
    for collection in [COLLAB_PODS, POD_COOLDOWNS, MESSAGES] {
        let names = list_index_names(db, collection).await?;
        info!(collection, indexes = ?names, "Listed indexes");
        existing.insert(collection.to_string(), names);
    }

    let pods_missing_roles = db
        .collection::<Document>(COLLAB_PODS)
        .count_documents(pods_missing_roles_filter(), None)
        .await?;

    let messages_unclassified = db
        .collection::<Document>(MESSAGES)
        .count_documents(unclassified_messages_filter(), None)
        .await?;

    let report = VerificationReport {
        samples,
        missing_indexes: missing_indexes(plan, &existing),
        pods_missing_roles,
        messages_unclassified,
    };

    for problem in report.problems() {
        warn!(problem = %problem, "Verification problem");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;

    fn all_planned(plan: &MigrationPlan) -> BTreeMap<String, Vec<String>> {
        let mut existing: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (collection, model) in plan.planned_indexes() {
            existing
                .entry(collection.to_string())
                .or_insert_with(|| vec!["_id_".to_string()])
                .push(index_name(model));
        }
        existing
    }

    #[test]
    fn leftover_filters_match_unmigrated_documents() {
        assert_eq!(
            pods_missing_roles_filter(),
            doc! { "$or": [
                { "adminIds": { "$exists": false } },
                { "bannedIds": { "$exists": false } }
            ] }
        );
        assert_eq!(
            unclassified_messages_filter(),
            doc! { "messageType": { "$nin": ["CHAT", "SYSTEM"] } }
        );
    }

    #[test]
    fn pods_without_roles_name_the_likely_cause() {
        let report = VerificationReport {
            pods_missing_roles: 5,
            ..VerificationReport::default()
        };
        let problems = report.problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("5 pods lack adminIds/bannedIds"));
        assert!(problems[0].contains("moderatorIds"));
    }

    #[test]
    fn nothing_missing_when_all_indexes_present() {
        let plan = MigrationPlan::standard();
        assert!(missing_indexes(&plan, &all_planned(&plan)).is_empty());
    }

    #[test]
    fn reports_dropped_ttl_index() {
        let plan = MigrationPlan::standard();
        let mut existing = all_planned(&plan);
        existing
            .get_mut(POD_COOLDOWNS)
            .unwrap()
            .retain(|n| n != "expiryDate_1");

        let missing = missing_indexes(&plan, &existing);
        assert_eq!(
            missing,
            vec![MissingIndex {
                collection: POD_COOLDOWNS.to_string(),
                name: "expiryDate_1".to_string()
            }]
        );
    }

    #[test]
    fn absent_collection_means_all_its_indexes_missing() {
        let plan = MigrationPlan::standard();
        let mut existing = all_planned(&plan);
        existing.remove(MESSAGES);
        assert_eq!(missing_indexes(&plan, &existing).len(), 2);
    }

    #[test]
    fn empty_collection_sample_is_fine() {
        let check = check_sample::<PodCooldown>(POD_COOLDOWNS, None);
        assert!(!check.found);
        assert!(check.error.is_none());
    }

    #[test]
    fn undecodable_sample_is_reported() {
        let check = check_sample::<PodCooldown>(POD_COOLDOWNS, Some(doc! { "_id": ObjectId::new(), "userId": "u1" }));
        assert!(check.found);
        assert!(check.error.is_some());

        let report = VerificationReport {
            samples: vec![check],
            ..VerificationReport::default()
        };
        assert!(!report.is_clean());
        assert_eq!(report.problems().len(), 1);
    }

    #[test]
    fn leftover_documents_make_report_dirty() {
        let report = VerificationReport {
            messages_unclassified: 2,
            ..VerificationReport::default()
        };
        assert!(!report.is_clean());
        assert_eq!(report.problems(), vec!["2 messages have no valid messageType".to_string()]);
        assert!(VerificationReport::default().is_clean());
    }
}
