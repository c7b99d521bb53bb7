//! migrator.rs
//!
//! Runs a [`MigrationPlan`] against a [`MigrationTarget`], one step at a time,
//! and records the run in the `schemaMigrations` ledger so a second run is a no-op.

use crate::errors::MigrateError;
use crate::metrics::{DOCUMENTS_MODIFIED, OPERATION_COUNTER, STEP_HISTOGRAM};
use crate::plan::{MigrationPlan, Operation, Step, Update};
use chrono::Utc;
use mongodb::bson::{self, Document};
use mongodb::IndexModel;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, warn};

/// Counts returned by an `updateMany`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateCounts {
    pub matched: u64,
    pub modified: u64,
}

/// Ledger entry written after a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMigration {
    #[serde(rename = "_id")]
    pub id: String,
    pub applied_at: bson::DateTime,
    pub steps: Vec<String>,
    pub documents_modified: i64,
}

/// Where the plan's commands go. Implemented for a live MongoDB database in
/// [`crate::db::MongoTarget`].
#[async_trait::async_trait]
pub trait MigrationTarget: Send + Sync {
    async fn update_many(&self, collection: &str, filter: Document, update: Update) -> Result<UpdateCounts, MigrateError>;

    /// Returns `false` if the collection already existed.
    async fn create_collection(&self, name: &str) -> Result<bool, MigrateError>;

    /// Returns the names of the indexes the server reports.
    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexModel>) -> Result<Vec<String>, MigrateError>;

    async fn applied(&self, id: &str) -> Result<Option<AppliedMigration>, MigrateError>;

    async fn record(&self, entry: &AppliedMigration) -> Result<(), MigrateError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MigratorOptions {
    /// Log every command without sending anything to the database.
    pub dry_run: bool,
    /// Run even if the ledger says the plan was already applied.
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepReport {
    pub number: u32,
    pub name: String,
    pub matched: u64,
    pub modified: u64,
    pub indexes: Vec<String>,
    pub collections_created: Vec<String>,
    pub collections_existing: Vec<String>,
    pub elapsed_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub plan_id: String,
    pub dry_run: bool,
    /// Set when the ledger already held this plan and `force` was off.
    pub skipped: bool,
    pub steps: Vec<StepReport>,
}

impl MigrationReport {
    fn empty(plan: &MigrationPlan, options: MigratorOptions) -> Self {
        Self {
            plan_id: plan.id().to_string(),
            dry_run: options.dry_run,
            skipped: false,
            steps: Vec::new(),
        }
    }

    pub fn documents_modified(&self) -> u64 {
        self.steps.iter().map(|s| s.modified).sum()
    }
}

pub struct Migrator<T> {
    target: T,
    options: MigratorOptions,
}

impl<T: MigrationTarget> Migrator<T> {
    pub fn new(target: T, options: MigratorOptions) -> Self {
        Self { target, options }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Apply every step of `plan` in order. The first failing command aborts
    /// the run; writes made by earlier commands are not rolled back.
    pub async fn run(&self, plan: &MigrationPlan) -> Result<MigrationReport, MigrateError> {
        let mut report = MigrationReport::empty(plan, self.options);

        if self.options.dry_run {
            for step in &plan.steps {
                info!(step = step.number, name = step.name, "Dry run step");
                for op in &step.operations {
                    info!(collection = op.collection(), "would run: {}", op);
                }
                report.steps.push(StepReport {
                    number: step.number,
                    name: step.name.to_string(),
                    ..StepReport::default()
                });
            }
            return Ok(report);
        }

        if let Some(previous) = self.target.applied(plan.id()).await? {
            if !self.options.force {
                info!(
                    plan = plan.id(),
                    applied_at = %previous.applied_at,
                    "Upgrade already applied, skipping (use --force to re-run)"
                );
                report.skipped = true;
                return Ok(report);
            }
            warn!(plan = plan.id(), applied_at = %previous.applied_at, "Re-running an applied upgrade");
        }

        for step in &plan.steps {
            let step_report = self.run_step(step).await?;
            report.steps.push(step_report);
        }

        let entry = AppliedMigration {
            id: plan.id().to_string(),
            applied_at: bson::DateTime::from_chrono(Utc::now()),
            steps: plan.steps.iter().map(|s| s.name.to_string()).collect(),
            documents_modified: i64::try_from(report.documents_modified()).unwrap_or(i64::MAX),
        };
        self.target.record(&entry).await?;

        info!(
            plan = plan.id(),
            steps = report.steps.len(),
            documents_modified = report.documents_modified(),
            "Upgrade complete"
        );
        Ok(report)
    }

    async fn run_step(&self, step: &Step) -> Result<StepReport, MigrateError> {
        let start = Instant::now();
        info!(step = step.number, name = step.name, "Starting step");

        let mut report = StepReport {
            number: step.number,
            name: step.name.to_string(),
            ..StepReport::default()
        };

        for op in &step.operations {
            let kind = op.kind();
            match self.apply(op, &mut report).await {
                Ok(()) => {
                    OPERATION_COUNTER.with_label_values(&[kind, "ok"]).inc();
                }
                Err(e) => {
                    OPERATION_COUNTER.with_label_values(&[kind, "error"]).inc();
                    error!(step = step.number, command = %op, error = %e, "Command failed");
                    return Err(e);
                }
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        STEP_HISTOGRAM
            .with_label_values(&[step.number.to_string().as_str()])
            .observe(elapsed);
        report.elapsed_s = elapsed;

        info!(
            step = step.number,
            matched = report.matched,
            modified = report.modified,
            indexes = report.indexes.len(),
            duration_s = elapsed,
            "Step complete"
        );
        Ok(report)
    }

    async fn apply(&self, op: &Operation, report: &mut StepReport) -> Result<(), MigrateError> {
        match op {
            Operation::UpdateMany { collection, filter, update } => {
                let counts = self
                    .target
                    .update_many(collection, filter.clone(), update.clone())
                    .await?;
                DOCUMENTS_MODIFIED
                    .with_label_values(&[*collection])
                    .inc_by(counts.modified);
                info!(
                    collection = %collection,
                    matched = counts.matched,
                    modified = counts.modified,
                    "Updated documents"
                );
                report.matched += counts.matched;
                report.modified += counts.modified;
            }
            Operation::CreateCollection { name } => {
                if self.target.create_collection(name).await? {
                    info!(collection = %name, "Created collection");
                    report.collections_created.push(name.to_string());
                } else {
                    info!(collection = %name, "Collection already exists");
                    report.collections_existing.push(name.to_string());
                }
            }
            Operation::CreateIndexes { collection, indexes } => {
                let names = self.target.create_indexes(collection, indexes.clone()).await?;
                info!(collection = %collection, indexes = ?names, "Ensured indexes");
                report.indexes.extend(names);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexes::index_name;
    use crate::schema::{COLLAB_PODS, MESSAGES, POD_COOLDOWNS};
    use std::sync::Mutex;

    /// In-memory target that records every call.
    #[derive(Default)]
    struct FakeTarget {
        calls: Mutex<Vec<String>>,
        ledger: Mutex<Option<AppliedMigration>>,
        existing_collections: Vec<&'static str>,
        fail_on: Option<&'static str>,
    }

    impl FakeTarget {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self, call: String) -> Result<(), MigrateError> {
            let failing = self.fail_on.map_or(false, |f| call.starts_with(f));
            self.calls.lock().unwrap().push(call.clone());
            if failing {
                return Err(MigrateError::InvalidArgument(format!("injected failure on {call}")));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl MigrationTarget for FakeTarget {
        async fn update_many(&self, collection: &str, _filter: Document, _update: Update) -> Result<UpdateCounts, MigrateError> {
            self.log(format!("update_many:{collection}"))?;
            Ok(UpdateCounts { matched: 4, modified: 3 })
        }

        async fn create_collection(&self, name: &str) -> Result<bool, MigrateError> {
            self.log(format!("create_collection:{name}"))?;
            Ok(!self.existing_collections.contains(&name))
        }

        async fn create_indexes(&self, collection: &str, indexes: Vec<IndexModel>) -> Result<Vec<String>, MigrateError> {
            self.log(format!("create_indexes:{collection}"))?;
            Ok(indexes.iter().map(index_name).collect())
        }

        async fn applied(&self, id: &str) -> Result<Option<AppliedMigration>, MigrateError> {
            Ok(self.ledger.lock().unwrap().clone().filter(|e| e.id == id))
        }

        async fn record(&self, entry: &AppliedMigration) -> Result<(), MigrateError> {
            self.log(format!("record:{}", entry.id))?;
            *self.ledger.lock().unwrap() = Some(entry.clone());
            Ok(())
        }
    }

    #[test]
    fn runs_every_command_in_order_and_records_ledger() {
        let migrator = Migrator::new(FakeTarget::default(), MigratorOptions::default());
        let plan = MigrationPlan::standard();

        let report = tokio_test::block_on(migrator.run(&plan)).unwrap();

        assert_eq!(
            migrator.target().calls(),
            vec![
                format!("update_many:{COLLAB_PODS}"),
                format!("create_indexes:{COLLAB_PODS}"),
                format!("create_collection:{POD_COOLDOWNS}"),
                format!("create_indexes:{POD_COOLDOWNS}"),
                format!("update_many:{MESSAGES}"),
                format!("update_many:{MESSAGES}"),
                format!("create_indexes:{MESSAGES}"),
                format!("record:{}", plan.id()),
            ]
        );
        assert!(!report.skipped);
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.steps[0].modified, 3);
        assert_eq!(report.steps[2].matched, 8);
        assert_eq!(report.documents_modified(), 9);
        assert_eq!(report.steps[1].collections_created, vec![POD_COOLDOWNS.to_string()]);

        let ledger = migrator.target().ledger.lock().unwrap().clone().unwrap();
        assert_eq!(ledger.steps, vec!["collab pod roles", "pod cooldowns", "message types"]);
        assert_eq!(ledger.documents_modified, 9);
    }

    #[test]
    fn second_run_is_skipped_unless_forced() {
        let plan = MigrationPlan::standard();
        let migrator = Migrator::new(FakeTarget::default(), MigratorOptions::default());
        tokio_test::block_on(migrator.run(&plan)).unwrap();
        let first_calls = migrator.target().calls().len();

        let again = tokio_test::block_on(migrator.run(&plan)).unwrap();
        assert!(again.skipped);
        assert!(again.steps.is_empty());
        assert_eq!(migrator.target().calls().len(), first_calls);

        let forced = Migrator::new(
            FakeTarget {
                ledger: Mutex::new(migrator.target().ledger.lock().unwrap().clone()),
                ..FakeTarget::default()
            },
            MigratorOptions { force: true, ..MigratorOptions::default() },
        );
        let report = tokio_test::block_on(forced.run(&plan)).unwrap();
        assert!(!report.skipped);
        assert_eq!(report.steps.len(), 3);
    }

    #[test]
    fn existing_cooldown_collection_is_not_an_error() {
        let target = FakeTarget {
            existing_collections: vec![POD_COOLDOWNS],
            ..FakeTarget::default()
        };
        let migrator = Migrator::new(target, MigratorOptions::default());
        let report = tokio_test::block_on(migrator.run(&MigrationPlan::standard())).unwrap();

        assert!(report.steps[1].collections_created.is_empty());
        assert_eq!(report.steps[1].collections_existing, vec![POD_COOLDOWNS.to_string()]);
        assert!(report.steps[1].indexes.contains(&"expiryDate_1".to_string()));
    }

    #[test]
    fn dry_run_touches_nothing() {
        let migrator = Migrator::new(
            FakeTarget::default(),
            MigratorOptions { dry_run: true, force: false },
        );
        let report = tokio_test::block_on(migrator.run(&MigrationPlan::standard())).unwrap();

        assert!(report.dry_run);
        assert_eq!(report.steps.len(), 3);
        assert!(migrator.target().calls().is_empty());
        assert!(migrator.target().ledger.lock().unwrap().is_none());
    }

    #[test]
    fn failure_aborts_without_recording() {
        let target = FakeTarget {
            fail_on: Some("create_collection"),
            ..FakeTarget::default()
        };
        let migrator = Migrator::new(target, MigratorOptions::default());
        let err = tokio_test::block_on(migrator.run(&MigrationPlan::standard())).unwrap_err();

        assert!(matches!(err, MigrateError::InvalidArgument(_)));
        let calls = migrator.target().calls();
        assert_eq!(calls.last().unwrap(), &format!("create_collection:{POD_COOLDOWNS}"));
        assert!(!calls.iter().any(|c| c.starts_with("record")));
        assert!(migrator.target().ledger.lock().unwrap().is_none());
    }
}
