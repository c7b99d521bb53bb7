//! MongoDB connection management and the live [`MigrationTarget`].

use crate::config::Settings;
use crate::errors::MigrateError;
use crate::migrator::{AppliedMigration, MigrationTarget, UpdateCounts};
use crate::plan::Update;
use crate::schema::SCHEMA_MIGRATIONS;
use mongodb::bson::{doc, Document};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, ReplaceOptions};
use mongodb::{Client, Database, IndexModel};
use tracing::info;

/// Server error code for `NamespaceExists`.
const NAMESPACE_EXISTS: i32 = 48;
/// Server error code for `NamespaceNotFound`.
const NAMESPACE_NOT_FOUND: i32 = 26;

/// Connect, ping, and return a handle on the configured database.
pub async fn connect(settings: &Settings) -> Result<Database, MigrateError> {
    let mut options = ClientOptions::parse(&settings.mongodb_uri).await?;
    options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
    options.connect_timeout = Some(settings.connect_timeout);
    options.server_selection_timeout = Some(settings.connect_timeout);

    let client = Client::with_options(options)?;
    client.database("admin").run_command(doc! { "ping": 1 }, None).await?;
    info!(database = %settings.database_name, "Connected to MongoDB");

    Ok(client.database(&settings.database_name))
}

fn command_error_code(err: &mongodb::error::Error) -> Option<i32> {
    match &*err.kind {
        ErrorKind::Command(cmd) => Some(cmd.code),
        _ => None,
    }
}

/// `createCollection` on a collection that is already there.
pub fn is_namespace_exists(err: &mongodb::error::Error) -> bool {
    command_error_code(err) == Some(NAMESPACE_EXISTS)
}

/// `listIndexes` (and friends) on a collection that does not exist.
pub fn is_namespace_not_found(err: &mongodb::error::Error) -> bool {
    command_error_code(err) == Some(NAMESPACE_NOT_FOUND)
}

/// Runs plan commands against a live database.
pub struct MongoTarget {
    db: Database,
}

impl MongoTarget {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl MigrationTarget for MongoTarget {
    async fn update_many(&self, collection: &str, filter: Document, update: Update) -> Result<UpdateCounts, MigrateError> {
        let result = self
            .db
            .collection::<Document>(collection)
            .update_many(filter, update, None)
            .await?;
        Ok(UpdateCounts {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn create_collection(&self, name: &str) -> Result<bool, MigrateError> {
        match self.db.create_collection(name, None).await {
            Ok(()) => Ok(true),
            Err(e) if is_namespace_exists(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_indexes(&self, collection: &str, indexes: Vec<IndexModel>) -> Result<Vec<String>, MigrateError> {
        if indexes.is_empty() {
            return Ok(Vec::new());
        }
        let result = self
            .db
            .collection::<Document>(collection)
            .create_indexes(indexes, None)
            .await?;
        Ok(result.index_names)
    }

    async fn applied(&self, id: &str) -> Result<Option<AppliedMigration>, MigrateError> {
        let entry = self
            .db
            .collection::<AppliedMigration>(SCHEMA_MIGRATIONS)
            .find_one(doc! { "_id": id }, None)
            .await?;
        Ok(entry)
    }

    async fn record(&self, entry: &AppliedMigration) -> Result<(), MigrateError> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.db
            .collection::<AppliedMigration>(SCHEMA_MIGRATIONS)
            .replace_one(doc! { "_id": entry.id.as_str() }, entry, options)
            .await?;
        Ok(())
    }
}
