//! Entrypoint: set up tracing, load configuration, and dispatch the chosen
//! subcommand (plan, apply, verify, inspect, ban) against MongoDB.
//!
//! Configuration (`Settings`, see `config.rs`) provides:
//!  - `mongodb_uri`      – MongoDB connection string
//!  - `database_name`    – database holding the pod collections
//!  - `connect_timeout`  – connect / server selection timeout
//!  - `metrics_file`     – optional Prometheus textfile output

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use mongodb::bson::Bson;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use collab_schema_upgrade::cli::{Cli, Commands};
use collab_schema_upgrade::config::Settings;
use collab_schema_upgrade::db::{self, MongoTarget};
use collab_schema_upgrade::errors::MigrateError;
use collab_schema_upgrade::metrics;
use collab_schema_upgrade::migrator::{Migrator, MigratorOptions};
use collab_schema_upgrade::plan::MigrationPlan;
use collab_schema_upgrade::queries::{self, BanOutcome};
use collab_schema_upgrade::verify;

/// **Workflow**:
/// 1. Initialise tracing/logging from `RUST_LOG` (or default to `info`), on stderr
///    so stdout only carries command output.
/// 2. Load `Config.toml` (and apply any `APP__…` env-var overrides).
/// 3. Run the subcommand; only `plan` and `apply --dry-run` skip the database.
/// 4. Write metrics to `metrics_file` if configured.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ───────────────────────────────────────────────────────────────
    // 1. Initialise tracing / logging
    // ───────────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    // ───────────────────────────────────────────────────────────────
    // 2. Load configuration
    // ───────────────────────────────────────────────────────────────
    let settings = Settings::new(&cli.config)?;
    info!(config = %cli.config, database = %settings.database_name, "Loaded configuration");

    // ───────────────────────────────────────────────────────────────
    // 3. Dispatch
    // ───────────────────────────────────────────────────────────────
    let plan = MigrationPlan::standard();
    let outcome = run(cli.command, &settings, &plan).await;

    // ───────────────────────────────────────────────────────────────
    // 4. Metrics, written even when the command failed
    // ───────────────────────────────────────────────────────────────
    if let Some(path) = &settings.metrics_file {
        match metrics::write_metrics(path) {
            Ok(()) => info!(path = %path.display(), "Wrote metrics"),
            Err(e) => warn!(error = %e, "Failed to write metrics"),
        }
    }

    if let Err(e) = &outcome {
        error!(error = %e, "Command failed");
    }
    outcome
}

async fn run(command: Commands, settings: &Settings, plan: &MigrationPlan) -> anyhow::Result<()> {
    match command {
        Commands::Plan => {
            println!("# upgrade {}", plan.id());
            for step in &plan.steps {
                println!("\n# step {}: {}", step.number, step.name);
                for op in &step.operations {
                    println!("{op}");
                }
            }
        }

        Commands::Apply { dry_run, force } => {
            let options = MigratorOptions { dry_run, force };
            // A dry run sends nothing, so it does not need a reachable server.
            let database = if dry_run {
                lazy_database(settings).await?
            } else {
                db::connect(settings).await?
            };
            let report = Migrator::new(MongoTarget::new(database), options).run(plan).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Verify => {
            let database = db::connect(settings).await?;
            let report = verify::verify(&database, plan).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                return Err(MigrateError::Verification(report.problems().join("; ")).into());
            }
            info!("Schema verified");
        }

        Commands::Inspect { query, user, pod } => {
            let query = query.into_query(user, pod)?;
            let database = db::connect(settings).await?;
            let docs = queries::run_query(&database, &query).await?;
            info!(collection = query.collection(), count = docs.len(), "Query complete");
            let now = Utc::now();
            for doc in docs {
                if let Some(active) = queries::cooldown_active(&doc, now) {
                    info!(id = %doc.get("_id").cloned().unwrap_or(Bson::Null), active, "Cooldown");
                }
                let json = Bson::Document(doc).into_relaxed_extjson();
                println!("{}", serde_json::to_string_pretty(&json)?);
            }
        }

        Commands::Ban { pod, user } => {
            let database = db::connect(settings).await?;
            match queries::ban_member(&database, &pod, &user).await? {
                BanOutcome::Banned { was_admin } => {
                    info!(pod = %pod, user = %user, was_admin, "Banned member");
                }
                BanOutcome::AlreadyBanned => {
                    info!(pod = %pod, user = %user, "Already banned, nothing to do");
                }
                BanOutcome::IsOwner => {
                    return Err(MigrateError::InvalidArgument(format!("{user} owns pod {pod} and cannot be banned")).into());
                }
                BanOutcome::PodNotFound => {
                    return Err(MigrateError::InvalidArgument(format!("no pod {pod}")).into());
                }
            }
        }
    }
    Ok(())
}

/// Database handle without the startup ping; the driver only connects on first use.
async fn lazy_database(settings: &Settings) -> anyhow::Result<mongodb::Database> {
    let client = mongodb::Client::with_uri_str(&settings.mongodb_uri)
        .await
        .context("parsing mongodb_uri")?;
    Ok(client.database(&settings.database_name))
}
