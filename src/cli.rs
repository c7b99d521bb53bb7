//! Command line interface.

use crate::errors::MigrateError;
use crate::queries::Query;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "collab-schema-upgrade",
    version,
    about = "Upgrade the collab pod schema: roles, bans, cooldowns and message types",
    after_help = "Examples:\n  \
    collab-schema-upgrade plan\n  \
    collab-schema-upgrade apply --dry-run\n  \
    collab-schema-upgrade apply\n  \
    collab-schema-upgrade verify\n  \
    collab-schema-upgrade inspect banned-pods --user 64f0c2...\n  \
    collab-schema-upgrade ban --pod 65a1b3... --user 64f0c2..."
)]
pub struct Cli {
    /// Config file name (extension optional); missing files fall back to defaults
    #[arg(long, short, env = "APP_CONFIG", default_value = "Config", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Print every command the upgrade would run, without connecting
    Plan,
    /// Apply the upgrade and record it in the schemaMigrations ledger
    Apply {
        /// Log the commands instead of running them
        #[arg(long)]
        dry_run: bool,
        /// Re-run even if the ledger says the upgrade was applied
        #[arg(long)]
        force: bool,
    },
    /// Check samples, indexes and leftover documents; exits non-zero on problems
    Verify,
    /// Run a lookup against the upgraded collections
    Inspect {
        #[arg(value_enum)]
        query: QueryKind,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        pod: Option<String>,
    },
    /// Remove a user from a pod's members and admins and ban them
    Ban {
        #[arg(long)]
        pod: String,
        #[arg(long)]
        user: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    UserCooldowns,
    PodCooldown,
    OwnedPods,
    AdminPods,
    BannedPods,
    SystemMessages,
}

fn required(value: Option<String>, flag: &str, kind: QueryKind) -> Result<String, MigrateError> {
    value.ok_or_else(|| MigrateError::InvalidArgument(format!("{kind:?} requires --{flag}")))
}

impl QueryKind {
    pub fn into_query(self, user: Option<String>, pod: Option<String>) -> Result<Query, MigrateError> {
        Ok(match self {
            QueryKind::UserCooldowns => Query::UserCooldowns { user_id: required(user, "user", self)? },
            QueryKind::PodCooldown => Query::PodCooldown {
                user_id: required(user, "user", self)?,
                pod_id: required(pod, "pod", self)?,
            },
            QueryKind::OwnedPods => Query::OwnedPods { user_id: required(user, "user", self)? },
            QueryKind::AdminPods => Query::AdminPods { user_id: required(user, "user", self)? },
            QueryKind::BannedPods => Query::BannedPods { user_id: required(user, "user", self)? },
            QueryKind::SystemMessages => Query::SystemMessages { pod_id: required(pod, "pod", self)? },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_apply_flags() {
        let cli = Cli::try_parse_from(["collab-schema-upgrade", "apply", "--dry-run"]).unwrap();
        assert_eq!(cli.command, Commands::Apply { dry_run: true, force: false });
        assert_eq!(cli.config, "Config");
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["collab-schema-upgrade", "verify", "--config", "prod"]).unwrap();
        assert_eq!(cli.config, "prod");
        assert_eq!(cli.command, Commands::Verify);
    }

    #[test]
    fn inspect_builds_query() {
        let cli = Cli::try_parse_from([
            "collab-schema-upgrade",
            "inspect",
            "pod-cooldown",
            "--user",
            "u1",
            "--pod",
            "p1",
        ])
        .unwrap();
        let Commands::Inspect { query, user, pod } = cli.command else {
            panic!("expected inspect");
        };
        assert_eq!(
            query.into_query(user, pod).unwrap(),
            Query::PodCooldown { user_id: "u1".into(), pod_id: "p1".into() }
        );
    }

    #[test]
    fn inspect_without_required_id_is_rejected() {
        let err = QueryKind::SystemMessages.into_query(Some("u1".into()), None).unwrap_err();
        assert!(matches!(err, MigrateError::InvalidArgument(msg) if msg.contains("--pod")));
    }

    #[test]
    fn ban_requires_both_ids() {
        assert!(Cli::try_parse_from(["collab-schema-upgrade", "ban", "--pod", "p1"]).is_err());
    }
}
