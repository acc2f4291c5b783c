//! Command line surface of `warden-admin`.
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use warden_common::{AuditEventType, ExternalId, RoleId, MAX_RETENTION_DAYS, MAX_TTL_HOURS};

#[derive(Debug, Parser)]
#[command(name = "warden-admin", version, about = "Administer a warden auth store")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, short, default_value = warden_lib::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Override the configured data directory
    #[arg(long, env = "WARDEN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the first super admin in an empty store
    Bootstrap {
        #[arg(long)]
        external_id: ExternalId,
        #[arg(long)]
        username: String,
        #[arg(long, env = "WARDEN_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Inspect and create users
    #[command(subcommand)]
    Users(UsersCommand),
    /// Block a user and end their sessions
    Block(TargetArgs),
    /// Reactivate a blocked user
    Unblock(TargetArgs),
    /// Permanently delete an inactive user
    Delete(TargetArgs),
    /// Manage invitations
    #[command(subcommand)]
    Invite(InviteCommand),
    /// Show audit events, newest first
    Audit {
        #[arg(long)]
        user: Option<String>,
        /// e.g. LOGIN_FAILED
        #[arg(long, value_parser = parse_event_type)]
        event_type: Option<AuditEventType>,
        /// Only events from the last N hours
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_RETENTION_DAYS * 24))]
        since_hours: Option<i64>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Drop audit events past the retention window
    PruneAudit,
}

#[derive(Debug, Subcommand)]
pub enum UsersCommand {
    List,
    /// Create a user with a one-time temporary password
    Create {
        #[arg(long = "as")]
        actor: String,
        #[arg(long)]
        external_id: ExternalId,
        #[arg(long)]
        username: String,
        #[arg(long, default_value = "user")]
        role: RoleId,
    },
}

#[derive(Debug, Subcommand)]
pub enum InviteCommand {
    Create {
        #[arg(long = "as")]
        actor: String,
        #[arg(long, default_value = "user")]
        role: RoleId,
        #[arg(long)]
        max_uses: Option<u32>,
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_TTL_HOURS))]
        ttl_hours: Option<i64>,
    },
    List {
        #[arg(long = "as")]
        actor: String,
        /// Include expired, used-up and revoked invitations
        #[arg(long)]
        all: bool,
    },
    Revoke {
        #[arg(long = "as")]
        actor: String,
        code: String,
    },
}

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Acting administrator's user id
    #[arg(long = "as")]
    pub actor: String,
    pub user_id: String,
}

fn parse_event_type(raw: &str) -> Result<AuditEventType, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_uppercase()))
        .map_err(|_| format!("unknown event type: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_block() {
        let cli = Cli::try_parse_from(["warden-admin", "block", "--as", "a1", "u1"]).unwrap();
        match cli.command {
            Command::Block(TargetArgs { actor, user_id }) => {
                assert_eq!(actor, "a1");
                assert_eq!(user_id, "u1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_audit_filters() {
        let cli = Cli::try_parse_from([
            "warden-admin",
            "audit",
            "--event-type",
            "login_failed",
            "--limit",
            "5",
        ])
        .unwrap();
        match cli.command {
            Command::Audit { event_type, limit, .. } => {
                assert_eq!(event_type, Some(AuditEventType::LoginFailed));
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(Cli::try_parse_from(["warden-admin", "audit", "--event-type", "nope"]).is_err());
    }

    #[test]
    fn test_parse_invite_role() {
        let cli = Cli::try_parse_from([
            "warden-admin", "invite", "create", "--as", "a1", "--role", "admin", "--max-uses", "3",
        ])
        .unwrap();
        match cli.command {
            Command::Invite(InviteCommand::Create { role, max_uses, .. }) => {
                assert_eq!(role, RoleId::Admin);
                assert_eq!(max_uses, Some(3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_hour_arguments_are_bounded() {
        let invite = |ttl: &str| {
            Cli::try_parse_from(["warden-admin", "invite", "create", "--as", "a1", "--ttl-hours", ttl])
        };
        assert!(invite("0").is_err());
        assert!(invite("-5").is_err());
        assert!(invite("9223372036854775807").is_err());
        assert!(invite("72").is_ok());

        assert!(Cli::try_parse_from(["warden-admin", "audit", "--since-hours", "9223372036854775807"]).is_err());
        assert!(Cli::try_parse_from(["warden-admin", "audit", "--since-hours", "24"]).is_ok());
    }
}
