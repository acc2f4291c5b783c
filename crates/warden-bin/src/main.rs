mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use warden_lib::{config::Settings, AuditQuery, AuthManager, FlatFileStorage};

use crate::cli::{Cli, Command, InviteCommand, UsersCommand};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(data_dir) = cli.data_dir.clone() {
        settings.data_dir = data_dir;
    }
    init_tracing(&settings);

    let storage = FlatFileStorage::new(&settings.data_dir)
        .with_context(|| format!("opening data directory {}", settings.data_dir.display()))?;
    let manager = AuthManager::open(Arc::new(storage), settings.auth.clone())
        .await
        .context("opening auth store")?;

    run(&manager, cli.command).await
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if settings.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(manager: &AuthManager<FlatFileStorage>, command: Command) -> Result<()> {
    match command {
        Command::Bootstrap {
            external_id,
            username,
            password,
        } => {
            let user = manager
                .bootstrap_super_admin(external_id, &username, &password)
                .await?;
            println!("created super admin {} ({})", user.username, user.user_id);
        }
        Command::Users(UsersCommand::List) => {
            for user in manager.list_users().await? {
                println!(
                    "{}\t{}\t{}\t{:?}\t{}",
                    user.user_id, user.external_id, user.role, user.status, user.username
                );
            }
        }
        Command::Users(UsersCommand::Create {
            actor,
            external_id,
            username,
            role,
        }) => {
            let (user, temp_password) = manager
                .create_user(&actor, external_id, &username, role)
                .await?;
            println!("created {} ({}) as {}", user.username, user.user_id, user.role);
            println!("temporary password: {}", temp_password.as_str());
        }
        Command::Block(target) => {
            let invalidated = manager.block_user(&target.user_id, &target.actor).await?;
            println!("blocked {}, {invalidated} session(s) ended", target.user_id);
        }
        Command::Unblock(target) => {
            manager.unblock_user(&target.user_id, &target.actor).await?;
            println!("unblocked {}", target.user_id);
        }
        Command::Delete(target) => {
            manager.delete_user(&target.user_id, &target.actor).await?;
            println!("deleted {}", target.user_id);
        }
        Command::Invite(InviteCommand::Create {
            actor,
            role,
            max_uses,
            ttl_hours,
        }) => {
            let invitation = manager
                .create_invitation(&actor, role, max_uses, ttl_hours.map(hours).transpose()?)
                .await?;
            println!("{}", invitation.invite_code);
            tracing::debug!(expires_at = %invitation.expires_at, "invitation issued");
        }
        Command::Invite(InviteCommand::List { actor, all }) => {
            for invitation in manager.list_invitations(&actor, all).await? {
                println!("{}", serde_json::to_string(&invitation)?);
            }
        }
        Command::Invite(InviteCommand::Revoke { actor, code }) => {
            manager.revoke_invitation(&code, &actor).await?;
            println!("revoked");
        }
        Command::Audit {
            user,
            event_type,
            since_hours,
            limit,
        } => {
            let query = AuditQuery {
                user_id: user,
                event_type,
                since: since_hours.map(hours).transpose()?.map(|ago| Utc::now() - ago),
                limit: Some(limit),
            };
            for event in manager.get_audit_log(&query).await? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        Command::PruneAudit => {
            let removed = manager.prune_audit_log().await?;
            println!("removed {removed} audit event(s)");
        }
    }
    Ok(())
}

fn hours(count: i64) -> Result<Duration> {
    Duration::try_hours(count).with_context(|| format!("{count} hours is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(dir: &std::path::Path) -> AuthManager<FlatFileStorage> {
        let mut auth = warden_common::AuthSettings::default();
        auth.password.hash_cost = 4;
        let storage = FlatFileStorage::new(dir).unwrap();
        AuthManager::open(Arc::new(storage), auth).await.unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_then_invite() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = open(dir.path()).await;
        run(
            &manager,
            Command::Bootstrap {
                external_id: 1,
                username: "root".into(),
                password: "root123".into(),
            },
        )
        .await
        .unwrap();

        let root = manager.find_user_by_external_id(1).await.unwrap().unwrap();
        run(
            &manager,
            Command::Invite(InviteCommand::Create {
                actor: root.user_id.clone(),
                role: warden_common::RoleId::User,
                max_uses: Some(2),
                ttl_hours: None,
            }),
        )
        .await
        .unwrap();
        let invites = manager.list_invitations(&root.user_id, false).await.unwrap();
        assert_eq!(invites.len(), 1);
        assert_eq!(invites[0].max_uses, 2);

        // a second bootstrap is refused
        assert!(run(
            &manager,
            Command::Bootstrap {
                external_id: 2,
                username: "again".into(),
                password: "root123".into(),
            },
        )
        .await
        .is_err());
    }
}
