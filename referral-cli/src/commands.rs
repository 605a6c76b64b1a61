//! Command handlers for the CLI

use chrono::{DateTime, Duration, Utc};
use referral_api::{run_server, ApiConfig, AppState, AuthConfig, LedgerService};
use referral_core::{
    seed_from_file, CodeOptions, RedeemRequest, ReferralConfig, ReferralId, ReferralService,
    StorageBackend, StorageConfig, UserDirectory, UserId, UserProfile,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::{Cli, CodeCommands, Commands, UserCommands};

type CmdResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Run a parsed command
pub async fn run(cli: Cli) -> CmdResult {
    let storage_config = StorageConfig::sled(cli.data_dir);
    let users_file = cli.users_file.as_deref();

    match cli.command {
        Commands::Start { listen } => start(&storage_config, users_file, listen).await,
        Commands::Token { user, ttl_hours } => {
            let auth = AuthConfig::from_env();
            let token = auth
                .issue_token(&UserId::new(user), token_ttl(ttl_hours)?)
                .map_err(|e| format!("cannot issue token: {:?}", e))?;
            println!("{}", token);
            Ok(())
        }
        command => {
            let (storage, service) = open_service(&storage_config, users_file).await?;
            let result = run_ledger_command(&service, command).await;
            storage.flush()?;
            result
        }
    }
}

async fn start(storage_config: &StorageConfig, users_file: Option<&str>, listen: Option<String>) -> CmdResult {
    let auth = AuthConfig::from_env();
    auth.validate()?;
    if auth.internal_api_key.is_none() {
        tracing::warn!("INTERNAL_API_KEY is not set; completion endpoint will reject all calls");
    }

    let mut config = ApiConfig::from_env();
    if let Some(listen) = listen {
        config.listen_addr = listen;
    }

    let (_, service) = open_service(storage_config, users_file).await?;
    info!(
        backend = service.storage().kind(),
        listen_addr = %config.listen_addr,
        "Starting referral API server"
    );

    let state = AppState::with_config(config, auth, Arc::new(service));
    run_server(state).await
}

/// Open storage and its user directory, seeding the directory from `users_file`
async fn open_service(
    storage_config: &StorageConfig,
    users_file: Option<&str>,
) -> Result<(Arc<StorageBackend>, LedgerService), Box<dyn std::error::Error + Send + Sync>> {
    let config = ReferralConfig::from_env();
    config.validate()?;

    let storage = Arc::new(StorageBackend::open(storage_config)?);
    let directory = storage.user_directory()?;
    if let Some(path) = users_file {
        seed_from_file(directory.as_ref(), path).await?;
    }

    let service = ReferralService::new(storage.clone(), directory, config);
    Ok((storage, service))
}

async fn run_ledger_command(service: &LedgerService, command: Commands) -> CmdResult {
    match command {
        Commands::Code { action } => handle_code_command(service, action).await,

        Commands::User { action } => handle_user_command(service, action).await,

        Commands::Redeem { code, user, email } => {
            let request = RedeemRequest {
                user_id: user.map(UserId::new),
                code,
                invitee_email: email,
                source: Default::default(),
            };
            print_json(&service.redeem_code(request).await?)
        }

        Commands::Claim { referral_id, user } => {
            let referral = service
                .claim_referral(&ReferralId::new(referral_id), &UserId::new(user))
                .await?;
            print_json(&referral)
        }

        Commands::Complete {
            invitee,
            event_type,
        } => {
            let outcome = service
                .complete_referral_for_invitee(&UserId::new(invitee), &event_type)
                .await?;
            print_json(&outcome)
        }

        Commands::Validate { code } => print_json(&service.validate_and_get_inviter(&code).await?),

        Commands::Show { user } => {
            let user_id = UserId::new(user);
            let referrals = service.get_referrals_for_user(&user_id).await?;
            print_json(&referrals)?;
            println!("Credits: {}", service.credits_of(&user_id).await?);
            Ok(())
        }

        Commands::Start { .. } | Commands::Token { .. } => Ok(()),
    }
}

async fn handle_code_command(service: &LedgerService, action: CodeCommands) -> CmdResult {
    match action {
        CodeCommands::Create {
            inviter,
            usage_limit,
            expires_in_days,
            campaign,
        } => {
            let options = CodeOptions {
                usage_limit,
                expires_at: expires_in_days
                    .map(|days| expiry_after_days(Utc::now(), days))
                    .transpose()?,
                campaign,
            };
            let code = service.create_code(&UserId::new(inviter), options).await?;
            print_json(&code)
        }
        CodeCommands::Deactivate { code, inviter } => {
            let code = service.deactivate_code(&UserId::new(inviter), &code).await?;
            print_json(&code)
        }
    }
}

async fn handle_user_command(service: &LedgerService, action: UserCommands) -> CmdResult {
    match action {
        UserCommands::Add {
            id,
            username,
            first_name,
        } => {
            let mut profile = UserProfile::new(id.as_str(), username);
            profile.first_name = first_name;
            service.directory().upsert(profile.clone()).await?;
            print_json(&profile)
        }
    }
}

fn expiry_after_days(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, String> {
    if days <= 0 {
        return Err("--expires-in-days must be positive".to_string());
    }
    Duration::try_days(days)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| format!("--expires-in-days {} is out of range", days))
}

fn token_ttl(hours: i64) -> Result<Duration, String> {
    Duration::try_hours(hours).ok_or_else(|| format!("--ttl-hours {} is out of range", hours))
}

fn print_json<T: Serialize>(data: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("referral").chain(args.iter().copied())).unwrap()
    }

    #[tokio::test]
    async fn test_validate_sees_users_added_through_cli() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("ledger");
        let data_dir = data_dir.to_str().unwrap();

        run(parse(&["--data-dir", data_dir, "user", "add", "alice", "--username", "alice_w"]))
            .await
            .unwrap();

        let (storage, service) = open_service(&StorageConfig::sled(data_dir), None).await.unwrap();
        let code = service
            .create_code(&UserId::new("alice"), CodeOptions::default())
            .await
            .unwrap();
        let validation = service.validate_and_get_inviter(&code.code).await.unwrap();
        assert!(validation.valid);
        assert_eq!(validation.inviter.map(|p| p.username), Some("alice_w".to_string()));
        storage.flush().unwrap();
    }

    #[tokio::test]
    async fn test_users_file_seeds_directory() {
        let dir = tempdir().unwrap();
        let users_file = dir.path().join("users.json");
        std::fs::write(&users_file, r#"[{"id": "carol", "username": "carol_c"}]"#).unwrap();

        let (_, service) = open_service(&StorageConfig::memory(), users_file.to_str())
            .await
            .unwrap();
        let code = service
            .create_code(&UserId::new("carol"), CodeOptions::default())
            .await
            .unwrap();

        let validation = service.validate_and_get_inviter(&code.code).await.unwrap();
        assert!(validation.valid);
        assert_eq!(validation.inviter.map(|p| p.username), Some("carol_c".to_string()));
    }

    #[tokio::test]
    async fn test_missing_users_file_fails_startup() {
        let result = open_service(&StorageConfig::memory(), Some("/nonexistent/users.json")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_expiry_after_days() {
        let now = Utc::now();
        assert_eq!(expiry_after_days(now, 7).unwrap(), now + Duration::days(7));
        assert!(expiry_after_days(now, 0).is_err());
        assert!(expiry_after_days(now, -3).is_err());
        assert!(expiry_after_days(now, i64::MAX).is_err());
        assert!(expiry_after_days(now, 100_000_000).is_err());
    }

    #[test]
    fn test_token_ttl_out_of_range() {
        assert_eq!(token_ttl(24).unwrap(), Duration::hours(24));
        assert!(token_ttl(i64::MAX).is_err());
    }

    #[tokio::test]
    async fn test_code_create_with_huge_expiry_is_an_error() {
        let result = run(parse(&[
            "code",
            "create",
            "--inviter",
            "alice",
            "--expires-in-days",
            "100000000",
        ]))
        .await;
        assert!(result.is_err());
    }
}
