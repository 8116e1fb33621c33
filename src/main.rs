use anyhow::{Context, Result};
use tracing::{info, warn};
use vkinder_vault::config::{load_config, VaultConfig};
use vkinder_vault::credentials::{mask_token, SqliteTokenStore, TokenError};
use vkinder_vault::tokens::{GroupTokenChecker, MigrationOutcome, UserTokens, GROUP_ADMIN_USER_ID};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vkinder_vault=info".into()),
        )
        .init();

    info!("Token vault starting...");

    let config = match std::env::var("VKINDER_CONFIG") {
        Ok(path) => {
            let mut config = load_config(&path)?;
            config.apply_env_overrides();
            config
        }
        Err(_) => VaultConfig::from_env(),
    };
    info!(?config, "Configuration loaded");

    let vault = config
        .build_vault()
        .context("Failed to initialize token vault")?;

    let store = SqliteTokenStore::new(&config.database.path)
        .context("Failed to initialize settings store")?;
    info!(path = %config.database.path.display(), "Settings store initialized");

    let tokens = UserTokens::new(vault, store)
        .with_default_expires_in(config.tokens.default_expires_in_seconds);

    match tokens
        .migrate_group_token(config.vk.group_token.as_deref())
        .context("Group token migration failed")?
    {
        MigrationOutcome::Migrated => info!("Group token moved from environment into storage"),
        MigrationOutcome::AlreadyPresent => info!("Group token already in storage"),
        MigrationOutcome::Skipped => {}
    }

    match tokens.group_token() {
        Ok(token) => {
            info!(group_token = %mask_token(&token), "Group token found in storage");
            let checker = GroupTokenChecker::new(&config.vk)?;
            if !checker.check(&token).await {
                warn!("Stored group token was rejected; update VK_GROUP_TOKEN");
            }
        }
        Err(TokenError::NotFound) => warn!("No group token stored"),
        Err(e) => warn!(error = %e, "Group token unusable"),
    }

    let info = tokens
        .describe(GROUP_ADMIN_USER_ID)
        .context("Failed to describe group token")?;
    // Stored without an expiry, so only presence is meaningful
    info!(
        has_access_token = info.has_access_token,
        updated_at = ?info.updated_at,
        "Group token status"
    );

    Ok(())
}
