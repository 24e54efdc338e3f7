//! Stash server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use stash_core::config::AppConfig;
use stash_server::bootstrap::ensure_admin_token;
use stash_server::reaper::{spawn_reaper, watch_task};
use stash_server::{AppState, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Stash - an attribute-indexed node store
#[derive(Parser, Debug)]
#[command(name = "stashd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "STASH_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from the optional file, then `STASH_` environment
/// variables (`__` separates nested keys).
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    // STASH_CONFIG only names the file
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("STASH_") && key != "STASH_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: stashd --config /path/to/config.toml\n  \
             2. Environment variables: STASH_SERVER__BIND=0.0.0.0:7445 \
             STASH_ADMIN__TOKEN_HASH=sha256:YOUR_TOKEN_HASH_HERE stashd\n\n\
             See config/server.example.toml for example configuration.\n\
             Set STASH_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("STASH_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Stash v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    stash_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = stash_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend ready");

    let metadata = stash_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata health check failed")?;
    tracing::info!("Metadata store ready");

    ensure_admin_token(metadata.as_ref(), &config.admin).await?;

    let state = AppState::new(config.clone(), storage, metadata);

    // Kept alive for the life of the process
    let _reaper = if config.reaper.enabled {
        tracing::info!(
            interval_secs = config.reaper.interval_secs,
            retention_secs = config.reaper.retention_secs,
            "Expiry reaper enabled"
        );
        Some(watch_task("reaper", spawn_reaper(state.clone())))
    } else {
        tracing::info!("Expiry reaper disabled");
        None
    };

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "127.0.0.1:9999"
default_limit = 10

[admin]
token_hash = "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"

[auth]
anonymous_write = true
visibility = "owner"

[reaper]
interval_secs = 30
"#,
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9999");
        assert_eq!(config.server.default_limit, 10);
        assert!(config.auth.anonymous_write);
        assert_eq!(config.reaper.interval_secs, 30);
    }

    #[test]
    fn load_config_rejects_invalid_values() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[server]
default_limit = 5000
max_limit = 100

[admin]
token_hash = "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
"#,
        )
        .unwrap();

        assert!(load_config(path.to_str().unwrap()).is_err());
    }
}
