//! # rolesync
//!
//! Synchronizes PostgreSQL roles with the rules and entries of a JSON
//! configuration file.
//!
//! ## Configuration
//!
//! - first argument or `ROLESYNC_CONFIG` - configuration file (default: rolesync.json)
//! - `PGDSN` - connection string
//! - `ROLESYNC_MAX_CONNECTIONS` - connection cap (default: 256)
//! - `ROLESYNC_REAL` - apply changes instead of a dry run
//! - `RUST_LOG` - log level (default: info)

use anyhow::Context;
use pg_rolesync::session::PgConnector;
use pg_rolesync::{build_desired, Inspector, Reconciler, SessionPool, SyncConfig};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rolesync v{}", pg_rolesync::VERSION);

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ROLESYNC_CONFIG").ok())
        .unwrap_or_else(|| "rolesync.json".to_string());

    let config = SyncConfig::from_file(&path)
        .and_then(SyncConfig::apply_env)
        .with_context(|| format!("failed to load configuration from {path}"))?;
    config.validate()?;

    info!("Configuration:");
    info!("  Rules: {}", config.rules.len());
    info!("  Entries: {}", config.entries.len());
    info!("  Max connections: {}", config.max_connections);
    info!("  Dry run: {}", config.dry_run);

    let desired = build_desired(&config.rules, &config.entries)
        .context("failed to compute desired roles")?;
    info!("Desired state holds {} roles.", desired.len());

    let pool = SessionPool::new(PgConnector, config.connstring.clone())
        .with_max_connections(config.max_connections);
    let mut reconciler = Reconciler::new(pool, Inspector::new(config.roles_blacklist.clone()))
        .dry_run(config.dry_run);

    match reconciler.run(&desired).await {
        Ok(summary) => {
            info!("Done, {} statements.", summary.statements);
            Ok(())
        }
        Err(e) => {
            error!("Synchronization failed: {}", e);
            Err(e.into())
        }
    }
}
