mod migrate;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use strata_core::config::{normalize_level, LogFormat, LoggingConfig, StrataConfig};
use strata_runtime::migrations::{
    builtin_registry, load_migrations_from_dir, MigrationRegistry, Migrator, PgMigrationStore,
};
use strata_runtime::Database;

const DEFAULT_CONFIG: &str = "strata.toml";

/// Single-dash spellings accepted by the earlier Go tool.
const SINGLE_DASH_FLAGS: &[(&str, &str)] = &[("-rollback", "--rollback"), ("-status", "--status")];

/// Rewrite `-rollback` and `-status` to their `--` forms so existing
/// scripts keep working. clap would read them as clusters of short flags.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            let long = SINGLE_DASH_FLAGS
                .iter()
                .find(|(single, _)| arg.to_str() == Some(*single))
                .map(|(_, long)| OsString::from(*long));
            long.unwrap_or(arg)
        })
        .collect()
}

/// Strata - apply or roll back database schema migrations.
///
/// With no flags, applies every pending migration.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Roll back the most recently applied migrations instead of migrating.
    #[arg(long, conflicts_with = "status")]
    pub rollback: bool,

    /// Number of migrations to roll back.
    #[arg(
        short = 'n',
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub count: u32,

    /// Show applied and pending migrations.
    #[arg(long)]
    pub status: bool,

    /// Configuration file path. Without it, `strata.toml` is used when
    /// present and the environment otherwise.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory of additional `.sql` migrations.
    #[arg(short, long)]
    pub migrations_dir: Option<PathBuf>,
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        // Load .env if present
        dotenvy::dotenv().ok();

        let config = load_config(self.config.as_deref())?;
        init_tracing(&config.logging);

        let db = Database::from_config(&config.database).await?;
        let store = PgMigrationStore::with_table(db.pool().clone(), &config.migrations.table)?;

        let migrations_dir = self
            .migrations_dir
            .or_else(|| config.migrations.directory.as_ref().map(PathBuf::from));
        let registry = build_registry(migrations_dir.as_deref())?;
        info!(
            migrations = registry.len(),
            table = %config.migrations.table,
            "Registered migrations"
        );

        let migrator = Migrator::new(Arc::new(store), registry);
        let result = if self.status {
            migrate::show_status(&migrator).await
        } else if self.rollback {
            migrate::rollback(&migrator, self.count as usize).await
        } else {
            migrate::migrate(&migrator).await
        };

        if let Err(e) = &result {
            match e.migration_id() {
                Some(id) => error!(migration_id = id, error = %e, "Migration run failed"),
                None => error!(error = %e, "Migration run failed"),
            }
        }

        db.close().await;
        result.map_err(Into::into)
    }
}

/// An explicit path must exist. Otherwise `strata.toml` is read when present
/// and the environment is used as a fallback.
fn load_config(path: Option<&Path>) -> Result<StrataConfig> {
    if let Some(path) = path {
        return StrataConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()));
    }

    let default_path = Path::new(DEFAULT_CONFIG);
    if default_path.exists() {
        return Ok(StrataConfig::from_file(default_path)?);
    }
    Ok(StrataConfig::from_env()?)
}

/// Built-in migrations first, then any loaded from `dir`.
fn build_registry(dir: Option<&Path>) -> Result<MigrationRegistry> {
    let mut registry = builtin_registry()?;
    if let Some(dir) = dir {
        registry.extend(load_migrations_from_dir(dir)?)?;
    }
    Ok(registry)
}

fn init_tracing(config: &LoggingConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(normalize_level(&config.level)));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match config.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}
