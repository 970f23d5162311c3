mod database;
mod logging;

pub use database::DatabaseConfig;
pub use logging::{normalize_level, LogFormat, LoggingConfig};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, StrataError};

/// Root configuration for strata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Database configuration.
    pub database: DatabaseConfig,

    /// Migration bookkeeping configuration.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl StrataConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| StrataError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content, |name| std::env::var(name).ok())?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| StrataError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        let config = Self::from_lookup(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// `DATABASE_URL` wins when present; otherwise the URL is assembled from
    /// the `DB_*` variables, each with a local-development default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str, fallback: &str| lookup(name).unwrap_or_else(|| fallback.to_string());

        let database = match lookup("DATABASE_URL").filter(|url| !url.is_empty()) {
            Some(url) => DatabaseConfig {
                url,
                ..Default::default()
            },
            None => DatabaseConfig::from_parts(
                &var("DB_HOST", "localhost"),
                &var("DB_PORT", "5432"),
                &var("DB_USER", "postgres"),
                &var("DB_PASSWORD", "postgres"),
                &var("DB_NAME", "myapp"),
                &var("DB_SSLMODE", "disable"),
            ),
        };

        let mut migrations = MigrationsConfig::default();
        if let Some(table) = lookup("MIGRATIONS_TABLE") {
            migrations.table = table;
        }
        migrations.directory = lookup("MIGRATIONS_DIR");

        Self {
            database,
            migrations,
            logging: LoggingConfig {
                level: var("LOG_LEVEL", "info"),
                ..Default::default()
            },
        }
    }

    /// Check values that would otherwise fail late, mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(StrataError::Config("database.url must not be empty".into()));
        }
        if self.database.pool_size == 0 {
            return Err(StrataError::Config(
                "database.pool_size must be at least 1".into(),
            ));
        }
        if !is_sql_identifier(&self.migrations.table) {
            return Err(StrataError::Config(format!(
                "migrations.table '{}' is not a plain SQL identifier",
                self.migrations.table
            )));
        }
        Ok(())
    }
}

/// Migration bookkeeping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Name of the record table.
    #[serde(default = "default_table")]
    pub table: String,

    /// Directory of additional `.sql` migrations, applied after the built-in set.
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            directory: None,
        }
    }
}

fn default_table() -> String {
    "migration_records".to_string()
}

/// The record table name is interpolated into SQL, so only `[A-Za-z_][A-Za-z0-9_]*`
/// up to PostgreSQL's 63 byte limit is accepted.
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| StrataError::Config(format!("Invalid substitution pattern: {}", e)))?;

    let mut result = content.to_string();
    for cap in re.captures_iter(content) {
        if let Some(value) = lookup(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }

    Ok(result)
}
