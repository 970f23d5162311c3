use serde::{Deserialize, Serialize};

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL.
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Pool checkout timeout in seconds.
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: default_pool_size(),
            pool_timeout_secs: default_pool_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Build a PostgreSQL URL from discrete connection parameters.
    pub fn from_parts(
        host: &str,
        port: &str,
        user: &str,
        password: &str,
        name: &str,
        ssl_mode: &str,
    ) -> Self {
        Self {
            url: format!(
                "postgres://{}:{}@{}:{}/{}?sslmode={}",
                user, password, host, port, name, ssl_mode
            ),
            ..Default::default()
        }
    }
}

// Migrations are sequential, a handful of connections is plenty.
fn default_pool_size() -> u32 {
    5
}

fn default_pool_timeout() -> u64 {
    30
}
