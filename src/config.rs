use std::time::Duration;

use serde::Deserialize;

/// Password hashing parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub rounds: u32,
    pub memory_kib: u32,
    pub parallelism: u32,
    pub hash_timeout_secs: u64,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            rounds: 10,
            memory_kib: 19 * 1024,
            parallelism: 1,
            hash_timeout_secs: 10,
        }
    }
}

impl PasswordConfig {
    pub fn hash_timeout(&self) -> Duration {
        Duration::from_secs(self.hash_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub password: PasswordConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            rounds: env_or("PASSWORD_HASH_ROUNDS", defaults.rounds),
            memory_kib: env_or("PASSWORD_HASH_MEMORY_KIB", defaults.memory_kib),
            parallelism: env_or("PASSWORD_HASH_PARALLELISM", defaults.parallelism),
            hash_timeout_secs: env_or("PASSWORD_HASH_TIMEOUT_SECS", defaults.hash_timeout_secs),
        };
        Ok(Self {
            database_url,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            password,
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
