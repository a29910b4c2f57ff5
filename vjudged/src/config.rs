//! Daemon configuration. Everything comes from the environment (a `.env`
//! file is honored); the accounts table lives in a strict-parsed JSON file
//! referenced from here.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub redis_url: String,
    pub accounts_file: PathBuf,
    pub log_filter: String,
}

impl DispatcherConfig {
    /// - VJUDGE_REDIS_URL (default `redis://127.0.0.1:6379/0`)
    /// - VJUDGE_ACCOUNTS_FILE (default `accounts.json`)
    /// - VJUDGE_LOG (tracing filter directive, default `info`)
    pub fn from_env() -> Self {
        Self {
            redis_url: env_string("VJUDGE_REDIS_URL", "redis://127.0.0.1:6379/0"),
            accounts_file: PathBuf::from(env_string("VJUDGE_ACCOUNTS_FILE", "accounts.json")),
            log_filter: env_string("VJUDGE_LOG", "info"),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
