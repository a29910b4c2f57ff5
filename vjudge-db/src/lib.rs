//! Shared PostgreSQL plumbing for the dispatcher: environment-driven
//! configuration, a lazily connected pool with retry, embedded migrations
//! and a health probe. Workers grab the pool and run per-operation commits;
//! there are no multi-step transactions anywhere in the dispatcher.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub use sqlx::PgPool;

pub mod tables {
    pub const SUBMISSIONS: &str = "submissions";
    pub const CONTEST_SUBMISSIONS: &str = "contest_submissions";
    pub const PROBLEMS: &str = "problems";
    pub const CONTESTS: &str = "contests";
}

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub database_url: Option<String>,

    pub max_connections: u32,      // 10
    pub connect_timeout_secs: u64, // 5
    pub acquire_timeout_secs: u64, // 5

    pub retry_max_attempts: u32,    // 5
    pub retry_base_backoff_ms: u64, // 200

    /// true: startup fails when the database cannot be reached after retries.
    /// false: log and continue; the first `pool()` call retries.
    pub eager_init: bool,

    /// true: run embedded migrations after the first successful connect.
    pub migrate_on_start: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            connect_timeout_secs: 5,
            acquire_timeout_secs: 5,
            retry_max_attempts: 5,
            retry_base_backoff_ms: 200,
            eager_init: true,
            migrate_on_start: false,
        }
    }
}

impl DbConfig {
    /// - DATABASE_URL (optional; `pool()` fails without it)
    /// - VJUDGE_DB_MAX_CONNECTIONS (default 10)
    /// - VJUDGE_DB_CONNECT_TIMEOUT_SECS (default 5)
    /// - VJUDGE_DB_ACQUIRE_TIMEOUT_SECS (default 5)
    /// - VJUDGE_DB_RETRY_MAX_ATTEMPTS (default 5)
    /// - VJUDGE_DB_RETRY_BASE_BACKOFF_MS (default 200)
    /// - VJUDGE_DB_EAGER_INIT (bool, default true)
    /// - VJUDGE_DB_MIGRATE_ON_START (bool, default false)
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.database_url = std::env::var("DATABASE_URL").ok();
        cfg.max_connections = env_u32("VJUDGE_DB_MAX_CONNECTIONS", cfg.max_connections);
        cfg.connect_timeout_secs =
            env_u64("VJUDGE_DB_CONNECT_TIMEOUT_SECS", cfg.connect_timeout_secs);
        cfg.acquire_timeout_secs =
            env_u64("VJUDGE_DB_ACQUIRE_TIMEOUT_SECS", cfg.acquire_timeout_secs);
        cfg.retry_max_attempts = env_u32("VJUDGE_DB_RETRY_MAX_ATTEMPTS", cfg.retry_max_attempts);
        cfg.retry_base_backoff_ms =
            env_u64("VJUDGE_DB_RETRY_BASE_BACKOFF_MS", cfg.retry_base_backoff_ms);
        cfg.eager_init = env_bool("VJUDGE_DB_EAGER_INIT", cfg.eager_init);
        cfg.migrate_on_start = env_bool("VJUDGE_DB_MIGRATE_ON_START", cfg.migrate_on_start);
        cfg
    }
}

pub struct Db {
    cfg: DbConfig,
    pool: OnceCell<PgPool>,
    migrated: OnceCell<()>,
}

impl Db {
    pub fn new(cfg: DbConfig) -> Self {
        Self {
            cfg,
            pool: OnceCell::new(),
            migrated: OnceCell::new(),
        }
    }

    /// Connect according to the configured init mode. In lazy mode a
    /// connect failure is only a warning and `pool()` retries later.
    pub async fn init(&self) -> Result<(), DbError> {
        match self.connect_with_retry().await {
            Ok(pool) => {
                let _ = self.pool.set(pool);
                if self.cfg.migrate_on_start {
                    if let Some(pool) = self.pool.get() {
                        self.ensure_migrated(pool).await?;
                    }
                }
                Ok(())
            }
            Err(e) if self.cfg.eager_init => Err(e),
            Err(e) => {
                warn!(target: "vjudge_db", "database not available at startup (lazy): {e}");
                Ok(())
            }
        }
    }

    /// The shared pool, connecting (with retries) on first use.
    pub async fn pool(&self) -> Result<&PgPool, DbError> {
        let pool = self
            .pool
            .get_or_try_init(|| async { self.connect_with_retry().await })
            .await?;
        if self.cfg.migrate_on_start {
            self.ensure_migrated(pool).await?;
        }
        Ok(pool)
    }

    /// Quick probe with a short timeout so a degraded database cannot hang
    /// the caller.
    pub async fn health_check(&self) -> HealthStatus {
        if self.cfg.database_url.is_none() {
            return HealthStatus::NoUrl;
        }
        let Some(pool) = self.pool.get() else {
            return HealthStatus::NotConnected;
        };
        match tokio::time::timeout(Duration::from_secs(1), sqlx::query("SELECT 1").execute(pool))
            .await
        {
            Ok(Ok(_)) => HealthStatus::Ok,
            Ok(Err(e)) => HealthStatus::Error(e.to_string()),
            Err(_) => HealthStatus::Error("health check timed out".to_string()),
        }
    }

    async fn connect_with_retry(&self) -> Result<PgPool, DbError> {
        let url = self.cfg.database_url.as_deref().ok_or(DbError::MissingUrl)?;
        let attempts = self.cfg.retry_max_attempts.max(1);
        let mut last_err = String::new();

        for attempt in 1..=attempts {
            let options = PgPoolOptions::new()
                .max_connections(self.cfg.max_connections)
                .acquire_timeout(Duration::from_secs(self.cfg.acquire_timeout_secs));
            let connect = options.connect(url);
            let result = match tokio::time::timeout(
                Duration::from_secs(self.cfg.connect_timeout_secs.max(1)),
                connect,
            )
            .await
            {
                Ok(inner) => inner.map_err(|e| e.to_string()),
                Err(_) => Err(format!(
                    "connect attempt timed out after {}s",
                    self.cfg.connect_timeout_secs
                )),
            };

            match result {
                Ok(pool) => {
                    debug!(target: "vjudge_db", "connected to database on attempt {attempt}");
                    return Ok(pool);
                }
                Err(msg) => {
                    last_err = msg;
                    if attempt < attempts {
                        let delay = backoff_ms(self.cfg.retry_base_backoff_ms, attempt);
                        warn!(
                            target: "vjudge_db",
                            "db connect attempt {attempt}/{attempts} failed: {last_err}; retrying in {delay} ms"
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        Err(DbError::Connect {
            attempts,
            last_error: last_err,
        })
    }

    async fn ensure_migrated(&self, pool: &PgPool) -> Result<(), DbError> {
        self.migrated
            .get_or_try_init(|| async {
                info!(target: "vjudge_db", "running database migrations");
                MIGRATOR
                    .run(pool)
                    .await
                    .map_err(|e| DbError::Migrate(e.to_string()))
            })
            .await
            .map(|_| ())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("DATABASE_URL is not set")]
    MissingUrl,

    #[error("failed to connect after {attempts} attempt(s): {last_error}")]
    Connect { attempts: u32, last_error: String },

    #[error("migrations failed: {0}")]
    Migrate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    NoUrl,
    NotConnected,
    Ok,
    Error(String),
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| {
            let s = s.trim().to_ascii_lowercase();
            matches!(s.as_str(), "1" | "true" | "yes" | "on")
        })
        .unwrap_or(default)
}

/// Exponential backoff capped at 30 s, with a small random jitter so that
/// several workers restarting together do not reconnect in lockstep.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let mut factor = 1u64;
    for _ in 1..attempt {
        factor = factor.saturating_mul(2);
    }
    let capped = base_ms.saturating_mul(factor).min(30_000);
    capped.saturating_add(fastrand::u64(0..(base_ms / 2 + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let first = backoff_ms(200, 1);
        assert!((200..=300).contains(&first));
        let tenth = backoff_ms(200, 10);
        assert!((30_000..=30_100).contains(&tenth));
    }

    #[test]
    fn env_bool_accepts_common_truthy_values() {
        std::env::set_var("VJUDGE_DB_TEST_FLAG_X", "yes");
        assert!(env_bool("VJUDGE_DB_TEST_FLAG_X", false));
        std::env::set_var("VJUDGE_DB_TEST_FLAG_X", "0");
        assert!(!env_bool("VJUDGE_DB_TEST_FLAG_X", true));
        std::env::remove_var("VJUDGE_DB_TEST_FLAG_X");
    }

    #[tokio::test]
    async fn health_check_without_url_reports_no_url() {
        let db = Db::new(DbConfig {
            database_url: None,
            ..DbConfig::default()
        });
        assert_eq!(db.health_check().await, HealthStatus::NoUrl);
    }
}
