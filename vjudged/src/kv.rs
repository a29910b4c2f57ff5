//! Key/value store access. Only atomic single-key operations are used:
//! LPUSH/BRPOP for the two work queues, GET/SET (with TTL) for refresh
//! marks. No distributed locks.
//!
//! BRPOP parks the underlying multiplexed connection for its whole timeout,
//! so every blocking consumer must own its own `KvStore` (connect once per
//! supervisor); clones share the connection and are only safe for the
//! non-blocking mark operations.

use std::time::Duration;

use anyhow::Context;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use vjudge_api::task::{CrawlTask, CRAWL_QUEUE, SUBMIT_QUEUE};

#[derive(Clone)]
pub struct KvStore {
    conn: ConnectionManager,
}

impl KvStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("invalid key/value store url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("connecting to key/value store")?;
        Ok(Self { conn })
    }

    pub async fn push_submission(&mut self, submission_id: i64) -> anyhow::Result<()> {
        self.conn
            .lpush::<_, _, ()>(SUBMIT_QUEUE, submission_id.to_string())
            .await
            .context("pushing submission id")?;
        Ok(())
    }

    /// Blocking pop from the submit queue. `None` means the timeout elapsed
    /// with nothing to do.
    pub async fn pop_submission(&mut self, timeout: Duration) -> anyhow::Result<Option<String>> {
        self.blocking_pop(SUBMIT_QUEUE, timeout).await
    }

    pub async fn push_crawl_task(&mut self, task: &CrawlTask) -> anyhow::Result<()> {
        let payload = serde_json::to_string(task).context("encoding crawl task")?;
        self.conn
            .lpush::<_, _, ()>(CRAWL_QUEUE, payload)
            .await
            .context("pushing crawl task")?;
        Ok(())
    }

    pub async fn pop_crawl_task(&mut self, timeout: Duration) -> anyhow::Result<Option<String>> {
        self.blocking_pop(CRAWL_QUEUE, timeout).await
    }

    async fn blocking_pop(&mut self, key: &str, timeout: Duration) -> anyhow::Result<Option<String>> {
        let reply: Option<(String, String)> = self
            .conn
            .brpop(key, timeout.as_secs_f64())
            .await
            .with_context(|| format!("BRPOP {key}"))?;
        Ok(reply.map(|(_, value)| value))
    }

    /// Refresh marks are unix timestamps stored as ASCII floats.
    pub async fn mark(&mut self, key: &str) -> anyhow::Result<Option<f64>> {
        let value: Option<String> = self
            .conn
            .get(key)
            .await
            .with_context(|| format!("GET {key}"))?;
        Ok(value.and_then(|s| s.parse::<f64>().ok()))
    }

    pub async fn set_mark(
        &mut self,
        key: &str,
        timestamp: f64,
        ttl: Option<Duration>,
    ) -> anyhow::Result<()> {
        match ttl {
            Some(ttl) => self
                .conn
                .set_ex::<_, _, ()>(key, timestamp.to_string(), ttl.as_secs().max(1))
                .await
                .with_context(|| format!("SETEX {key}"))?,
            None => self
                .conn
                .set::<_, _, ()>(key, timestamp.to_string())
                .await
                .with_context(|| format!("SET {key}"))?,
        }
        Ok(())
    }
}
