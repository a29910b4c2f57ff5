//! Refresh registry: last-refresh timestamps used to suppress redundant
//! contest crawls. Marks live in the key/value store behind a small backend
//! seam; the window decision itself is a pure function so the policy is
//! testable without a store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use vjudge_api::task::{
    contest_refresh_mark, CrawlTask, CONTEST_REFRESH_MARK_TTL_SECS, RECENT_REFRESH_MARK,
};

use crate::kv::KvStore;

/// Cooldown between refreshes of the same contest.
pub const CONTEST_REFRESH_COOLDOWN_SECS: i64 = 3600;
/// Contests starting within this window bypass the cooldown.
pub const CONTEST_START_SOON_SECS: i64 = 3600;

/// True when a refresh should be suppressed: the previous mark is younger
/// than the cooldown *and* the contest still starts more than an hour from
/// now. Imminent (or running) contests always refresh.
pub fn within_cooldown(last_refresh: Option<f64>, start_time: i64, now: i64) -> bool {
    let Some(marked_at) = last_refresh else {
        return false;
    };
    let mark_age = now as f64 - marked_at;
    mark_age < CONTEST_REFRESH_COOLDOWN_SECS as f64
        && start_time - now > CONTEST_START_SOON_SECS
}

/// The mark and queue operations the registry needs from the key/value
/// store.
#[async_trait]
pub trait RefreshBackend: Send {
    async fn mark(&mut self, key: &str) -> anyhow::Result<Option<f64>>;
    async fn set_mark(
        &mut self,
        key: &str,
        timestamp: f64,
        ttl: Option<Duration>,
    ) -> anyhow::Result<()>;
    async fn push_crawl_task(&mut self, task: &CrawlTask) -> anyhow::Result<()>;
}

#[async_trait]
impl RefreshBackend for KvStore {
    async fn mark(&mut self, key: &str) -> anyhow::Result<Option<f64>> {
        KvStore::mark(self, key).await
    }

    async fn set_mark(
        &mut self,
        key: &str,
        timestamp: f64,
        ttl: Option<Duration>,
    ) -> anyhow::Result<()> {
        KvStore::set_mark(self, key, timestamp, ttl).await
    }

    async fn push_crawl_task(&mut self, task: &CrawlTask) -> anyhow::Result<()> {
        KvStore::push_crawl_task(self, task).await
    }
}

pub struct RefreshRegistry {
    kv: Box<dyn RefreshBackend>,
}

impl RefreshRegistry {
    pub fn new(kv: KvStore) -> Self {
        Self { kv: Box::new(kv) }
    }

    pub fn with_backend(kv: Box<dyn RefreshBackend>) -> Self {
        Self { kv }
    }

    pub async fn should_refresh_contest(
        &mut self,
        contest_id: i64,
        start_time: i64,
    ) -> anyhow::Result<bool> {
        self.should_refresh_contest_at(contest_id, start_time, Utc::now().timestamp())
            .await
    }

    pub async fn should_refresh_contest_at(
        &mut self,
        contest_id: i64,
        start_time: i64,
        now: i64,
    ) -> anyhow::Result<bool> {
        let mark = self.kv.mark(&contest_refresh_mark(contest_id)).await?;
        Ok(!within_cooldown(mark, start_time, now))
    }

    /// Record a completed refresh; the mark expires after an hour.
    pub async fn mark_contest_refreshed(&mut self, contest_id: i64) -> anyhow::Result<()> {
        self.mark_contest_refreshed_at(contest_id, Utc::now().timestamp())
            .await
    }

    pub async fn mark_contest_refreshed_at(
        &mut self,
        contest_id: i64,
        now: i64,
    ) -> anyhow::Result<()> {
        self.kv
            .set_mark(
                &contest_refresh_mark(contest_id),
                now as f64,
                Some(Duration::from_secs(CONTEST_REFRESH_MARK_TTL_SECS)),
            )
            .await
    }

    pub async fn mark_recent_refreshed(&mut self) -> anyhow::Result<()> {
        self.kv
            .set_mark(RECENT_REFRESH_MARK, Utc::now().timestamp() as f64, None)
            .await
    }

    pub async fn last_recent_refresh(&mut self) -> anyhow::Result<Option<f64>> {
        self.kv.mark(RECENT_REFRESH_MARK).await
    }

    /// Consult the cooldown and enqueue a contest crawl when allowed.
    /// Returns whether a task was pushed.
    pub async fn enqueue_contest_refresh(
        &mut self,
        site: &str,
        contest_id: i64,
        start_time: i64,
    ) -> anyhow::Result<bool> {
        self.enqueue_contest_refresh_at(site, contest_id, start_time, Utc::now().timestamp())
            .await
    }

    pub async fn enqueue_contest_refresh_at(
        &mut self,
        site: &str,
        contest_id: i64,
        start_time: i64,
        now: i64,
    ) -> anyhow::Result<bool> {
        if !self
            .should_refresh_contest_at(contest_id, start_time, now)
            .await?
        {
            debug!("contest {contest_id} refreshed within the last hour, suppressing");
            return Ok(false);
        }
        let oj_name = vjudge_api::oj::clone_name(site, &contest_id.to_string());
        self.kv.push_crawl_task(&CrawlTask::contest(oj_name)).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    const HOUR: i64 = 3600;

    #[test]
    fn no_mark_never_suppresses() {
        assert!(!within_cooldown(None, 10 * HOUR, 0));
    }

    #[test]
    fn fresh_mark_suppresses_distant_contest() {
        // Refresh at t=0, duplicate request 30 minutes later, contest at +3h.
        assert!(within_cooldown(Some(0.0), 3 * HOUR, HOUR / 2));
    }

    #[test]
    fn imminent_contest_bypasses_cooldown() {
        // Third request at t=2h10m against a contest starting at t=3h: the
        // contest is now within an hour of starting.
        let now = 2 * HOUR + 10 * 60;
        assert!(!within_cooldown(Some((now - 60) as f64), 3 * HOUR, now));
    }

    #[test]
    fn stale_mark_allows_refresh() {
        assert!(!within_cooldown(Some(0.0), 10 * HOUR, HOUR + 1));
    }

    #[test]
    fn running_contest_always_refreshes() {
        // start_time in the past.
        assert!(!within_cooldown(Some(50.0), 0, 100));
    }

    #[derive(Default)]
    struct MemState {
        marks: HashMap<String, (f64, Option<Duration>)>,
        tasks: Vec<CrawlTask>,
    }

    #[derive(Clone, Default)]
    struct MemKv {
        state: Arc<StdMutex<MemState>>,
    }

    impl MemKv {
        fn tasks(&self) -> Vec<CrawlTask> {
            self.state.lock().unwrap().tasks.clone()
        }

        fn stored_ttl(&self, key: &str) -> Option<Option<Duration>> {
            self.state
                .lock()
                .unwrap()
                .marks
                .get(key)
                .map(|(_, ttl)| *ttl)
        }
    }

    #[async_trait]
    impl RefreshBackend for MemKv {
        async fn mark(&mut self, key: &str) -> anyhow::Result<Option<f64>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .marks
                .get(key)
                .map(|(value, _)| *value))
        }

        async fn set_mark(
            &mut self,
            key: &str,
            timestamp: f64,
            ttl: Option<Duration>,
        ) -> anyhow::Result<()> {
            self.state
                .lock()
                .unwrap()
                .marks
                .insert(key.to_string(), (timestamp, ttl));
            Ok(())
        }

        async fn push_crawl_task(&mut self, task: &CrawlTask) -> anyhow::Result<()> {
            self.state.lock().unwrap().tasks.push(task.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn duplicate_refresh_requests_within_the_hour_enqueue_once() {
        let kv = MemKv::default();
        let mut registry = RefreshRegistry::with_backend(Box::new(kv.clone()));
        let start_time = 3 * HOUR;

        // First request goes through; the completed refresh sets the mark.
        assert!(registry
            .enqueue_contest_refresh_at("hdu", 7, start_time, 0)
            .await
            .unwrap());
        registry.mark_contest_refreshed_at(7, 0).await.unwrap();
        assert_eq!(kv.tasks(), vec![CrawlTask::contest("hdu_ct_7")]);
        assert_eq!(
            kv.stored_ttl("vjudge-last-refresh-contest-7"),
            Some(Some(Duration::from_secs(3600)))
        );

        // Duplicate at t=30min is suppressed: nothing new on the queue.
        assert!(!registry
            .enqueue_contest_refresh_at("hdu", 7, start_time, HOUR / 2)
            .await
            .unwrap());
        assert_eq!(kv.tasks().len(), 1);

        // At t=2h10m the contest is within an hour of starting; even a
        // fresh mark no longer suppresses.
        let now = 2 * HOUR + 10 * 60;
        registry.mark_contest_refreshed_at(7, now - 60).await.unwrap();
        assert!(registry
            .enqueue_contest_refresh_at("hdu", 7, start_time, now)
            .await
            .unwrap());
        assert_eq!(kv.tasks().len(), 2);
    }

    #[tokio::test]
    async fn recent_refresh_mark_round_trips_and_never_expires() {
        let kv = MemKv::default();
        let mut registry = RefreshRegistry::with_backend(Box::new(kv.clone()));

        assert_eq!(registry.last_recent_refresh().await.unwrap(), None);
        registry.mark_recent_refreshed().await.unwrap();
        let mark = registry.last_recent_refresh().await.unwrap();
        assert!(mark.is_some_and(|value| value > 0.0));
        assert_eq!(kv.stored_ttl(RECENT_REFRESH_MARK), Some(None));
    }
}
