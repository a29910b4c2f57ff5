//! Crawl supervisor: same loop shape as the submit side, but payloads are
//! JSON crawl tasks which are validated and reduced to in-process jobs
//! before being routed to a site's crawler pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use vjudge_api::task::{CrawlKind, CrawlTask};

use crate::accounts::AccountRegistry;
use crate::kv::KvStore;
use crate::refresh::RefreshRegistry;
use crate::site;
use crate::storage::{ContestStore, ProblemStore};

use super::crawler::{CrawlJob, PageCrawler};
use super::pool::{Pool, PoolSet};
use super::{shared_channel, Timing};

pub struct CrawlSupervisor {
    kv: KvStore,
    /// Separate connection for refresh marks; the queue connection is
    /// parked in BRPOP most of the time.
    mark_kv: KvStore,
    problems: Arc<dyn ProblemStore>,
    contests: Arc<dyn ContestStore>,
    accounts: Arc<AccountRegistry>,
    timing: Timing,
    shutdown: Arc<AtomicBool>,
    pools: PoolSet<PageCrawler, CrawlJob>,
}

impl CrawlSupervisor {
    pub fn new(
        kv: KvStore,
        mark_kv: KvStore,
        problems: Arc<dyn ProblemStore>,
        contests: Arc<dyn ContestStore>,
        accounts: Arc<AccountRegistry>,
        timing: Timing,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            kv,
            mark_kv,
            problems,
            contests,
            accounts,
            timing,
            shutdown,
            pools: PoolSet::new(),
        }
    }

    pub async fn run(mut self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            let popped = match self.kv.pop_crawl_task(self.timing.recv_timeout).await {
                Ok(popped) => popped,
                Err(e) => {
                    error!("crawl queue pop failed: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            self.pools
                .maybe_reap(self.timing.reap_interval, self.timing.pool_max_age);
            let Some(payload) = popped else {
                continue;
            };
            self.dispatch(&payload).await;
        }

        info!("crawl supervisor stopping, draining pools");
        self.pools.drain_all();
        while !self.pools.all_stopped() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        info!("crawl supervisor stopped");
    }

    async fn dispatch(&mut self, payload: &str) {
        let task: CrawlTask = match serde_json::from_str(payload) {
            Ok(task) => task,
            Err(_) => {
                error!("crawl supervisor received corrupt data \"{payload}\"");
                return;
            }
        };
        if let Err(e) = task.validate() {
            error!("invalid crawl task: {e}");
            return;
        }
        if !self.accounts.serves(&task.oj_name) {
            error!("unsupported oj_name: {}", task.oj_name);
            return;
        }
        if self.pools.get(&task.oj_name).is_none() {
            match self.start_pool(&task.oj_name).await {
                Some(pool) => self.pools.insert(task.oj_name.clone(), pool),
                None => {
                    error!("cannot start client for {}", task.oj_name);
                    return;
                }
            }
        }
        let job = match task.kind {
            CrawlKind::Problem => CrawlJob::Problem {
                problem_id: if task.all { None } else { task.problem_id },
            },
            CrawlKind::Contest => CrawlJob::Contest,
        };
        if let Some(pool) = self.pools.get(&task.oj_name) {
            pool.send(job);
        }
    }

    async fn start_pool(&self, oj_name: &str) -> Option<Pool<PageCrawler, CrawlJob>> {
        let credentials = self.accounts.credentials_for(oj_name)?;
        let (tx, rx) = shared_channel();
        let mut workers = Vec::new();
        for credential in credentials {
            let client = match site::create_client(oj_name, credential).await {
                Ok(client) => client,
                Err(e) => {
                    error!(
                        "create crawler failed, name: {oj_name}, user_id: {}, reason: {e}",
                        credential.username
                    );
                    continue;
                }
            };
            workers.push(PageCrawler::spawn(
                client,
                self.problems.clone(),
                self.contests.clone(),
                Some(RefreshRegistry::new(self.mark_kv.clone())),
                rx.clone(),
                tx.clone(),
                self.timing.clone(),
            ));
        }
        if workers.is_empty() {
            return None;
        }
        Some(Pool::new(tx, workers))
    }
}
