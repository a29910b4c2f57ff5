//! Submit supervisor: blocks on the external submit queue, routes ids to
//! per-site pools, lazily starting one (Submitter, Poller) pair per bot
//! account, and reaps idle pools.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use vjudge_api::verdict;

use crate::accounts::AccountRegistry;
use crate::kv::KvStore;
use crate::site;
use crate::storage::SubmissionStore;

use super::pool::{Pool, PoolSet};
use super::submitter::Submitter;
use super::{shared_channel, Timing};

pub struct SubmitSupervisor {
    kv: KvStore,
    store: Arc<dyn SubmissionStore>,
    accounts: Arc<AccountRegistry>,
    timing: Timing,
    shutdown: Arc<AtomicBool>,
    pools: PoolSet<Submitter, i64>,
}

impl SubmitSupervisor {
    pub fn new(
        kv: KvStore,
        store: Arc<dyn SubmissionStore>,
        accounts: Arc<AccountRegistry>,
        timing: Timing,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            kv,
            store,
            accounts,
            timing,
            shutdown,
            pools: PoolSet::new(),
        }
    }

    pub async fn run(mut self) {
        // Process restarts are transparent to in-flight work: anything still
        // non-terminal goes back on the external queue exactly once.
        self.requeue_unfinished().await;

        while !self.shutdown.load(Ordering::SeqCst) {
            let popped = match self.kv.pop_submission(self.timing.recv_timeout).await {
                Ok(popped) => popped,
                Err(e) => {
                    error!("submit queue pop failed: {e}");
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

        info!("submit supervisor stopping, draining pools");
        self.pools.drain_all();
        while !self.pools.all_stopped() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        info!("submit supervisor stopped");
    }

    async fn dispatch(&mut self, payload: &str) {
        let Ok(submission_id) = payload.trim().parse::<i64>() else {
            error!("submit supervisor received corrupt data \"{payload}\"");
            return;
        };
        let submission = match self.store.find_submission(submission_id).await {
            Ok(Some(submission)) => submission,
            Ok(None) => {
                error!("submission {submission_id} is not found");
                return;
            }
            Err(e) => {
                error!("loading submission {submission_id} failed: {e}");
                return;
            }
        };
        if !self.accounts.serves(&submission.oj_name) {
            error!("unsupported oj_name: {}", submission.oj_name);
            self.finalize_submit_failed(submission_id).await;
            return;
        }
        if self.pools.get(&submission.oj_name).is_none() {
            match self.start_pool(&submission.oj_name).await {
                Some(pool) => self.pools.insert(submission.oj_name.clone(), pool),
                None => {
                    error!("cannot start client for {}", submission.oj_name);
                    self.finalize_submit_failed(submission_id).await;
                    return;
                }
            }
        }
        if let Some(pool) = self.pools.get(&submission.oj_name) {
            pool.send(submission_id);
        }
    }

    /// One worker per registered account; accounts whose login fails are
    /// skipped. `None` when no worker at all could be constructed.
    async fn start_pool(&self, oj_name: &str) -> Option<Pool<Submitter, i64>> {
        let credentials = self.accounts.credentials_for(oj_name)?;
        let (tx, rx) = shared_channel();
        let mut workers = Vec::new();
        for credential in credentials {
            let client = match site::create_client(oj_name, credential).await {
                Ok(client) => client,
                Err(e) => {
                    error!(
                        "create submitter failed, name: {oj_name}, user_id: {}, reason: {e}",
                        credential.username
                    );
                    continue;
                }
            };
            workers.push(Submitter::spawn(
                client,
                self.store.clone(),
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

    async fn requeue_unfinished(&mut self) {
        match self.store.unfinished_ids().await {
            Ok(ids) => {
                if ids.is_empty() {
                    return;
                }
                info!("requeueing {} unfinished submissions", ids.len());
                for id in ids {
                    if let Err(e) = self.kv.push_submission(id).await {
                        error!("requeueing submission {id} failed: {e}");
                    }
                }
            }
            Err(e) => error!("scanning unfinished submissions failed: {e}"),
        }
    }

    async fn finalize_submit_failed(&self, submission_id: i64) {
        if let Err(e) = self
            .store
            .set_verdict(submission_id, verdict::SUBMIT_FAILED)
            .await
        {
            error!("storing verdict for submission {submission_id} failed: {e}");
        }
    }
}
