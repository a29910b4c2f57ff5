//! Status poller: one scheduler per (site, account) pair owning an
//! unbounded set of per-submission poll tasks. A poll runs until the
//! upstream verdict goes terminal, the attempt cap is hit, or the site
//! becomes unreachable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use vjudge_api::error::JudgeError;
use vjudge_api::verdict;

use crate::site::{SiteClient, StatusHints};
use crate::storage::SubmissionStore;

use super::Timing;

/// A submission is polled at most this many times; the n-th attempt waits
/// n backoff units first, bounding a run at roughly two hours of wall clock.
pub const MAX_POLL_ATTEMPTS: u32 = 120;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PollerError {
    #[error("cannot add task before poller is started")]
    NotStarted,
    #[error("cannot add task when poller is stopping")]
    Stopping,
    #[error("poller can only be stopped once")]
    AlreadyStopped,
}

struct PollContext {
    client: Arc<dyn SiteClient>,
    store: Arc<dyn SubmissionStore>,
    backoff_unit: Duration,
}

struct Inner {
    tx: Option<UnboundedSender<i64>>,
    handle: Option<JoinHandle<()>>,
}

pub struct StatusPoller {
    ctx: Arc<PollContext>,
    inner: Mutex<Inner>,
    stopping: Arc<AtomicBool>,
}

impl StatusPoller {
    pub fn new(
        client: Arc<dyn SiteClient>,
        store: Arc<dyn SubmissionStore>,
        timing: &Timing,
    ) -> Self {
        Self {
            ctx: Arc::new(PollContext {
                client,
                store,
                backoff_unit: timing.backoff_unit,
            }),
            inner: Mutex::new(Inner {
                tx: None,
                handle: None,
            }),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the scheduler. Starting twice is a no-op.
    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.tx.is_some() {
            return;
        }
        let (tx, rx) = unbounded_channel();
        inner.handle = Some(tokio::spawn(run_scheduler(rx, self.ctx.clone())));
        inner.tx = Some(tx);
    }

    /// Enqueue a polling task. The poll itself runs asynchronously on the
    /// scheduler.
    pub fn add_task(&self, submission_id: i64) -> Result<(), PollerError> {
        if self.stopping.load(Ordering::SeqCst) {
            return Err(PollerError::Stopping);
        }
        let inner = self.inner.lock().unwrap();
        match inner.tx.as_ref() {
            None => Err(PollerError::NotStarted),
            Some(tx) => tx.send(submission_id).map_err(|_| PollerError::Stopping),
        }
    }

    /// Stop intake and wait for pending polls to drain. Callable exactly
    /// once after `start`.
    pub async fn stop(&self) -> Result<(), PollerError> {
        let handle = {
            let mut inner = self.inner.lock().unwrap();
            if self.stopping.load(Ordering::SeqCst) {
                return Err(PollerError::AlreadyStopped);
            }
            if inner.tx.is_none() {
                return Err(PollerError::NotStarted);
            }
            self.stopping.store(true, Ordering::SeqCst);
            // Dropping the sender closes intake; the scheduler drains its
            // pending polls and exits.
            inner.tx = None;
            inner.handle.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }
}

async fn run_scheduler(mut rx: UnboundedReceiver<i64>, ctx: Arc<PollContext>) {
    let mut polls: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(submission_id) => {
                    polls.spawn(poll_submission(ctx.clone(), submission_id));
                }
                None => break,
            },
            Some(_) = polls.join_next(), if !polls.is_empty() => {}
        }
    }
    // Intake is closed; drain what is still in flight before exiting.
    while polls.join_next().await.is_some() {}
    debug!("status poller for {} drained", ctx.client.name());
}

async fn poll_submission(ctx: Arc<PollContext>, submission_id: i64) {
    let submission = match ctx.store.find_submission(submission_id).await {
        Ok(Some(submission)) => submission,
        Ok(None) => return,
        Err(e) => {
            error!("loading submission {submission_id} failed: {e}");
            return;
        }
    };
    // Only rows this poller's site is actively judging are tracked.
    let Some(run_id) = submission.run_id.clone() else {
        return;
    };
    if submission.oj_name != ctx.client.name() || submission.verdict != verdict::BEING_JUDGED {
        return;
    }
    let hints = StatusHints {
        user_id: submission.user_id.clone(),
        problem_id: Some(submission.problem_id.clone()),
    };

    for attempt in 0..MAX_POLL_ATTEMPTS {
        tokio::time::sleep(ctx.backoff_unit * attempt).await;
        let mut refreshed = false;
        let status = loop {
            match ctx.client.get_submit_status(&run_id, &hints).await {
                Ok(status) => break status,
                Err(JudgeError::LoginRequired) if !refreshed => {
                    refreshed = true;
                    match ctx.client.update_cookies().await {
                        Ok(()) => {
                            // Same attempt; a session bounce must not
                            // consume a backoff step.
                            debug!(
                                "status poller login expired, login again, name: {}",
                                ctx.client.name()
                            );
                        }
                        Err(e) => {
                            fail(&ctx, submission_id, &e.to_string()).await;
                            return;
                        }
                    }
                }
                // A second session bounce in one attempt counts as that
                // attempt coming up empty.
                Err(JudgeError::LoginRequired) => break None,
                Err(e) => {
                    fail(&ctx, submission_id, &e.to_string()).await;
                    return;
                }
            }
        };

        let Some(status) = status else {
            continue;
        };
        if verdict::is_non_terminal(&status.verdict) {
            continue;
        }
        if let Err(e) = ctx
            .store
            .record_result(
                submission_id,
                &status.verdict,
                Some(status.exe_time_ms),
                Some(status.exe_mem_kb),
            )
            .await
        {
            error!("storing verdict for submission {submission_id} failed: {e}");
            return;
        }
        info!(
            "crawled status successfully, submission_id: {submission_id}, verdict: {}",
            status.verdict
        );
        return;
    }
    fail(&ctx, submission_id, "timeout").await;
}

async fn fail(ctx: &PollContext, submission_id: i64, reason: &str) {
    if let Err(e) = ctx.store.set_verdict(submission_id, verdict::JUDGE_FAILED).await {
        error!("storing verdict for submission {submission_id} failed: {e}");
        return;
    }
    error!("crawled status failed, submission_id: {submission_id}, reason: {reason}");
}
