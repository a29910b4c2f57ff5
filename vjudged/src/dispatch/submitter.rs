//! Submitter worker: turns queued submissions into submitted-and-tracked
//! ones. One worker per (site, account); each owns the status poller that
//! tracks its runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

use vjudge_api::error::JudgeError;
use vjudge_api::verdict;

use crate::site::SiteClient;
use crate::storage::SubmissionStore;

use super::pool::PoolWorker;
use super::poller::StatusPoller;
use super::{SharedReceiver, Timing};

pub struct Submitter {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Submitter {
    /// Spawn the worker loop. `tx` is the worker's own site channel, used to
    /// requeue a submission after a session refresh.
    pub fn spawn(
        client: Arc<dyn SiteClient>,
        store: Arc<dyn SubmissionStore>,
        rx: SharedReceiver<i64>,
        tx: UnboundedSender<i64>,
        timing: Timing,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run(client, store, rx, tx, stop.clone(), timing));
        Self { stop, handle }
    }
}

impl PoolWorker for Submitter {
    fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run(
    client: Arc<dyn SiteClient>,
    store: Arc<dyn SubmissionStore>,
    rx: SharedReceiver<i64>,
    tx: UnboundedSender<i64>,
    stop: Arc<AtomicBool>,
    timing: Timing,
) {
    let name = client.name().to_string();
    let user_id = client.user_id().unwrap_or_default();

    let poller = StatusPoller::new(client.clone(), store.clone(), &timing);
    poller.start();
    info!("started submitter, name: {name}, user_id: {user_id}");

    loop {
        let received = {
            let mut guard = rx.lock().await;
            timeout(timing.recv_timeout, guard.recv()).await
        };
        match received {
            Err(_) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            Ok(None) => break,
            Ok(Some(submission_id)) => {
                handle_submission(&client, &store, &poller, &tx, submission_id).await;
                // Per-account rate limit; fixed.
                tokio::time::sleep(timing.submit_gap).await;
            }
        }
    }

    info!("stopping submitter, name: {name}, user_id: {user_id}");
    if let Err(e) = poller.stop().await {
        error!("stopping poller for {name} failed: {e}");
    }
    info!("stopped submitter, name: {name}, user_id: {user_id}");
}

async fn handle_submission(
    client: &Arc<dyn SiteClient>,
    store: &Arc<dyn SubmissionStore>,
    poller: &StatusPoller,
    tx: &UnboundedSender<i64>,
    submission_id: i64,
) {
    let submission = match store.find_submission(submission_id).await {
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
    info!(
        "start judging submission {submission_id}, verdict: {}",
        submission.verdict
    );

    // Replay protection: a terminal row is dropped on the floor.
    if submission.verdict != verdict::QUEUING && submission.verdict != verdict::BEING_JUDGED {
        return;
    }
    // Already submitted upstream (e.g. re-pushed after a restart); the run
    // only needs tracking.
    if submission.verdict == verdict::BEING_JUDGED {
        if let Err(e) = poller.add_task(submission_id) {
            error!("tracking submission {submission_id} failed: {e}");
        }
        return;
    }

    match client
        .submit_problem(
            &submission.problem_id,
            &submission.language,
            &submission.source_code,
        )
        .await
    {
        Ok(run_id) => {
            let bot_user = client.user_id().unwrap_or_default();
            if let Err(e) = store.mark_submitted(submission_id, &run_id, &bot_user).await {
                error!("recording run id for submission {submission_id} failed: {e}");
                return;
            }
            info!("submission {submission_id} is submitted successfully");
            if let Err(e) = poller.add_task(submission_id) {
                error!("tracking submission {submission_id} failed: {e}");
            }
        }
        Err(JudgeError::LoginRequired) => match client.update_cookies().await {
            Ok(()) => {
                debug!(
                    "submitter login is expired, login again, name: {}",
                    client.name()
                );
                let _ = tx.send(submission_id);
            }
            Err(e) => {
                finalize_submit_failed(store, submission_id, &e.to_string()).await;
            }
        },
        Err(e) => {
            finalize_submit_failed(store, submission_id, &e.to_string()).await;
        }
    }
}

async fn finalize_submit_failed(
    store: &Arc<dyn SubmissionStore>,
    submission_id: i64,
    reason: &str,
) {
    if let Err(e) = store.set_verdict(submission_id, verdict::SUBMIT_FAILED).await {
        error!("storing verdict for submission {submission_id} failed: {e}");
        return;
    }
    error!("submission {submission_id} is submitted failed, reason: {reason}");
}
