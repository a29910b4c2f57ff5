//! Drives the submitter/poller pair with a scripted site client and an
//! in-memory store: the verdict state machine end to end, without a judge
//! or a database.

mod support;

use std::sync::Arc;
use std::time::Duration;

use vjudge_api::error::JudgeError;
use vjudge_api::verdict;
use vjudged::dispatch::pool::PoolWorker;
use vjudged::dispatch::poller::{PollerError, StatusPoller};
use vjudged::dispatch::submitter::Submitter;
use vjudged::dispatch::shared_channel;
use vjudged::site::SiteClient;

use support::{accepted, conn_err, fast_timing, wait_until, MemStore, MockClient};

const WAIT: Duration = Duration::from_secs(5);

fn spawn_submitter(
    client: Arc<MockClient>,
    store: Arc<MemStore>,
) -> (Submitter, tokio::sync::mpsc::UnboundedSender<i64>) {
    let (tx, rx) = shared_channel();
    let client: Arc<dyn SiteClient> = client;
    let submitter = Submitter::spawn(client, store, rx, tx.clone(), fast_timing());
    (submitter, tx)
}

async fn stop_and_join(submitter: Submitter) {
    submitter.stop();
    assert!(
        wait_until(|| submitter.is_finished(), WAIT).await,
        "submitter failed to stop"
    );
}

#[tokio::test]
async fn happy_path_submission_reaches_terminal_verdict() {
    let client = Arc::new(MockClient::practice("hdu"));
    client.push_submit(Ok("9999".to_string()));
    client.push_status(Ok(Some(accepted(0, 1024))));
    let store = Arc::new(MemStore::with_submission(MemStore::queued_submission(
        42, "hdu", "1000",
    )));

    let (submitter, tx) = spawn_submitter(client.clone(), store.clone());
    tx.send(42).unwrap();

    assert!(
        wait_until(
            || store.verdict_of(42).as_deref() == Some(verdict::ACCEPTED),
            WAIT
        )
        .await
    );
    let row = store.row(42).unwrap();
    assert_eq!(row.run_id.as_deref(), Some("9999"));
    assert_eq!(row.user_id.as_deref(), Some("bot"));
    assert_eq!(row.exe_time, Some(0));
    assert_eq!(row.exe_mem, Some(1024));
    assert_eq!(client.submit_call_count(), 1);

    stop_and_join(submitter).await;
}

#[tokio::test]
async fn replayed_terminal_submission_is_dropped() {
    let client = Arc::new(MockClient::practice("hdu"));
    let mut row = MemStore::queued_submission(7, "hdu", "1000");
    row.verdict = verdict::ACCEPTED.to_string();
    let store = Arc::new(MemStore::with_submission(row));

    let (submitter, tx) = spawn_submitter(client.clone(), store.clone());
    tx.send(7).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.submit_call_count(), 0, "terminal rows must not resubmit");
    assert_eq!(store.verdict_of(7).as_deref(), Some(verdict::ACCEPTED));

    stop_and_join(submitter).await;
}

#[tokio::test]
async fn being_judged_submission_goes_straight_to_the_poller() {
    let client = Arc::new(MockClient::practice("hdu"));
    client.push_status(Ok(Some(accepted(15, 2048))));
    let mut row = MemStore::queued_submission(8, "hdu", "1000");
    row.verdict = verdict::BEING_JUDGED.to_string();
    row.run_id = Some("4444".to_string());
    let store = Arc::new(MemStore::with_submission(row));

    let (submitter, tx) = spawn_submitter(client.clone(), store.clone());
    tx.send(8).unwrap();

    assert!(
        wait_until(
            || store.verdict_of(8).as_deref() == Some(verdict::ACCEPTED),
            WAIT
        )
        .await
    );
    assert_eq!(client.submit_call_count(), 0);

    stop_and_join(submitter).await;
}

#[tokio::test]
async fn submit_rejection_finalizes_submit_failed() {
    let client = Arc::new(MockClient::practice("hdu"));
    client.push_submit(Err(JudgeError::submit("code too short")));
    let store = Arc::new(MemStore::with_submission(MemStore::queued_submission(
        9, "hdu", "1000",
    )));

    let (submitter, tx) = spawn_submitter(client.clone(), store.clone());
    tx.send(9).unwrap();

    assert!(
        wait_until(
            || store.verdict_of(9).as_deref() == Some(verdict::SUBMIT_FAILED),
            WAIT
        )
        .await
    );

    stop_and_join(submitter).await;
}

#[tokio::test]
async fn session_expiry_requeues_and_retries_without_failing() {
    let client = Arc::new(MockClient::practice("hdu"));
    client.push_submit(Err(JudgeError::LoginRequired));
    client.push_submit(Ok("9999".to_string()));
    client.push_cookie(Ok(()));
    client.push_status(Ok(Some(accepted(0, 1024))));
    let store = Arc::new(MemStore::with_submission(MemStore::queued_submission(
        42, "hdu", "1000",
    )));

    let (submitter, tx) = spawn_submitter(client.clone(), store.clone());
    tx.send(42).unwrap();

    assert!(
        wait_until(
            || store.verdict_of(42).as_deref() == Some(verdict::ACCEPTED),
            WAIT
        )
        .await
    );
    assert_eq!(client.submit_call_count(), 2);
    // The session bounce is invisible in the verdict history.
    let log = store.verdict_log.lock().unwrap().clone();
    assert!(!log
        .iter()
        .any(|(_, verdict)| verdict == vjudge_api::verdict::SUBMIT_FAILED));

    stop_and_join(submitter).await;
}

#[tokio::test]
async fn reauthentication_failure_finalizes_submit_failed() {
    let client = Arc::new(MockClient::practice("hdu"));
    client.push_submit(Err(JudgeError::LoginRequired));
    client.push_cookie(Err(conn_err()));
    let store = Arc::new(MemStore::with_submission(MemStore::queued_submission(
        10, "hdu", "1000",
    )));

    let (submitter, tx) = spawn_submitter(client.clone(), store.clone());
    tx.send(10).unwrap();

    assert!(
        wait_until(
            || store.verdict_of(10).as_deref() == Some(verdict::SUBMIT_FAILED),
            WAIT
        )
        .await
    );
    assert_eq!(client.submit_call_count(), 1);

    stop_and_join(submitter).await;
}

#[tokio::test]
async fn upstream_outage_during_poll_yields_judge_failed() {
    let client = Arc::new(MockClient::practice("hdu"));
    client.push_submit(Ok("9999".to_string()));
    client.push_status(Err(conn_err()));
    let store = Arc::new(MemStore::with_submission(MemStore::queued_submission(
        11, "hdu", "1000",
    )));

    let (submitter, tx) = spawn_submitter(client.clone(), store.clone());
    tx.send(11).unwrap();

    assert!(
        wait_until(
            || store.verdict_of(11).as_deref() == Some(verdict::JUDGE_FAILED),
            WAIT
        )
        .await
    );
    // The submit phase itself succeeded.
    assert_eq!(store.row(11).unwrap().run_id.as_deref(), Some("9999"));

    stop_and_join(submitter).await;
}

#[tokio::test]
async fn poller_exhausts_attempts_then_fails_the_run() {
    // Scripted status queue stays empty: every poll reports "not visible".
    let client: Arc<dyn SiteClient> = Arc::new(MockClient::practice("hdu"));
    let mut row = MemStore::queued_submission(12, "hdu", "1000");
    row.verdict = verdict::BEING_JUDGED.to_string();
    row.run_id = Some("5555".to_string());
    let store = Arc::new(MemStore::with_submission(row));

    let poller = StatusPoller::new(client, store.clone(), &fast_timing());
    poller.start();
    poller.add_task(12).unwrap();

    assert!(
        wait_until(
            || store.verdict_of(12).as_deref() == Some(verdict::JUDGE_FAILED),
            WAIT
        )
        .await
    );
    poller.stop().await.unwrap();
}

#[tokio::test]
async fn poller_ignores_rows_it_does_not_own() {
    let client: Arc<dyn SiteClient> = Arc::new(MockClient::practice("hdu"));
    // Another site's row with a run id; polling it would be a bug.
    let mut row = MemStore::queued_submission(13, "scu", "1000");
    row.verdict = verdict::BEING_JUDGED.to_string();
    row.run_id = Some("6666".to_string());
    let store = Arc::new(MemStore::with_submission(row));

    let poller = StatusPoller::new(client, store.clone(), &fast_timing());
    poller.start();
    poller.add_task(13).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        store.verdict_of(13).as_deref(),
        Some(verdict::BEING_JUDGED),
        "foreign rows must be left untouched"
    );
    poller.stop().await.unwrap();
}

#[tokio::test]
async fn poller_lifecycle_contract() {
    let client: Arc<dyn SiteClient> = Arc::new(MockClient::practice("hdu"));
    let store = Arc::new(MemStore::default());

    let poller = StatusPoller::new(client, store, &fast_timing());
    assert_eq!(poller.add_task(1), Err(PollerError::NotStarted));

    poller.start();
    assert!(poller.add_task(1).is_ok());

    poller.stop().await.unwrap();
    assert_eq!(poller.add_task(2), Err(PollerError::Stopping));
    assert_eq!(poller.stop().await, Err(PollerError::AlreadyStopped));
}
