//! Page crawler worker: refreshes problem and contest metadata through its
//! site client and persists normalized records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use vjudge_api::error::JudgeError;

use crate::refresh::RefreshRegistry;
use crate::site::{ClientType, SiteClient};
use crate::storage::{ContestStore, ProblemStore, UpsertOutcome};

use super::pool::PoolWorker;
use super::{SharedReceiver, Timing};

/// In-process crawl job, already validated by the supervisor. A problem job
/// without an id means "crawl everything the site lists".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlJob {
    Problem { problem_id: Option<String> },
    Contest,
}

pub struct PageCrawler {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PageCrawler {
    /// `refresh` records contest refresh marks; crawlers without a
    /// key/value connection simply skip the mark.
    pub fn spawn(
        client: Arc<dyn SiteClient>,
        problems: Arc<dyn ProblemStore>,
        contests: Arc<dyn ContestStore>,
        refresh: Option<RefreshRegistry>,
        rx: SharedReceiver<CrawlJob>,
        tx: UnboundedSender<CrawlJob>,
        timing: Timing,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run(
            client,
            problems,
            contests,
            refresh,
            rx,
            tx,
            stop.clone(),
            timing,
        ));
        Self { stop, handle }
    }
}

impl PoolWorker for PageCrawler {
    fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    client: Arc<dyn SiteClient>,
    problems: Arc<dyn ProblemStore>,
    contests: Arc<dyn ContestStore>,
    mut refresh: Option<RefreshRegistry>,
    rx: SharedReceiver<CrawlJob>,
    tx: UnboundedSender<CrawlJob>,
    stop: Arc<AtomicBool>,
    timing: Timing,
) {
    let name = client.name().to_string();
    info!("started page crawler, name: {name}");
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
            Ok(Some(job)) => {
                process_job(&client, &problems, &contests, &mut refresh, &tx, job).await;
            }
        }
    }
    info!("stopped page crawler, name: {name}");
}

async fn process_job(
    client: &Arc<dyn SiteClient>,
    problems: &Arc<dyn ProblemStore>,
    contests: &Arc<dyn ContestStore>,
    refresh: &mut Option<RefreshRegistry>,
    tx: &UnboundedSender<CrawlJob>,
    job: CrawlJob,
) {
    if job == CrawlJob::Contest && client.client_type() != ClientType::Contest {
        error!("unsupported crawl type: contest, name: {}", client.name());
        return;
    }
    let result = match &job {
        CrawlJob::Problem {
            problem_id: Some(problem_id),
        } => crawl_problem(client, problems, problem_id).await,
        CrawlJob::Problem { problem_id: None } => crawl_problem_all(client, problems).await,
        CrawlJob::Contest => crawl_contest(client, problems, contests, refresh).await,
    };
    match result {
        Ok(()) => {}
        // Requeue so the task survives the session bounce.
        Err(JudgeError::LoginRequired) => match client.update_cookies().await {
            Ok(()) => {
                debug!(
                    "page crawler login expired, login again, name: {}",
                    client.name()
                );
                let _ = tx.send(job);
            }
            Err(e) => error!(
                "crawled page failed, name: {}, reason: {e}",
                client.name()
            ),
        },
        // Dropped; the periodic scheduler retries on its next tick.
        Err(e) => error!("crawled page failed, name: {}, reason: {e}", client.name()),
    }
}

async fn crawl_problem(
    client: &Arc<dyn SiteClient>,
    problems: &Arc<dyn ProblemStore>,
    problem_id: &str,
) -> Result<(), JudgeError> {
    let Some(record) = client.get_problem(problem_id).await? else {
        // Not an error, and never clears an existing row.
        error!(
            "no such problem, name: {}, problem_id: {problem_id}",
            client.name()
        );
        return Ok(());
    };
    match problems
        .upsert_problem(client.name(), problem_id, &record, Utc::now())
        .await
    {
        Ok(UpsertOutcome::Stored) => info!(
            "crawled problem successfully, name: {}, problem_id: {problem_id}",
            client.name()
        ),
        Ok(UpsertOutcome::Skipped) => debug!(
            "problem is fresh, skipping update, name: {}, problem_id: {problem_id}",
            client.name()
        ),
        Err(e) => error!(
            "storing problem failed, name: {}, problem_id: {problem_id}, reason: {e}",
            client.name()
        ),
    }
    Ok(())
}

async fn crawl_problem_all(
    client: &Arc<dyn SiteClient>,
    problems: &Arc<dyn ProblemStore>,
) -> Result<(), JudgeError> {
    for problem_id in client.get_problem_list().await? {
        crawl_problem(client, problems, &problem_id).await?;
    }
    Ok(())
}

async fn crawl_contest(
    client: &Arc<dyn SiteClient>,
    problems: &Arc<dyn ProblemStore>,
    contests: &Arc<dyn ContestStore>,
    refresh: &mut Option<RefreshRegistry>,
) -> Result<(), JudgeError> {
    client.refresh_contest_info().await?;
    let info = client.get_contest_info().await?;
    match contests.upsert_contest(client.name(), &info).await {
        Ok(()) => {
            info!(
                "crawled contest successfully, name: {}, contest_id: {}",
                client.name(),
                info.contest_id
            );
            if let (Some(refresh), Ok(contest_id)) =
                (refresh.as_mut(), info.contest_id.parse::<i64>())
            {
                if let Err(e) = refresh.mark_contest_refreshed(contest_id).await {
                    warn!("recording contest refresh mark failed: {e}");
                }
            }
        }
        Err(e) => error!(
            "storing contest failed, name: {}, reason: {e}",
            client.name()
        ),
    }
    crawl_problem_all(client, problems).await
}
