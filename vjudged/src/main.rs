use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vjudged::accounts::AccountRegistry;
use vjudged::config::DispatcherConfig;
use vjudged::dispatch::crawl_supervisor::CrawlSupervisor;
use vjudged::dispatch::submit_supervisor::SubmitSupervisor;
use vjudged::dispatch::Timing;
use vjudged::kv::KvStore;
use vjudged::storage::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let config = DispatcherConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).context("invalid VJUDGE_LOG filter")?,
        )
        .init();

    let accounts = Arc::new(
        AccountRegistry::load(&config.accounts_file).context("loading accounts table")?,
    );
    if accounts.is_empty() {
        warn!("no account is available, submitter and crawler will not work");
    }

    let db = vjudge_db::Db::new(vjudge_db::DbConfig::from_env());
    db.init().await.context("initializing database")?;
    let store = Arc::new(PgStore::new(db.pool().await?.clone()));

    // One key/value connection per blocking consumer: BRPOP parks the
    // connection, so the supervisors cannot share one. A third serves the
    // crawlers' refresh marks.
    let submit_kv = KvStore::connect(&config.redis_url).await?;
    let crawl_kv = KvStore::connect(&config.redis_url).await?;
    let mark_kv = KvStore::connect(&config.redis_url).await?;

    let timing = Timing::default();
    let shutdown = Arc::new(AtomicBool::new(false));

    let submit_supervisor = SubmitSupervisor::new(
        submit_kv,
        store.clone(),
        accounts.clone(),
        timing.clone(),
        shutdown.clone(),
    );
    let crawl_supervisor = CrawlSupervisor::new(
        crawl_kv,
        mark_kv,
        store.clone(),
        store,
        accounts,
        timing,
        shutdown.clone(),
    );

    info!("dispatcher started");
    let submit_handle = tokio::spawn(submit_supervisor.run());
    let crawl_handle = tokio::spawn(crawl_supervisor.run());

    tokio::signal::ctrl_c()
        .await
        .context("listening for interrupt")?;
    info!("interrupt received, stopping dispatcher");
    shutdown.store(true, Ordering::SeqCst);

    let _ = submit_handle.await;
    let _ = crawl_handle.await;
    info!("dispatcher stopped");
    Ok(())
}
