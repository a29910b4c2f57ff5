//! Storage operations behind small trait seams. The dispatcher's workers
//! only ever see the traits; `PgStore` is the PostgreSQL implementation.
//! Every write is a single independent statement; verdict transitions never
//! span a transaction.

mod contests;
mod problems;
mod submissions;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vjudge_api::contest::ContestInfo;
use vjudge_db::PgPool;

use crate::site::ProblemRecord;

pub use problems::{merge_preserving, ProblemRow, PROBLEM_UPDATE_COOLDOWN_SECS};

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRow {
    pub id: i64,
    pub user_id: Option<String>,
    pub oj_name: String,
    pub problem_id: String,
    pub language: String,
    pub source_code: String,
    pub run_id: Option<String>,
    pub verdict: String,
    pub exe_time: Option<i64>,
    pub exe_mem: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Stored,
    /// The stored row was updated too recently; nothing was written.
    Skipped,
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn find_submission(&self, id: i64) -> anyhow::Result<Option<SubmissionRow>>;

    /// Phase 0 → 1: record the upstream run id and owning bot account and
    /// move the verdict to `Being Judged`.
    async fn mark_submitted(&self, id: i64, run_id: &str, bot_user: &str) -> anyhow::Result<()>;

    /// Verdict-only write (`Submit Failed`, `Judge Failed`).
    async fn set_verdict(&self, id: i64, verdict: &str) -> anyhow::Result<()>;

    /// Phase 1 → terminal: verdict plus execution time and memory.
    async fn record_result(
        &self,
        id: i64,
        verdict: &str,
        exe_time: Option<i64>,
        exe_mem: Option<i64>,
    ) -> anyhow::Result<()>;

    /// Ids of submissions still in `Queuing` or `Being Judged`, oldest first.
    async fn unfinished_ids(&self) -> anyhow::Result<Vec<i64>>;
}

#[async_trait]
pub trait ProblemStore: Send + Sync {
    /// Upsert one problem, preserving stored non-empty fields where the
    /// crawl returned an empty value. Rows refreshed within the cooldown
    /// window are left untouched.
    async fn upsert_problem(
        &self,
        oj_name: &str,
        problem_id: &str,
        record: &ProblemRecord,
        now: DateTime<Utc>,
    ) -> anyhow::Result<UpsertOutcome>;
}

#[async_trait]
pub trait ContestStore: Send + Sync {
    async fn upsert_contest(&self, oj_name: &str, info: &ContestInfo) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
