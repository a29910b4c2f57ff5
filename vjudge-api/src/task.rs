//! Work-queue names, refresh-mark keys and the crawl task payload.
//!
//! The submit queue carries ASCII decimal submission ids; the crawl queue
//! carries UTF-8 JSON objects in the shape of [`CrawlTask`]. Both live in the
//! key/value store as plain lists.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SUBMIT_QUEUE: &str = "vjudge-submitter-tasks";
pub const CRAWL_QUEUE: &str = "vjudge-crawler-tasks";

/// Refresh mark for `refresh-recent` sweeps. No expiry.
pub const RECENT_REFRESH_MARK: &str = "vjudge-last-refresh-recent-contest";

/// Per-contest refresh marks expire after an hour.
pub const CONTEST_REFRESH_MARK_TTL_SECS: u64 = 3600;

pub fn contest_refresh_mark(contest_id: i64) -> String {
    format!("vjudge-last-refresh-contest-{contest_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlKind {
    Problem,
    Contest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTask {
    pub oj_name: String,
    #[serde(rename = "type")]
    pub kind: CrawlKind,
    #[serde(default)]
    pub all: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidTask {
    #[error("missing crawl_params: problem_id")]
    MissingProblemId,
    #[error("oj_name must not be empty")]
    EmptyOjName,
}

impl CrawlTask {
    pub fn problem(oj_name: impl Into<String>, problem_id: impl Into<String>) -> Self {
        Self {
            oj_name: oj_name.into(),
            kind: CrawlKind::Problem,
            all: false,
            problem_id: Some(problem_id.into()),
        }
    }

    pub fn problem_all(oj_name: impl Into<String>) -> Self {
        Self {
            oj_name: oj_name.into(),
            kind: CrawlKind::Problem,
            all: true,
            problem_id: None,
        }
    }

    pub fn contest(oj_name: impl Into<String>) -> Self {
        Self {
            oj_name: oj_name.into(),
            kind: CrawlKind::Contest,
            all: false,
            problem_id: None,
        }
    }

    /// Mandatory-field check performed by the crawler supervisor before a
    /// task is routed to a pool.
    pub fn validate(&self) -> Result<(), InvalidTask> {
        if self.oj_name.is_empty() {
            return Err(InvalidTask::EmptyOjName);
        }
        if self.kind == CrawlKind::Problem && !self.all && self.problem_id.is_none() {
            return Err(InvalidTask::MissingProblemId);
        }
        Ok(())
    }
}
