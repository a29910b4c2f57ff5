//! Contest metadata as reported by contest-capable site adapters.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContestStatus {
    Pending,
    Running,
    Ended,
}

impl ContestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContestStatus::Pending => "Pending",
            ContestStatus::Running => "Running",
            ContestStatus::Ended => "Ended",
        }
    }

    /// Lenient parse of upstream status text; unknown labels map to Pending.
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "Running" => ContestStatus::Running,
            "Ended" => ContestStatus::Ended,
            _ => ContestStatus::Pending,
        }
    }
}

/// One entry of a contest's serialized problem list:
/// `(display_label, site, problem_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemRef {
    pub label: String,
    pub site: String,
    pub problem_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestInfo {
    pub site: String,
    pub contest_id: String,
    pub title: String,
    pub public: bool,
    pub status: ContestStatus,
    /// Unix seconds, UTC.
    pub start_time: i64,
    pub end_time: i64,
    /// Upstream problem ids, in display order.
    pub problem_list: Vec<String>,
}

impl ContestInfo {
    pub fn new(site: impl Into<String>, contest_id: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            contest_id: contest_id.into(),
            title: String::new(),
            public: true,
            status: ContestStatus::Pending,
            start_time: 0,
            end_time: 0,
            problem_list: Vec::new(),
        }
    }

    /// The window invariant writers must uphold: start ≤ end.
    pub fn has_valid_window(&self) -> bool {
        self.start_time <= self.end_time
    }

    /// Problem refs for storage, labeled by upstream id and scoped to the
    /// given clone name.
    pub fn problem_refs(&self, oj_name: &str) -> Vec<ProblemRef> {
        self.problem_list
            .iter()
            .map(|pid| ProblemRef {
                label: pid.clone(),
                site: oj_name.to_string(),
                problem_id: pid.clone(),
            })
            .collect()
    }
}
