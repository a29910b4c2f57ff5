//! Shared test doubles: a scripted site client and in-memory stores behind
//! the dispatcher's storage seams.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vjudge_api::contest::ContestInfo;
use vjudge_api::error::JudgeError;
use vjudge_api::verdict;
use vjudged::dispatch::Timing;
use vjudged::site::{ClientType, ProblemRecord, SiteClient, StatusHints, SubmitStatus};
use vjudged::storage::{
    merge_preserving, ContestStore, ProblemRow, ProblemStore, SubmissionRow, SubmissionStore,
    UpsertOutcome, PROBLEM_UPDATE_COOLDOWN_SECS,
};

pub fn conn_err() -> JudgeError {
    JudgeError::connection("upstream down")
}

pub fn accepted(exe_time: i64, exe_mem: i64) -> SubmitStatus {
    SubmitStatus {
        verdict: verdict::ACCEPTED.to_string(),
        exe_time_ms: exe_time,
        exe_mem_kb: exe_mem,
    }
}

/// Timings small enough for worker loops to be observable in tests.
pub fn fast_timing() -> Timing {
    Timing {
        recv_timeout: Duration::from_millis(30),
        submit_gap: Duration::from_millis(1),
        backoff_unit: Duration::ZERO,
        reap_interval: Duration::from_secs(3600),
        pool_max_age: Duration::from_secs(3600),
    }
}

pub async fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[derive(Debug)]
pub struct MockClient {
    name: String,
    client_type: ClientType,
    pub submit_results: Mutex<VecDeque<Result<String, JudgeError>>>,
    pub status_results: Mutex<VecDeque<Result<Option<SubmitStatus>, JudgeError>>>,
    pub cookie_results: Mutex<VecDeque<Result<(), JudgeError>>>,
    /// Scripted overrides for `get_problem`; when empty, `problems` serves.
    pub problem_results: Mutex<VecDeque<Result<Option<ProblemRecord>, JudgeError>>>,
    pub problems: Mutex<HashMap<String, ProblemRecord>>,
    pub problem_list: Mutex<Vec<String>>,
    pub contest_info: Mutex<Option<ContestInfo>>,
    pub submit_calls: Mutex<u32>,
    pub status_calls: Mutex<u32>,
}

impl MockClient {
    pub fn practice(name: &str) -> Self {
        Self::new(name, ClientType::Practice)
    }

    pub fn contest(name: &str, info: ContestInfo) -> Self {
        let client = Self::new(name, ClientType::Contest);
        *client.contest_info.lock().unwrap() = Some(info);
        client
    }

    fn new(name: &str, client_type: ClientType) -> Self {
        Self {
            name: name.to_string(),
            client_type,
            submit_results: Mutex::new(VecDeque::new()),
            status_results: Mutex::new(VecDeque::new()),
            cookie_results: Mutex::new(VecDeque::new()),
            problem_results: Mutex::new(VecDeque::new()),
            problems: Mutex::new(HashMap::new()),
            problem_list: Mutex::new(Vec::new()),
            contest_info: Mutex::new(None),
            submit_calls: Mutex::new(0),
            status_calls: Mutex::new(0),
        }
    }

    pub fn push_submit(&self, result: Result<String, JudgeError>) {
        self.submit_results.lock().unwrap().push_back(result);
    }

    pub fn push_status(&self, result: Result<Option<SubmitStatus>, JudgeError>) {
        self.status_results.lock().unwrap().push_back(result);
    }

    pub fn push_cookie(&self, result: Result<(), JudgeError>) {
        self.cookie_results.lock().unwrap().push_back(result);
    }

    pub fn push_problem(&self, result: Result<Option<ProblemRecord>, JudgeError>) {
        self.problem_results.lock().unwrap().push_back(result);
    }

    pub fn submit_call_count(&self) -> u32 {
        *self.submit_calls.lock().unwrap()
    }
}

#[async_trait]
impl SiteClient for MockClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn user_id(&self) -> Result<String, JudgeError> {
        Ok("bot".to_string())
    }

    fn client_type(&self) -> ClientType {
        self.client_type
    }

    async fn login(&self, _username: &str, _password: &str) -> Result<(), JudgeError> {
        Ok(())
    }

    async fn update_cookies(&self) -> Result<(), JudgeError> {
        self.cookie_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn get_problem(&self, problem_id: &str) -> Result<Option<ProblemRecord>, JudgeError> {
        if let Some(scripted) = self.problem_results.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(self.problems.lock().unwrap().get(problem_id).cloned())
    }

    async fn get_problem_list(&self) -> Result<Vec<String>, JudgeError> {
        Ok(self.problem_list.lock().unwrap().clone())
    }

    async fn submit_problem(
        &self,
        _problem_id: &str,
        _language: &str,
        _source_code: &str,
    ) -> Result<String, JudgeError> {
        *self.submit_calls.lock().unwrap() += 1;
        self.submit_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(JudgeError::submit("no scripted submit result")))
    }

    async fn get_submit_status(
        &self,
        _run_id: &str,
        _hints: &StatusHints,
    ) -> Result<Option<SubmitStatus>, JudgeError> {
        *self.status_calls.lock().unwrap() += 1;
        self.status_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(None))
    }

    fn contest_id(&self) -> Option<&str> {
        None
    }

    async fn get_contest_info(&self) -> Result<ContestInfo, JudgeError> {
        self.contest_info
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| JudgeError::unsupported("no contest info scripted"))
    }

    async fn refresh_contest_info(&self) -> Result<(), JudgeError> {
        if self.contest_info.lock().unwrap().is_some() {
            Ok(())
        } else {
            Err(JudgeError::unsupported("no contest info scripted"))
        }
    }
}

#[derive(Default)]
pub struct MemStore {
    pub submissions: Mutex<HashMap<i64, SubmissionRow>>,
    pub problems: Mutex<HashMap<(String, String), ProblemRow>>,
    pub contests: Mutex<HashMap<String, ContestInfo>>,
    /// Every verdict ever written, in order, for history assertions.
    pub verdict_log: Mutex<Vec<(i64, String)>>,
}

impl MemStore {
    pub fn with_submission(row: SubmissionRow) -> Self {
        let store = Self::default();
        store.submissions.lock().unwrap().insert(row.id, row);
        store
    }

    pub fn queued_submission(id: i64, oj_name: &str, problem_id: &str) -> SubmissionRow {
        SubmissionRow {
            id,
            user_id: None,
            oj_name: oj_name.to_string(),
            problem_id: problem_id.to_string(),
            language: "C++".to_string(),
            source_code: "int main() { return 0; }".to_string(),
            run_id: None,
            verdict: verdict::QUEUING.to_string(),
            exe_time: None,
            exe_mem: None,
        }
    }

    pub fn verdict_of(&self, id: i64) -> Option<String> {
        self.submissions
            .lock()
            .unwrap()
            .get(&id)
            .map(|row| row.verdict.clone())
    }

    pub fn row(&self, id: i64) -> Option<SubmissionRow> {
        self.submissions.lock().unwrap().get(&id).cloned()
    }

    pub fn seed_problem(&self, row: ProblemRow) {
        self.problems
            .lock()
            .unwrap()
            .insert((row.oj_name.clone(), row.problem_id.clone()), row);
    }

    pub fn problem(&self, oj_name: &str, problem_id: &str) -> Option<ProblemRow> {
        self.problems
            .lock()
            .unwrap()
            .get(&(oj_name.to_string(), problem_id.to_string()))
            .cloned()
    }

    fn log_verdict(&self, id: i64, verdict: &str) {
        self.verdict_log
            .lock()
            .unwrap()
            .push((id, verdict.to_string()));
    }
}

#[async_trait]
impl SubmissionStore for MemStore {
    async fn find_submission(&self, id: i64) -> anyhow::Result<Option<SubmissionRow>> {
        Ok(self.submissions.lock().unwrap().get(&id).cloned())
    }

    async fn mark_submitted(&self, id: i64, run_id: &str, bot_user: &str) -> anyhow::Result<()> {
        if let Some(row) = self.submissions.lock().unwrap().get_mut(&id) {
            row.run_id = Some(run_id.to_string());
            row.user_id = Some(bot_user.to_string());
            row.verdict = verdict::BEING_JUDGED.to_string();
        }
        self.log_verdict(id, verdict::BEING_JUDGED);
        Ok(())
    }

    async fn set_verdict(&self, id: i64, verdict: &str) -> anyhow::Result<()> {
        if let Some(row) = self.submissions.lock().unwrap().get_mut(&id) {
            row.verdict = verdict.to_string();
        }
        self.log_verdict(id, verdict);
        Ok(())
    }

    async fn record_result(
        &self,
        id: i64,
        verdict: &str,
        exe_time: Option<i64>,
        exe_mem: Option<i64>,
    ) -> anyhow::Result<()> {
        if let Some(row) = self.submissions.lock().unwrap().get_mut(&id) {
            row.verdict = verdict.to_string();
            row.exe_time = exe_time;
            row.exe_mem = exe_mem;
        }
        self.log_verdict(id, verdict);
        Ok(())
    }

    async fn unfinished_ids(&self) -> anyhow::Result<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .submissions
            .lock()
            .unwrap()
            .values()
            .filter(|row| {
                row.verdict == verdict::QUEUING || row.verdict == verdict::BEING_JUDGED
            })
            .map(|row| row.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl ProblemStore for MemStore {
    async fn upsert_problem(
        &self,
        oj_name: &str,
        problem_id: &str,
        record: &ProblemRecord,
        now: DateTime<Utc>,
    ) -> anyhow::Result<UpsertOutcome> {
        let key = (oj_name.to_string(), problem_id.to_string());
        let mut problems = self.problems.lock().unwrap();
        if let Some(prev) = problems.get(&key) {
            if (now - prev.last_update).num_seconds() < PROBLEM_UPDATE_COOLDOWN_SECS {
                return Ok(UpsertOutcome::Skipped);
            }
        }
        let merged = merge_preserving(problems.get(&key), oj_name, problem_id, record, now);
        problems.insert(key, merged);
        Ok(UpsertOutcome::Stored)
    }
}

#[async_trait]
impl ContestStore for MemStore {
    async fn upsert_contest(&self, oj_name: &str, info: &ContestInfo) -> anyhow::Result<()> {
        self.contests
            .lock()
            .unwrap()
            .insert(oj_name.to_string(), info.clone());
        Ok(())
    }
}
