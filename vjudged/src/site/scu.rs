//! SCU (SOJ) adapter. Practice only; the site reports login failures with
//! distinct markers, so this is the one adapter that can tell a missing
//! user from a bad password.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use vjudge_api::error::{JudgeError, LoginError};

use super::html;
use super::{ClientType, ProblemRecord, SiteClient, StatusHints, SubmitStatus};

const BASE_URL: &str = "http://acm.scu.edu.cn/soj";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct SojClient {
    http: reqwest::Client,
    session: RwLock<Option<(String, String)>>,
}

impl SojClient {
    pub fn new() -> Result<Self, JudgeError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) vjudged/0.1")
            .build()
            .map_err(|e| JudgeError::connection(e.to_string()))?;
        Ok(Self {
            http,
            session: RwLock::new(None),
        })
    }

    async fn get_text(&self, url: &str) -> Result<String, JudgeError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| JudgeError::connection(format!("request \"{url}\" failed: {e}")))?;
        resp.text()
            .await
            .map_err(|e| JudgeError::connection(format!("request \"{url}\" failed: {e}")))
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<String, JudgeError> {
        let resp = self
            .http
            .post(url)
            .form(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| JudgeError::connection(format!("request \"{url}\" failed: {e}")))?;
        resp.text()
            .await
            .map_err(|e| JudgeError::connection(format!("request \"{url}\" failed: {e}")))
    }

    fn stored_auth(&self) -> Option<(String, String)> {
        self.session.read().unwrap().clone()
    }

    async fn check_login(&self) -> Result<bool, JudgeError> {
        let text = self
            .get_text(&format!("{BASE_URL}/update_user_form.action"))
            .await?;
        Ok(!text.contains("Please login first"))
    }
}

#[async_trait]
impl SiteClient for SojClient {
    fn name(&self) -> &str {
        "scu"
    }

    fn user_id(&self) -> Result<String, JudgeError> {
        self.stored_auth()
            .map(|(user, _)| user)
            .ok_or(JudgeError::LoginRequired)
    }

    fn client_type(&self) -> ClientType {
        ClientType::Practice
    }

    async fn login(&self, username: &str, password: &str) -> Result<(), JudgeError> {
        let url = format!("{BASE_URL}/login.action");
        let form = [
            ("back", "2"),
            ("id", username),
            ("password", password),
            ("submit", "login"),
        ];
        let text = self.post_form(&url, &form, LOGIN_TIMEOUT).await?;
        if text.contains("USER_NOT_EXIST") {
            return Err(LoginError::UserNotExist.into());
        }
        if text.contains("PASSWORD_ERROR") {
            return Err(LoginError::PasswordError.into());
        }
        *self.session.write().unwrap() = Some((username.to_string(), password.to_string()));
        Ok(())
    }

    async fn update_cookies(&self) -> Result<(), JudgeError> {
        let (username, password) = self.stored_auth().ok_or(JudgeError::LoginRequired)?;
        match self.login(&username, &password).await {
            Ok(()) => Ok(()),
            Err(JudgeError::Login(_)) => Err(JudgeError::connection("re-login was refused")),
            Err(e) => Err(e),
        }
    }

    async fn get_problem(&self, problem_id: &str) -> Result<Option<ProblemRecord>, JudgeError> {
        let url = format!("{BASE_URL}/problem.action?id={problem_id}");
        let text = self.get_text(&url).await?;
        if text.contains("No such problem") {
            return Ok(None);
        }
        Ok(parse_problem_title(&text, problem_id).map(|title| ProblemRecord {
            title,
            ..ProblemRecord::default()
        }))
    }

    async fn get_problem_list(&self) -> Result<Vec<String>, JudgeError> {
        let url = format!("{BASE_URL}/problems.action");
        let text = self.get_text(&url).await?;
        let mut volumes: Vec<u32> = VOLUME_RE
            .captures_iter(&text)
            .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
            .collect();
        volumes.sort_unstable();
        volumes.dedup();

        let mut ids = Vec::new();
        for volume in volumes {
            let page = self.get_text(&format!("{url}?volume={volume}")).await?;
            ids.extend(parse_problem_ids(&page));
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn submit_problem(
        &self,
        problem_id: &str,
        language: &str,
        source_code: &str,
    ) -> Result<String, JudgeError> {
        let user = self.user_id()?;
        let url = format!("{BASE_URL}/submit.action");
        let form = [
            ("problemId", problem_id),
            ("language", language),
            ("source", source_code),
            ("submit", "Submit"),
        ];
        let text = self.post_form(&url, &form, REQUEST_TIMEOUT).await?;
        if text.contains("ERROR") {
            if !self.check_login().await? {
                return Err(JudgeError::LoginRequired);
            }
            return Err(JudgeError::submit("submit failed unexpectedly"));
        }

        let listing = self
            .get_text(&format!(
                "{BASE_URL}/solutions.action?userId={user}&problemId={problem_id}"
            ))
            .await?;
        newest_run_id(&listing).ok_or_else(|| JudgeError::submit("submit failed unexpectedly"))
    }

    async fn get_submit_status(
        &self,
        run_id: &str,
        _hints: &StatusHints,
    ) -> Result<Option<SubmitStatus>, JudgeError> {
        let text = self
            .get_text(&format!("{BASE_URL}/solutions.action?from={run_id}"))
            .await?;
        Ok(parse_status_row(&text))
    }
}

static VOLUME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"problems\.action\?volume=([0-9]+)").expect("volume regex"));

fn parse_problem_title(page: &str, problem_id: &str) -> Option<String> {
    let pattern = format!("<title>{}: (.*?)</title>", regex::escape(problem_id));
    let re = Regex::new(&pattern).ok()?;
    re.captures(page)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn parse_problem_ids(page: &str) -> Vec<String> {
    let Some((_, body)) = html::tables(page).into_iter().next() else {
        return Vec::new();
    };
    let mut ids = Vec::new();
    for row in html::rows(body) {
        let cells = html::cells(row);
        if cells.len() >= 2 && !cells[1].is_empty() && cells[1].chars().all(|c| c.is_ascii_digit())
        {
            ids.push(cells[1].clone());
        }
    }
    ids
}

/// The run id of the newest row on the caller's solutions listing.
fn newest_run_id(page: &str) -> Option<String> {
    let (_, body) = html::tables(page).into_iter().nth(1)?;
    let rows = html::rows(body);
    let row = rows.get(1)?;
    html::cells(row).first().cloned().filter(|id| !id.is_empty())
}

/// Solution listings filtered by `from=<run_id>` put the run in the first
/// data row: columns 5..8 hold verdict, time (ms) and memory (kB).
fn parse_status_row(page: &str) -> Option<SubmitStatus> {
    let (_, body) = html::tables(page).into_iter().nth(1)?;
    let rows = html::rows(body);
    let cells = html::cells(rows.get(1)?);
    if cells.len() < 8 {
        return None;
    }
    let verdict = cells[5].clone();
    if verdict.is_empty() {
        return None;
    }
    let exe_time = cells[6].parse::<i64>().ok()?;
    let exe_mem = cells[7].parse::<i64>().ok()?;
    Some(SubmitStatus {
        verdict,
        exe_time_ms: exe_time,
        exe_mem_kb: exe_mem,
    })
}
