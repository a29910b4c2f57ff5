//! HDU adapter. One struct serves both the practice judge and cloned
//! contests; the differences (login/submit/status URLs, source encoding,
//! pagination of contest status pages) hang off the `ClientType` tag.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

use vjudge_api::contest::{ContestInfo, ContestStatus};
use vjudge_api::error::{JudgeError, LoginError};
use vjudge_api::oj;

use super::html;
use super::{ClientType, ProblemRecord, SiteClient, StatusHints, SubmitStatus};

const BASE_URL: &str = "http://acm.hdu.edu.cn";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Logins and contest pages are slower than status pages.
const SLOW_TIMEOUT: Duration = Duration::from_secs(10);

const LANG_IDS: &[(&str, &str)] = &[
    ("G++", "0"),
    ("GCC", "1"),
    ("C++", "2"),
    ("C", "3"),
    ("Pascal", "4"),
    ("Java", "5"),
    ("C#", "6"),
];

/// Mirrors the characters `urllib.parse.quote` leaves alone.
const QUOTE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

#[derive(Debug)]
pub struct HduClient {
    http: reqwest::Client,
    name: String,
    client_type: ClientType,
    contest_id: String,
    session: RwLock<Option<(String, String)>>,
    contest_info: RwLock<ContestInfo>,
}

impl HduClient {
    pub fn practice() -> Result<Self, JudgeError> {
        Self::new(ClientType::Practice, "0")
    }

    pub fn contest(contest_id: &str) -> Result<Self, JudgeError> {
        Self::new(ClientType::Contest, contest_id)
    }

    fn new(client_type: ClientType, contest_id: &str) -> Result<Self, JudgeError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) vjudged/0.1")
            .build()
            .map_err(|e| JudgeError::connection(e.to_string()))?;
        let name = match client_type {
            ClientType::Practice => "hdu".to_string(),
            ClientType::Contest => oj::clone_name("hdu", contest_id),
        };
        Ok(Self {
            http,
            name,
            client_type,
            contest_id: contest_id.to_string(),
            session: RwLock::new(None),
            contest_info: RwLock::new(ContestInfo::new("hdu", contest_id)),
        })
    }

    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, JudgeError> {
        let resp = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| JudgeError::connection(format!("request \"{url}\" failed: {e}")))?;
        let text = resp
            .text()
            .await
            .map_err(|e| JudgeError::connection(format!("request \"{url}\" failed: {e}")))?;
        if text.contains("Sign In Your Account") {
            return Err(JudgeError::LoginRequired);
        }
        Ok(text)
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
        let text = resp
            .text()
            .await
            .map_err(|e| JudgeError::connection(format!("request \"{url}\" failed: {e}")))?;
        if text.contains("Sign In Your Account") {
            return Err(JudgeError::LoginRequired);
        }
        Ok(text)
    }

    fn login_url(&self) -> String {
        match self.client_type {
            ClientType::Practice => format!("{BASE_URL}/userloginex.php?action=login"),
            ClientType::Contest => format!(
                "{BASE_URL}/userloginex.php?action=login&cid={}&notice=0",
                self.contest_id
            ),
        }
    }

    fn submit_url(&self) -> String {
        match self.client_type {
            ClientType::Practice => format!("{BASE_URL}/submit.php?action=submit"),
            ClientType::Contest => format!(
                "{BASE_URL}/contests/contest_submit.php?action=submit&cid={}",
                self.contest_id
            ),
        }
    }

    fn status_url(&self, run_id: &str, problem_id: &str, user_id: &str) -> String {
        match self.client_type {
            ClientType::Practice => format!(
                "{BASE_URL}/status.php?first={run_id}&pid={problem_id}&user={user_id}&lang=0&status=0"
            ),
            ClientType::Contest => format!(
                "{BASE_URL}/contests/contest_status.php?cid={}&pid={problem_id}&user={user_id}&lang=0&status=0",
                self.contest_id
            ),
        }
    }

    fn problem_url(&self, problem_id: &str) -> String {
        match self.client_type {
            ClientType::Practice => format!("{BASE_URL}/showproblem.php?pid={problem_id}"),
            ClientType::Contest => format!(
                "{BASE_URL}/contests/contest_showproblem.php?pid={problem_id}&cid={}",
                self.contest_id
            ),
        }
    }

    fn stored_auth(&self) -> Option<(String, String)> {
        self.session.read().unwrap().clone()
    }

    fn require_public_or_auth(&self) -> Result<(), JudgeError> {
        if self.client_type == ClientType::Contest
            && !self.contest_info.read().unwrap().public
            && self.stored_auth().is_none()
        {
            return Err(JudgeError::LoginRequired);
        }
        Ok(())
    }
}

#[async_trait]
impl SiteClient for HduClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn user_id(&self) -> Result<String, JudgeError> {
        self.stored_auth()
            .map(|(user, _)| user)
            .ok_or(JudgeError::LoginRequired)
    }

    fn client_type(&self) -> ClientType {
        self.client_type
    }

    async fn login(&self, username: &str, password: &str) -> Result<(), JudgeError> {
        let url = self.login_url();
        let form = [
            ("login", "Sign in"),
            ("username", username),
            ("userpass", password),
        ];
        let resp = self
            .http
            .post(&url)
            .form(&form)
            .timeout(SLOW_TIMEOUT)
            .send()
            .await
            .map_err(|e| JudgeError::connection(format!("request \"{url}\" failed: {e}")))?;
        let text = resp
            .text()
            .await
            .map_err(|e| JudgeError::connection(format!("request \"{url}\" failed: {e}")))?;
        if text.contains("Sign In Your Account") {
            return Err(LoginError::Rejected.into());
        }
        *self.session.write().unwrap() = Some((username.to_string(), password.to_string()));
        Ok(())
    }

    async fn update_cookies(&self) -> Result<(), JudgeError> {
        let (username, password) = self.stored_auth().ok_or(JudgeError::LoginRequired)?;
        match self.login(&username, &password).await {
            Ok(()) => Ok(()),
            // A refused re-login with known-good credentials means the site
            // is flapping, not that the account died.
            Err(JudgeError::Login(_)) => Err(JudgeError::connection("re-login was refused")),
            Err(e) => Err(e),
        }
    }

    async fn get_problem(&self, problem_id: &str) -> Result<Option<ProblemRecord>, JudgeError> {
        self.require_public_or_auth()?;
        let timeout = match self.client_type {
            ClientType::Practice => REQUEST_TIMEOUT,
            ClientType::Contest => SLOW_TIMEOUT,
        };
        let text = self.get_text(&self.problem_url(problem_id), timeout).await?;
        Ok(parse_problem(&text))
    }

    async fn get_problem_list(&self) -> Result<Vec<String>, JudgeError> {
        if self.client_type == ClientType::Contest {
            return Ok(self.contest_info.read().unwrap().problem_list.clone());
        }
        let url = format!("{BASE_URL}/listproblem.php");
        let text = self.get_text(&url, REQUEST_TIMEOUT).await?;
        let mut volumes: Vec<u32> = VOLUME_RE
            .captures_iter(&text)
            .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
            .collect();
        volumes.sort_unstable();
        volumes.dedup();

        let mut ids = Vec::new();
        for volume in volumes {
            let page = match self.get_text(&format!("{url}?vol={volume}"), REQUEST_TIMEOUT).await {
                Ok(page) => page,
                // Keep what we have; the next scheduled crawl fills the rest.
                Err(JudgeError::Connection(_)) => break,
                Err(e) => return Err(e),
            };
            ids.extend(parse_practice_problem_ids(&page));
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
        let lang_id = LANG_IDS
            .iter()
            .find(|(name, _)| *name == language)
            .map(|(_, id)| *id)
            .ok_or_else(|| JudgeError::submit(format!("language \"{language}\" is not supported")))?;

        if self.client_type == ClientType::Contest {
            self.refresh_contest_info().await?;
            match self.contest_info.read().unwrap().status {
                ContestStatus::Pending => return Err(JudgeError::submit("contest has not begun")),
                ContestStatus::Ended => return Err(JudgeError::submit("contest is ended")),
                ContestStatus::Running => {}
            }
        }

        let code = match self.client_type {
            ClientType::Practice => source_code.to_string(),
            ClientType::Contest => encode_contest_source(source_code),
        };
        let mut form = vec![
            ("problemid", problem_id),
            ("language", lang_id),
            ("usercode", code.as_str()),
        ];
        match self.client_type {
            ClientType::Practice => form.push(("check", "0")),
            ClientType::Contest => form.push(("submit", "Submit")),
        }

        let text = self
            .post_form(&self.submit_url(), &form, REQUEST_TIMEOUT)
            .await?;
        if text.contains("Code length is improper") {
            return Err(JudgeError::submit("code length is too short"));
        }
        if text.contains("Please don't re-submit in 5 seconds, thank you.") {
            return Err(JudgeError::submit("submit too frequently"));
        }
        if !text.contains("Realtime Status") {
            return Err(JudgeError::submit("submit failed unexpectedly"));
        }

        // The run id is the newest row of our own status listing.
        let listing = self
            .get_text(&self.status_url("", problem_id, &user), REQUEST_TIMEOUT)
            .await?;
        first_run_id(&listing).ok_or_else(|| JudgeError::submit("submit failed unexpectedly"))
    }

    async fn get_submit_status(
        &self,
        run_id: &str,
        hints: &StatusHints,
    ) -> Result<Option<SubmitStatus>, JudgeError> {
        self.require_public_or_auth()?;
        let user = hints.user_id.as_deref().unwrap_or("");
        let problem = hints.problem_id.as_deref().unwrap_or("");
        let url = self.status_url(run_id, problem, user);
        let text = self.get_text(&url, REQUEST_TIMEOUT).await?;
        if let Some(status) = find_verdict(&text, run_id) {
            return Ok(Some(status));
        }
        // Contest status listings cannot be narrowed by run id; walk a few
        // more pages before giving up.
        if self.client_type == ClientType::Contest {
            for page in 2..5 {
                let text = self.get_text(&format!("{url}&page={page}"), REQUEST_TIMEOUT).await?;
                if let Some(status) = find_verdict(&text, run_id) {
                    return Ok(Some(status));
                }
            }
        }
        Ok(None)
    }

    fn contest_id(&self) -> Option<&str> {
        match self.client_type {
            ClientType::Contest => Some(&self.contest_id),
            ClientType::Practice => None,
        }
    }

    async fn get_contest_info(&self) -> Result<ContestInfo, JudgeError> {
        match self.client_type {
            ClientType::Contest => Ok(self.contest_info.read().unwrap().clone()),
            ClientType::Practice => Err(JudgeError::unsupported("hdu is not a contest client")),
        }
    }

    async fn refresh_contest_info(&self) -> Result<(), JudgeError> {
        if self.client_type != ClientType::Contest {
            return Err(JudgeError::unsupported("hdu is not a contest client"));
        }
        let url = format!(
            "{BASE_URL}/contests/contest_show.php?cid={}",
            self.contest_id
        );
        let text = self.get_text(&url, SLOW_TIMEOUT).await?;
        if text.contains("System Message") {
            return Err(JudgeError::connection(format!(
                "contest {} not exists",
                self.contest_id
            )));
        }
        let mut info = self.contest_info.write().unwrap();
        info.problem_list = parse_contest_problem_ids(&text);
        if let Some(caps) = TITLE_RE.captures(&text) {
            if let Some(title) = caps.get(1) {
                info.title = html::strip_tags(title.as_str());
            }
        }
        if let Some(meta) = parse_contest_meta(&html::strip_tags(&text)) {
            info.start_time = meta.start_time;
            info.end_time = meta.end_time;
            info.public = meta.public;
            info.status = meta.status;
        }
        Ok(())
    }
}

/// Scrape the public contest list. Failures yield an empty list; this feeds
/// the refresh-recent sweep, which simply tries again on its next tick.
pub async fn recent_contests() -> Vec<ContestInfo> {
    let Ok(http) = reqwest::Client::builder()
        .timeout(SLOW_TIMEOUT)
        .user_agent("Mozilla/5.0 (X11; Linux x86_64) vjudged/0.1")
        .build()
    else {
        return Vec::new();
    };
    let url = format!("{BASE_URL}/contests/contest_list.php");
    let Ok(resp) = http.get(&url).send().await else {
        return Vec::new();
    };
    let Ok(text) = resp.text().await else {
        return Vec::new();
    };
    parse_recent_contests(&text)
}

static VOLUME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"listproblem\.php\?vol=([0-9]+)").expect("volume regex"));
static PRACTICE_PID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)p\([^,()]+?,([^,()]+?)(?:,[^,()]+?){4}\);").expect("pid regex"));
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<h1[^>]*>(.*?)</h1>").expect("title regex"));
static LIMITS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)Time Limit:.*?[0-9]+/([0-9]+).*?MS.*?\(Java/Others\).*?Memory Limit:.*?[0-9]+/([0-9]+).*?K.*?\(Java/Others\)",
    )
    .expect("limits regex")
});
static SECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)<div[^>]*class=.panel_title.[^>]*>([^<]*)</div>\s*<div[^>]*class=.panel_content.[^>]*>(.*?)</div>"#,
    )
    .expect("section regex")
});
static STATUS_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)Run ID.*Judge Status.*Author").expect("status table regex"));
static CONTEST_PROBLEM_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)Solved.*Title.*Ratio").expect("contest table regex"));
static CONTEST_META_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)Start *Time *: *([0-9]{4})-([0-9]{2})-([0-9]{2}) *([0-9]{2}):([0-9]{2}):([0-9]{2}).*?End *Time *: *([0-9]{4})-([0-9]{2})-([0-9]{2}) *([0-9]{2}):([0-9]{2}):([0-9]{2}).*?Contest *Type *:(.*?)Contest *Status *:(.*?)Current *Server *Time",
    )
    .expect("contest meta regex")
});
static DATE_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]{4})-([0-9]{2})-([0-9]{2}) *([0-9]{2}):([0-9]{2}):([0-9]{2})")
        .expect("date time regex")
});

fn parse_problem(text: &str) -> Option<ProblemRecord> {
    let title = TITLE_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| html::strip_tags(m.as_str()))?;
    if title == "System Message" {
        return None;
    }
    let mut record = ProblemRecord {
        title,
        ..ProblemRecord::default()
    };
    if let Some(caps) = LIMITS_RE.captures(text) {
        record.time_limit_ms = caps.get(1).and_then(|m| m.as_str().parse().ok());
        record.mem_limit_kb = caps.get(2).and_then(|m| m.as_str().parse().ok());
    }
    for caps in SECTION_RE.captures_iter(text) {
        let (Some(heading), Some(content)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        // Statement sections stay as raw HTML fragments.
        let content = content.as_str().trim().to_string();
        match heading.as_str().trim() {
            "Problem Description" => record.description = content,
            "Input" => record.input = content,
            "Output" => record.output = content,
            "Sample Input" => record.sample_input = content,
            "Sample Output" => record.sample_output = content,
            _ => {}
        }
    }
    Some(record)
}

fn parse_practice_problem_ids(page: &str) -> Vec<String> {
    PRACTICE_PID_RE
        .captures_iter(page)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .collect()
}

fn parse_contest_problem_ids(page: &str) -> Vec<String> {
    let Some((_, body)) = html::tables(page)
        .into_iter()
        .find(|(full, _)| CONTEST_PROBLEM_TABLE_RE.is_match(full))
    else {
        return Vec::new();
    };
    let mut ids = Vec::new();
    for row in html::rows(body) {
        let cells = html::cells(row);
        if cells.len() >= 2 && cells[1].chars().all(|c| c.is_ascii_digit()) && !cells[1].is_empty()
        {
            ids.push(cells[1].clone());
        }
    }
    ids
}

fn first_run_id(page: &str) -> Option<String> {
    let (_, body) = html::tables(page)
        .into_iter()
        .rev()
        .find(|(full, _)| STATUS_TABLE_RE.is_match(full))?;
    for row in html::rows(body) {
        let cells = html::cells(row);
        if cells.len() >= 6
            && !cells[0].is_empty()
            && cells[0].chars().all(|c| c.is_ascii_digit())
        {
            return Some(cells[0].clone());
        }
    }
    None
}

fn find_verdict(page: &str, run_id: &str) -> Option<SubmitStatus> {
    let (_, body) = html::tables(page)
        .into_iter()
        .rev()
        .find(|(full, _)| STATUS_TABLE_RE.is_match(full))?;
    for row in html::rows(body) {
        let cells = html::cells(row);
        if cells.len() < 6 || cells[0] != run_id {
            continue;
        }
        let exe_time = match cells[4].trim_end_matches("MS").trim().parse::<i64>() {
            Ok(v) => v,
            Err(_) => continue,
        };
        let exe_mem = match cells[5].trim_end_matches('K').trim().parse::<i64>() {
            Ok(v) => v,
            Err(_) => continue,
        };
        // Runtime errors carry the signal name; normalize them.
        let verdict = if cells[2].contains("Runtime Error") {
            "Runtime Error".to_string()
        } else {
            cells[2].clone()
        };
        return Some(SubmitStatus {
            verdict,
            exe_time_ms: exe_time,
            exe_mem_kb: exe_mem,
        });
    }
    None
}

struct ContestMeta {
    start_time: i64,
    end_time: i64,
    public: bool,
    status: ContestStatus,
}

/// Parses the contest header block out of tag-stripped page text. Page
/// times are UTC+8.
fn parse_contest_meta(text: &str) -> Option<ContestMeta> {
    let caps = CONTEST_META_RE.captures(text)?;
    let field = |i: usize| caps.get(i).map(|m| m.as_str().trim());
    let start_time = page_time_to_unix(
        field(1)?, field(2)?, field(3)?, field(4)?, field(5)?, field(6)?,
    )?;
    let end_time = page_time_to_unix(
        field(7)?, field(8)?, field(9)?, field(10)?, field(11)?, field(12)?,
    )?;
    Some(ContestMeta {
        start_time,
        end_time,
        public: field(13)? == "Public",
        status: ContestStatus::parse(field(14)?),
    })
}

fn page_time_to_unix(
    year: &str,
    month: &str,
    day: &str,
    hour: &str,
    minute: &str,
    second: &str,
) -> Option<i64> {
    let date = chrono::NaiveDate::from_ymd_opt(
        year.parse().ok()?,
        month.parse().ok()?,
        day.parse().ok()?,
    )?;
    let time = date.and_hms_opt(hour.parse().ok()?, minute.parse().ok()?, second.parse().ok()?)?;
    Some(time.and_utc().timestamp() - 8 * 3600)
}

fn parse_recent_contests(page: &str) -> Vec<ContestInfo> {
    let Some((_, body)) = html::tables(page)
        .into_iter()
        .find(|(full, _)| full.contains("table_text"))
    else {
        return Vec::new();
    };
    let mut contests = Vec::new();
    for row in html::rows(body) {
        let cells = html::cells(row);
        if cells.len() < 6 || !cells[0].chars().all(|c| c.is_ascii_digit()) || cells[0].is_empty()
        {
            continue;
        }
        let mut info = ContestInfo::new("hdu", cells[0].clone());
        info.title = cells[1].clone();
        info.status = ContestStatus::parse(&cells[4]);
        info.public = cells[3] == "Public";
        if let Some(caps) = DATE_TIME_RE.captures(&cells[2]) {
            let field = |i: usize| caps.get(i).map(|m| m.as_str());
            if let (Some(y), Some(mo), Some(d), Some(h), Some(mi), Some(s)) =
                (field(1), field(2), field(3), field(4), field(5), field(6))
            {
                if let Some(ts) = page_time_to_unix(y, mo, d, h, mi, s) {
                    info.start_time = ts;
                }
            }
        }
        contests.push(info);
    }
    contests
}

fn encode_contest_source(source_code: &str) -> String {
    let quoted = utf8_percent_encode(source_code, QUOTE_SET).to_string();
    base64::engine::general_purpose::STANDARD.encode(quoted)
}
