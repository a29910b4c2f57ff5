//! Site clients. Each upstream judge is driven through the [`SiteClient`]
//! trait; the dispatcher never touches site-specific HTML. Practice and
//! contest behavior live behind a [`ClientType`] tag inside each adapter,
//! and contest-bound clients are addressed by clone name
//! (`<site>_ct_<contest_id>`).

pub mod hdu;
mod html;
pub mod scu;

use std::sync::Arc;

use async_trait::async_trait;

use vjudge_api::contest::ContestInfo;
use vjudge_api::error::JudgeError;
use vjudge_api::oj;

use crate::accounts::Credential;

pub const SUPPORTED_SITES: &[&str] = &["hdu", "scu"];
pub const SUPPORTED_CONTEST_SITES: &[&str] = &["hdu"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Practice,
    Contest,
}

/// Problem page fields as returned by an adapter. Empty strings mean the
/// site omitted the field; the storage layer preserves previously stored
/// values in that case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProblemRecord {
    pub title: String,
    pub description: String,
    pub input: String,
    pub output: String,
    pub sample_input: String,
    pub sample_output: String,
    pub time_limit_ms: Option<i64>,
    pub mem_limit_kb: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitStatus {
    pub verdict: String,
    pub exe_time_ms: i64,
    pub exe_mem_kb: i64,
}

/// Optional narrowing for status listing pages.
#[derive(Debug, Clone, Default)]
pub struct StatusHints {
    pub user_id: Option<String>,
    pub problem_id: Option<String>,
}

#[async_trait]
pub trait SiteClient: Send + Sync + std::fmt::Debug {
    /// Stable identifier: `"hdu"`, `"scu"`, `"hdu_ct_<id>"`.
    fn name(&self) -> &str;

    /// The bot account id, or `LoginRequired` when unauthenticated.
    fn user_id(&self) -> Result<String, JudgeError>;

    fn client_type(&self) -> ClientType;

    async fn login(&self, username: &str, password: &str) -> Result<(), JudgeError>;

    /// Re-authenticate with the stored credentials after a session lapse.
    async fn update_cookies(&self) -> Result<(), JudgeError>;

    /// `None` means the site reports no such problem; not an error.
    async fn get_problem(&self, problem_id: &str) -> Result<Option<ProblemRecord>, JudgeError>;

    /// All problem ids the site lists, sorted and de-duplicated.
    async fn get_problem_list(&self) -> Result<Vec<String>, JudgeError>;

    /// Returns the upstream run id on success.
    async fn submit_problem(
        &self,
        problem_id: &str,
        language: &str,
        source_code: &str,
    ) -> Result<String, JudgeError>;

    /// `None` means the run is not yet visible on the status pages;
    /// the caller retries.
    async fn get_submit_status(
        &self,
        run_id: &str,
        hints: &StatusHints,
    ) -> Result<Option<SubmitStatus>, JudgeError>;

    /// Contest clients only.
    fn contest_id(&self) -> Option<&str> {
        None
    }

    async fn get_contest_info(&self) -> Result<ContestInfo, JudgeError> {
        Err(JudgeError::unsupported(format!(
            "{} is not a contest client",
            self.name()
        )))
    }

    async fn refresh_contest_info(&self) -> Result<(), JudgeError> {
        Err(JudgeError::unsupported(format!(
            "{} is not a contest client",
            self.name()
        )))
    }
}

/// Construct the adapter for `oj_name` without touching the network. The
/// support tables gate the dispatch; the match arms below only construct.
fn build_client(oj_name: &str) -> Result<Arc<dyn SiteClient>, JudgeError> {
    if let Some((site, contest_id)) = oj::split_clone_name(oj_name) {
        if !SUPPORTED_CONTEST_SITES.contains(&site) {
            return Err(JudgeError::unsupported(format!(
                "site \"{site}\" has no contest support"
            )));
        }
        match site {
            "hdu" => Ok(Arc::new(hdu::HduClient::contest(contest_id)?)),
            _ => Err(JudgeError::unsupported(format!(
                "site \"{site}\" has no contest support"
            ))),
        }
    } else {
        if !SUPPORTED_SITES.contains(&oj_name) {
            return Err(JudgeError::unsupported(format!(
                "site \"{oj_name}\" is not supported"
            )));
        }
        match oj_name {
            "hdu" => Ok(Arc::new(hdu::HduClient::practice()?)),
            "scu" => Ok(Arc::new(scu::SojClient::new()?)),
            _ => Err(JudgeError::unsupported(format!(
                "site \"{oj_name}\" is not supported"
            ))),
        }
    }
}

/// Construct and authenticate a client for `oj_name`. Clone names produce
/// contest clients (the contest page is fetched eagerly so the client knows
/// its problem list and window); anything else a practice client.
pub async fn create_client(
    oj_name: &str,
    auth: &Credential,
) -> Result<Arc<dyn SiteClient>, JudgeError> {
    let client = build_client(oj_name)?;
    client.login(&auth.username, &auth.password).await?;
    if client.client_type() == ClientType::Contest {
        client.refresh_contest_info().await?;
    }
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_tables_drive_the_factory() {
        for site in SUPPORTED_SITES {
            assert!(build_client(site).is_ok(), "practice client for {site}");
        }
        for site in SUPPORTED_CONTEST_SITES {
            let name = oj::clone_name(site, "1");
            assert!(build_client(&name).is_ok(), "contest client for {name}");
        }
        assert!(build_client("poj").is_err());
        assert!(build_client(&oj::clone_name("scu", "3")).is_err());
    }

    #[tokio::test]
    async fn factory_rejects_unknown_sites() {
        let auth = Credential {
            username: "u".into(),
            password: "p".into(),
        };
        let err = create_client("poj", &auth).await.unwrap_err();
        assert!(matches!(err, JudgeError::Unsupported(_)));
        let err = create_client("scu_ct_3", &auth).await.unwrap_err();
        assert!(matches!(err, JudgeError::Unsupported(_)));
    }
}
