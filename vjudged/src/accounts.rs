//! Bot-account registry. Accounts are loaded once at startup from a JSON
//! file of the shape:
//!
//! ```json
//! { "normal":  [ {"site": "hdu", "username": "u", "password": "p"} ],
//!   "contest": [ {"site": "hdu", "username": "u", "password": "p",
//!                 "authorized_contests": [1001]} ] }
//! ```
//!
//! Parsing is strict: an unknown key anywhere in the file fails startup.
//! Contest accounts are indexed under one clone name per authorized contest.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use vjudge_api::oj;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountsFile {
    #[serde(default)]
    pub normal: Vec<NormalAccount>,
    #[serde(default)]
    pub contest: Vec<ContestAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalAccount {
    pub site: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContestAccount {
    pub site: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub authorized_contests: Vec<i64>,
}

#[derive(Debug, Default)]
pub struct AccountRegistry {
    normal: HashMap<String, Vec<Credential>>,
    contest: HashMap<String, Vec<Credential>>,
}

impl AccountRegistry {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading accounts file {}", path.display()))?;
        let file: AccountsFile = serde_json::from_str(&text)
            .with_context(|| format!("parsing accounts file {}", path.display()))?;
        Ok(Self::from_accounts(file))
    }

    pub fn from_accounts(file: AccountsFile) -> Self {
        let mut normal: HashMap<String, Vec<Credential>> = HashMap::new();
        for account in file.normal {
            normal.entry(account.site).or_default().push(Credential {
                username: account.username,
                password: account.password,
            });
        }
        let mut contest: HashMap<String, Vec<Credential>> = HashMap::new();
        for account in file.contest {
            for contest_id in &account.authorized_contests {
                contest
                    .entry(oj::clone_name(&account.site, &contest_id.to_string()))
                    .or_default()
                    .push(Credential {
                        username: account.username.clone(),
                        password: account.password.clone(),
                    });
            }
        }
        Self { normal, contest }
    }

    /// Credentials serving `oj_name`, which is either a plain site name or a
    /// contest clone name. Contest entries win over normal ones, as a clone
    /// name never collides with a practice site.
    pub fn credentials_for(&self, oj_name: &str) -> Option<&[Credential]> {
        self.contest
            .get(oj_name)
            .or_else(|| self.normal.get(oj_name))
            .map(|v| v.as_slice())
    }

    pub fn serves(&self, oj_name: &str) -> bool {
        self.contest.contains_key(oj_name) || self.normal.contains_key(oj_name)
    }

    pub fn is_empty(&self) -> bool {
        self.normal.is_empty() && self.contest.is_empty()
    }
}
