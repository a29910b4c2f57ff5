//! Error taxonomy shared by the dispatcher and every site adapter.
//!
//! `LoginRequired` is deliberately a first-class variant rather than a kind
//! of login failure: it means "the prior session lapsed, refresh and retry",
//! and callers branch on it explicitly.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JudgeError {
    /// Upstream unreachable, timed out, or returned a malformed page.
    #[error("connection error: {0}")]
    Connection(String),

    /// Permanent authentication failure; the account is unusable.
    #[error(transparent)]
    Login(#[from] LoginError),

    /// Session cookies expired; the caller should refresh and retry.
    #[error("login required")]
    LoginRequired,

    /// The site rejected this submission (too short, rate-limited, ...).
    #[error("submit rejected: {0}")]
    Submit(String),

    /// The requested site or operation is not served by any adapter.
    #[error("{0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("user does not exist")]
    UserNotExist,
    #[error("wrong password")]
    PasswordError,
    /// The site refused the login without saying which part was wrong.
    #[error("user not exist or wrong password")]
    Rejected,
}

impl JudgeError {
    pub fn connection(reason: impl Into<String>) -> Self {
        JudgeError::Connection(reason.into())
    }

    pub fn submit(reason: impl Into<String>) -> Self {
        JudgeError::Submit(reason.into())
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        JudgeError::Unsupported(reason.into())
    }

    pub fn is_login_required(&self) -> bool {
        matches!(self, JudgeError::LoginRequired)
    }
}
