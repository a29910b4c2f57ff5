//! Verdict vocabulary.
//!
//! Verdicts are opaque strings propagated verbatim from upstream sites; only
//! the non-terminal set and the two dispatcher-synthesized failures are known
//! here. Anything outside the non-terminal set counts as terminal.

/// Initial verdict assigned by the front-end at insert time.
pub const QUEUING: &str = "Queuing";
/// The submission has an upstream run id and is being tracked.
pub const BEING_JUDGED: &str = "Being Judged";
pub const COMPILING: &str = "Compiling";
pub const RUNNING: &str = "Running";

/// Synthesized when the submit phase fails permanently.
pub const SUBMIT_FAILED: &str = "Submit Failed";
/// Synthesized when polling fails permanently or the attempt cap is reached.
pub const JUDGE_FAILED: &str = "Judge Failed";

pub const ACCEPTED: &str = "Accepted";

/// Upstream verdicts in this set mean "keep polling".
pub fn is_non_terminal(verdict: &str) -> bool {
    matches!(verdict, QUEUING | BEING_JUDGED | COMPILING | RUNNING)
}

pub fn is_terminal(verdict: &str) -> bool {
    !is_non_terminal(verdict)
}
