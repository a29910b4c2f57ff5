//! The dispatcher runtime: two queue supervisors, per-site pools of
//! submitter/poller/crawler workers, and the plumbing they share.

pub mod crawl_supervisor;
pub mod crawler;
pub mod pool;
pub mod poller;
pub mod submit_supervisor;
pub mod submitter;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

/// Receiver end of a site channel, shared by every worker of that site's
/// pool. A worker takes the lock only for one receive; the wait gap between
/// tasks happens outside it so siblings can pick up work.
pub type SharedReceiver<T> = Arc<Mutex<UnboundedReceiver<T>>>;

pub fn shared_channel<T>() -> (UnboundedSender<T>, SharedReceiver<T>) {
    let (tx, rx) = unbounded_channel();
    (tx, Arc::new(Mutex::new(rx)))
}

/// Operational delays. The daemon always runs the defaults; tests shrink
/// them to keep the worker loops observable in milliseconds.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Channel receive timeout; also the BRPOP cycle. Workers observe their
    /// stop flag at this tick.
    pub recv_timeout: Duration,
    /// Fixed per-account gap between submits.
    pub submit_gap: Duration,
    /// The n-th poll attempt waits n of these.
    pub backoff_unit: Duration,
    /// How often idle pools are swept.
    pub reap_interval: Duration,
    /// Pools older than this (from start) are stopped by the sweep.
    pub pool_max_age: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_secs(60),
            submit_gap: Duration::from_secs(5),
            backoff_unit: Duration::from_secs(1),
            reap_interval: Duration::from_secs(3600),
            pool_max_age: Duration::from_secs(3600),
        }
    }
}
