//! Pool bookkeeping. A pool is the set of workers serving one site (one per
//! bot account) plus the site channel feeding them. Pools are tagged with
//! their start time; the supervisor reaps pools past the idle threshold and
//! sweeps stopped workers out of the stopping set.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

/// The lifecycle hooks a pooled worker exposes to its supervisor. `stop` is
/// a request; the worker observes it at its next channel-timeout tick.
pub trait PoolWorker {
    fn stop(&self);
    fn is_finished(&self) -> bool;
}

pub struct Pool<W, T> {
    tx: UnboundedSender<T>,
    workers: Vec<W>,
    started_at: Instant,
}

impl<W: PoolWorker, T> Pool<W, T> {
    pub fn new(tx: UnboundedSender<T>, workers: Vec<W>) -> Self {
        Self {
            tx,
            workers,
            started_at: Instant::now(),
        }
    }

    pub fn send(&self, item: T) {
        // Workers hold their own sender clones, so the channel outlives the
        // pool record; a failed send can only mean total teardown.
        let _ = self.tx.send(item);
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn stop_workers(self) -> Vec<W> {
        for worker in &self.workers {
            worker.stop();
        }
        self.workers
    }
}

pub struct PoolSet<W, T> {
    running: HashMap<String, Pool<W, T>>,
    stopping: Vec<(String, Vec<W>)>,
    last_reap: Instant,
}

impl<W: PoolWorker, T> PoolSet<W, T> {
    pub fn new() -> Self {
        Self {
            running: HashMap::new(),
            stopping: Vec::new(),
            last_reap: Instant::now(),
        }
    }

    pub fn get(&self, oj_name: &str) -> Option<&Pool<W, T>> {
        self.running.get(oj_name)
    }

    pub fn insert(&mut self, oj_name: String, pool: Pool<W, T>) {
        self.running.insert(oj_name, pool);
    }

    /// Periodic sweep: stop pools past the idle threshold, then drop
    /// stopping pools whose workers have all exited.
    pub fn maybe_reap(&mut self, interval: Duration, max_age: Duration) {
        if self.last_reap.elapsed() < interval {
            return;
        }
        self.last_reap = Instant::now();
        self.reap_older_than(max_age);
        self.sweep_stopped();
        info!(
            "cleaned free pools; running: {:?}, stopping: {:?}",
            self.running.keys().collect::<Vec<_>>(),
            self.stopping.iter().map(|(name, _)| name).collect::<Vec<_>>()
        );
    }

    pub fn reap_older_than(&mut self, max_age: Duration) {
        let expired: Vec<String> = self
            .running
            .iter()
            .filter(|(_, pool)| pool.age() > max_age)
            .map(|(name, _)| name.clone())
            .collect();
        for name in expired {
            if let Some(pool) = self.running.remove(&name) {
                info!("no more task, stop all {name} workers");
                self.stopping.push((name, pool.stop_workers()));
            }
        }
    }

    pub fn sweep_stopped(&mut self) {
        self.stopping
            .retain(|(_, workers)| workers.iter().any(|w| !w.is_finished()));
    }

    /// Process shutdown: request a stop from every running pool.
    pub fn drain_all(&mut self) {
        let names: Vec<String> = self.running.keys().cloned().collect();
        for name in names {
            if let Some(pool) = self.running.remove(&name) {
                self.stopping.push((name, pool.stop_workers()));
            }
        }
    }

    pub fn all_stopped(&self) -> bool {
        self.running.is_empty()
            && self
                .stopping
                .iter()
                .all(|(_, workers)| workers.iter().all(|w| w.is_finished()))
    }
}

impl<W: PoolWorker, T> Default for PoolSet<W, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct FakeWorker {
        stopped: Arc<AtomicBool>,
        finished: Arc<AtomicBool>,
    }

    impl PoolWorker for FakeWorker {
        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn is_finished(&self) -> bool {
            self.finished.load(Ordering::SeqCst)
        }
    }

    fn fake_pool() -> (Pool<FakeWorker, i64>, Arc<AtomicBool>, Arc<AtomicBool>) {
        let stopped = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let pool = Pool::new(
            tx,
            vec![FakeWorker {
                stopped: stopped.clone(),
                finished: finished.clone(),
            }],
        );
        (pool, stopped, finished)
    }

    #[tokio::test]
    async fn reaping_stops_old_pools_and_sweeps_finished_ones() {
        let mut set: PoolSet<FakeWorker, i64> = PoolSet::new();
        let (pool, stopped, finished) = fake_pool();
        set.insert("hdu".into(), pool);

        // Young pools are left alone.
        set.reap_older_than(Duration::from_secs(3600));
        assert!(set.get("hdu").is_some());
        assert!(!stopped.load(Ordering::SeqCst));

        // Everything is older than zero.
        set.reap_older_than(Duration::ZERO);
        assert!(set.get("hdu").is_none());
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!set.all_stopped());

        set.sweep_stopped();
        assert!(!set.all_stopped(), "unfinished workers must not be swept");

        finished.store(true, Ordering::SeqCst);
        set.sweep_stopped();
        assert!(set.all_stopped());
    }

    #[tokio::test]
    async fn drain_all_requests_stop_everywhere() {
        let mut set: PoolSet<FakeWorker, i64> = PoolSet::new();
        let (pool_a, stopped_a, finished_a) = fake_pool();
        let (pool_b, stopped_b, finished_b) = fake_pool();
        set.insert("hdu".into(), pool_a);
        set.insert("scu".into(), pool_b);

        set.drain_all();
        assert!(stopped_a.load(Ordering::SeqCst));
        assert!(stopped_b.load(Ordering::SeqCst));
        assert!(!set.all_stopped());

        finished_a.store(true, Ordering::SeqCst);
        finished_b.store(true, Ordering::SeqCst);
        assert!(set.all_stopped());
    }
}
