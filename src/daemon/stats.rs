//! Accept loop counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::info;

/// Daemon statistics
#[derive(Debug)]
pub struct DaemonStats {
    pub accepted: AtomicU64,
    pub refused: AtomicU64,
    pub throttled: AtomicU64,
    pub timed_out: AtomicU64,
    pub authenticated: AtomicU64,
    pub session_failures: AtomicU64,
    pub active_workers: AtomicU64,
    pub start_time: SystemTime,
}

/// Point-in-time copy of [`DaemonStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub refused: u64,
    pub throttled: u64,
    pub timed_out: u64,
    pub authenticated: u64,
    pub session_failures: u64,
    pub active_workers: u64,
}

impl DaemonStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            accepted: AtomicU64::new(0),
            refused: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            authenticated: AtomicU64::new(0),
            session_failures: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
            start_time: SystemTime::now(),
        })
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_workers(&self) -> u64 {
        self.active_workers.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            refused: self.refused.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            authenticated: self.authenticated.load(Ordering::Relaxed),
            session_failures: self.session_failures.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!("=== Connection Statistics ===");
        info!("  Uptime:        {}", crate::utils::format_uptime(self.uptime()));
        info!("  Accepted:      {}", s.accepted);
        info!("  Refused:       {}", s.refused);
        info!("  Throttled:     {}", s.throttled);
        info!("  Timed out:     {}", s.timed_out);
        info!("  Authenticated: {}", s.authenticated);
        info!("  Failed starts: {}", s.session_failures);
    }
}

/// Counts a worker as active for as long as it is alive
#[derive(Debug)]
pub struct WorkerSlot {
    stats: Arc<DaemonStats>,
}

impl WorkerSlot {
    pub fn acquire(stats: Arc<DaemonStats>) -> Self {
        stats.active_workers.fetch_add(1, Ordering::Relaxed);
        Self { stats }
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.stats.active_workers.fetch_sub(1, Ordering::Relaxed);
    }
}
