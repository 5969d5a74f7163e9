use pipeline::ProcessingStats;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    started: Instant,

    // Requests
    total_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Pipeline
    papers_processed: AtomicUsize,
    papers_failed: AtomicUsize,
    chunks_processed: AtomicUsize,
    chunks_failed: AtomicUsize,
    entities_created: AtomicUsize,
    relationships_created: AtomicUsize,
    relationships_rejected: AtomicUsize,
    relationships_unresolved: AtomicUsize,

    // Timing (in microseconds)
    total_processing_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            total_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            papers_processed: AtomicUsize::new(0),
            papers_failed: AtomicUsize::new(0),
            chunks_processed: AtomicUsize::new(0),
            chunks_failed: AtomicUsize::new(0),
            entities_created: AtomicUsize::new(0),
            relationships_created: AtomicUsize::new(0),
            relationships_rejected: AtomicUsize::new(0),
            relationships_unresolved: AtomicUsize::new(0),
            total_processing_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_processing(&self, stats: &ProcessingStats, duration: Duration) {
        self.papers_processed.fetch_add(1, Ordering::Relaxed);
        self.chunks_processed.fetch_add(stats.chunks_processed, Ordering::Relaxed);
        self.chunks_failed.fetch_add(stats.chunks_failed, Ordering::Relaxed);
        self.entities_created.fetch_add(stats.entities_created, Ordering::Relaxed);
        self.relationships_created.fetch_add(stats.relationships_created, Ordering::Relaxed);
        self.relationships_rejected.fetch_add(stats.relationships_rejected, Ordering::Relaxed);
        self.relationships_unresolved.fetch_add(stats.relationships_unresolved, Ordering::Relaxed);
        self.total_processing_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_processing_failure(&self) {
        self.papers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let papers_processed = self.papers_processed.load(Ordering::Relaxed);
        MetricsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            papers_processed,
            papers_failed: self.papers_failed.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            entities_created: self.entities_created.load(Ordering::Relaxed),
            relationships_created: self.relationships_created.load(Ordering::Relaxed),
            relationships_rejected: self.relationships_rejected.load(Ordering::Relaxed),
            relationships_unresolved: self.relationships_unresolved.load(Ordering::Relaxed),
            avg_processing_time_ms: avg_time_ms(&self.total_processing_time_us, papers_processed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: usize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    if count > 0 {
        total / count as f64 / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_requests: usize,
    pub failed_requests: usize,
    pub papers_processed: usize,
    pub papers_failed: usize,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub entities_created: usize,
    pub relationships_created: usize,
    pub relationships_rejected: usize,
    pub relationships_unresolved: usize,
    pub avg_processing_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_runs_accumulate() {
        let metrics = Metrics::new();
        let stats = ProcessingStats {
            chunks_processed: 4,
            chunks_failed: 1,
            entities_created: 7,
            relationships_created: 5,
            relationships_rejected: 2,
            ..ProcessingStats::default()
        };
        metrics.record_processing(&stats, Duration::from_millis(30));
        metrics.record_processing(&stats, Duration::from_millis(10));
        metrics.record_request(true);
        metrics.record_request(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.papers_processed, 2);
        assert_eq!(snapshot.chunks_processed, 8);
        assert_eq!(snapshot.entities_created, 14);
        assert_eq!(snapshot.relationships_rejected, 4);
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.failed_requests, 1);
        assert!((snapshot.avg_processing_time_ms - 20.0).abs() < 1e-6);
    }
}
