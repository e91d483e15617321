use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    objects_fetched: AtomicU64,
    bytes_fetched: AtomicU64,
    objects_pushed: AtomicU64,
    fetch_failures: AtomicU64,
    push_failures: AtomicU64,
    retry_count: AtomicU64,
    cycles: AtomicU64,
}

/// In-process counters for the current invocation. The durable totals live in
/// the progress ledger.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub objects_fetched: u64,
    pub bytes_fetched: u64,
    pub objects_pushed: u64,
    pub fetch_failures: u64,
    pub push_failures: u64,
    pub retry_count: u64,
    pub cycles: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn record_fetch(&self, bytes: u64) {
        self.inner.objects_fetched.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_push(&self) {
        self.inner.objects_pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fetch_failures(&self, count: u64) {
        self.inner.fetch_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_push_failures(&self, count: u64) {
        self.inner.push_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retry_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_cycles(&self) {
        self.inner.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            objects_fetched: self.inner.objects_fetched.load(Ordering::Relaxed),
            bytes_fetched: self.inner.bytes_fetched.load(Ordering::Relaxed),
            objects_pushed: self.inner.objects_pushed.load(Ordering::Relaxed),
            fetch_failures: self.inner.fetch_failures.load(Ordering::Relaxed),
            push_failures: self.inner.push_failures.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
            cycles: self.inner.cycles.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
