//! Lightweight metrics collection for observability
//!
//! Atomic counters with relaxed ordering; zero allocations in the hot
//! path. One [`Metrics`] instance is shared by every limiter in a
//! registry and rendered as Prometheus text by the service binary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Core metrics collected by the rate limiter
pub struct Metrics {
    start_time: Instant,

    /// Total checks performed
    pub checks: AtomicU64,
    /// Checks that allowed the request
    pub allowed: AtomicU64,
    /// Checks that denied the request
    pub denied: AtomicU64,
    /// Store operations that failed
    pub store_errors: AtomicU64,
    /// Requests allowed because of fail-open during a store outage
    pub fail_open_allows: AtomicU64,
    /// Requests denied because of fail-closed during a store outage
    pub fail_closed_denies: AtomicU64,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            checks: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            fail_open_allows: AtomicU64::new(0),
            fail_closed_denies: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_check(&self) {
        self.checks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decision(&self, allowed: bool) {
        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail_open(&self) {
        self.fail_open_allows.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail_closed(&self) {
        self.fail_closed_denies.fetch_add(1, Ordering::Relaxed);
    }

    /// Seconds since this instance was created
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render counters in Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(512);

        let counters = [
            ("gatecrab_checks_total", "Total rate limit checks", &self.checks),
            ("gatecrab_allowed_total", "Requests allowed", &self.allowed),
            ("gatecrab_denied_total", "Requests denied", &self.denied),
            (
                "gatecrab_store_errors_total",
                "Counter store failures",
                &self.store_errors,
            ),
            (
                "gatecrab_fail_open_allows_total",
                "Requests allowed by fail-open",
                &self.fail_open_allows,
            ),
            (
                "gatecrab_fail_closed_denies_total",
                "Requests denied by fail-closed",
                &self.fail_closed_denies,
            ),
        ];

        for (name, help, counter) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n",
                counter.load(Ordering::Relaxed)
            ));
        }

        out.push_str(&format!(
            "# HELP gatecrab_uptime_seconds Seconds since startup\n\
             # TYPE gatecrab_uptime_seconds gauge\n\
             gatecrab_uptime_seconds {}\n",
            self.uptime_secs()
        ));

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
