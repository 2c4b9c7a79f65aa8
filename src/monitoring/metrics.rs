//! Prometheus-style metrics for the data plane and control loop.
//!
//! All instruments are lock-free atomics so they can sit on the request path.

use crate::core::RegionId;
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric (monotonically increasing).
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by amount.
    pub fn add(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Get current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64, // f64 bits
}

impl Gauge {
    /// Create a new gauge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gauge value.
    pub fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Get current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

/// A histogram metric for measuring distributions.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Buckets suited to probe latency in milliseconds.
    pub fn latency_ms() -> Self {
        Self::with_buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0])
    }

    /// Create with custom buckets.
    pub fn with_buckets(buckets: Vec<f64>) -> Self {
        let bucket_counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            bucket_counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Observe a value.
    pub fn observe(&self, value: f64) {
        for (i, bucket) in self.buckets.iter().enumerate() {
            if value <= *bucket {
                self.bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }

        // Single writer (the monitor task), so load/store is enough for the sum.
        let current_sum = f64::from_bits(self.sum.load(Ordering::Relaxed));
        self.sum.store((current_sum + value).to_bits(), Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative `(upper bound, count)` pairs, smallest bound first.
    pub fn buckets(&self) -> Vec<(f64, u64)> {
        self.buckets
            .iter()
            .zip(&self.bucket_counts)
            .map(|(bound, count)| (*bound, count.load(Ordering::Relaxed)))
            .collect()
    }

    /// Get observation count.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get sum of observations.
    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    /// Get mean value.
    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() / count as f64
        }
    }
}

/// Per-region counters.
#[derive(Debug, Default)]
pub struct RegionMetrics {
    pub reads: Counter,
    pub writes: Counter,
    pub data_path_errors: Counter,
    pub probe_failures: Counter,
    pub replication_applied: Counter,
    pub replication_ignored: Counter,
}

/// Metrics for one tandem instance.
#[derive(Debug)]
pub struct TandemMetrics {
    regions: [RegionMetrics; 2],
    pub failovers: Counter,
    pub failbacks: Counter,
    pub degraded: Gauge,
    pub replication_retries: Counter,
    pub probe_latency_ms: Histogram,
}

impl TandemMetrics {
    /// Create a zeroed metrics set.
    pub fn new() -> Self {
        Self {
            regions: [RegionMetrics::default(), RegionMetrics::default()],
            failovers: Counter::new(),
            failbacks: Counter::new(),
            degraded: Gauge::new(),
            replication_retries: Counter::new(),
            probe_latency_ms: Histogram::latency_ms(),
        }
    }

    /// Counters for one region.
    pub fn region(&self, region: RegionId) -> &RegionMetrics {
        &self.regions[region.index()]
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        let per_region: [(&str, &str, fn(&RegionMetrics) -> &Counter); 6] = [
            ("tandem_reads_total", "Client reads served", |m| &m.reads),
            ("tandem_writes_total", "Client writes accepted", |m| &m.writes),
            ("tandem_data_path_errors_total", "Failed client operations", |m| {
                &m.data_path_errors
            }),
            ("tandem_probe_failures_total", "Failed health probes", |m| &m.probe_failures),
            ("tandem_replication_applied_total", "Replicated writes applied", |m| {
                &m.replication_applied
            }),
            ("tandem_replication_ignored_total", "Replicated writes superseded", |m| {
                &m.replication_ignored
            }),
        ];

        for (name, help, pick) in per_region {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            for region in RegionId::ALL {
                output.push_str(&format!(
                    "{}{{region=\"{}\"}} {}\n",
                    name,
                    region,
                    pick(self.region(region)).get()
                ));
            }
        }

        let totals = [
            ("tandem_failovers_total", "Failovers to the standby", &self.failovers),
            ("tandem_failbacks_total", "Failbacks to the primary", &self.failbacks),
            ("tandem_replication_retries_total", "Redelivered frames", &self.replication_retries),
        ];
        for (name, help, counter) in totals {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, counter.get()));
        }

        output.push_str("# HELP tandem_degraded Both regions unhealthy\n");
        output.push_str("# TYPE tandem_degraded gauge\n");
        output.push_str(&format!("tandem_degraded {}\n", self.degraded.get()));

        output.push_str("# HELP tandem_probe_latency_ms Health probe latency\n");
        output.push_str("# TYPE tandem_probe_latency_ms histogram\n");
        for (bound, count) in self.probe_latency_ms.buckets() {
            output.push_str(&format!(
                "tandem_probe_latency_ms_bucket{{le=\"{}\"}} {}\n",
                bound, count
            ));
        }
        output.push_str(&format!(
            "tandem_probe_latency_ms_bucket{{le=\"+Inf\"}} {}\n",
            self.probe_latency_ms.count()
        ));
        output.push_str(&format!("tandem_probe_latency_ms_sum {}\n", self.probe_latency_ms.sum()));
        output.push_str(&format!(
            "tandem_probe_latency_ms_count {}\n",
            self.probe_latency_ms.count()
        ));

        output
    }
}

impl Default for TandemMetrics {
    fn default() -> Self {
        Self::new()
    }
}
