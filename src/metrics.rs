//! Request counters and latency statistics for the prediction service.

use crate::types::prediction::LightStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Outcome of one handled request, as counted by [`ServiceMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Served(LightStatus),
    NotSaved,
    ModelsUnavailable,
    InferenceFailed,
    Unauthorized,
    InvalidInput,
}

/// Metrics collector for the service
pub struct ServiceMetrics {
    /// Predictions computed and recorded
    pub predictions_served: AtomicU64,
    /// Predictions computed but not recorded
    pub predictions_not_saved: AtomicU64,
    pub models_unavailable: AtomicU64,
    pub inference_failures: AtomicU64,
    pub unauthorized: AtomicU64,
    pub invalid_input: AtomicU64,
    lights_on: AtomicU64,
    lights_off: AtomicU64,
    /// Handling times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl ServiceMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            predictions_served: AtomicU64::new(0),
            predictions_not_saved: AtomicU64::new(0),
            models_unavailable: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            unauthorized: AtomicU64::new(0),
            invalid_input: AtomicU64::new(0),
            lights_on: AtomicU64::new(0),
            lights_off: AtomicU64::new(0),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a handled prediction request
    pub fn record(&self, outcome: RequestOutcome, processing_time: Duration) {
        let counter = match outcome {
            RequestOutcome::Served(LightStatus::On) => {
                self.lights_on.fetch_add(1, Ordering::Relaxed);
                &self.predictions_served
            }
            RequestOutcome::Served(LightStatus::Off) => {
                self.lights_off.fetch_add(1, Ordering::Relaxed);
                &self.predictions_served
            }
            RequestOutcome::NotSaved => &self.predictions_not_saved,
            RequestOutcome::ModelsUnavailable => &self.models_unavailable,
            RequestOutcome::InferenceFailed => &self.inference_failures,
            RequestOutcome::Unauthorized => &self.unauthorized,
            RequestOutcome::InvalidInput => &self.invalid_input,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only last 10000 for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }
    }

    /// Total requests recorded, whatever their outcome
    pub fn total_requests(&self) -> u64 {
        [
            &self.predictions_served,
            &self.predictions_not_saved,
            &self.models_unavailable,
            &self.inference_failures,
            &self.unauthorized,
            &self.invalid_input,
        ]
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .sum()
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let Ok(times) = self.processing_times.read() else {
            return ProcessingStats::default();
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: *sorted.last().unwrap_or(&0),
        }
    }

    /// Fraction of served predictions with the lights on
    pub fn lights_on_ratio(&self) -> f64 {
        let on = self.lights_on.load(Ordering::Relaxed);
        let off = self.lights_off.load(Ordering::Relaxed);
        if on + off == 0 {
            0.0
        } else {
            on as f64 / (on + off) as f64
        }
    }

    /// Get current throughput (requests per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.total_requests() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let processing = self.get_processing_stats();

        info!(
            total = self.total_requests(),
            served = self.predictions_served.load(Ordering::Relaxed),
            not_saved = self.predictions_not_saved.load(Ordering::Relaxed),
            models_unavailable = self.models_unavailable.load(Ordering::Relaxed),
            inference_failed = self.inference_failures.load(Ordering::Relaxed),
            unauthorized = self.unauthorized.load(Ordering::Relaxed),
            invalid_input = self.invalid_input.load(Ordering::Relaxed),
            throughput = format!("{:.2} req/s", self.get_throughput()),
            lights_on = format!("{:.1}%", self.lights_on_ratio() * 100.0),
            "Request summary"
        );
        info!(
            mean_us = processing.mean_us,
            p50_us = processing.p50_us,
            p95_us = processing.p95_us,
            p99_us = processing.p99_us,
            max_us = processing.max_us,
            "Processing time"
        );
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Periodic summary logger
pub struct MetricsReporter {
    metrics: Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
