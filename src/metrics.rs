//! Performance Monitor (C2, spec.md §4.6).
//!
//! Wraps arbitrary operations with timing and success capture, and keeps a
//! ring-buffered history a dispatcher-facing `performance_get_stats` tool can
//! query. The ring buffer is written only here; readers get a cloned
//! snapshot, matching spec.md §5.5's shared-resource policy.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::domain::{now_ms, Metric};

const RING_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub warning_ms: u64,
    pub critical_ms: u64,
}

/// Default per-operation thresholds (spec.md §4.6 table).
fn default_threshold(operation: &str) -> Thresholds {
    match operation {
        "eval_command" => Thresholds {
            warning_ms: 1000,
            critical_ms: 2000,
        },
        "create_point" | "create_line" => Thresholds {
            warning_ms: 500,
            critical_ms: 1000,
        },
        "export_png" => Thresholds {
            warning_ms: 1500,
            critical_ms: 2000,
        },
        "export_svg" => Thresholds {
            warning_ms: 800,
            critical_ms: 1500,
        },
        "instance_init" => Thresholds {
            warning_ms: 8000,
            critical_ms: 15000,
        },
        "clear_construction" => Thresholds {
            warning_ms: 300,
            critical_ms: 1000,
        },
        _ => Thresholds {
            warning_ms: 1000,
            critical_ms: 2000,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// Aggregate stats over a slice of Metrics (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub success_rate: f64,
}

impl Stats {
    fn from_durations(mut durations: Vec<u64>, successes: usize) -> Self {
        if durations.is_empty() {
            return Stats {
                count: 0,
                mean_ms: 0.0,
                median_ms: 0.0,
                p95_ms: 0.0,
                p99_ms: 0.0,
                min_ms: 0,
                max_ms: 0,
                success_rate: 0.0,
            };
        }
        durations.sort_unstable();
        let count = durations.len();
        let sum: u64 = durations.iter().sum();
        Stats {
            count,
            mean_ms: sum as f64 / count as f64,
            median_ms: percentile(&durations, 0.50),
            p95_ms: percentile(&durations, 0.95),
            p99_ms: percentile(&durations, 0.99),
            min_ms: durations[0],
            max_ms: durations[count - 1],
            success_rate: successes as f64 / count as f64,
        }
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[u64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[rank.min(sorted.len() - 1)] as f64
}

/// Thread-safe ring buffer of the most recent `RING_CAPACITY` Metrics.
pub struct PerformanceMonitor {
    ring: Mutex<VecDeque<Metric>>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        PerformanceMonitor {
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }

    /// Times `fut`, records a Metric regardless of outcome, and emits a
    /// tracing alert when a threshold is crossed. Rethrows `fut`'s error
    /// unchanged so the caller's own error handling is unaffected.
    pub async fn measure<T, E, F>(
        &self,
        operation: &str,
        metadata: serde_json::Value,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let start_ms = now_ms();
        let result = fut.await;
        let end_ms = now_ms();
        let duration_ms = end_ms.saturating_sub(start_ms);
        let success = result.is_ok();
        let error_message = result.as_ref().err().map(|e| e.to_string());

        self.push(Metric {
            operation: operation.to_string(),
            start_ms,
            end_ms,
            duration_ms,
            success,
            error_message,
            memory_delta_bytes: 0,
            metadata,
        });

        let thresholds = default_threshold(operation);
        if duration_ms > thresholds.critical_ms {
            tracing::error!(operation, duration_ms, "operation exceeded critical threshold");
        } else if duration_ms > thresholds.warning_ms {
            tracing::warn!(operation, duration_ms, "operation exceeded warning threshold");
        }

        result
    }

    fn push(&self, metric: Metric) {
        let mut ring = self.ring.lock().expect("metric ring mutex poisoned");
        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(metric);
    }

    /// Stats for one operation name, or over everything when `operation` is
    /// `None`.
    pub fn stats(&self, operation: Option<&str>) -> Stats {
        let ring = self.ring.lock().expect("metric ring mutex poisoned");
        let mut durations = Vec::new();
        let mut successes = 0usize;
        for metric in ring.iter() {
            if operation.is_some_and(|op| op != metric.operation) {
                continue;
            }
            durations.push(metric.duration_ms);
            if metric.success {
                successes += 1;
            }
        }
        Stats::from_durations(durations, successes)
    }

    /// True count of metrics currently retained (spec.md §8 "Metric ring").
    pub fn len(&self) -> usize {
        self.ring.lock().expect("metric ring mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.ring.lock().expect("metric ring mutex poisoned").clear();
    }

    /// Checks every distinct operation's metrics against its threshold and
    /// reports any whose p95 crosses critical (`performance_monitor_compliance`).
    pub fn compliance_report(&self, threshold_ms: Option<u64>) -> Vec<ComplianceEntry> {
        let ring = self.ring.lock().expect("metric ring mutex poisoned");
        let mut by_op: std::collections::HashMap<&str, Vec<u64>> = std::collections::HashMap::new();
        for metric in ring.iter() {
            by_op.entry(&metric.operation).or_default().push(metric.duration_ms);
        }
        by_op
            .into_iter()
            .map(|(operation, durations)| {
                let limit = threshold_ms.unwrap_or_else(|| default_threshold(operation).critical_ms);
                let stats = Stats::from_durations(durations, 0);
                ComplianceEntry {
                    operation: operation.to_string(),
                    p95_ms: stats.p95_ms,
                    limit_ms: limit,
                    compliant: stats.p95_ms <= limit as f64,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceEntry {
    pub operation: String,
    pub p95_ms: f64,
    pub limit_ms: u64,
    pub compliant: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn measure_records_success_and_failure() {
        let monitor = PerformanceMonitor::new();
        let _: Result<(), &str> = monitor
            .measure("eval_command", serde_json::json!({}), async { Ok(()) })
            .await;
        let _: Result<(), &str> = monitor
            .measure("eval_command", serde_json::json!({}), async { Err("boom") })
            .await;

        let stats = monitor.stats(Some("eval_command"));
        assert_eq!(stats.count, 2);
        assert_eq!(stats.success_rate, 0.5);
    }

    #[test]
    fn ring_buffer_caps_at_1000() {
        let monitor = PerformanceMonitor::new();
        for i in 0..1500u64 {
            monitor.push(Metric {
                operation: "x".to_string(),
                start_ms: i,
                end_ms: i,
                duration_ms: i,
                success: true,
                error_message: None,
                memory_delta_bytes: 0,
                metadata: serde_json::Value::Null,
            });
        }
        assert_eq!(monitor.len(), 1000);
        let ring = monitor.ring.lock().unwrap();
        // Last 1000 entries: durations 500..=1499.
        assert_eq!(ring.front().unwrap().duration_ms, 500);
        assert_eq!(ring.back().unwrap().duration_ms, 1499);
    }

    #[test]
    fn stats_are_empty_before_any_measurement() {
        let monitor = PerformanceMonitor::new();
        let stats = monitor.stats(None);
        assert_eq!(stats.count, 0);
    }
}
