use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::runner::{Outcome, Stage};

/// Run metrics collector, shared by every dispatched task
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// In-memory metrics store
    metrics: Arc<Mutex<Metrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Tasks that produced an outcome
    pub total_tasks: usize,

    /// Tasks whose submission was confirmed
    pub confirmed: usize,

    /// Tasks submitted without a confirmation
    pub timed_out: usize,

    /// Tasks that ended on an error
    pub errored: usize,

    /// Task durations (task id -> duration in milliseconds)
    pub task_durations: BTreeMap<usize, u64>,

    /// Completed tasks per minute
    pub completion_rate: Vec<(DateTime<Utc>, usize)>,

    /// Current tasks per minute
    pub current_tpm: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            start_time: Utc::now(),
            total_tasks: 0,
            confirmed: 0,
            timed_out: 0,
            errored: 0,
            task_durations: BTreeMap::new(),
            completion_rate: Vec::new(),
            current_tpm: 0.0,
        }
    }
}

impl Metrics {
    /// Mean task duration in milliseconds
    pub fn average_duration_ms(&self) -> u64 {
        if self.task_durations.is_empty() {
            return 0;
        }
        self.task_durations.values().sum::<u64>() / self.task_durations.len() as u64
    }

    /// One line summary for the end of a run
    pub fn summary(&self) -> String {
        format!(
            "{} tasks: {} confirmed, {} timed out, {} errored; avg {:.1}s per task, {:.1} tasks/min",
            self.total_tasks,
            self.confirmed,
            self.timed_out,
            self.errored,
            self.average_duration_ms() as f64 / 1000.0,
            self.current_tpm
        )
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(Mutex::new(Metrics::default())),
        }
    }

    /// Record a finished task
    pub async fn record_task(&self, outcome: &Outcome) {
        let mut metrics = self.metrics.lock().await;

        metrics.total_tasks += 1;

        match outcome.stage {
            Stage::Confirmed => metrics.confirmed += 1,
            Stage::TimedOut => metrics.timed_out += 1,
            _ => metrics.errored += 1,
        }

        metrics.task_durations.insert(outcome.task_id, outcome.duration_ms);

        // Update completion rate (every minute)
        let now = Utc::now();

        if let Some((last_time, count)) = metrics.completion_rate.last_mut() {
            if (now - *last_time).num_seconds() < 60 {
                *count += 1;
            } else {
                metrics.completion_rate.push((now, 1));
            }
        } else {
            metrics.completion_rate.push((now, 1));
        }

        let elapsed_minutes = ((now - metrics.start_time).num_milliseconds().max(1) as f64) / 60_000.0;
        metrics.current_tpm = metrics.total_tasks as f64 / elapsed_minutes;
    }

    /// Get all metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
