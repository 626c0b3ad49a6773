use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use crate::error::TaskError;
use crate::runner::task::{Outcome, RunReport, Stage, Task};
use crate::runner::worker::{run_task, TaskDeadline, WorkerContext};
use crate::utils::MetricsCollector;

/// Slack on top of the task deadline before a worker is given up on
const COLLECTION_GRACE: Duration = Duration::from_secs(30);

/// Runs tasks on a bounded pool of workers and gathers their outcomes
pub struct Orchestrator {
    ctx: WorkerContext,
    pool_size: usize,
    metrics: MetricsCollector,
}

impl Orchestrator {
    pub fn new(ctx: WorkerContext, pool_size: usize) -> Self {
        Self {
            ctx,
            pool_size,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Run every task, at most `min(pool size, task count)` at a time.
    ///
    /// Each task yields exactly one outcome, whatever happens to its worker. Tasks are never
    /// retried.
    pub async fn run(&self, tasks: Vec<Task>) -> RunReport {
        let started_at = Utc::now();

        if tasks.is_empty() {
            warn!("No tasks to run");
            return RunReport::new(started_at, Vec::new());
        }

        let pool = self.pool_size.clamp(1, tasks.len());
        info!("Dispatching {} tasks to {} workers", tasks.len(), pool);

        let outcomes: Vec<Outcome> = stream::iter(tasks)
            .map(|task| self.dispatch(task))
            .buffer_unordered(pool)
            .collect()
            .await;

        let report = RunReport::new(started_at, outcomes);
        info!(
            "Run {} finished: {}/{} succeeded",
            report.run_id, report.succeeded, report.total
        );
        info!("{}", self.metrics.get_metrics().await.summary());

        report
    }

    /// Run one task on its own tokio task and wait, bounded, for its outcome.
    ///
    /// The wait ends a grace period after the task's deadline; the deadline stands still
    /// while the worker waits on the operator, and the wait moves with it.
    async fn dispatch(&self, task: Task) -> Outcome {
        let ctx = self.ctx.clone();
        let started = Instant::now();
        let deadline = TaskDeadline::starting_now(task.settings.task_timeout);

        let pending = task.clone();
        let worker_deadline = deadline.clone();
        let mut handle = tokio::spawn(async move { run_task(pending, &ctx, worker_deadline).await });

        let collected = loop {
            match timeout_at(deadline.at() + COLLECTION_GRACE, &mut handle).await {
                Ok(joined) => break Some(joined),
                Err(_) if deadline.at() + COLLECTION_GRACE > Instant::now() => continue,
                Err(_) => break None,
            }
        };

        let outcome = match collected {
            Some(Ok(outcome)) => outcome,
            Some(Err(e)) => {
                error!("[task {}] Worker crashed: {}", task.id, e);
                Outcome::errored(
                    &task,
                    Stage::Start,
                    TaskError::Driver(format!("worker crashed: {}", e)),
                    started.elapsed().as_millis() as u64,
                )
            }
            None => {
                handle.abort();
                let limit = deadline.budget() + COLLECTION_GRACE;
                error!("[task {}] No outcome within {:?}", task.id, limit);
                Outcome::errored(
                    &task,
                    Stage::Start,
                    TaskError::Timeout(limit),
                    started.elapsed().as_millis() as u64,
                )
            }
        };

        self.metrics.record_task(&outcome).await;

        if outcome.success {
            info!("[task {}] OK '{}'", outcome.task_id, outcome.display_name);
        } else {
            warn!(
                "[task {}] FAILED '{}' ({}): {}",
                outcome.task_id,
                outcome.display_name,
                outcome.stage,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{FakeBrowser, FakeFactory};
    use crate::captcha::chain::MockImageToText;
    use crate::captcha::manual::MockManualEntry;
    use crate::form::field_map::keys;
    use crate::form::normalize::Record;
    use crate::runner::generator::generate_tasks;
    use crate::runner::worker::tests::{registration_page, registration_settings, task, SlowOperator};
    use crate::browser::driver::SelectOption;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn solving_context(browser: Arc<FakeBrowser>) -> WorkerContext {
        let mut recognizer = MockImageToText::new();
        recognizer
            .expect_recognize()
            .returning(|_, _| Ok("AB12".to_string()));
        let mut manual = MockManualEntry::new();
        manual.expect_request().never();

        WorkerContext {
            factory: Arc::new(FakeFactory(browser)),
            recognizer: Arc::new(recognizer),
            manual: Arc::new(manual),
        }
    }

    /// Two records against one date, solving enabled with a working key
    fn two_person_run() -> Vec<Task> {
        let mut settings = registration_settings();
        settings.solve_captcha = true;
        settings.api_keys = vec!["k1".to_string()];
        settings.keep_failed_session = false;

        let records: Vec<Record> = ["Nguyen Van A", "Tran Thi B"]
            .iter()
            .map(|name| {
                let mut record = Record::new();
                record.insert(keys::FULL_NAME, *name);
                record
            })
            .collect();
        let dates = vec![SelectOption {
            text: "20/05/2025".to_string(),
            value: "1".to_string(),
        }];

        generate_tasks(&records, &dates, None, Arc::new(settings)).unwrap()
    }

    #[tokio::test]
    async fn test_every_task_confirmed() {
        let browser = Arc::new(registration_page());
        let orchestrator = Orchestrator::new(solving_context(browser.clone()), 2);

        let report = orchestrator.run(two_person_run()).await;

        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 2);
        assert!(report.outcomes.iter().all(|o| o.stage == Stage::Confirmed));
        assert_eq!(browser.open_sessions(), 0);
        assert_eq!(browser.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unconfirmed_task_fails_alone() {
        let browser = Arc::new(registration_page().confirm_when(|values| {
            values.get("txtHoTen").map(String::as_str) != Some("Tran Thi B")
        }));
        let orchestrator = Orchestrator::new(solving_context(browser.clone()), 2);

        let report = orchestrator.run(two_person_run()).await;

        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 1);
        let failed: Vec<&Outcome> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].display_name, "Tran Thi B");
        assert_eq!(failed[0].task_id, 2);
        assert_eq!(failed[0].stage, Stage::TimedOut);
        assert_eq!(browser.open_sessions(), 0);
        assert_eq!(browser.kept_open.load(Ordering::SeqCst), 0);

        let metrics = orchestrator.metrics().get_metrics().await;
        assert_eq!(metrics.confirmed, 1);
        assert_eq!(metrics.timed_out, 1);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrent_sessions() {
        let browser = Arc::new(registration_page().stall_confirmation(Duration::from_millis(50)));
        let orchestrator = Orchestrator::new(solving_context(browser.clone()), 2);
        let tasks: Vec<Task> = (1..=5)
            .map(|id| task(id, &format!("person {}", id), registration_settings()))
            .collect();

        let report = orchestrator.run(tasks).await;

        assert_eq!(report.total, 5);
        let ids: Vec<usize> = report.outcomes.iter().map(|o| o.task_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(browser.peak_open.load(Ordering::SeqCst) <= 2);
        assert_eq!(browser.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_session_failures_do_not_stop_the_run() {
        let browser = Arc::new(registration_page().failing_open());
        let orchestrator = Orchestrator::new(solving_context(browser.clone()), 4);

        let report = orchestrator.run(two_person_run()).await;

        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 0);
        assert!(report.outcomes.iter().all(|o| o.stage == Stage::Errored));
    }

    #[tokio::test]
    async fn test_empty_run() {
        let browser = Arc::new(FakeBrowser::new());
        let orchestrator = Orchestrator::new(solving_context(browser), 2);

        let report = orchestrator.run(Vec::new()).await;

        assert_eq!(report.total, 0);
        assert_eq!(report.succeeded, 0);
    }

    #[tokio::test]
    async fn test_crashed_worker_is_an_errored_outcome() {
        let browser = Arc::new(registration_page().panicking_open());
        let orchestrator = Orchestrator::new(solving_context(browser.clone()), 2);

        let report = orchestrator.run(two_person_run()).await;

        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 0);
        for outcome in &report.outcomes {
            assert_eq!(outcome.stage, Stage::Errored);
            assert!(outcome.error.as_deref().unwrap().contains("worker crashed"));
        }
        assert_eq!(orchestrator.metrics().get_metrics().await.errored, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_stuck_past_the_ceiling_is_given_up() {
        let browser = Arc::new(registration_page().hanging_close());
        let orchestrator = Orchestrator::new(solving_context(browser.clone()), 1);
        let tasks = vec![task(1, "Nguyen Van A", registration_settings())];
        let limit = tasks[0].settings.task_timeout + COLLECTION_GRACE;

        let report = orchestrator.run(tasks).await;

        assert_eq!(report.total, 1);
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.stage, Stage::Errored);
        assert_eq!(outcome.error, Some(TaskError::Timeout(limit).to_string()));
        assert_eq!(browser.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operator_is_waited_for() {
        let browser = Arc::new(registration_page().confirm_when(|values| {
            values.get("txtCaptcha").map(String::as_str) == Some("QR7")
        }));
        let mut settings = registration_settings();
        settings.headless = false;
        let ctx = WorkerContext {
            factory: Arc::new(FakeFactory(browser.clone())),
            recognizer: Arc::new(MockImageToText::new()),
            manual: Arc::new(SlowOperator {
                delay: COLLECTION_GRACE * 4,
                answer: "QR7",
            }),
        };
        let orchestrator = Orchestrator::new(ctx, 1);

        let report = orchestrator.run(vec![task(1, "Nguyen Van A", settings)]).await;

        assert_eq!(report.succeeded, 1, "{:?}", report.outcomes);
        assert_eq!(browser.open_sessions(), 0);
    }
}
