use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserSession, SessionFactory};
use crate::captcha::{solve, ImageToText, ManualEntry};
use crate::error::TaskError;
use crate::form::{keys, FieldBinder};
use crate::runner::task::{Outcome, Stage, Task};

/// Collaborators every worker shares; none of them hold per-task state
#[derive(Clone)]
pub struct WorkerContext {
    pub factory: Arc<dyn SessionFactory>,
    pub recognizer: Arc<dyn ImageToText>,
    pub manual: Arc<dyn ManualEntry>,
}

/// Marks a deadline whose clock is running
const NOT_HELD: u64 = u64::MAX;

/// The time budget of one task, shared between the worker and whoever collects its outcome.
///
/// The clock stops while the worker waits on the operator, so only the bounded steps count.
#[derive(Debug, Clone)]
pub struct TaskDeadline {
    started: Instant,
    budget: Duration,
    extended_ms: Arc<AtomicU64>,
    held_since_ms: Arc<AtomicU64>,
}

impl TaskDeadline {
    pub fn starting_now(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
            extended_ms: Arc::new(AtomicU64::new(0)),
            held_since_ms: Arc::new(AtomicU64::new(NOT_HELD)),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn at(&self) -> Instant {
        let extended = Duration::from_millis(self.extended_ms.load(Ordering::SeqCst));
        let held = match self.held_since_ms.load(Ordering::SeqCst) {
            NOT_HELD => Duration::ZERO,
            since => self.started.elapsed().saturating_sub(Duration::from_millis(since)),
        };
        self.started + self.budget + extended + held
    }

    /// Await `wait` with the clock stopped
    async fn hold<F: Future>(&self, wait: F) -> F::Output {
        let since = self.started.elapsed();
        self.held_since_ms.store(since.as_millis() as u64, Ordering::SeqCst);

        let output = wait.await;

        let held = self.started.elapsed().saturating_sub(since);
        self.extended_ms.fetch_add(held.as_millis() as u64, Ordering::SeqCst);
        self.held_since_ms.store(NOT_HELD, Ordering::SeqCst);
        output
    }
}

fn driver_error(e: anyhow::Error) -> TaskError {
    TaskError::Driver(format!("{:#}", e))
}

/// Run one bounded step, failing the task once the deadline has passed
async fn bounded<F: Future>(deadline: &TaskDeadline, step: F) -> Result<F::Output, TaskError> {
    timeout_at(deadline.at(), step)
        .await
        .map_err(|_| TaskError::Timeout(deadline.budget()))
}

/// Drive one task through its states on a session of its own and classify the result.
///
/// Never fails: every error becomes a failed `Outcome`. The session is closed afterwards,
/// unless the task failed and the run keeps failed sessions open.
pub async fn run_task(task: Task, ctx: &WorkerContext, deadline: TaskDeadline) -> Outcome {
    let settings = Arc::clone(&task.settings);
    let started = Instant::now();
    let elapsed_ms = || started.elapsed().as_millis() as u64;

    info!(
        "[task {}] Starting for '{}' on {}",
        task.id,
        task.display_name(),
        task.sales_date().unwrap_or_else(|| "-".to_string())
    );

    let mut session = match bounded(&deadline, ctx.factory.open(settings.headless)).await {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            let err = TaskError::SessionOpen(format!("{:#}", e));
            error!("[task {}] {}", task.id, err);
            return Outcome::errored(&task, Stage::Start, err, elapsed_ms());
        }
        Err(err) => {
            error!("[task {}] {} while opening the browser", task.id, err);
            return Outcome::errored(&task, Stage::Start, err, elapsed_ms());
        }
    };

    let mut reached = Stage::Start;
    let result = drive(&task, ctx, session.as_mut(), &deadline, &mut reached).await;

    let outcome = match result {
        Ok(true) => {
            info!("[task {}] Submission confirmed for '{}'", task.id, task.display_name());
            Outcome {
                task_id: task.id,
                success: true,
                display_name: task.display_name(),
                stage: Stage::Confirmed,
                reached,
                sales_date: task.sales_date(),
                error: None,
                duration_ms: elapsed_ms(),
            }
        }
        Ok(false) => {
            let detail = format!(
                "success indicator did not appear within {:?}",
                settings.confirmation_wait
            );
            warn!("[task {}] {}", task.id, detail);
            Outcome {
                task_id: task.id,
                success: false,
                display_name: task.display_name(),
                stage: Stage::TimedOut,
                reached,
                sales_date: task.sales_date(),
                error: Some(detail),
                duration_ms: elapsed_ms(),
            }
        }
        Err(err) => {
            error!("[task {}] Failed after '{}': {}", task.id, reached, err);
            Outcome::errored(&task, reached, err, elapsed_ms())
        }
    };

    if outcome.success || !settings.keep_failed_session {
        if let Err(e) = session.close().await {
            warn!("[task {}] Failed to close browser session: {}", task.id, e);
        }
    } else {
        warn!("[task {}] Leaving the browser open for inspection", task.id);
        session.keep_open();
    }

    outcome
}

/// Linear pass over the task states. `Ok(true)` once confirmed, `Ok(false)` when the
/// confirmation never showed up.
async fn drive(
    task: &Task,
    ctx: &WorkerContext,
    session: &mut dyn BrowserSession,
    deadline: &TaskDeadline,
    reached: &mut Stage,
) -> Result<bool, TaskError> {
    let settings = &task.settings;

    bounded(deadline, session.navigate(&settings.url))
        .await?
        .map_err(driver_error)?;
    *reached = Stage::SessionOpened;

    let session: &dyn BrowserSession = session;
    let binder = FieldBinder::new(
        session,
        &settings.field_map,
        settings.element_wait,
        settings.settle_delay,
        task.id,
    );

    let summary = bounded(deadline, binder.populate(&task.record)).await?;
    info!(
        "[task {}] Fields populated: {} filled, {} skipped, {} failed",
        task.id, summary.filled, summary.skipped, summary.failed
    );
    *reached = Stage::FieldsPopulated;

    resolve_challenge(task, ctx, &binder, deadline).await?;
    *reached = Stage::ChallengeResolved;

    let submit = bounded(deadline, binder.bind(keys::SUBMIT_BUTTON))
        .await?
        .ok_or(TaskError::SubmitUnresolved)?;
    bounded(deadline, submit.click()).await?.map_err(driver_error)?;
    *reached = Stage::Submitted;
    debug!("[task {}] Submitted, waiting for confirmation", task.id);

    bounded(
        deadline,
        session.wait_for_success(&settings.success_indicator, settings.confirmation_wait),
    )
    .await?
    .map_err(driver_error)
}

/// Answer the challenge if the form has one: the solver chain first when enabled, then the
/// operator when a window is visible. Headless runs submit without an answer.
///
/// The operator prompt is the one unbounded wait and stops the deadline clock.
async fn resolve_challenge(
    task: &Task,
    ctx: &WorkerContext,
    binder: &FieldBinder<'_>,
    deadline: &TaskDeadline,
) -> Result<(), TaskError> {
    let settings = &task.settings;

    if !settings.field_map.contains(keys::CAPTCHA) {
        debug!("[task {}] No challenge field mapped", task.id);
        return Ok(());
    }

    let mut answer = None;

    if settings.solve_captcha {
        answer = bounded(deadline, solve_automatically(task, ctx, binder)).await?;
    }

    if answer.is_none() {
        if settings.headless {
            warn!(
                "[task {}] No challenge answer and no visible window; submitting without it",
                task.id
            );
            return Ok(());
        }

        let reply = deadline
            .hold(ctx.manual.request(task.id, &task.display_name()))
            .await;

        match reply {
            Ok(Some(text)) => answer = Some(text),
            Ok(None) => {
                debug!("[task {}] Challenge entered in the browser", task.id);
                return Ok(());
            }
            Err(e) => {
                warn!("[task {}] Manual challenge entry failed: {}", task.id, e);
                return Ok(());
            }
        }
    }

    if let Some(text) = answer {
        if let Err(e) = bounded(deadline, binder.fill(keys::CAPTCHA, &text)).await? {
            warn!("[task {}] {}", task.id, e);
        }
    }

    Ok(())
}

async fn solve_automatically(task: &Task, ctx: &WorkerContext, binder: &FieldBinder<'_>) -> Option<String> {
    let Some(image) = binder.bind(keys::CAPTCHA_IMAGE).await else {
        warn!("[task {}] Challenge image not found", task.id);
        return None;
    };

    let png = match image.screenshot_png().await {
        Ok(png) => png,
        Err(e) => {
            warn!("[task {}] Failed to capture the challenge image: {}", task.id, e);
            return None;
        }
    };

    let solution = solve(ctx.recognizer.as_ref(), &task.settings.api_keys, &png, task.id).await;

    match (&solution.text, &solution.last_error) {
        (Some(text), _) => info!("[task {}] Challenge solved: {}", task.id, text),
        (None, Some(e)) => warn!("[task {}] Every key failed, last error: {}", task.id, e),
        (None, None) => {}
    }

    solution.text
}
