use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::browser::SuccessIndicator;
use crate::cli::config::FillerConfig;
use crate::error::RunError;
use crate::form::{keys, FieldMap, Record};

/// Run-scoped, read-only configuration shared by every task
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub url: String,
    pub field_map: FieldMap,
    pub success_indicator: SuccessIndicator,
    pub headless: bool,
    pub keep_failed_session: bool,
    pub solve_captcha: bool,
    /// Ordered inference credentials
    pub api_keys: Vec<String>,
    pub task_timeout: Duration,
    pub element_wait: Duration,
    pub confirmation_wait: Duration,
    pub settle_delay: Duration,
}

impl RunSettings {
    /// Freeze a validated configuration together with the resolved field map
    pub fn from_config(config: &FillerConfig, field_map: FieldMap) -> Result<Self, RunError> {
        let url = config
            .form
            .url
            .clone()
            .ok_or_else(|| RunError::Configuration("target url is missing".to_string()))?;

        Ok(Self {
            url,
            field_map,
            success_indicator: config.form.success_indicator.clone(),
            headless: config.runner.headless,
            keep_failed_session: config.runner.keep_failed_session,
            solve_captcha: config.solver.enabled,
            api_keys: config.solver.api_keys.clone(),
            task_timeout: Duration::from_secs(config.runner.task_timeout_secs),
            element_wait: Duration::from_secs(config.runner.element_wait_secs),
            confirmation_wait: Duration::from_secs(config.runner.confirmation_wait_secs),
            settle_delay: Duration::from_millis(config.runner.settle_delay_ms),
        })
    }
}

/// One submission attempt: a record with its slot values injected
#[derive(Debug, Clone)]
pub struct Task {
    pub id: usize,
    pub record: Record,
    pub settings: Arc<RunSettings>,
}

impl Task {
    pub fn display_name(&self) -> String {
        self.record.display_name(&format!("row {}", self.id))
    }

    pub fn sales_date(&self) -> Option<String> {
        self.record.get(keys::SALES_DATE).map(str::to_string)
    }
}

/// States a task moves through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    SessionOpened,
    FieldsPopulated,
    ChallengeResolved,
    Submitted,
    Confirmed,
    TimedOut,
    Errored,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::SessionOpened => "session opened",
            Stage::FieldsPopulated => "fields populated",
            Stage::ChallengeResolved => "challenge resolved",
            Stage::Submitted => "submitted",
            Stage::Confirmed => "confirmed",
            Stage::TimedOut => "timed out",
            Stage::Errored => "errored",
        };
        write!(f, "{}", name)
    }
}

/// Terminal classification of exactly one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub task_id: usize,
    pub success: bool,
    pub display_name: String,
    /// Terminal state: confirmed, timed out or errored
    pub stage: Stage,
    /// Last state passed before the task ended
    pub reached: Stage,
    pub sales_date: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Outcome {
    pub fn errored(task: &Task, reached: Stage, error: impl ToString, duration_ms: u64) -> Self {
        Self {
            task_id: task.id,
            success: false,
            display_name: task.display_name(),
            stage: Stage::Errored,
            reached,
            sales_date: task.sales_date(),
            error: Some(error.to_string()),
            duration_ms,
        }
    }
}

/// Aggregated result of one run, ordered by task id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub outcomes: Vec<Outcome>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, mut outcomes: Vec<Outcome>) -> Self {
        outcomes.sort_by_key(|outcome| outcome.task_id);
        let succeeded = outcomes.iter().filter(|outcome| outcome.success).count();

        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            total: outcomes.len(),
            succeeded,
            outcomes,
        }
    }

    pub fn failed(&self) -> usize {
        self.total - self.succeeded
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|outcome| !outcome.success)
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> RunSettings {
    RunSettings {
        url: "http://localhost/form".to_string(),
        field_map: FieldMap::new(),
        success_indicator: SuccessIndicator::Text("OK".to_string()),
        headless: true,
        keep_failed_session: false,
        solve_captcha: false,
        api_keys: Vec::new(),
        task_timeout: Duration::from_secs(5),
        element_wait: Duration::from_millis(10),
        confirmation_wait: Duration::from_millis(10),
        settle_delay: Duration::ZERO,
    }
}
