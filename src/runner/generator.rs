use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, SelectOption, SessionFactory};
use crate::error::RunError;
use crate::form::{keys, Record};
use crate::runner::task::{RunSettings, Task};

/// Placeholder rows in the date dropdown carry this marker
const PLACEHOLDER_MARKER: &str = "--";

/// Keep the options a record can actually be submitted against
pub fn valid_slot_options(options: Vec<SelectOption>) -> Vec<SelectOption> {
    options
        .into_iter()
        .filter(|option| !option.value.trim().is_empty() && !option.text.contains(PLACEHOLDER_MARKER))
        .collect()
}

/// Read the valid sales dates from the live page through a short-lived headless session
pub async fn discover_slot_options(
    factory: &dyn SessionFactory,
    settings: &RunSettings,
) -> Result<Vec<SelectOption>, RunError> {
    info!("Reading available dates from {}", settings.url);

    let mut session = factory
        .open(true)
        .await
        .map_err(|e| RunError::Generation(format!("failed to open browser session: {}", e)))?;

    let result = read_slot_options(session.as_mut(), settings).await;

    if let Err(e) = session.close().await {
        warn!("Failed to close discovery session: {}", e);
    }

    let options = result.map_err(|e| RunError::Generation(format!("{:#}", e)))?;
    let options = valid_slot_options(options);

    if options.is_empty() {
        return Err(RunError::Generation("no valid sales dates found on the page".to_string()));
    }

    info!("Found {} valid dates", options.len());
    Ok(options)
}

async fn read_slot_options(
    session: &mut dyn BrowserSession,
    settings: &RunSettings,
) -> Result<Vec<SelectOption>> {
    let locator = settings
        .field_map
        .locator(keys::SALES_DATE)
        .context("field map has no sales_date entry")?;

    session
        .navigate(&settings.url)
        .await
        .context(format!("Failed to load {}", settings.url))?;

    let element = session
        .find(&locator, settings.element_wait)
        .await?
        .context(format!("date dropdown {} not found", locator))?;

    let options = element.options().await.context("Failed to read date options")?;
    debug!("Date dropdown offers {} options", options.len());

    Ok(options)
}

/// Expand records x dates into independent tasks with sequential ids starting at 1.
///
/// Each task gets its own copy of the record with the slot values injected; the run settings
/// are shared read-only.
pub fn generate_tasks(
    records: &[Record],
    slot_options: &[SelectOption],
    session_value: Option<&str>,
    settings: Arc<RunSettings>,
) -> Result<Vec<Task>, RunError> {
    if slot_options.is_empty() {
        return Err(RunError::Generation("no slot options to generate tasks from".to_string()));
    }

    let mut tasks = Vec::with_capacity(records.len() * slot_options.len());

    for record in records {
        for option in slot_options {
            let mut record = record.clone();
            record.insert(keys::SALES_DATE, option.text.clone());
            if let Some(session) = session_value {
                record.insert(keys::SESSION, session);
            }

            tasks.push(Task {
                id: tasks.len() + 1,
                record,
                settings: Arc::clone(&settings),
            });
        }
    }

    info!(
        "Generated {} tasks ({} records x {} dates)",
        tasks.len(),
        records.len(),
        slot_options.len()
    );

    Ok(tasks)
}
