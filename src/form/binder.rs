use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::browser::{BrowserSession, ElementKind, PageElement, SelectOption};
use crate::error::FieldError;
use crate::form::field_map::{keys, FieldMap};
use crate::form::normalize::Record;

/// How often a dependent dropdown is re-read while it populates
const OPTION_POLL: Duration = Duration::from_millis(200);

/// What happened to one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldFill {
    Selected(String),
    Typed,
    Checked,
    Skipped,
}

/// Tally of one population pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillSummary {
    pub filled: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Resolves logical field keys to elements on one live page and fills them by element kind
pub struct FieldBinder<'a> {
    session: &'a dyn BrowserSession,
    field_map: &'a FieldMap,
    wait: Duration,
    settle_delay: Duration,
    task_id: usize,
}

impl<'a> FieldBinder<'a> {
    pub fn new(
        session: &'a dyn BrowserSession,
        field_map: &'a FieldMap,
        wait: Duration,
        settle_delay: Duration,
        task_id: usize,
    ) -> Self {
        Self {
            session,
            field_map,
            wait,
            settle_delay,
            task_id,
        }
    }

    /// Locate the element for `key`, or `None` when it is unmapped or never appears
    pub async fn bind(&self, key: &str) -> Option<Box<dyn PageElement>> {
        let locator = self.field_map.locator(key)?;

        match self.session.find(&locator, self.wait).await {
            Ok(Some(element)) => Some(element),
            Ok(None) => {
                debug!("[task {}] '{}' ({}) did not appear on the page", self.task_id, key, locator);
                None
            }
            Err(e) => {
                warn!("[task {}] Failed to locate '{}' ({}): {}", self.task_id, key, locator, e);
                None
            }
        }
    }

    /// Fill every mapped field from `record`, absorbing per-field failures
    pub async fn populate(&self, record: &Record) -> FillSummary {
        let mut summary = FillSummary::default();

        for key in self.field_map.fill_order() {
            match self.fill(key, record.value(key)).await {
                Ok(FieldFill::Skipped) => summary.skipped += 1,
                Ok(fill) => {
                    debug!("[task {}] '{}': {:?}", self.task_id, key, fill);
                    summary.filled += 1;
                }
                Err(e) => {
                    warn!("[task {}] {}", self.task_id, e);
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Fill a single field according to its element kind
    pub async fn fill(&self, key: &str, value: &str) -> Result<FieldFill, FieldError> {
        let element = self
            .bind(key)
            .await
            .ok_or_else(|| FieldError::Absent(key.to_string()))?;

        let driver_error = |e: anyhow::Error| FieldError::Driver {
            key: key.to_string(),
            reason: e.to_string(),
        };

        let kind = element.kind().await.map_err(driver_error)?;

        match kind {
            ElementKind::Selection => {
                if value.is_empty() {
                    return Ok(FieldFill::Skipped);
                }

                let options = (if key == keys::SESSION {
                    self.wait_for_choices(element.as_ref()).await
                } else {
                    element.options().await
                })
                .map_err(driver_error)?;

                let chosen = match_option(key, value, &options).ok_or_else(|| {
                    FieldError::NoMatchingOption {
                        key: key.to_string(),
                        value: value.to_string(),
                    }
                })?;

                element.select_by_text(&chosen.text).await.map_err(driver_error)?;
                element.dispatch_change().await.map_err(driver_error)?;

                if key == keys::SALES_DATE {
                    // Dependent dropdowns reload after the date changes
                    sleep(self.settle_delay).await;
                }

                Ok(FieldFill::Selected(chosen.text.clone()))
            }
            ElementKind::TextLike | ElementKind::TextArea => {
                if value.is_empty() {
                    return Ok(FieldFill::Skipped);
                }

                element.clear().await.map_err(driver_error)?;
                element.send_keys(value).await.map_err(driver_error)?;

                Ok(FieldFill::Typed)
            }
            ElementKind::Boolean => {
                if key != keys::AGREE_CHECKBOX && value.is_empty() {
                    return Ok(FieldFill::Skipped);
                }

                element.activate().await.map_err(driver_error)?;

                Ok(FieldFill::Checked)
            }
            ElementKind::Unsupported(tag) => Err(FieldError::Unsupported {
                key: key.to_string(),
                tag,
            }),
        }
    }

    /// Re-read a dependent dropdown until it offers more than its placeholder, bounded by the element wait
    async fn wait_for_choices(&self, element: &dyn PageElement) -> anyhow::Result<Vec<SelectOption>> {
        let deadline = Instant::now() + self.wait;

        loop {
            let options = element.options().await?;
            if options.len() > 1 || Instant::now() >= deadline {
                return Ok(options);
            }
            sleep(OPTION_POLL).await;
        }
    }
}

/// Pick the option for `value`: exact visible text, except `session` whose labels carry extra
/// decoration and match on the first option containing the value.
pub fn match_option<'o>(key: &str, value: &str, options: &'o [SelectOption]) -> Option<&'o SelectOption> {
    if key == keys::SESSION {
        options.iter().find(|option| option.text.contains(value))
    } else {
        options.iter().find(|option| option.text == value)
    }
}
