use std::collections::BTreeMap;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SolverError;
use crate::form::field_map::FieldMap;

/// Top-level keys a form analysis reply must carry
const FIELD_MAP_KEY: &str = "field_map";
const COLUMN_MAPPING_KEY: &str = "column_mapping";

/// A text-only inference backend, called once per credential
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PromptCompletion: Send + Sync {
    async fn complete(&self, credential: &str, prompt: &str) -> Result<String, SolverError>;
}

/// Field map plus the dataset columns feeding each logical key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormMapping {
    pub field_map: FieldMap,
    #[serde(default)]
    pub column_mapping: BTreeMap<String, Option<String>>,
}

/// Reduce a page to its `<form>` elements; the whole document is kept when there are none
pub fn extract_form_markup(html: &str) -> String {
    let document = Html::parse_document(html);

    let forms: Vec<String> = match Selector::parse("form") {
        Ok(selector) => document.select(&selector).map(|form| form.html()).collect(),
        Err(_) => Vec::new(),
    };

    if forms.is_empty() {
        html.to_string()
    } else {
        forms.join("\n")
    }
}

pub fn build_prompt(markup: &str, columns: &[String]) -> String {
    let columns = serde_json::to_string(columns).unwrap_or_else(|_| "[]".to_string());

    format!(
        r##"You help fill a web registration form from spreadsheet rows. Analyse the HTML form and the spreadsheet column names below and answer with a single JSON object, with no text before or after it, holding exactly two keys: "{field_map}" and "{column_mapping}".

"{field_map}" maps each generic field name to the HTML id of the matching element, judged from labels and attributes. Use null when the page has no such field.
- "full_name": full name
- "day", "month", "year": the date of birth parts
- "phone_number": phone number
- "email": email address
- "id_card": national id card number
- "sales_date": dropdown of sale dates
- "session": dropdown of sessions
- "agree_checkbox": terms agreement checkbox
- "captcha": CAPTCHA text input
- "captcha_image_selector": a CSS selector for the CAPTCHA <img>, e.g. "#dvCaptcha img"
- "submit_button": the submit button

"{column_mapping}" maps each generic field name to the spreadsheet column holding its value, or null when no column fits. Map the date of birth column under "day".

HTML form:
```html
{markup}
```

Spreadsheet columns:
```json
{columns}
```"##,
        field_map = FIELD_MAP_KEY,
        column_mapping = COLUMN_MAPPING_KEY,
        markup = markup,
        columns = columns,
    )
}

/// Parse a form analysis reply, tolerating a Markdown code fence around the JSON
pub fn parse_mapping(reply: &str) -> Result<FormMapping, SolverError> {
    let fence = Regex::new(r"```(?:json)?").map_err(|e| SolverError::MalformedResponse(e.to_string()))?;
    let json = fence.replace_all(reply, "");

    let value: serde_json::Value = serde_json::from_str(json.trim())
        .map_err(|e| SolverError::MalformedResponse(e.to_string()))?;

    for key in [FIELD_MAP_KEY, COLUMN_MAPPING_KEY] {
        if !value.get(key).map_or(false, serde_json::Value::is_object) {
            return Err(SolverError::MalformedResponse(format!("missing '{}' object", key)));
        }
    }

    serde_json::from_value(value).map_err(|e| SolverError::MalformedResponse(e.to_string()))
}

/// Ask each credential in turn for a mapping; the first well-formed reply wins
pub async fn infer_mapping(
    completion: &dyn PromptCompletion,
    credentials: &[String],
    page_html: &str,
    columns: &[String],
) -> Result<FormMapping, SolverError> {
    let prompt = build_prompt(&extract_form_markup(page_html), columns);
    let mut last_error = SolverError::NoCredentials;

    for (index, credential) in credentials.iter().enumerate() {
        info!("Analysing form with key #{}", index + 1);

        let result = match completion.complete(credential, &prompt).await {
            Ok(reply) => parse_mapping(&reply),
            Err(e) => Err(e),
        };

        match result {
            Ok(mapping) => {
                info!(
                    "Form analysed with key #{}: {} fields mapped",
                    index + 1,
                    mapping.field_map.len()
                );
                return Ok(mapping);
            }
            Err(e) => {
                warn!("Key #{} failed: {}", index + 1, e);
                last_error = e;
            }
        }
    }

    Err(last_error)
}
