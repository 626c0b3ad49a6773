use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::form::Locator;

/// The closed set of element kinds the binder knows how to fill
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Selection,
    TextLike,
    Boolean,
    TextArea,
    Unsupported(String),
}

impl ElementKind {
    /// Classify an element from its tag name and, for inputs, its `type` attribute
    pub fn classify(tag: &str, input_type: Option<&str>) -> Self {
        match tag.to_lowercase().as_str() {
            "select" => ElementKind::Selection,
            "textarea" => ElementKind::TextArea,
            "input" => {
                let input_type = input_type.unwrap_or("text").to_lowercase();
                match input_type.as_str() {
                    "text" | "number" | "email" | "tel" | "password" => ElementKind::TextLike,
                    "checkbox" | "radio" => ElementKind::Boolean,
                    other => ElementKind::Unsupported(format!("input[type={}]", other)),
                }
            }
            other => ElementKind::Unsupported(other.to_string()),
        }
    }
}

/// One entry of a selection element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub text: String,
    pub value: String,
}

/// How the page signals an accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessIndicator {
    /// Any element whose text contains this string
    Text(String),
    /// Any element matching this CSS selector
    Selector(String),
}

/// A located element on a live page
#[async_trait]
pub trait PageElement: Send + Sync {
    async fn kind(&self) -> Result<ElementKind>;

    async fn options(&self) -> Result<Vec<SelectOption>>;

    async fn select_by_text(&self, text: &str) -> Result<()>;

    /// Fire a synthetic `change` event so page scripts react to a programmatic selection
    async fn dispatch_change(&self) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn send_keys(&self, text: &str) -> Result<()>;

    /// Toggle a checkbox or radio through a script click, which also works on hidden inputs
    async fn activate(&self) -> Result<()>;

    async fn click(&self) -> Result<()>;

    async fn screenshot_png(&self) -> Result<Vec<u8>>;
}

/// A browser session owned by exactly one task
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Locate an element, waiting up to `wait`. `Ok(None)` when it never shows up.
    async fn find(&self, locator: &Locator, wait: Duration) -> Result<Option<Box<dyn PageElement>>>;

    /// Wait up to `wait` for the success indicator; `Ok(false)` when it never appears
    async fn wait_for_success(&self, indicator: &SuccessIndicator, wait: Duration) -> Result<bool>;

    async fn page_source(&self) -> Result<String>;

    /// Tear the session down
    async fn close(self: Box<Self>) -> Result<()>;

    /// Give up ownership without closing, leaving the window for an operator
    fn keep_open(self: Box<Self>);
}

/// Opens browser sessions
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, headless: bool) -> Result<Box<dyn BrowserSession>>;
}
