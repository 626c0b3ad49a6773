//! In-memory browser used by the binder, worker and orchestrator tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::browser::driver::{
    BrowserSession, ElementKind, PageElement, SelectOption, SessionFactory, SuccessIndicator,
};
use crate::form::field_map::Locator;

type Confirm = dyn Fn(&HashMap<String, String>) -> bool + Send + Sync;

/// Shape of one element on the fake page
#[derive(Clone)]
pub struct FakeElementSpec {
    pub tag: String,
    pub input_type: Option<String>,
    pub options: Vec<SelectOption>,
}

impl FakeElementSpec {
    pub fn input(input_type: &str) -> Self {
        Self {
            tag: "input".to_string(),
            input_type: Some(input_type.to_string()),
            options: Vec::new(),
        }
    }

    pub fn select(options: &[(&str, &str)]) -> Self {
        Self {
            tag: "select".to_string(),
            input_type: None,
            options: options
                .iter()
                .map(|(text, value)| SelectOption {
                    text: text.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        }
    }

    pub fn tag(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            input_type: None,
            options: Vec::new(),
        }
    }
}

/// State shared by a fake session and the elements it hands out
#[derive(Default)]
struct PageState {
    /// locator -> current value (typed text, selected option, "checked")
    values: HashMap<String, String>,
    actions: Vec<String>,
}

/// A page description plus counters observable from tests
pub struct FakeBrowser {
    elements: HashMap<String, FakeElementSpec>,
    confirm: Arc<Confirm>,
    fail_open: bool,
    panic_open: bool,
    hang_close: bool,
    confirm_delay: Option<Duration>,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub kept_open: AtomicUsize,
    /// Most sessions open at the same time
    pub peak_open: AtomicUsize,
    log: Mutex<Vec<Vec<String>>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self {
            elements: HashMap::new(),
            confirm: Arc::new(|_| true),
            fail_open: false,
            panic_open: false,
            hang_close: false,
            confirm_delay: None,
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            kept_open: AtomicUsize::new(0),
            peak_open: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_element(mut self, locator: &str, spec: FakeElementSpec) -> Self {
        self.elements.insert(locator.to_string(), spec);
        self
    }

    /// Decide per session, from the values entered so far, whether submit is confirmed
    pub fn confirm_when(
        mut self,
        confirm: impl Fn(&HashMap<String, String>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.confirm = Arc::new(confirm);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Blow up inside `open`, as a crashing worker would
    pub fn panicking_open(mut self) -> Self {
        self.panic_open = true;
        self
    }

    /// Never finish closing a session
    pub fn hanging_close(mut self) -> Self {
        self.hang_close = true;
        self
    }

    /// Make the confirmation wait hang for `delay` before answering
    pub fn stall_confirmation(mut self, delay: Duration) -> Self {
        self.confirm_delay = Some(delay);
        self
    }

    /// Actions of every session that has been released
    pub fn session_logs(&self) -> Vec<Vec<String>> {
        self.log.lock().unwrap().clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
            - self.closed.load(Ordering::SeqCst)
            - self.kept_open.load(Ordering::SeqCst)
    }

    pub fn session(self: &Arc<Self>) -> FakeSession {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.peak_open.fetch_max(self.open_sessions(), Ordering::SeqCst);
        FakeSession {
            browser: Arc::clone(self),
            state: Arc::new(Mutex::new(PageState::default())),
        }
    }
}

/// Factory handing out sessions on a shared `FakeBrowser`
pub struct FakeFactory(pub Arc<FakeBrowser>);

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self, _headless: bool) -> Result<Box<dyn BrowserSession>> {
        if self.0.panic_open {
            panic!("webdriver connection poisoned");
        }
        if self.0.fail_open {
            bail!("chrome failed to start");
        }
        Ok(Box::new(self.0.session()))
    }
}

pub struct FakeSession {
    browser: Arc<FakeBrowser>,
    state: Arc<Mutex<PageState>>,
}

impl FakeSession {
    pub fn actions(&self) -> Vec<String> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn value(&self, locator: &str) -> Option<String> {
        self.state.lock().unwrap().values.get(locator).cloned()
    }

    fn flush_log(&self) {
        let actions = self.actions();
        self.browser.log.lock().unwrap().push(actions);
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.state.lock().unwrap().actions.push(format!("goto {}", url));
        Ok(())
    }

    async fn find(&self, locator: &Locator, _wait: Duration) -> Result<Option<Box<dyn PageElement>>> {
        Ok(self.browser.elements.get(locator.as_str()).map(|spec| {
            Box::new(FakeElement {
                locator: locator.as_str().to_string(),
                spec: spec.clone(),
                state: Arc::clone(&self.state),
            }) as Box<dyn PageElement>
        }))
    }

    async fn wait_for_success(&self, _indicator: &SuccessIndicator, _wait: Duration) -> Result<bool> {
        if let Some(delay) = self.browser.confirm_delay {
            tokio::time::sleep(delay).await;
        }
        let values = self.state.lock().unwrap().values.clone();
        Ok((self.browser.confirm)(&values))
    }

    async fn page_source(&self) -> Result<String> {
        Ok("<html><body><form id=\"f\"></form></body></html>".to_string())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if self.browser.hang_close {
            std::future::pending::<()>().await;
        }
        self.flush_log();
        self.browser.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn keep_open(self: Box<Self>) {
        self.flush_log();
        self.browser.kept_open.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeElement {
    locator: String,
    spec: FakeElementSpec,
    state: Arc<Mutex<PageState>>,
}

impl FakeElement {
    fn record(&self, action: String) {
        self.state.lock().unwrap().actions.push(action);
    }
}

#[async_trait]
impl PageElement for FakeElement {
    async fn kind(&self) -> Result<ElementKind> {
        Ok(ElementKind::classify(&self.spec.tag, self.spec.input_type.as_deref()))
    }

    async fn options(&self) -> Result<Vec<SelectOption>> {
        Ok(self.spec.options.clone())
    }

    async fn select_by_text(&self, text: &str) -> Result<()> {
        if !self.spec.options.iter().any(|o| o.text == text) {
            bail!("no option with text '{}'", text);
        }
        let mut state = self.state.lock().unwrap();
        state.values.insert(self.locator.clone(), text.to_string());
        state.actions.push(format!("select {}={}", self.locator, text));
        Ok(())
    }

    async fn dispatch_change(&self) -> Result<()> {
        self.record(format!("change {}", self.locator));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.state.lock().unwrap().values.remove(&self.locator);
        Ok(())
    }

    async fn send_keys(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .values
            .entry(self.locator.clone())
            .or_default()
            .push_str(text);
        state.actions.push(format!("type {}={}", self.locator, text));
        Ok(())
    }

    async fn activate(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.values.insert(self.locator.clone(), "checked".to_string());
        state.actions.push(format!("check {}", self.locator));
        Ok(())
    }

    async fn click(&self) -> Result<()> {
        self.record(format!("click {}", self.locator));
        Ok(())
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}
