use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thirtyfour::components::SelectElement;
use thirtyfour::prelude::*;
use tracing::{debug, error, warn};

use crate::browser::driver::{
    BrowserSession, ElementKind, PageElement, SelectOption, SessionFactory, SuccessIndicator,
};
use crate::cli::config::BrowserSettings;
use crate::form::Locator;

/// Poll interval for element waits
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Opens Chrome sessions through a WebDriver server
pub struct WebDriverSessionFactory {
    config: BrowserSettings,
}

impl WebDriverSessionFactory {
    pub fn new(config: BrowserSettings) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for WebDriverSessionFactory {
    async fn open(&self, headless: bool) -> Result<Box<dyn BrowserSession>> {
        let mut caps = DesiredCapabilities::chrome();

        if headless {
            caps.set_headless()?;
        }

        caps.add_chrome_arg(&format!(
            "--window-size={},{}",
            self.config.viewport.width, self.config.viewport.height
        ))?;
        caps.add_chrome_arg("--disable-gpu")?;
        caps.add_chrome_arg("--no-sandbox")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;
        caps.add_chrome_arg("--log-level=3")?;

        for arg in &self.config.chrome_args {
            caps.add_chrome_arg(arg)?;
        }

        let driver = WebDriver::new(&self.config.webdriver_url, caps)
            .await
            .context(format!(
                "Failed to connect to WebDriver at {}",
                self.config.webdriver_url
            ))?;

        driver
            .set_page_load_timeout(Duration::from_secs(self.config.page_load_timeout_secs))
            .await?;

        debug!("Browser session opened (headless: {})", headless);

        Ok(Box::new(WebDriverSession {
            driver: Some(driver),
        }))
    }
}

/// Browser session backed by a thirtyfour `WebDriver`
pub struct WebDriverSession {
    driver: Option<WebDriver>,
}

impl WebDriverSession {
    fn driver(&self) -> Result<&WebDriver> {
        self.driver
            .as_ref()
            .context("Browser session already released")
    }
}

fn by(locator: &Locator) -> By {
    match locator {
        Locator::Id(id) => By::Id(id),
        Locator::Css(css) => By::Css(css),
    }
}

/// XPath string literal that survives embedded quotes
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let pieces: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", pieces.join(", \"'\", "))
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!("Navigating to: {}", url);
        self.driver()?
            .goto(url)
            .await
            .context(format!("Failed to navigate to URL: {}", url))?;

        Ok(())
    }

    async fn find(&self, locator: &Locator, wait: Duration) -> Result<Option<Box<dyn PageElement>>> {
        let driver = self.driver()?;

        match driver
            .query(by(locator))
            .wait(wait, POLL_INTERVAL)
            .first()
            .await
        {
            Ok(element) => Ok(Some(Box::new(WebDriverElement {
                driver: driver.clone(),
                element,
            }))),
            Err(e) => {
                debug!("Element {} not found within {:?}: {}", locator, wait, e);
                Ok(None)
            }
        }
    }

    async fn wait_for_success(&self, indicator: &SuccessIndicator, wait: Duration) -> Result<bool> {
        let driver = self.driver()?;

        let xpath;
        let by = match indicator {
            SuccessIndicator::Text(text) => {
                xpath = format!("//*[contains(text(), {})]", xpath_literal(text));
                By::XPath(&xpath)
            }
            SuccessIndicator::Selector(css) => By::Css(css),
        };

        Ok(driver.query(by).wait(wait, POLL_INTERVAL).exists().await?)
    }

    async fn page_source(&self) -> Result<String> {
        let source = self.driver()?
            .source()
            .await
            .context("Failed to get page source")?;

        Ok(source)
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        if let Some(driver) = self.driver.take() {
            driver.quit().await.context("Failed to close browser session")?;
            debug!("Browser session closed");
        }

        Ok(())
    }

    fn keep_open(mut self: Box<Self>) {
        if let Some(driver) = self.driver.take() {
            // Skips Drop so the remote session and its window stay alive
            std::mem::forget(driver);
        }
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            warn!("Browser session dropped without being released, closing it");
            tokio::spawn(async move {
                if let Err(e) = driver.quit().await {
                    error!("Error closing browser session during drop: {}", e);
                }
            });
        }
    }
}

/// A `WebElement` together with the driver needed to run scripts against it
pub struct WebDriverElement {
    driver: WebDriver,
    element: WebElement,
}

impl WebDriverElement {
    async fn run_script(&self, script: &str) -> Result<()> {
        self.driver
            .execute(script, vec![self.element.to_json()?])
            .await
            .context("Failed to execute script on element")?;

        Ok(())
    }
}

#[async_trait]
impl PageElement for WebDriverElement {
    async fn kind(&self) -> Result<ElementKind> {
        let tag = self.element.tag_name().await?;
        let input_type = self.element.attr("type").await?;

        Ok(ElementKind::classify(&tag, input_type.as_deref()))
    }

    async fn options(&self) -> Result<Vec<SelectOption>> {
        let select = SelectElement::new(&self.element).await?;

        let mut options = Vec::new();
        for option in select.options().await? {
            options.push(SelectOption {
                text: option.text().await?,
                value: option.attr("value").await?.unwrap_or_default(),
            });
        }

        Ok(options)
    }

    async fn select_by_text(&self, text: &str) -> Result<()> {
        let select = SelectElement::new(&self.element).await?;
        select
            .select_by_visible_text(text)
            .await
            .context(format!("Failed to select option '{}'", text))?;

        Ok(())
    }

    async fn dispatch_change(&self) -> Result<()> {
        self.run_script("arguments[0].dispatchEvent(new Event('change', { bubbles: true }));")
            .await
    }

    async fn clear(&self) -> Result<()> {
        self.element.clear().await?;
        Ok(())
    }

    async fn send_keys(&self, text: &str) -> Result<()> {
        self.element.send_keys(text).await?;
        Ok(())
    }

    async fn activate(&self) -> Result<()> {
        self.run_script("arguments[0].click();").await
    }

    async fn click(&self) -> Result<()> {
        self.element.click().await?;
        Ok(())
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>> {
        let png = self
            .element
            .screenshot_as_png()
            .await
            .context("Failed to capture element screenshot")?;

        Ok(png)
    }
}
