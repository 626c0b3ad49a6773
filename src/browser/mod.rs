pub mod driver;
pub mod session;

#[cfg(test)]
pub mod testing;

// Re-export common types
pub use driver::{BrowserSession, ElementKind, PageElement, SelectOption, SessionFactory, SuccessIndicator};
pub use session::WebDriverSessionFactory;
