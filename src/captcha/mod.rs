pub mod chain;
pub mod manual;

// Re-export common types
pub use chain::{solve, ImageToText};
pub use manual::{ConsolePrompt, ManualEntry};
