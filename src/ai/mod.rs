pub mod analysis;
pub mod gemini;

// Re-export common types
pub use analysis::{infer_mapping, FormMapping};
pub use gemini::GeminiClient;
