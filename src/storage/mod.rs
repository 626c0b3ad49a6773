pub mod dataset;
pub mod report;

// Re-export common types
pub use dataset::Dataset;
pub use report::export_as_json;
