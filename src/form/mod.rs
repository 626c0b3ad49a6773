pub mod binder;
pub mod field_map;
pub mod normalize;

// Re-export common types
pub use binder::FieldBinder;
pub use field_map::{keys, FieldMap, Locator};
pub use normalize::{identity_column_mapping, Record};
