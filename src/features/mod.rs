/// Name-based feature/property access and matrix extraction
pub mod accessor;
pub mod extract;
pub mod path;

// Re-export commonly used functions
pub use accessor::{resolve_feature, resolve_property};
pub use extract::{
    discover_feature_names, discover_property_names, extract_features, extract_with_names,
    Extraction,
};
pub use path::{FeaturePath, PropertyPath};
