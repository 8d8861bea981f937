/// Utility modules for error handling, warnings, scaling and cancellation
pub mod cancel;
pub mod diagnostics;
pub mod error;
pub mod scaling;
pub mod type_convert;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use diagnostics::{Diagnostics, Warning, WarningKind};
pub use error::AnalysisError;
pub use scaling::{ColumnScaler, Standardization};
pub use type_convert::{normalize_weights, validate_level};
