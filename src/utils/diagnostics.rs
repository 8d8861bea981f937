use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a recoverable problem reported during a call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// An allow-list named something that was not discovered
    UnknownName,
    /// NaN cells remain in an extracted matrix
    MissingValues,
    /// A model-type string that no family answers to
    UnknownModelType,
    /// A correlation-type string that is not recognised
    UnknownCorrelationType,
    /// A model family failed for one property
    FamilyFailed,
    /// A property could not be trained at all
    PropertySkipped,
    /// Validation settings had to be adjusted to the data size
    ValidationAdjusted,
    /// Prediction inputs do not line up with what training recorded
    FeatureMismatch,
    /// No usable model for a requested property
    MissingModel,
    /// Distinct sources mapped to the same column name
    NameCollision,
}

/// A non-fatal warning accumulated during a call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Collector for warnings; every warning is also emitted as a `tracing` event
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, kind: WarningKind, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(kind = ?kind, "{}", message);
        self.warnings.push(Warning { kind, message });
    }

    /// Take over warnings produced by a nested call without logging them twice
    pub fn absorb(&mut self, warnings: Vec<Warning>) {
        self.warnings.extend(warnings);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn count(&self, kind: WarningKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_accumulate() {
        let mut diag = Diagnostics::new();
        diag.warn(WarningKind::UnknownName, "feature 'foo' not found");
        diag.warn(WarningKind::UnknownName, "feature 'bar' not found");
        diag.warn(WarningKind::MissingValues, "3 NaN cells");

        assert_eq!(diag.warnings().len(), 3);
        assert_eq!(diag.count(WarningKind::UnknownName), 2);
        assert_eq!(diag.count(WarningKind::FamilyFailed), 0);
    }

    #[test]
    fn test_absorb_keeps_order() {
        let mut outer = Diagnostics::new();
        outer.warn(WarningKind::MissingModel, "first");
        let mut inner = Diagnostics::new();
        inner.warn(WarningKind::FeatureMismatch, "second");
        outer.absorb(inner.into_warnings());

        let messages: Vec<&str> = outer.warnings().iter().map(|w| w.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn test_warnings_serialize_as_plain_list() {
        let mut diag = Diagnostics::new();
        diag.warn(WarningKind::NameCollision, "ftir_peak_1730 covers 2 peaks");
        let json = serde_json::to_value(diag.into_warnings()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{ "kind": "name_collision", "message": "ftir_peak_1730 covers 2 peaks" }])
        );
    }

    #[test]
    fn test_warning_display() {
        let w = Warning {
            kind: WarningKind::MissingModel,
            message: "no model for 'tga_residue'".to_string(),
        };
        assert_eq!(w.to_string(), "MissingModel: no model for 'tga_residue'");
    }
}
