use super::error::AnalysisError;

/// Validate a probability level lies strictly inside (0, 1)
///
/// # Arguments
/// * `name` - Parameter name used in the error message
/// * `level` - The value to validate (confidence level, significance level, holdout fraction)
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(AnalysisError::ArgumentError)` if out of range
pub fn validate_level(name: &str, level: f64) -> Result<(), AnalysisError> {
    if !(level > 0.0 && level < 1.0) {
        return Err(AnalysisError::ArgumentError(format!(
            "{} must be in (0, 1), got {}",
            name, level
        )));
    }
    Ok(())
}

/// Normalize non-negative weights so they sum to 1
///
/// Non-finite entries count as zero. Returns `None` when nothing is left to
/// normalize (all zero), so callers can fall back to another estimate.
pub fn normalize_weights(raw: &[f64]) -> Option<Vec<f64>> {
    let cleaned: Vec<f64> = raw
        .iter()
        .map(|&w| if w.is_finite() { w.abs() } else { 0.0 })
        .collect();
    let total: f64 = cleaned.iter().sum();

    if total <= 0.0 || !total.is_finite() {
        return None;
    }

    Some(cleaned.into_iter().map(|w| w / total).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_level_valid() {
        assert!(validate_level("confidence_level", 0.95).is_ok());
        assert!(validate_level("confidence_level", 0.01).is_ok());
    }

    #[test]
    fn test_validate_level_invalid() {
        assert!(validate_level("level", 0.0).is_err());
        assert!(validate_level("level", 1.0).is_err());
        assert!(validate_level("level", -0.5).is_err());
        assert!(validate_level("level", f64::NAN).is_err());
    }

    #[test]
    fn test_validate_level_error_message() {
        let err = validate_level("confidence_level", 1.5).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ArgumentError: confidence_level must be in (0, 1), got 1.5"
        );
    }

    #[test]
    fn test_normalize_weights_normal() {
        let weights = normalize_weights(&[1.0, 3.0]).unwrap();
        assert_eq!(weights, vec![0.25, 0.75]);
    }

    #[test]
    fn test_normalize_weights_uses_magnitude() {
        let weights = normalize_weights(&[-2.0, 2.0, f64::NAN]).unwrap();
        assert_eq!(weights, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_normalize_weights_all_zero() {
        assert!(normalize_weights(&[0.0, 0.0]).is_none());
        assert!(normalize_weights(&[]).is_none());
    }
}
