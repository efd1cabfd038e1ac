//! Validation helpers for quiz content.

use validator::ValidationError;

/// Lowest amount of points a question can be worth.
pub const MIN_POINTS: u32 = 10;
/// Highest amount of points a question can be worth.
pub const MAX_POINTS: u32 = 100;

/// Validates that question points are a multiple of 10 between 10 and 100.
///
/// # Examples
///
/// ```ignore
/// validate_points(40)  // Ok
/// validate_points(45)  // Err - not a multiple of 10
/// validate_points(110) // Err - too high
/// ```
pub fn validate_points(points: u32) -> Result<(), ValidationError> {
    if !(MIN_POINTS..=MAX_POINTS).contains(&points) {
        let mut err = ValidationError::new("points_range");
        err.message = Some(
            format!("Points must be between {MIN_POINTS} and {MAX_POINTS} (got {points})").into(),
        );
        return Err(err);
    }

    if points % 10 != 0 {
        let mut err = ValidationError::new("points_step");
        err.message = Some(format!("Points must be a multiple of 10 (got {points})").into());
        return Err(err);
    }

    Ok(())
}

/// Validates the choices of a multiple choice question: 2 to 4 choices, at least one correct and
/// one wrong.
pub fn validate_qcm_choices(correct_flags: &[bool]) -> Result<(), ValidationError> {
    if !(2..=4).contains(&correct_flags.len()) {
        let mut err = ValidationError::new("choices_count");
        err.message = Some(
            format!(
                "A multiple choice question needs 2 to 4 choices (got {})",
                correct_flags.len()
            )
            .into(),
        );
        return Err(err);
    }

    let correct = correct_flags.iter().filter(|flag| **flag).count();
    if correct == 0 || correct == correct_flags.len() {
        let mut err = ValidationError::new("choices_balance");
        err.message = Some("At least one choice must be correct and one must be wrong".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_points_valid() {
        assert!(validate_points(10).is_ok());
        assert!(validate_points(40).is_ok());
        assert!(validate_points(100).is_ok());
    }

    #[test]
    fn test_validate_points_invalid() {
        assert!(validate_points(0).is_err());
        assert!(validate_points(45).is_err());
        assert!(validate_points(110).is_err());
    }

    #[test]
    fn test_validate_qcm_choices() {
        assert!(validate_qcm_choices(&[true, false]).is_ok());
        assert!(validate_qcm_choices(&[true, true, false, false]).is_ok());
        assert!(validate_qcm_choices(&[true]).is_err()); // too few
        assert!(validate_qcm_choices(&[true, false, false, false, false]).is_err()); // too many
        assert!(validate_qcm_choices(&[false, false]).is_err()); // nothing correct
        assert!(validate_qcm_choices(&[true, true]).is_err()); // nothing wrong
    }
}
