//! Input validation guards
//!
//! Small reusable checks used when constructing chat entities. Each guard
//! returns the (possibly normalized) value on success.

use thiserror::Error;

/// A user-supplied value failed validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// Trim `value` and reject it if nothing is left.
pub fn validate_non_empty(value: &str, field_name: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError(format!("{} cannot be empty", field_name)));
    }
    Ok(trimmed.to_string())
}

/// Reject `value` if it is longer than `max` characters.
///
/// Length is counted in `char`s, not bytes.
pub fn validate_length<'a>(
    value: &'a str,
    max: usize,
    field_name: &str,
) -> Result<&'a str, ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError(format!(
            "{} cannot exceed {} characters",
            field_name, max
        )));
    }
    Ok(value)
}
