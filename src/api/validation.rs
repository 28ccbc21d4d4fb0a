//! Input validation for API requests.
//!
//! Validation happens before any query is issued, so malformed input never
//! reaches the store. For collecting multiple validation errors and
//! returning them as an ApiError, use the `ValidationErrorBuilder` from the
//! `error` module.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Regex for validating email addresses (same rule the clients apply)
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();

    /// Regex for validating http(s) image URLs
    static ref HTTP_URL_REGEX: Regex = Regex::new(
        r"^https?://[a-zA-Z0-9][-a-zA-Z0-9]*(\.[a-zA-Z0-9][-a-zA-Z0-9]*)*(:\d+)?(/[-a-zA-Z0-9_%&=+@~.]+)*/?$"
    ).unwrap();
}

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 6;

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate a password
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    if password.len() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }

    Ok(())
}

/// Validate a required free-text field (display name, city label)
pub fn validate_required_text(value: &str, label: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", label));
    }

    if value.len() > 200 {
        return Err(format!("{} is too long (max 200 characters)", label));
    }

    Ok(())
}

/// Validate a strictly positive numeric field (miles, price)
pub fn validate_positive(value: f64, label: &str) -> Result<(), String> {
    if !value.is_finite() {
        return Err(format!("{} must be a number", label));
    }

    if value <= 0.0 {
        return Err(format!("{} must be positive", label));
    }

    Ok(())
}

/// Validate an optional image URL
pub fn validate_image_url(url: &Option<String>) -> Result<(), String> {
    if let Some(u) = url {
        if u.is_empty() {
            return Ok(()); // Empty string treated as no image
        }

        if u.len() > 2048 {
            return Err("Image URL is too long (max 2048 characters)".to_string());
        }

        if !HTTP_URL_REGEX.is_match(u) {
            return Err("Image URL must be a valid http(s) URL".to_string());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("a.b+c@sub.domain.io").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("spaces in@email.com").is_err());
        assert!(validate_email("missing@tld").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("hunter22").is_ok());
        assert!(validate_password("").is_err());
        assert!(validate_password("short").is_err());
    }

    #[test]
    fn test_validate_required_text() {
        assert!(validate_required_text("Dallas, TX", "Pickup city").is_ok());
        assert!(validate_required_text("", "Pickup city").is_err());
        assert!(validate_required_text("   ", "Pickup city").is_err());
        assert!(validate_required_text(&"x".repeat(201), "Pickup city").is_err());
    }

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(239.0, "Miles").is_ok());
        assert!(validate_positive(0.5, "Miles").is_ok());
        assert!(validate_positive(0.0, "Miles").is_err());
        assert!(validate_positive(-10.0, "Price").is_err());
        assert!(validate_positive(f64::NAN, "Price").is_err());
        assert!(validate_positive(f64::INFINITY, "Price").is_err());
    }

    #[test]
    fn test_validate_image_url() {
        assert!(validate_image_url(&None).is_ok());
        assert!(validate_image_url(&Some(String::new())).is_ok());
        assert!(validate_image_url(&Some("https://cdn.example.com/img/a.jpg".into())).is_ok());
        assert!(validate_image_url(&Some("ftp://example.com/a.jpg".into())).is_err());
        assert!(validate_image_url(&Some("not a url".into())).is_err());
    }
}
