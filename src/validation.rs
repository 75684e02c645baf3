//! # Input Validation Module
//!
//! Caller-facing validation for the data flowing through the core. Extracted
//! receipt fields are deliberately loose (unparsed strings, optional
//! everything); this module is where they get checked before anything is
//! persisted or surfaced to an end user.

use chrono::NaiveDate;

use crate::errors::{AppError, AppResult};

/// Maximum accepted merchant name length
const MAX_MERCHANT_LENGTH: usize = 120;

/// Upper bound (exclusive) for a validated transaction amount
const MAX_AMOUNT: f64 = 1_000_000.0;

/// Date formats accepted when parsing a loosely-formatted receipt date
const DATE_FORMATS: &[&str] = &[
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m/%d/%y",
    "%Y/%m/%d",
    "%Y-%m-%d",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Validate raw uploaded image bytes
///
/// Rejects empty uploads, uploads over the size bound, and byte streams that
/// are not a recognizable image format. These are fatal, caller-facing
/// errors; there is no degraded path without a usable image.
pub fn validate_image_bytes(image: &[u8], max_bytes: usize) -> AppResult<()> {
    if image.is_empty() {
        return Err(AppError::Validation("image is empty".to_string()));
    }
    if image.len() > max_bytes {
        return Err(AppError::Validation(format!(
            "image too large: {} bytes (maximum allowed: {} bytes)",
            image.len(),
            max_bytes
        )));
    }
    image::guess_format(image).map_err(|_| {
        AppError::Validation("image bytes are not a recognizable image format".to_string())
    })?;
    Ok(())
}

/// Validate and normalize a merchant name
pub fn validate_merchant(merchant: &str) -> AppResult<String> {
    let trimmed = merchant.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("merchant cannot be empty".to_string()));
    }
    if trimmed.len() > MAX_MERCHANT_LENGTH {
        return Err(AppError::Validation(format!(
            "merchant cannot be longer than {} characters",
            MAX_MERCHANT_LENGTH
        )));
    }
    Ok(trimmed.to_string())
}

/// Validate a monetary amount string coming out of extraction
///
/// Strips currency symbols and thousands separators, then requires a finite
/// positive value in a plausible range. Returns the parsed value; the
/// original string should be kept for display.
pub fn validate_amount(amount: &str) -> AppResult<f64> {
    let cleaned: String = amount
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ','))
        .collect();
    if cleaned.is_empty() {
        return Err(AppError::Validation("amount is empty".to_string()));
    }

    let value: f64 = cleaned
        .parse()
        .map_err(|_| AppError::Validation(format!("amount '{}' is not a number", amount)))?;
    if !value.is_finite() {
        return Err(AppError::Validation(format!(
            "amount '{}' is not a finite number",
            amount
        )));
    }
    if value <= 0.0 {
        return Err(AppError::Validation(format!(
            "amount '{}' must be greater than zero",
            amount
        )));
    }
    if value >= MAX_AMOUNT {
        return Err(AppError::Validation(format!(
            "amount '{}' is implausibly large",
            amount
        )));
    }
    Ok(value)
}

/// Parse a loosely-formatted receipt date string
///
/// Extraction returns dates exactly as printed on the receipt; this tries
/// the common shapes and returns `None` when none fit. Absence of a
/// parseable date is expected, not an error.
pub fn parse_receipt_date(date: &str) -> Option<NaiveDate> {
    let trimmed = date.trim();
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    None
}
